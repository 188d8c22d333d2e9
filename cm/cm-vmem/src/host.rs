use crate::{AddressSpace, MapError, Protection};
use cm_addresses::{PageSize, Range};
use log::trace;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};

/// [`AddressSpace`] backed by `mmap(2)` in the current process.
#[derive(Debug)]
pub struct HostAddressSpace {
    page_size: PageSize,
}

impl HostAddressSpace {
    /// # Errors
    /// The host page size could not be determined.
    pub fn new() -> Result<Self, MapError> {
        Ok(Self {
            page_size: host_page_size()?,
        })
    }

    fn check_aligned(&self, range: Range) -> Result<usize, MapError> {
        if self.page_size.offset(range.base) != 0 || range.top < range.base {
            return Err(MapError::Misaligned(range));
        }
        usize::try_from(range.size()).map_err(|_| MapError::Misaligned(range))
    }

    fn mmap(
        &self,
        range: Range,
        protection: Protection,
        flags: i32,
        fd: i32,
        offset: u64,
    ) -> Result<(), MapError> {
        let len = self.check_aligned(range)?;
        if len == 0 {
            return Ok(());
        }
        let offset = libc::off_t::try_from(offset).map_err(|_| MapError::Misaligned(range))?;

        trace!("mmap {range} prot={protection:?} flags={flags:#x} fd={fd} offset={offset:#x}");

        // SAFETY: MAP_FIXED over an address the caller owns; the range was
        // either reserved by this process or is being reserved now.
        let res = unsafe {
            libc::mmap(
                range.base as *mut libc::c_void,
                len,
                protection.as_prot(),
                flags | libc::MAP_PRIVATE | libc::MAP_FIXED,
                fd,
                offset,
            )
        };

        if res == libc::MAP_FAILED {
            return Err(MapError::Mmap {
                range,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl AddressSpace for HostAddressSpace {
    fn page_size(&self) -> PageSize {
        self.page_size
    }

    fn reserve(&mut self, range: Range) -> Result<(), MapError> {
        self.mmap(range, Protection::NONE, libc::MAP_ANONYMOUS, -1, 0)
    }

    fn map_anonymous(&mut self, range: Range, protection: Protection) -> Result<(), MapError> {
        self.mmap(range, protection, libc::MAP_ANONYMOUS, -1, 0)
    }

    fn map_stack(&mut self, range: Range) -> Result<(), MapError> {
        self.mmap(
            range,
            Protection::READ_WRITE,
            libc::MAP_ANONYMOUS | libc::MAP_STACK,
            -1,
            0,
        )
    }

    fn map_file(
        &mut self,
        range: Range,
        protection: Protection,
        file: BorrowedFd<'_>,
        offset: u64,
    ) -> Result<(), MapError> {
        self.mmap(range, protection, 0, file.as_raw_fd(), offset)
    }

    unsafe fn zero(&mut self, range: Range) {
        let Ok(len) = usize::try_from(range.size()) else {
            return;
        };
        // SAFETY: the caller guarantees the range is mapped writable.
        unsafe {
            core::ptr::write_bytes(range.base as *mut u8, 0, len);
        }
    }
}

/// Queries `sysconf(_SC_PAGESIZE)`.
///
/// # Errors
/// The host reported no page size or a non power of two.
fn host_page_size() -> Result<PageSize, MapError> {
    // SAFETY: sysconf has no preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(raw)
        .ok()
        .and_then(PageSize::new)
        .ok_or_else(|| MapError::PageSize(io::Error::last_os_error()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_page_size_is_sane() {
        let page = host_page_size().unwrap();
        assert!(page.as_u64() >= 4096);
    }

    #[test]
    fn rejects_misaligned_ranges() {
        let mut host = HostAddressSpace::new().unwrap();
        let err = host
            .map_anonymous(Range::new(0x1234, 0x2000), Protection::READ_WRITE)
            .unwrap_err();
        assert!(matches!(err, MapError::Misaligned(_)));
    }
}
