//! # Process Address Space
//!
//! Fixed-address mappings inside the current process. Compartments share the
//! manager's address space, so "loading" one means carving a range out of it:
//!
//! 1. [`reserve`](AddressSpace::reserve) the whole range with no access,
//! 2. overlay file-backed and anonymous mappings with the right [`Protection`],
//! 3. leave everything else access-denied as guard space.
//!
//! The [`AddressSpace`] trait is the seam between layout decisions and the
//! host: [`HostAddressSpace`] performs real `mmap(2)` calls, tests substitute a
//! recorder.

mod host;
pub mod maps;

pub use host::HostAddressSpace;

use cm_addresses::{PageSize, Range};
use std::os::fd::BorrowedFd;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("mmap() of {range} failed")]
    Mmap {
        range: Range,
        #[source]
        source: std::io::Error,
    },
    #[error("range {0} is not page-aligned")]
    Misaligned(Range),
    #[error("unable to query the host page size")]
    PageSize(#[source] std::io::Error),
}

/// Page protection in `mmap(2)` format.
///
/// Layout (LSB→MSB):
/// - bit 0: read (`PROT_READ`)
/// - bit 1: write (`PROT_WRITE`)
/// - bit 2: execute (`PROT_EXEC`)
#[bitfield_struct::bitfield(u32)]
#[derive(Eq, PartialEq, Hash)]
pub struct Protection {
    #[bits(1)]
    pub read: bool,
    #[bits(1)]
    pub write: bool,
    #[bits(1)]
    pub execute: bool,
    #[bits(29)]
    __: u32,
}

impl Protection {
    pub const NONE: Self = Self::new();
    pub const READ_WRITE: Self = Self::new().with_read(true).with_write(true);

    /// `true` if every right in `required` is granted by `self`.
    #[inline]
    #[must_use]
    pub const fn satisfies(self, required: Self) -> bool {
        self.into_bits() & required.into_bits() == required.into_bits()
    }

    /// Raw `PROT_*` value.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_prot(self) -> i32 {
        self.into_bits() as i32
    }
}

const _: () = {
    assert!(Protection::new().with_read(true).as_prot() == libc::PROT_READ);
    assert!(Protection::new().with_write(true).as_prot() == libc::PROT_WRITE);
    assert!(Protection::new().with_execute(true).as_prot() == libc::PROT_EXEC);
};

/// Fixed-address mapping primitives.
///
/// All ranges must be page-aligned at their base; lengths are rounded up to
/// whole pages by the host. Every call replaces whatever was mapped there
/// before, which is how the reserved, access-denied range gets overlaid.
pub trait AddressSpace {
    fn page_size(&self) -> PageSize;

    /// Maps `range` anonymous and access-denied.
    ///
    /// # Errors
    /// The mapping could not be established.
    fn reserve(&mut self, range: Range) -> Result<(), MapError>;

    /// Maps `range` as private, zero-filled memory.
    ///
    /// # Errors
    /// The mapping could not be established.
    fn map_anonymous(&mut self, range: Range, protection: Protection) -> Result<(), MapError>;

    /// Maps `range` as a private, zero-filled stack region.
    ///
    /// # Errors
    /// The mapping could not be established.
    fn map_stack(&mut self, range: Range) -> Result<(), MapError> {
        self.map_anonymous(range, Protection::READ_WRITE)
    }

    /// Maps `range` as a private copy of `file` starting at `offset`.
    ///
    /// # Errors
    /// The mapping could not be established.
    fn map_file(
        &mut self,
        range: Range,
        protection: Protection,
        file: BorrowedFd<'_>,
        offset: u64,
    ) -> Result<(), MapError>;

    /// Zeroes `range` in place.
    ///
    /// # Safety
    /// `range` must be mapped writable in this process.
    unsafe fn zero(&mut self, range: Range);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_matches_mmap_bits() {
        let rwx = Protection::new()
            .with_read(true)
            .with_write(true)
            .with_execute(true);
        assert_eq!(
            rwx.as_prot(),
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC
        );
        assert_eq!(Protection::NONE.as_prot(), libc::PROT_NONE);
    }

    #[test]
    fn satisfies_is_superset_check() {
        let rx = Protection::new().with_read(true).with_execute(true);
        assert!(rx.satisfies(Protection::new().with_execute(true)));
        assert!(rx.satisfies(Protection::NONE));
        assert!(!rx.satisfies(Protection::READ_WRITE));
        assert!(Protection::READ_WRITE.satisfies(Protection::READ_WRITE));
    }
}
