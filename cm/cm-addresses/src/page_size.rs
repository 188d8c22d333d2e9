use core::fmt;

/// Page granularity in bytes (always a power of two).
///
/// Unlike fixed-size page markers, the host page size is only known at run
/// time, so this is a value rather than a type parameter.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageSize(u64);

impl PageSize {
    /// 4 KiB, the base granularity on x86-64.
    pub const SIZE_4K: Self = Self(4096);

    /// Returns `None` unless `size` is a non-zero power of two.
    #[inline]
    #[must_use]
    pub const fn new(size: u64) -> Option<Self> {
        if size.is_power_of_two() {
            Some(Self(size))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Mask of the in-page offset bits.
    #[inline]
    #[must_use]
    pub const fn offset_mask(self) -> u64 {
        self.0 - 1
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self, value: u64) -> u64 {
        align_down(value, self.0)
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self, value: u64) -> Option<u64> {
        align_up(value, self.0)
    }

    #[inline]
    #[must_use]
    pub const fn offset(self, value: u64) -> u64 {
        value & self.offset_mask()
    }
}

impl fmt::Debug for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageSize({:#x})", self.0)
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} KiB", self.0 / 1024)
    }
}

/// Rounds `value` down to a multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align` (a power of two), or `None` on overflow.
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(PageSize::new(0).is_none());
        assert!(PageSize::new(3000).is_none());
        assert_eq!(PageSize::new(4096), Some(PageSize::SIZE_4K));
    }

    #[test]
    fn alignment_helpers() {
        let p = PageSize::SIZE_4K;
        assert_eq!(p.align_down(0x12345), 0x12000);
        assert_eq!(p.align_up(0x12345), Some(0x13000));
        assert_eq!(p.align_up(0x12000), Some(0x12000));
        assert_eq!(p.offset(0x12345), 0x345);
        assert_eq!(p.align_up(u64::MAX), None);
    }
}
