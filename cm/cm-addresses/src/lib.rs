//! # Address Ranges
//!
//! Half-open address intervals and page alignment helpers used by the
//! loader, the compartment manager and the arena allocator.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Range`] | `[base, top)` interval of addresses, with an explicit [empty](Range::EMPTY) sentinel. |
//! | [`PageSize`] | A power-of-two page granularity, queried from the host at run time. |
//!
//! ```rust
//! # use cm_addresses::*;
//! let text = Range::new(0x40_0000, 0x40_2000);
//! let data = Range::new(0x40_2000, 0x40_3000);
//! assert!(!text.intersects(&data));
//!
//! let mut total = Range::EMPTY;
//! total.enlarge(&text);
//! total.enlarge(&data);
//! assert_eq!(total, Range::new(0x40_0000, 0x40_3000));
//! assert_eq!(total.size(), 0x3000);
//! ```
//!
//! ## Design Notes
//!
//! - Addresses are plain `u64` values; this crate never dereferences them.
//! - [`Range::EMPTY`] has `base = u64::MAX` and `top = 0`, so it neither
//!   intersects nor contains anything, and enlarging it by another range
//!   yields exactly that range.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_size;

pub use page_size::{PageSize, align_down, align_up};

use core::fmt;

/// A half-open range of addresses, `[base, top)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Range {
    /// Base address.
    pub base: u64,
    /// Top address, exclusive (one byte after the last byte in the range).
    pub top: u64,
}

impl Range {
    /// The empty range; intersects with and contains no range.
    pub const EMPTY: Self = Self {
        base: u64::MAX,
        top: 0,
    };

    #[inline]
    #[must_use]
    pub const fn new(base: u64, top: u64) -> Self {
        Self { base, top }
    }

    /// Builds `[base, base + length)`, or `None` if the top would overflow.
    #[inline]
    #[must_use]
    pub const fn from_base_len(base: u64, length: u64) -> Option<Self> {
        match base.checked_add(length) {
            Some(top) => Some(Self { base, top }),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.top.saturating_sub(self.base)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Strict half-open intersection test.
    #[inline]
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        self.base < other.top && other.base < self.top
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        self.base <= other.base && other.top <= self.top
    }

    #[inline]
    #[must_use]
    pub const fn contains_address(&self, address: u64) -> bool {
        self.base <= address && address < self.top
    }

    /// Grows this range to the bounding box of itself and `other`.
    #[inline]
    pub const fn enlarge(&mut self, other: &Self) {
        if other.base < self.base {
            self.base = other.base;
        }
        if other.top > self.top {
            self.top = other.top;
        }
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Range({self})")
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}]", self.base, self.top)
    }
}

impl From<core::ops::Range<u64>> for Range {
    fn from(value: core::ops::Range<u64>) -> Self {
        Self::new(value.start, value.end)
    }
}
