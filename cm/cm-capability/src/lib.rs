//! # Capabilities
//!
//! A [`Capability`] bundles an address, a `[base, base + length)` bound and a
//! [`Permissions`] set. Every restricted capability handed to a compartment
//! is derived from the ambient [root](Capability::root) through a
//! [`CapabilityBuilder`], which can only ever shrink bounds and drop
//! permissions:
//!
//! ```rust
//! # use cm_capability::*;
//! let data = CapabilityBuilder::new(Capability::root())
//!     .bounds(0x1000_0000, 0x10_0000)
//!     .permissions(Permissions::new().with_load(true).with_store(true))
//!     .build()
//!     .unwrap();
//! assert_eq!(data.address(), 0x1000_0000);
//! assert!(!data.permissions().execute());
//!
//! // Widening is refused rather than silently clamped.
//! let wider = CapabilityBuilder::new(data).bounds(0x0fff_f000, 0x1000).build();
//! assert!(wider.is_err());
//! ```
//!
//! There is no capability hardware underneath: a capability placed into a
//! compartment's memory materializes as its [address word](Capability::to_word).

#![cfg_attr(not(any(test, doctest)), no_std)]

mod builder;
mod permissions;

pub use builder::CapabilityBuilder;
pub use permissions::Permissions;

use cm_addresses::Range;
use core::fmt;
use core::mem::offset_of;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum CapabilityError {
    #[error("cannot derive from a capability without a valid tag")]
    Untagged,
    #[error("requested bounds {requested} exceed the source bounds {bounds}")]
    BoundsWidening { requested: Range, bounds: Range },
    #[error("address {address:#x} lies outside the bounds {bounds}")]
    AddressOutOfBounds { address: u64, bounds: Range },
    #[error("bounds computation overflowed")]
    Overflow,
}

/// An address with an access bound and a permission set.
///
/// Layout is fixed (`#[repr(C)]`) because the compartment switch reads the
/// address word and the tag directly; see [`Capability::ADDRESS_OFFSET`] and
/// [`Capability::TAG_OFFSET`].
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Capability {
    address: u64,
    base: u64,
    length: u64,
    permissions: u32,
    tag: bool,
}

const _: () = {
    assert!(size_of::<Capability>() == 32);
    assert!(offset_of!(Capability, address) == 0);
};

impl Capability {
    /// Byte offset of the address word within a capability.
    pub const ADDRESS_OFFSET: usize = offset_of!(Self, address);

    /// Byte offset of the validity tag (one byte, non-zero when valid).
    pub const TAG_OFFSET: usize = offset_of!(Self, tag);

    /// The ambient root: the entire address space with every permission.
    ///
    /// Only the compartment manager holds this; everything given to a
    /// compartment is narrowed from it.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            address: 0,
            base: 0,
            length: u64::MAX,
            permissions: Permissions::ALL.into_bits(),
            tag: true,
        }
    }

    /// The null capability: untagged, no bounds, no permissions.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            address: 0,
            base: 0,
            length: 0,
            permissions: 0,
            tag: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// One past the last accessible byte, saturating for the root.
    #[inline]
    #[must_use]
    pub const fn top(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    #[inline]
    #[must_use]
    pub const fn bounds(&self) -> Range {
        Range::new(self.base, self.top())
    }

    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> Permissions {
        Permissions::from_bits(self.permissions)
    }

    #[inline]
    #[must_use]
    pub const fn is_tagged(&self) -> bool {
        self.tag
    }

    /// Whether the address lies within `[base, top)`.
    #[inline]
    #[must_use]
    pub const fn is_address_in_bounds(&self) -> bool {
        self.bounds().contains_address(self.address)
    }

    /// The representation a compartment sees in its own memory.
    #[inline]
    #[must_use]
    pub const fn to_word(&self) -> u64 {
        self.address
    }

    /// Moves the address, keeping bounds and permissions.
    ///
    /// For tagged capabilities the new address must lie within
    /// `[base, top]`; the one-past-the-end address is accepted so that a
    /// stack capability can point at its top.
    ///
    /// # Errors
    /// [`CapabilityError::AddressOutOfBounds`] if a tagged capability would
    /// point outside its bounds.
    pub const fn with_address(mut self, address: u64) -> Result<Self, CapabilityError> {
        if self.tag && (address < self.base || address > self.top()) {
            return Err(CapabilityError::AddressOutOfBounds {
                address,
                bounds: self.bounds(),
            });
        }
        self.address = address;
        Ok(self)
    }

    /// Restricts bounds to `[base, base + length)` and resets the address to `base`.
    pub(crate) fn restrict_bounds(mut self, base: u64, length: u64) -> Result<Self, CapabilityError> {
        if !self.tag {
            return Err(CapabilityError::Untagged);
        }
        let requested = Range::from_base_len(base, length).ok_or(CapabilityError::Overflow)?;
        if !self.bounds().contains(&requested) {
            return Err(CapabilityError::BoundsWidening {
                requested,
                bounds: self.bounds(),
            });
        }
        self.base = base;
        self.length = length;
        self.address = base;
        Ok(self)
    }

    /// Intersects the permission set; never adds a permission.
    pub(crate) const fn restrict_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = self.permissions().intersect(permissions).into_bits();
        self
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({self})")
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tag {
            return write!(f, "{:#x} (untagged)", self.address);
        }
        write!(
            f,
            "{:#x} {} {}",
            self.address,
            self.bounds(),
            self.permissions()
        )
    }
}
