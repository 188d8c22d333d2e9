use crate::{Capability, CapabilityError, Permissions};

/// Chainable narrowing of a source capability.
///
/// The first failing step is remembered and reported by [`build`](Self::build);
/// later steps are skipped.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct CapabilityBuilder {
    cap: Result<Capability, CapabilityError>,
}

impl CapabilityBuilder {
    pub const fn new(source: Capability) -> Self {
        Self { cap: Ok(source) }
    }

    /// Sets the address; it must stay within the current bounds.
    pub fn address(self, address: u64) -> Self {
        Self {
            cap: self.cap.and_then(|c| c.with_address(address)),
        }
    }

    /// Sets the base and length, and resets the address to the new base since
    /// the previous address may fall outside the new bounds.
    pub fn bounds(self, base: u64, length: u64) -> Self {
        Self {
            cap: self.cap.and_then(|c| c.restrict_bounds(base, length)),
        }
    }

    /// Restricts the permission set to its intersection with `permissions`.
    pub fn permissions(self, permissions: Permissions) -> Self {
        Self {
            cap: self.cap.map(|c| c.restrict_permissions(permissions)),
        }
    }

    /// # Errors
    /// The first [`CapabilityError`] raised by any narrowing step.
    pub const fn build(self) -> Result<Capability, CapabilityError> {
        self.cap
    }
}

impl From<Capability> for CapabilityBuilder {
    fn from(value: Capability) -> Self {
        Self::new(value)
    }
}
