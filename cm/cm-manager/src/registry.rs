//! # Compartment Registry
//!
//! One [`CompartmentDescriptor`] per identifier in a fixed, process-wide
//! table. The manager owns the table exclusively once it
//! [claims](Registry::claim) it; the switch reads it on every call and
//! writes back a descriptor's stack and thread pointer only while its
//! `update_on_return` flag is set.
//!
//! The switch addresses fields by offset, so the layout is fixed:
//!
//! | Offset | Field              |
//! |--------|--------------------|
//! | 0      | `stack`            |
//! | 32     | `data`             |
//! | 64     | `thread_pointer`   |
//! | 96     | `entry`            |
//! | 128    | `update_on_return` |
//! | 129    | `state`            |

use crate::config::MAX_COMPARTMENTS;
use cm_abi::CompartmentId;
use cm_capability::Capability;
use core::cell::UnsafeCell;
use core::mem::offset_of;
use core::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of a registry slot. Transitions only move forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CompartmentState {
    Unallocated = 0,
    /// The range is reserved and the image mapped.
    Mapped = 1,
    /// The compartment runs its own start-up code.
    Initializing = 2,
    /// Callable through the switch.
    SteadyState = 3,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CompartmentDescriptor {
    /// Stack the compartment starts on.
    pub stack: Capability,
    /// Bounds everything the compartment may touch.
    pub data: Capability,
    /// `FS` base while the compartment runs.
    pub thread_pointer: Capability,
    /// Where the switch enters the compartment.
    pub entry: Capability,
    /// Write the callee's `rsp` and `FS` base back into `stack` and
    /// `thread_pointer` when it returns.
    pub update_on_return: bool,
    pub state: CompartmentState,
}

impl CompartmentDescriptor {
    pub const UNALLOCATED: Self = Self {
        stack: Capability::null(),
        data: Capability::null(),
        thread_pointer: Capability::null(),
        entry: Capability::null(),
        update_on_return: false,
        state: CompartmentState::Unallocated,
    };

    pub(crate) const SIZE: usize = size_of::<Self>();
    pub(crate) const STACK_ADDRESS: usize = offset_of!(Self, stack) + Capability::ADDRESS_OFFSET;
    pub(crate) const THREAD_POINTER_ADDRESS: usize =
        offset_of!(Self, thread_pointer) + Capability::ADDRESS_OFFSET;
    pub(crate) const ENTRY_ADDRESS: usize = offset_of!(Self, entry) + Capability::ADDRESS_OFFSET;
    pub(crate) const ENTRY_TAG: usize = offset_of!(Self, entry) + Capability::TAG_OFFSET;
    pub(crate) const UPDATE_ON_RETURN: usize = offset_of!(Self, update_on_return);
}

const _: () = {
    assert!(offset_of!(CompartmentDescriptor, stack) == 0);
    assert!(offset_of!(CompartmentDescriptor, thread_pointer) == 64);
    assert!(offset_of!(CompartmentDescriptor, entry) == 96);
    assert!(offset_of!(CompartmentDescriptor, update_on_return) == 128);
    assert!(size_of::<bool>() == 1);
};

#[repr(C)]
#[derive(Debug)]
pub struct Registry {
    slots: UnsafeCell<[CompartmentDescriptor; MAX_COMPARTMENTS]>,
    claimed: AtomicBool,
}

// SAFETY: a single manager claims the table, and compartments run on the
// thread that called into them; there is no concurrent access.
unsafe impl Sync for Registry {}

/// The process-wide table read by the switch.
pub static REGISTRY: Registry = Registry::new();

impl Registry {
    pub(crate) const SLOTS_OFFSET: usize = offset_of!(Self, slots);

    const fn new() -> Self {
        Self {
            slots: UnsafeCell::new([CompartmentDescriptor::UNALLOCATED; MAX_COMPARTMENTS]),
            claimed: AtomicBool::new(false),
        }
    }

    /// Hands out the table once per process.
    pub(crate) fn claim(&'static self) -> Option<&'static Self> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
            .then_some(self)
    }

    pub(crate) const fn index(id: CompartmentId) -> Option<usize> {
        if id.as_usize() < MAX_COMPARTMENTS {
            Some(id.as_usize())
        } else {
            None
        }
    }

    /// Copy of the descriptor at `index`.
    pub(crate) fn load(&self, index: usize) -> CompartmentDescriptor {
        // SAFETY: index is bounds-checked by the slice access below; no
        // switch is in flight while the manager runs.
        unsafe { (&*self.slots.get())[index] }
    }

    pub(crate) fn store(&self, index: usize, descriptor: CompartmentDescriptor) {
        // SAFETY: see `load`.
        unsafe { (&mut *self.slots.get())[index] = descriptor };
    }

    /// Descriptors of every slot, for range checks.
    pub(crate) fn snapshot(&self) -> [CompartmentDescriptor; MAX_COMPARTMENTS] {
        // SAFETY: see `load`.
        unsafe { *self.slots.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_offsets_point_at_the_address_words_and_tag() {
        assert_eq!(CompartmentDescriptor::STACK_ADDRESS, 0);
        assert_eq!(CompartmentDescriptor::THREAD_POINTER_ADDRESS, 64);
        assert_eq!(CompartmentDescriptor::ENTRY_ADDRESS, 96);
        assert_eq!(CompartmentDescriptor::ENTRY_TAG, 96 + 28);
        assert_eq!(CompartmentDescriptor::UPDATE_ON_RETURN, 128);
        assert_eq!(CompartmentDescriptor::SIZE % 8, 0);
    }

    #[test]
    fn identifiers_beyond_the_table_are_rejected() {
        assert_eq!(Registry::index(CompartmentId::CLIENT), Some(0));
        assert_eq!(Registry::index(CompartmentId::new(MAX_COMPARTMENTS)), None);
    }

    #[test]
    fn unallocated_descriptor_has_no_entry() {
        let d = CompartmentDescriptor::UNALLOCATED;
        assert!(!d.entry.is_tagged());
        assert_eq!(d.state, CompartmentState::Unallocated);
    }
}
