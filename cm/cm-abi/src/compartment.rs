//! Compartment-side half of the ABI.
//!
//! Linking this module into a static executable exports the four data words
//! the manager fills in. The entry point, `__compartment_entry`, is up to
//! the compartment itself:
//!
//! ```ignore
//! #[unsafe(no_mangle)]
//! extern "C" fn __compartment_entry(a: u64, b: u64) -> ! {
//!     cm_abi::compartment::finish(a + b)
//! }
//! ```

#![allow(non_upper_case_globals)]

use crate::arena::Arena;
use crate::{CompartmentId, MAX_ARGUMENTS, call_through, return_through};
use cm_addresses::{PageSize, Range};
use core::cell::UnsafeCell;

/// An 8-byte word written by the manager.
#[repr(transparent)]
pub struct Slot(UnsafeCell<u64>);

// SAFETY: compartments are single-threaded.
unsafe impl Sync for Slot {}

impl Slot {
    const fn new() -> Self {
        Self(UnsafeCell::new(0))
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        // SAFETY: see `Sync`; the manager writes before the compartment runs.
        unsafe { self.0.get().read_volatile() }
    }

    pub fn set(&self, value: u64) {
        // SAFETY: see `Sync`.
        unsafe { self.0.get().write_volatile(value) }
    }
}

#[unsafe(no_mangle)]
pub static __compartment_manager_call: Slot = Slot::new();

#[unsafe(no_mangle)]
pub static __compartment_manager_return: Slot = Slot::new();

#[unsafe(no_mangle)]
pub static __compartment_mmap_range_base: Slot = Slot::new();

#[unsafe(no_mangle)]
pub static __compartment_mmap_range_top: Slot = Slot::new();

/// Calls another compartment through the manager.
#[must_use]
pub fn call(id: CompartmentId, args: [u64; MAX_ARGUMENTS]) -> u64 {
    // SAFETY: the call slot holds the switch once the manager finalized us;
    // before that it is zero and the call faults.
    unsafe { call_through(__compartment_manager_call.get(), id, args) }
}

/// Hands `value` back to the caller of this compartment.
pub fn finish(value: u64) -> ! {
    // SAFETY: the manager installs the return slot before the first call.
    unsafe { return_through(__compartment_manager_return.get(), value) }
}

/// The arena as currently published, for a data region bounded by `bounds`.
#[must_use]
pub fn arena(bounds: Range, page_size: PageSize) -> Arena {
    Arena::new(
        bounds,
        __compartment_mmap_range_base.get(),
        __compartment_mmap_range_top.get(),
        page_size,
    )
}

/// Publishes the arena's new top after a successful carve.
pub fn commit(arena: &Arena) {
    __compartment_mmap_range_top.set(arena.top());
}
