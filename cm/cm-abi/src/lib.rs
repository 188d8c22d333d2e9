//! # Compartment ABI
//!
//! The contract shared by the compartment manager and the code it loads:
//!
//! | Symbol                            | Kind     | Size | Written by |
//! |-----------------------------------|----------|------|------------|
//! | `__compartment_entry`             | `FUNC`   | any  | compartment |
//! | `__compartment_manager_call`      | `OBJECT` | 8    | manager (at finalization) |
//! | `__compartment_manager_return`    | `OBJECT` | 8    | manager (before initialization) |
//! | `__compartment_mmap_range_base`   | `OBJECT` | 8    | manager |
//! | `__compartment_mmap_range_top`    | `OBJECT` | 8    | manager, then the compartment's allocator |
//!
//! ## Calling convention (x86-64)
//!
//! | Register              | Call                  | Return |
//! |-----------------------|-----------------------|--------|
//! | `rax`                 | target compartment id | result |
//! | `rdi, rsi, rdx, rcx, r8, r9` | arguments 0..5 | clobbered |
//!
//! The switch is entered with `call`. Inside the callee the arguments sit in
//! the same registers, so `__compartment_entry` may be an ordinary
//! `extern "C"` function of up to six words. The callee finishes by jumping
//! through its return slot with the result in `rdi`, see [`return_through`].
//!
//! The switch preserves `rbp` and `rbx` and the caller's `FS` base. Every
//! other general-purpose register, including `r12..r15`, may come back
//! scrubbed; [`call_through`] declares them clobbered.

#[cfg(not(target_arch = "x86_64"))]
compile_error!("the compartment switch is only implemented for x86-64");

pub mod arena;

#[cfg(feature = "compartment")]
pub mod compartment;

use core::fmt;

/// Code entry point of a compartment.
pub const ENTRY_SYMBOL: &str = "__compartment_entry";
/// Slot receiving the manager's call capability.
pub const MANAGER_CALL_SYMBOL: &str = "__compartment_manager_call";
/// Slot receiving the manager's return capability.
pub const MANAGER_RETURN_SYMBOL: &str = "__compartment_manager_return";
/// Lowest address of the compartment's allocation arena.
pub const ARENA_BASE_SYMBOL: &str = "__compartment_mmap_range_base";
/// Current top of the compartment's allocation arena.
pub const ARENA_TOP_SYMBOL: &str = "__compartment_mmap_range_top";

/// Size of a capability as it materializes in compartment memory.
pub const CAPABILITY_SLOT_SIZE: u64 = 8;

/// Number of argument registers carried across the switch.
pub const MAX_ARGUMENTS: usize = 6;

/// Identifier of a compartment; an index into the manager's registry.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CompartmentId(usize);

impl CompartmentId {
    pub const CLIENT: Self = Self(0);
    pub const SERVER: Self = Self(1);
    pub const COMPUTE_NODE_A: Self = Self(3);
    pub const COMPUTE_NODE_B: Self = Self(4);
    pub const COMPUTE_NODE_C: Self = Self(5);

    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for CompartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompartmentId({})", self.0)
    }
}

impl fmt::Display for CompartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Calls compartment `id` through the switch at `switch`.
///
/// Usable by the manager and by compartments alike; a compartment passes
/// the word found in its call slot.
///
/// # Safety
/// `switch` must be the address of the compartment switch and the registry
/// it consults must be populated for `id`. The switch runs foreign code on a
/// foreign stack; everything that code can reach is its own business.
#[inline(never)]
pub unsafe fn call_through(switch: u64, id: CompartmentId, args: [u64; MAX_ARGUMENTS]) -> u64 {
    let result: u64;
    unsafe {
        core::arch::asm!(
            "call r11",
            inout("r11") switch => _,
            inout("rax") id.0 as u64 => result,
            inout("rdi") args[0] => _,
            inout("rsi") args[1] => _,
            inout("rdx") args[2] => _,
            inout("rcx") args[3] => _,
            inout("r8") args[4] => _,
            inout("r9") args[5] => _,
            // The switch does not preserve the callee-saved registers it
            // can reach; let the compiler spill them.
            out("r10") _,
            out("r12") _,
            out("r13") _,
            out("r14") _,
            out("r15") _,
            clobber_abi("C"),
        );
    }
    result
}

/// Returns `value` to whoever called into the current compartment.
///
/// # Safety
/// `slot` must be the word the manager installed into the return slot, and
/// the caller must currently be running inside a compartment.
pub unsafe fn return_through(slot: u64, value: u64) -> ! {
    unsafe {
        core::arch::asm!(
            "jmp {slot}",
            slot = in(reg) slot,
            in("rdi") value,
            options(noreturn),
        );
    }
}
