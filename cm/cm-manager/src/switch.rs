//! # Compartment Switch
//!
//! Two entry points implement the call/return protocol of [`cm_abi`]:
//!
//! - [`compartment_switch`], entered with `call` and the target id in `rax`,
//! - [`compartment_switch_return`], reached by a compartment jumping through
//!   its return slot with the result in `rdi`.
//!
//! Each call leaves a switch frame on the caller's stack. The frames form a
//! chain rooted in [`SWITCH_LINK`], so nested calls (a compartment calling
//! another one) unwind in order:
//!
//! ```text
//!   [rbp + 8]   return address into the caller
//!   [rbp]       caller rbp
//!   [rbp - 8]   previous link
//!   [rbp - 16]  callee descriptor
//!   [rbp - 24]  caller FS base
//!   [rbp - 32]  caller rbx
//! ```
//!
//! The `FS` base is switched with `arch_prctl(2)`.

use crate::config::MAX_COMPARTMENTS;
use crate::registry::{CompartmentDescriptor, REGISTRY, Registry};
use core::cell::UnsafeCell;

const SYS_ARCH_PRCTL: u32 = 158;
const ARCH_SET_FS: u32 = 0x1002;
const ARCH_GET_FS: u32 = 0x1003;

const _: () = assert!(SYS_ARCH_PRCTL as libc::c_long == libc::SYS_arch_prctl);

/// Frame pointer of the innermost active switch frame, or zero.
#[repr(transparent)]
pub struct SwitchLink(UnsafeCell<u64>);

// SAFETY: only touched by the switch, on the thread performing the call.
unsafe impl Sync for SwitchLink {}

pub static SWITCH_LINK: SwitchLink = SwitchLink(UnsafeCell::new(0));

/// Address of the call side of the switch.
#[must_use]
pub fn switch_address() -> u64 {
    compartment_switch as *const () as usize as u64
}

/// Address of the return trampoline.
#[must_use]
pub fn return_address() -> u64 {
    compartment_switch_return as *const () as usize as u64
}

/// Enters compartment `rax` with arguments in `rdi, rsi, rdx, rcx, r8, r9`.
///
/// Traps (`ud2`) if the id is out of range or the descriptor's entry
/// capability carries no tag.
#[unsafe(naked)]
pub unsafe extern "C" fn compartment_switch() {
    core::arch::naked_asm!(
        "push rbp",
        "mov rbp, rsp",

        // r11 = &REGISTRY.slots[rax]
        "cmp rax, {max}",
        "jae 9f",
        "imul r11, rax, {size}",
        "lea r10, [rip + {registry}]",
        "add r11, r10",
        "add r11, {slots}",
        "cmp byte ptr [r11 + {entry_tag}], 0",
        "je 9f",

        // Switch frame
        "push qword ptr [rip + {link}]",    // [rbp - 8]
        "push r11",                         // [rbp - 16]
        "sub rsp, 8",                       // [rbp - 24]
        "push rbx",                         // [rbp - 32]

        // SYSCALL clobbers rcx and r11 and needs rdi/rsi
        "push rdi",
        "push rsi",
        "push rdx",
        "push rcx",
        "push r8",
        "push r9",

        "mov eax, {arch_prctl}",
        "mov edi, {get_fs}",
        "lea rsi, [rbp - 24]",
        "syscall",

        "mov r11, [rbp - 16]",
        "mov eax, {arch_prctl}",
        "mov edi, {set_fs}",
        "mov rsi, [r11 + {tp_address}]",
        "syscall",

        "mov qword ptr [rip + {link}], rbp",

        "pop r9",
        "pop r8",
        "pop rcx",
        "pop rdx",
        "pop rsi",
        "pop rdi",

        // Initializing: start exactly on the process-entry stack (argc at
        // [rsp]). Steady state: aligned, with a null return address.
        "mov r11, [rbp - 16]",
        "cmp byte ptr [r11 + {update}], 0",
        "mov rsp, [r11 + {stack_address}]",
        "jne 2f",
        "and rsp, -16",
        "push 0",
        "2:",
        "mov r11, [r11 + {entry_address}]",

        // Nothing of the caller survives into the callee.
        "xor eax, eax",
        "xor ebx, ebx",
        "xor ebp, ebp",
        "xor r10d, r10d",
        "xor r12d, r12d",
        "xor r13d, r13d",
        "xor r14d, r14d",
        "xor r15d, r15d",
        "jmp r11",

        "9:",
        "ud2",

        max = const MAX_COMPARTMENTS,
        size = const CompartmentDescriptor::SIZE,
        registry = sym REGISTRY,
        slots = const Registry::SLOTS_OFFSET,
        entry_tag = const CompartmentDescriptor::ENTRY_TAG,
        link = sym SWITCH_LINK,
        arch_prctl = const SYS_ARCH_PRCTL,
        get_fs = const ARCH_GET_FS,
        set_fs = const ARCH_SET_FS,
        tp_address = const CompartmentDescriptor::THREAD_POINTER_ADDRESS,
        update = const CompartmentDescriptor::UPDATE_ON_RETURN,
        stack_address = const CompartmentDescriptor::STACK_ADDRESS,
        entry_address = const CompartmentDescriptor::ENTRY_ADDRESS,
    );
}

/// Unwinds the innermost switch frame with the result in `rdi`.
///
/// Traps (`ud2`) if no call is in progress.
#[unsafe(naked)]
pub unsafe extern "C" fn compartment_switch_return() {
    core::arch::naked_asm!(
        "mov r10, qword ptr [rip + {link}]",
        "test r10, r10",
        "jz 9f",

        "mov r11, [r10 - 16]",
        "cmp byte ptr [r11 + {update}], 0",
        "je 2f",
        "mov [r11 + {stack_address}], rsp",
        "2:",

        // Back on the caller's stack, below the switch frame.
        "mov rbp, r10",
        "lea rsp, [rbp - 32]",
        "push rdi",

        "mov r11, [rbp - 16]",
        "cmp byte ptr [r11 + {update}], 0",
        "je 3f",
        "mov eax, {arch_prctl}",
        "mov edi, {get_fs}",
        "lea rsi, [r11 + {tp_address}]",
        "syscall",
        "3:",

        "mov eax, {arch_prctl}",
        "mov edi, {set_fs}",
        "mov rsi, [rbp - 24]",
        "syscall",

        "pop rax",
        "pop rbx",
        "add rsp, 16",
        "pop r10",
        "mov qword ptr [rip + {link}], r10",
        "pop rbp",

        // Nothing of the callee survives into the caller but the result.
        "xor edi, edi",
        "xor esi, esi",
        "xor edx, edx",
        "xor ecx, ecx",
        "xor r8d, r8d",
        "xor r9d, r9d",
        "xor r10d, r10d",
        "xor r11d, r11d",
        "xor r12d, r12d",
        "xor r13d, r13d",
        "xor r14d, r14d",
        "xor r15d, r15d",
        "ret",

        "9:",
        "ud2",

        link = sym SWITCH_LINK,
        update = const CompartmentDescriptor::UPDATE_ON_RETURN,
        stack_address = const CompartmentDescriptor::STACK_ADDRESS,
        arch_prctl = const SYS_ARCH_PRCTL,
        get_fs = const ARCH_GET_FS,
        set_fs = const ARCH_SET_FS,
        tp_address = const CompartmentDescriptor::THREAD_POINTER_ADDRESS,
    );
}
