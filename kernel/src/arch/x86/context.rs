//! Thread context save/restore for the scheduler (component G).
//!
//! A `Context` holds the callee-saved registers plus the stack pointer;
//! `switch_to` is the only place execution moves between two kernel stacks.
//! There is no floating-point/SSE state here -- this kernel never enables
//! CR0.TS-gated lazy FPU save, matching the spec's scope (kernel threads
//! only, no user-mode FPU users yet).

#![allow(dead_code)]

use core::arch::asm;

/// A suspended thread's continuation: everything `switch_to` needs is the
/// stack pointer, since the callee-saved registers and return address live
/// on the stack itself at that point, not in this struct.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub esp: u32,
}

impl Context {
    /// Builds the initial context for a brand-new thread: hand-assembles
    /// the stack frame `switch_to`'s epilogue expects to unwind into
    /// (edi/esi/ebx/ebp zeroed, return address pointing at a trampoline
    /// that drops into `entry(arg)`).
    pub fn new_thread(stack_top: u32, entry: extern "C" fn(usize) -> !, arg: usize) -> Self {
        let mut sp = stack_top & !0xF;
        unsafe {
            sp -= 4;
            (sp as *mut u32).write(arg as u32);
            sp -= 4;
            (sp as *mut u32).write(entry as u32);
            sp -= 4;
            (sp as *mut u32).write(thread_trampoline as u32); // eip, popped by `ret`
            sp -= 4;
            (sp as *mut u32).write(0); // ebp
            sp -= 4;
            (sp as *mut u32).write(0); // ebx
            sp -= 4;
            (sp as *mut u32).write(0); // esi
            sp -= 4;
            (sp as *mut u32).write(0); // edi
        }
        Context { esp: sp }
    }
}

extern "C" fn thread_trampoline() -> ! {
    unsafe {
        asm!(
            "pop {entry}",
            "pop {arg}",
            "push {arg}",
            "call {entry}",
            entry = out(reg) _,
            arg = out(reg) _,
            options(noreturn),
        );
    }
}

/// Switches from `from`'s stack to `to`'s stack, saving the current
/// callee-saved registers into `*from` and restoring `*to`'s. Must run with
/// interrupts disabled (the scheduler's critical section covers this); the
/// incoming thread resumes as if this function had just returned.
///
/// # Safety
/// `from` and `to` must point at valid, live `Context` storage, and `to`
/// must describe a stack that is either freshly built by `new_thread` or
/// was itself suspended by a prior `switch_to`.
#[naked]
pub unsafe extern "C" fn switch_to(from: *mut Context, to: *const Context) {
    // cdecl: [esp+4] = from, [esp+8] = to (no prologue has run yet).
    asm!(
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        "mov eax, [esp + 20]", // from
        "mov [eax], esp",
        "mov eax, [esp + 24]", // to
        "mov esp, [eax]",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
        options(noreturn),
    );
}
