/*
 * CPU Context and Register-Level Context Switching
 *
 * A direct register-save/restore switch, not an interrupt/iretq-based
 * one: `switch_context` is an ordinary function, callable from
 * `reschedule()` without going through an interrupt gate at all. This
 * routine is an external platform primitive, not part of the
 * scheduler's own correctness argument, so it is kept small and
 * doesn't try to be clever.
 */

use core::arch::asm;

use crate::task::TaskFn;

/// Saved machine state for one task. Field order is load-bearing: the
/// asm in `switch_context` addresses every field by its byte offset.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    pub rsp: u64,    // offset 0
    pub rbp: u64,    // offset 8
    pub rax: u64,    // offset 16
    pub rbx: u64,    // offset 24
    pub rcx: u64,    // offset 32
    pub rdx: u64,    // offset 40
    pub rsi: u64,    // offset 48
    pub rdi: u64,    // offset 56
    pub r8: u64,     // offset 64
    pub r9: u64,     // offset 72
    pub r10: u64,    // offset 80
    pub r11: u64,    // offset 88
    pub r12: u64,    // offset 96
    pub r13: u64,    // offset 104
    pub r14: u64,    // offset 112
    pub r15: u64,    // offset 120
    pub rflags: u64, // offset 128
    pub rip: u64,    // offset 136
}

impl CpuContext {
    pub const fn zeroed() -> Self {
        Self {
            rsp: 0,
            rbp: 0,
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rflags: 0,
            rip: 0,
        }
    }
}

/// Lay out a fresh task's stack and initial register file so that the
/// first `switch_context` into it transfers control to `trampoline`
/// with `func`/`arg` already in rdi/rsi, the System V calling
/// convention's first two integer argument registers. No naked
/// entry stub is needed as a result: `trampoline` is an ordinary
/// `extern "C" fn(TaskFn, usize) -> !` and gets called exactly as if
/// its caller had set up those registers itself, because that's
/// literally what `switch_context`'s restore phase does.
pub fn prepare_initial_context(
    stack: &mut [u8],
    trampoline: extern "C" fn(TaskFn, usize) -> !,
    func: TaskFn,
    arg: usize,
) -> CpuContext {
    let stack_top = unsafe { stack.as_mut_ptr().add(stack.len()) } as usize;
    let aligned_top = stack_top & !0xF;

    let mut ctx = CpuContext::zeroed();
    ctx.rsp = aligned_top as u64;
    ctx.rdi = func as usize as u64;
    ctx.rsi = arg as u64;
    ctx.rflags = 0x202; // IF set
    ctx.rip = trampoline as usize as u64;
    ctx
}

/// Save the caller's register file into `*old`, restore `*new`, and
/// resume execution at `new.rip` with `new`'s stack. When this task is
/// switched back to by some later call, execution resumes right after
/// this function's call site as if it had just returned normally.
///
/// # Safety
/// `old` and `new` must be valid, non-overlapping pointers to
/// `CpuContext` for the duration of the call. `new.rsp` must point
/// into a stack with at least 8 bytes free below it.
#[inline(never)]
pub unsafe fn switch_context(old: *mut CpuContext, new: *const CpuContext) {
    unsafe {
        asm!(
            "mov [rdi + 0], rsp",
            "mov [rdi + 8], rbp",
            "mov [rdi + 16], rax",
            "mov [rdi + 24], rbx",
            "mov [rdi + 32], rcx",
            "mov [rdi + 40], rdx",
            "mov [rdi + 48], rsi",
            "mov [rdi + 56], rdi",
            "mov [rdi + 64], r8",
            "mov [rdi + 72], r9",
            "mov [rdi + 80], r10",
            "mov [rdi + 88], r11",
            "mov [rdi + 96], r12",
            "mov [rdi + 104], r13",
            "mov [rdi + 112], r14",
            "mov [rdi + 120], r15",
            "pushfq",
            "pop rax",
            "mov [rdi + 128], rax",
            "lea rax, [rip + 2f]",
            "mov [rdi + 136], rax",

            "mov rsp, [rsi + 0]",
            "mov rbp, [rsi + 8]",
            "mov rax, [rsi + 16]",
            "mov rbx, [rsi + 24]",
            "mov rcx, [rsi + 32]",
            "mov rdx, [rsi + 40]",
            "mov r8, [rsi + 64]",
            "mov r9, [rsi + 72]",
            "mov r10, [rsi + 80]",
            "mov r11, [rsi + 88]",
            "mov r12, [rsi + 96]",
            "mov r13, [rsi + 104]",
            "mov r14, [rsi + 112]",
            "mov r15, [rsi + 120]",

            "mov rdi, [rsi + 128]",
            "push rdi",
            "popfq",

            "mov rdi, [rsi + 56]",
            "mov rax, [rsi + 48]",

            "push qword ptr [rsi + 136]",
            "mov rsi, rax",
            "ret",

            "2:",

            in("rdi") old,
            in("rsi") new,
            clobber_abi("C"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_context_has_no_rip() {
        let ctx = CpuContext::zeroed();
        assert_eq!(ctx.rip, 0);
        assert_eq!(ctx.rsp, 0);
    }

    #[test]
    fn prepare_initial_context_points_at_trampoline_with_args_in_place() {
        extern "C" fn dummy_trampoline(_func: TaskFn, _arg: usize) -> ! {
            loop {}
        }
        extern "C" fn dummy_task(_arg: usize) {}

        let mut stack = [0u8; 256];
        let ctx = prepare_initial_context(&mut stack, dummy_trampoline, dummy_task, 0xABCD);

        assert_eq!(ctx.rip, dummy_trampoline as usize as u64);
        assert_eq!(ctx.rdi, dummy_task as usize as u64);
        assert_eq!(ctx.rsi, 0xABCD);
        assert_eq!(ctx.rflags, 0x202);
        assert_eq!(ctx.rsp % 16, 0);
        assert!(ctx.rsp as usize <= stack.as_ptr() as usize + stack.len());
    }
}
