//! aarch64 register frame and restore primitive
//!
//! The frame holds all 31 general-purpose registers plus sp, pc and the
//! condition flags. `restore_context` cannot rebuild pc without a scratch
//! register, so x16 carries the target address and x17 stages sp/nzcv: both
//! are the AAPCS64 intra-procedure-call scratch registers and are not
//! preserved across a forced preemption. Everything else is restored exactly.

use std::arch::naked_asm;
use weft_core::constants::REGISTERS_COUNT;

/// Snapshot of the general-purpose CPU state
///
/// Layout (offsets read by asm): x0..x30 at `8 * n`, sp at 248, pc at 256,
/// pstate at 264.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RegisterFrame {
    pub x: [u64; REGISTERS_COUNT],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

impl RegisterFrame {
    pub const fn zeroed() -> Self {
        Self {
            x: [0; REGISTERS_COUNT],
            sp: 0,
            pc: 0,
            pstate: 0,
        }
    }
}

/// Integer argument registers x0..x7
const ARG_REGISTERS: usize = 8;

/// Resume execution from `frame`. Loads x0..x15 and x18..x30, sp, the nzcv
/// flags and finally branches to the saved pc via x16; never saves and never
/// returns. x16/x17 are clobbered (see module docs).
///
/// # Safety
///
/// `frame` must describe a resumable context: a valid stack pointer and a
/// program counter into live code.
#[unsafe(naked)]
pub unsafe extern "C" fn restore_context(_frame: *const RegisterFrame) -> ! {
    naked_asm!(
        // x0 = frame
        "ldr x17, [x0, #264]", // pstate
        "msr nzcv, x17",
        "ldr x17, [x0, #248]", // sp
        "mov sp, x17",
        "ldr x16, [x0, #256]", // pc
        "ldp x1, x2, [x0, #8]",
        "ldp x3, x4, [x0, #24]",
        "ldp x5, x6, [x0, #40]",
        "ldp x7, x8, [x0, #56]",
        "ldp x9, x10, [x0, #72]",
        "ldp x11, x12, [x0, #88]",
        "ldp x13, x14, [x0, #104]",
        "ldr x15, [x0, #120]",
        "ldp x18, x19, [x0, #144]",
        "ldp x20, x21, [x0, #160]",
        "ldp x22, x23, [x0, #176]",
        "ldp x24, x25, [x0, #192]",
        "ldp x26, x27, [x0, #208]",
        "ldp x28, x29, [x0, #224]",
        "ldr x30, [x0, #240]",
        "ldr x0, [x0]",
        "br x16",
    );
}

/// Return target seeded into x30 of every coroutine's initial frame
#[unsafe(naked)]
pub unsafe extern "C" fn exit_trampoline() {
    naked_asm!(
        "b {exit}",
        exit = sym crate::sched::coroutine_exit,
    );
}

/// Build the initial frame for a coroutine.
///
/// All eight argument words fit in x0..x7; x30 is `ret_target`, so a
/// returning entry function lands there.
///
/// # Safety
///
/// `stack_top` must be the 16-aligned high end of a live stack region.
pub unsafe fn init_frame(
    frame: &mut RegisterFrame,
    stack_top: *mut u8,
    entry: usize,
    args: &[u64],
    ret_target: usize,
) {
    debug_assert!(args.len() <= ARG_REGISTERS);
    debug_assert_eq!(stack_top as usize % 16, 0);

    *frame = RegisterFrame::zeroed();
    frame.sp = stack_top as u64;
    frame.pc = entry as u64;
    frame.x[30] = ret_target as u64;
    for (i, &word) in args.iter().enumerate() {
        frame.x[i] = word;
    }
}

/// Copy the kernel-supplied interrupted context into `frame`.
///
/// This is the runtime's only save point: the signal handler calls it with
/// the ucontext of the preempted coroutine.
///
/// # Safety
///
/// `uc` must be the ucontext pointer passed to an SA_SIGINFO handler on this
/// platform.
#[cfg(target_os = "linux")]
pub unsafe fn capture_frame(uc: *const libc::ucontext_t, frame: *mut RegisterFrame) {
    let mctx = unsafe { &(*uc).uc_mcontext };
    let frame = unsafe { &mut *frame };
    for i in 0..REGISTERS_COUNT {
        frame.x[i] = mctx.regs[i];
    }
    frame.sp = mctx.sp;
    frame.pc = mctx.pc;
    frame.pstate = mctx.pstate;
}

// The asm reads these offsets as literals.
const _: () = {
    use core::mem::{offset_of, size_of};
    assert!(offset_of!(RegisterFrame, x) == 0);
    assert!(offset_of!(RegisterFrame, sp) == 248);
    assert!(offset_of!(RegisterFrame, pc) == 256);
    assert!(offset_of!(RegisterFrame, pstate) == 264);
    assert!(size_of::<RegisterFrame>() == 272);
};
