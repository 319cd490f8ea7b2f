//! x86_64 register frame and restore primitive
//!
//! The frame layout is byte-stable: `restore_context` reads it by literal
//! offset and the compile-time assertions at the bottom pin every field.

use std::arch::naked_asm;

/// Snapshot of the general-purpose CPU state
///
/// Layout (offsets read by asm):
/// ```text
/// 0x00 rax   0x08 rbx   0x10 rcx   0x18 rdx
/// 0x20 rsi   0x28 rdi   0x30 rbp   0x38 rsp
/// 0x40 r8    0x48 r9    0x50 r10   0x58 r11
/// 0x60 r12   0x68 r13   0x70 r14   0x78 r15
/// 0x80 rip   0x88 rflags
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RegisterFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

impl RegisterFrame {
    pub const fn zeroed() -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            rsp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0,
        }
    }
}

/// Integer argument registers, System V AMD64 order
const ARG_REGISTERS: usize = 6;

/// Resume execution from `frame`. Loads every general register, the flags,
/// the stack pointer and the instruction pointer; never saves and never
/// returns.
///
/// The rip/rflags staging slots are placed 128 bytes below the target rsp so
/// the red zone of a preempted leaf function is never clobbered; `ret 128`
/// consumes the rip slot and lands rsp exactly on the frame's value.
///
/// # Safety
///
/// `frame` must describe a resumable context: a valid stack pointer and an
/// instruction pointer into live code.
#[unsafe(naked)]
pub unsafe extern "C" fn restore_context(_frame: *const RegisterFrame) -> ! {
    naked_asm!(
        // rdi = frame
        "mov rsp, [rdi + 0x38]",
        "lea rsp, [rsp - 128]",
        "push qword ptr [rdi + 0x80]", // rip
        "push qword ptr [rdi + 0x88]", // rflags
        "mov rax, [rdi + 0x00]",
        "mov rbx, [rdi + 0x08]",
        "mov rcx, [rdi + 0x10]",
        "mov rdx, [rdi + 0x18]",
        "mov rsi, [rdi + 0x20]",
        "mov rbp, [rdi + 0x30]",
        "mov r8,  [rdi + 0x40]",
        "mov r9,  [rdi + 0x48]",
        "mov r10, [rdi + 0x50]",
        "mov r11, [rdi + 0x58]",
        "mov r12, [rdi + 0x60]",
        "mov r13, [rdi + 0x68]",
        "mov r14, [rdi + 0x70]",
        "mov r15, [rdi + 0x78]",
        "mov rdi, [rdi + 0x28]",
        "popfq",
        "ret 128",
    );
}

/// Return target seeded into every coroutine's initial stack.
///
/// An entry function returning here arrives with rsp off by 8 from the
/// call-convention alignment (nothing pushed a return address), so realign
/// before entering Rust.
#[unsafe(naked)]
pub unsafe extern "C" fn exit_trampoline() {
    naked_asm!(
        "and rsp, -16",
        "call {exit}",
        "ud2",
        exit = sym crate::sched::coroutine_exit,
    );
}

/// Build the initial frame for a coroutine.
///
/// `args` (at most 8 words) are seeded per the System V AMD64 ABI: the first
/// six into rdi..r9, the rest onto the initial stack. The word at the initial
/// rsp is `ret_target`, so a returning entry function lands there.
///
/// # Safety
///
/// `stack_top` must be the 16-aligned high end of a live stack region large
/// enough for the spilled arguments.
pub unsafe fn init_frame(
    frame: &mut RegisterFrame,
    stack_top: *mut u8,
    entry: usize,
    args: &[u64],
    ret_target: usize,
) {
    debug_assert!(args.len() <= weft_core::constants::MAX_ARGS);
    debug_assert_eq!(stack_top as usize % 16, 0);

    let mut sp = stack_top as usize;
    let stack_args = args.len().saturating_sub(ARG_REGISTERS);

    // Keep rsp ≡ 8 (mod 16) at entry, as if reached by a call.
    if stack_args % 2 == 1 {
        sp -= 8;
    }
    for &word in args.iter().skip(ARG_REGISTERS).rev() {
        sp -= 8;
        unsafe { *(sp as *mut u64) = word };
    }
    sp -= 8;
    unsafe { *(sp as *mut u64) = ret_target as u64 };

    *frame = RegisterFrame::zeroed();
    frame.rsp = sp as u64;
    frame.rip = entry as u64;
    frame.rflags = 0x202;

    let mut regs = [
        &mut frame.rdi as *mut u64,
        &mut frame.rsi as *mut u64,
        &mut frame.rdx as *mut u64,
        &mut frame.rcx as *mut u64,
        &mut frame.r8 as *mut u64,
        &mut frame.r9 as *mut u64,
    ]
    .into_iter();
    for &word in args.iter().take(ARG_REGISTERS) {
        unsafe { *regs.next().expect("at most six register args") = word };
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
    let gregs = unsafe { &(*uc).uc_mcontext.gregs };
    let frame = unsafe { &mut *frame };
    frame.rax = gregs[libc::REG_RAX as usize] as u64;
    frame.rbx = gregs[libc::REG_RBX as usize] as u64;
    frame.rcx = gregs[libc::REG_RCX as usize] as u64;
    frame.rdx = gregs[libc::REG_RDX as usize] as u64;
    frame.rsi = gregs[libc::REG_RSI as usize] as u64;
    frame.rdi = gregs[libc::REG_RDI as usize] as u64;
    frame.rbp = gregs[libc::REG_RBP as usize] as u64;
    frame.rsp = gregs[libc::REG_RSP as usize] as u64;
    frame.r8 = gregs[libc::REG_R8 as usize] as u64;
    frame.r9 = gregs[libc::REG_R9 as usize] as u64;
    frame.r10 = gregs[libc::REG_R10 as usize] as u64;
    frame.r11 = gregs[libc::REG_R11 as usize] as u64;
    frame.r12 = gregs[libc::REG_R12 as usize] as u64;
    frame.r13 = gregs[libc::REG_R13 as usize] as u64;
    frame.r14 = gregs[libc::REG_R14 as usize] as u64;
    frame.r15 = gregs[libc::REG_R15 as usize] as u64;
    frame.rip = gregs[libc::REG_RIP as usize] as u64;
    frame.rflags = gregs[libc::REG_EFL as usize] as u64;
}

// The asm reads these offsets as literals.
const _: () = {
    use core::mem::{offset_of, size_of};
    assert!(offset_of!(RegisterFrame, rax) == 0x00);
    assert!(offset_of!(RegisterFrame, rbx) == 0x08);
    assert!(offset_of!(RegisterFrame, rcx) == 0x10);
    assert!(offset_of!(RegisterFrame, rdx) == 0x18);
    assert!(offset_of!(RegisterFrame, rsi) == 0x20);
    assert!(offset_of!(RegisterFrame, rdi) == 0x28);
    assert!(offset_of!(RegisterFrame, rbp) == 0x30);
    assert!(offset_of!(RegisterFrame, rsp) == 0x38);
    assert!(offset_of!(RegisterFrame, r8) == 0x40);
    assert!(offset_of!(RegisterFrame, r15) == 0x78);
    assert!(offset_of!(RegisterFrame, rip) == 0x80);
    assert!(offset_of!(RegisterFrame, rflags) == 0x88);
    assert!(size_of::<RegisterFrame>() == 0x90);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_frame_register_args() {
        let mut frame = RegisterFrame::zeroed();
        let stack = crate::stack::StackRegion::allocate(4096).unwrap();
        unsafe {
            init_frame(
                &mut frame,
                stack.top(),
                0x1000,
                &[1, 2, 3, 4, 5, 6],
                0x2000,
            );
        }
        assert_eq!(frame.rip, 0x1000);
        assert_eq!(
            [frame.rdi, frame.rsi, frame.rdx, frame.rcx, frame.r8, frame.r9],
            [1, 2, 3, 4, 5, 6]
        );
        // Entry alignment: rsp ≡ 8 (mod 16), return slot holds ret_target.
        assert_eq!(frame.rsp % 16, 8);
        assert_eq!(unsafe { *(frame.rsp as *const u64) }, 0x2000);
    }

    #[test]
    fn test_init_frame_spills_seventh_and_eighth() {
        let mut frame = RegisterFrame::zeroed();
        let stack = crate::stack::StackRegion::allocate(4096).unwrap();
        unsafe {
            init_frame(
                &mut frame,
                stack.top(),
                0x1000,
                &[1, 2, 3, 4, 5, 6, 7, 8],
                0x2000,
            );
        }
        assert_eq!(frame.rsp % 16, 8);
        unsafe {
            assert_eq!(*(frame.rsp as *const u64), 0x2000);
            assert_eq!(*((frame.rsp + 8) as *const u64), 7);
            assert_eq!(*((frame.rsp + 16) as *const u64), 8);
        }
    }
}
