//! SIGURG installation, masking and the preemption handler

use crate::arch;
use crate::stack::StackRegion;
use crate::tls;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};
use weft_core::error::{RtResult, RuntimeError};
use weft_core::state::WorkerPhase;

/// The preemption signal
pub const PREEMPT_SIGNAL: libc::c_int = libc::SIGURG;

static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the process-wide SIGURG action. Idempotent.
///
/// `SA_ONSTACK` makes the handler run on the worker's alternate stack, so it
/// never borrows the interrupted coroutine's stack; `SA_SIGINFO` hands it the
/// ucontext it captures registers from.
pub fn install_preempt_handler() -> RtResult<()> {
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    // Safety: standard sigaction setup; the handler address stays valid for
    // the process lifetime.
    unsafe {
        let mut action: libc::sigaction = MaybeUninit::zeroed().assume_init();
        action.sa_sigaction = preempt_handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaddset(&mut action.sa_mask, PREEMPT_SIGNAL);
        action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_RESTART;
        if libc::sigaction(PREEMPT_SIGNAL, &action, std::ptr::null_mut()) != 0 {
            return Err(RuntimeError::SignalInstallFailed(errno()));
        }
    }
    Ok(())
}

/// Send the preemption signal to a worker's OS thread
pub fn send_preempt(thread: libc::pthread_t) -> bool {
    // Safety: pthread_kill with a live thread id; a stale id is rejected.
    unsafe { libc::pthread_kill(thread, PREEMPT_SIGNAL) == 0 }
}

fn preempt_sigset() -> libc::sigset_t {
    // Safety: sigemptyset fully initializes the set.
    unsafe {
        let mut set: libc::sigset_t = MaybeUninit::zeroed().assume_init();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, PREEMPT_SIGNAL);
        set
    }
}

/// Block SIGURG on the calling thread
pub fn mask_preempt() {
    let set = preempt_sigset();
    // Safety: valid set pointer; errors here are not actionable.
    unsafe {
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

/// Unblock SIGURG on the calling thread
pub fn unmask_preempt() {
    let set = preempt_sigset();
    // Safety: valid set pointer.
    unsafe {
        libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
    }
}

/// RAII mask around a submission critical section
pub struct MaskGuard(());

impl MaskGuard {
    pub fn new() -> Self {
        mask_preempt();
        MaskGuard(())
    }
}

impl Default for MaskGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        unmask_preempt();
    }
}

/// Register `region` as this thread's alternate signal stack
pub fn install_alt_stack(region: &StackRegion) -> RtResult<()> {
    let stack = libc::stack_t {
        ss_sp: region.bottom() as *mut libc::c_void,
        ss_flags: 0,
        ss_size: region.usable_size(),
    };
    // Safety: the region outlives the thread (owned by the Worker record).
    let ret = unsafe { libc::sigaltstack(&stack, std::ptr::null_mut()) };
    if ret != 0 {
        return Err(RuntimeError::AltStackFailed(errno()));
    }
    Ok(())
}

/// The preemption handler.
///
/// Runs on the alternate stack with SIGURG kernel-blocked. It captures the
/// interrupted registers into the current coroutine's frame (the runtime's
/// only save point) and re-enters the scheduler coroutine via restore, not
/// via sigreturn, so the kernel's block of SIGURG persists through the whole
/// scheduling phase, which is exactly the masking protocol. Demoting the
/// coroutine and re-queuing it is left to the scheduler: the handler itself
/// takes no locks and allocates nothing.
extern "C" fn preempt_handler(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    context: *mut libc::c_void,
) {
    let worker_ptr = tls::current_worker();
    if worker_ptr.is_null() {
        return; // not a worker thread; plain sigreturn
    }
    // Safety: worker records live for the process lifetime once started.
    let worker = unsafe { &*worker_ptr };

    let current = worker.current_raw();
    if current.is_null() {
        return; // raced a scheduling transition; nothing to preempt
    }
    if worker.stale_slice(crate::time::now_ns()) {
        // Late delivery of a signal meant for an earlier slice; the context
        // under our feet may be the scheduler itself. Sigreturn untouched.
        return;
    }

    worker.set_phase(WorkerPhase::Scheduling);

    // Safety: `current` is this worker's running coroutine; nothing else
    // touches its frame while it runs on this thread.
    unsafe {
        arch::capture_frame(
            context as *const libc::ucontext_t,
            (*current).frame_mut_ptr(),
        );
    }

    worker.note_preemption();

    // Safety: the scheduler frame was initialized in worker bootstrap and is
    // re-entered only ever from the top.
    unsafe { arch::restore_context(worker.sched_frame_ptr()) }
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        assert!(install_preempt_handler().is_ok());
        assert!(install_preempt_handler().is_ok());
    }

    #[test]
    fn test_mask_guard_round_trip() {
        // Masked inside the guard, unmasked after.
        let inspect = || {
            // Safety: sigprocmask query with valid out-pointer.
            unsafe {
                let mut set: libc::sigset_t = MaybeUninit::zeroed().assume_init();
                libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), &mut set);
                libc::sigismember(&set, PREEMPT_SIGNAL) == 1
            }
        };
        {
            let _guard = MaskGuard::new();
            assert!(inspect());
        }
        assert!(!inspect());
    }
}
