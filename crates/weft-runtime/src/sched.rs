//! Per-worker scheduling: selection, the scheduling loop, coroutine exit
//!
//! The scheduling loop is the body of each worker's *scheduler coroutine*.
//! It is entered exactly one way (`restore_context` of the scheduler frame)
//! and left exactly one way (`restore_context` of a user coroutine). The
//! frame is written once at bootstrap, so every re-entry starts at the top
//! with a fresh stack; the loop keeps no state across a restore.

use crate::arch;
use crate::coroutine::CoroutinePtr;
use crate::runtime::{fatal, RuntimeCounters, Shared};
use crate::signal;
use crate::time;
use crate::worker::Worker;
use std::sync::atomic::Ordering;
use weft_core::error::RuntimeError;
use weft_core::queue::RunQueue;
use weft_core::state::{CoroutineState, WorkerPhase};
use weft_core::{kdebug, ktrace};

/// Select the next runnable coroutine from a local queue.
///
/// Scans from the front for at most the queue's current length: a `Runnable`
/// front is detached and returned; a `Done` front is popped and freed;
/// anything else (`Running`, `Syscall`, `Waiting`) rotates to the tail.
/// Strict FIFO among runnable coroutines; each element is visited at most
/// once per call.
pub(crate) fn pick_next(
    queue: &mut RunQueue<CoroutinePtr>,
    stats: &RuntimeCounters,
) -> Option<CoroutinePtr> {
    for _ in 0..queue.len() {
        // Safety: queued coroutines are alive until popped by their holder.
        let state = unsafe { queue.front()?.as_ref().state() };
        match state {
            CoroutineState::Runnable => return queue.pop_front(),
            CoroutineState::Done => {
                let done = queue.pop_front().expect("front observed above");
                stats.reclaimed.fetch_add(1, Ordering::Relaxed);
                // Safety: popped from its only queue, state is terminal.
                unsafe { done.destroy() };
            }
            _ => queue.rotate(),
        }
    }
    None
}

/// Body of the scheduler coroutine.
///
/// # Safety
///
/// Only ever entered via `restore_context` of a frame built by worker
/// bootstrap, with `shared` and `worker` pointing at records that live for
/// the process lifetime.
pub(crate) unsafe extern "C" fn scheduler_loop(shared: *const Shared, worker: *const Worker) -> ! {
    let shared = unsafe { &*shared };
    let worker = unsafe { &*worker };

    loop {
        // Re-entered here after every preemption and every coroutine exit.
        // SIGURG is either still kernel-blocked (handler path) or blocked
        // from bootstrap; assert the protocol explicitly.
        signal::mask_preempt();
        worker.set_phase(WorkerPhase::Scheduling);

        // Reap the coroutine this worker was running, if any. A `Running`
        // state here means it was forcibly preempted: demote it and send it
        // to the tail so its queue peers run first.
        if let Some(prev) = CoroutinePtr::from_raw(worker.take_current()) {
            // Safety: `current` held the only reference; it is ours now.
            match unsafe { prev.as_ref() }.state() {
                CoroutineState::Running => {
                    unsafe { prev.as_ref() }.set_state(CoroutineState::Runnable);
                    worker.queue.lock().push_back(prev);
                }
                CoroutineState::Done => {
                    shared.stats.reclaimed.fetch_add(1, Ordering::Relaxed);
                    ktrace!(
                        "worker {}: reclaimed coroutine {}",
                        worker.id(),
                        unsafe { prev.as_ref() }.id()
                    );
                    unsafe { prev.destroy() };
                }
                _ => fatal(&RuntimeError::InvariantViolation(
                    "current coroutine in unexpected state at reschedule",
                )),
            }
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let next = {
            let mut queue = worker.queue.lock();
            pick_next(&mut queue, &shared.stats)
        };

        let Some(next) = next else {
            worker.set_phase(WorkerPhase::Idle);
            worker.semaphore.wait(None);
            continue;
        };

        // Safety: detached from the queue; we are the only holder.
        let coroutine = unsafe { next.as_ref() };
        coroutine.set_state(CoroutineState::Running);
        worker.put_current(next.raw());
        worker.start_slice(time::now_ns());
        worker.set_phase(WorkerPhase::Running);

        // The queue guard is already dropped: never hold a lock across a
        // restore. Open the preemption window only now.
        signal::unmask_preempt();
        // Safety: the frame is either the initial one built by create() or
        // the last capture of the preemption handler.
        unsafe { arch::restore_context(coroutine.frame_ptr()) }
    }

    // Shutdown: quiesce forever. The runtime frees queued coroutines once
    // every worker is parked here.
    kdebug!("worker {}: quiescing", worker.id());
    worker.set_phase(WorkerPhase::Dead);
    loop {
        worker.semaphore.wait(None);
    }
}

/// Return target of every user coroutine.
///
/// The entry function returning lands here (via the arch trampoline), still
/// on the coroutine's own stack: mark it `Done` and hand control back to the
/// scheduler, which frees it.
pub(crate) extern "C" fn coroutine_exit() -> ! {
    signal::mask_preempt();

    let worker_ptr = crate::tls::current_worker();
    if worker_ptr.is_null() {
        fatal(&RuntimeError::InvariantViolation(
            "coroutine exit on a non-worker thread",
        ));
    }
    // Safety: worker records live for the process lifetime.
    let worker = unsafe { &*worker_ptr };

    let current = worker.current_raw();
    if current.is_null() {
        fatal(&RuntimeError::InvariantViolation(
            "coroutine exit with no current coroutine",
        ));
    }

    // Safety: `current` is the coroutine executing this very function.
    unsafe { (*current).set_state(CoroutineState::Done) };

    // Safety: scheduler frame is always valid for re-entry.
    unsafe { arch::restore_context(worker.sched_frame_ptr()) }
}
