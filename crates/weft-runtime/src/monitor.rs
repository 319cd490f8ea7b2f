//! Monitor thread
//!
//! One dedicated OS thread drives the whole pool: each tick it distributes
//! globally-submitted coroutines round-robin onto worker queues, wakes idle
//! workers that have work, and sends the preemption signal to workers whose
//! coroutine has outrun its time slice. The tick and the quantum are the two
//! clocks of the system: a runnable coroutine waits at most one tick for
//! dispatch, and a running one holds a worker for at most a quantum plus one
//! tick.

use crate::runtime::{fatal, Shared};
use crate::signal;
use crate::time;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use weft_core::error::RuntimeError;
use weft_core::state::{CoroutineState, WorkerPhase};
use weft_core::{kdebug, ktrace};

/// Monitor OS-thread entry. Returns when the shutdown flag is raised.
pub(crate) fn monitor_main(shared: Arc<Shared>) {
    let tick = shared.config.monitor_tick;
    let quantum_ns = shared.config.quantum.as_nanos() as u64;
    let mut next_worker = 0usize;

    kdebug!("monitor: tick {:?}, quantum {:?}", tick, shared.config.quantum);

    while !shared.shutdown.load(Ordering::Acquire) {
        drain_global(&shared, &mut next_worker);
        maintain_workers(&shared, quantum_ns);
        std::thread::sleep(tick);
    }

    kdebug!("monitor: exiting");
}

/// Move runnable coroutines from the global queue onto worker queues,
/// round-robin; free finished ones.
///
/// Bounded to one pass over the queue's current length, mirroring the
/// selection scan: occupied coroutines rotate to the tail and are revisited
/// next tick. Dispatch is capped at one coroutine per worker per tick, so a
/// submission burst spreads one round-robin round at a time and N+1
/// submissions over N workers leave exactly one behind after the first tick.
fn drain_global(shared: &Shared, next_worker: &mut usize) {
    if shared.workers.is_empty() {
        // No pool: submissions stay queued and nothing ever runs.
        return;
    }

    let mut queue = shared.global.lock().unwrap();
    let mut dispatched = 0usize;
    for _ in 0..queue.len() {
        let Some(&front) = queue.front() else { break };
        // Safety: queued coroutines are alive until popped by their holder.
        let state = unsafe { front.as_ref() }.state();
        match state {
            CoroutineState::Runnable => {
                if dispatched == shared.workers.len() {
                    break;
                }
                let coroutine = queue.pop_front().expect("front observed above");
                let worker = &shared.workers[*next_worker];
                *next_worker = (*next_worker + 1) % shared.workers.len();
                ktrace!(
                    "monitor: dispatch coroutine {} to worker {}",
                    unsafe { coroutine.as_ref() }.id(),
                    worker.id()
                );
                worker.enqueue_local(coroutine);
                dispatched += 1;
                shared.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            CoroutineState::Done => {
                let done = queue.pop_front().expect("front observed above");
                shared.stats.reclaimed.fetch_add(1, Ordering::Relaxed);
                // Safety: popped from its only queue, state is terminal.
                unsafe { done.destroy() };
            }
            CoroutineState::Created => {
                fatal(&RuntimeError::InvariantViolation(
                    "created coroutine observed on the global queue",
                ));
            }
            _ => queue.rotate(),
        }
    }
}

/// Wake idle workers that have work; preempt workers that have held a
/// coroutine past the quantum. Workers with empty local queues are skipped:
/// preempting a sole coroutine would only reschedule it onto itself.
fn maintain_workers(shared: &Shared, quantum_ns: u64) {
    let now = time::now_ns();
    for worker in shared.workers.iter() {
        if worker.queue_len() == 0 {
            continue;
        }
        match worker.phase() {
            WorkerPhase::Idle => {
                worker.semaphore.post();
                shared.stats.wakes.fetch_add(1, Ordering::Relaxed);
            }
            WorkerPhase::Running => {
                let start = worker.slice_start_ns.load(Ordering::SeqCst);
                if now.saturating_sub(start) > quantum_ns {
                    let thread = worker.thread_id.load(Ordering::SeqCst) as libc::pthread_t;
                    if signal::send_preempt(thread) {
                        shared.stats.preempt_signals.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            _ => {}
        }
    }
}
