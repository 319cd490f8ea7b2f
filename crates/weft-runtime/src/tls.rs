//! Per-thread worker pointer
//!
//! The preemption signal handler has to find "its" worker with nothing but
//! thread identity, so each worker thread stores a pointer to its `Worker`
//! record here during bootstrap, before the first coroutine can run. The
//! cell is const-initialized and holds a plain pointer: reading it from
//! signal context performs no lazy initialization and no allocation.

use crate::worker::Worker;
use std::cell::Cell;

thread_local! {
    static CURRENT_WORKER: Cell<*const Worker> = const { Cell::new(std::ptr::null()) };
}

/// Bind this OS thread to a worker. Called once from worker bootstrap.
pub(crate) fn set_current_worker(worker: *const Worker) {
    CURRENT_WORKER.with(|cell| cell.set(worker));
}

/// Worker bound to this thread, or null on non-worker threads.
#[inline]
pub(crate) fn current_worker() -> *const Worker {
    CURRENT_WORKER.with(|cell| cell.get())
}
