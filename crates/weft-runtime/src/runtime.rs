//! Runtime handle: submission, worker pool, monitor, shutdown
//!
//! The runtime is an explicit handle, not a process-global: all shared state
//! lives in one `Arc<Shared>` record held by the handle, every worker thread
//! and the monitor. The only global pieces are the idempotent sigaction
//! installation and the per-thread worker pointer the signal handler needs.

use crate::config::RuntimeConfig;
use crate::coroutine::{Coroutine, CoroutineHandle, CoroutinePtr, RawEntry};
use crate::monitor;
use crate::signal;
use crate::worker::{worker_main, Worker};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use weft_core::args::ArgPack;
use weft_core::error::{RtResult, RuntimeError};
use weft_core::queue::RunQueue;
use weft_core::state::{CoroutineState, WorkerPhase};
use weft_core::{kdebug, kerror, ktrace, kwarn};

/// Internal event counters, updated lock-free from every thread
pub(crate) struct RuntimeCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) reclaimed: AtomicU64,
    pub(crate) preempt_signals: AtomicU64,
    pub(crate) wakes: AtomicU64,
}

impl RuntimeCounters {
    pub(crate) fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            preempt_signals: AtomicU64::new(0),
            wakes: AtomicU64::new(0),
        }
    }
}

/// Point-in-time snapshot of the runtime's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Coroutines accepted by submission
    pub submitted: u64,
    /// Coroutines moved from the global queue onto a worker
    pub dispatched: u64,
    /// Finished coroutines freed
    pub reclaimed: u64,
    /// Forced preemptions taken (counted in the signal handler)
    pub preemptions: u64,
    /// Preemption signals sent by the monitor
    pub preempt_signals: u64,
    /// Idle-worker wakeups posted by the monitor
    pub wakes: u64,
}

/// State shared by the handle, the workers and the monitor
pub(crate) struct Shared {
    pub(crate) config: RuntimeConfig,
    pub(crate) global: Mutex<RunQueue<CoroutinePtr>>,
    pub(crate) workers: Box<[Worker]>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) stats: RuntimeCounters,
    next_id: AtomicU64,
}

/// Abort on a structural failure the runtime cannot recover from.
///
/// Everything except argument validation is handled this way: a runtime
/// whose invariants broke has no useful degraded mode.
pub(crate) fn fatal(err: &RuntimeError) -> ! {
    kerror!("fatal: {}", err);
    std::process::abort();
}

/// Handle to a running coroutine runtime.
///
/// Dropping the handle shuts the runtime down (workers quiesce, queued
/// coroutines are freed). The handle is `Sync`: submission from any thread.
pub struct Runtime {
    shared: Arc<Shared>,
    monitor: Option<JoinHandle<()>>,
    // Worker threads never exit (they park forever after shutdown); the
    // handles are kept only so they are detached in one place.
    _worker_threads: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Start the runtime: install the preemption handler, spawn the worker
    /// pool and the monitor.
    ///
    /// Panics on an invalid configuration; aborts on structural failures
    /// (signal installation, stack mapping, thread spawn).
    pub fn start(config: RuntimeConfig) -> Runtime {
        if let Err(msg) = config.validate() {
            panic!("invalid runtime configuration: {}", msg);
        }
        weft_core::kprint::init();

        if let Err(err) = signal::install_preempt_handler() {
            fatal(&err);
        }

        let quantum_ns = config.quantum.as_nanos() as u64;
        let workers: Box<[Worker]> = (0..config.workers)
            .map(|id| Worker::new(id, quantum_ns).unwrap_or_else(|err| fatal(&err)))
            .collect();

        let worker_count = workers.len();
        let shared = Arc::new(Shared {
            config,
            global: Mutex::new(RunQueue::new()),
            workers,
            shutdown: AtomicBool::new(false),
            stats: RuntimeCounters::new(),
            next_id: AtomicU64::new(0),
        });

        let mut worker_threads = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("weft-worker-{}", index))
                .spawn(move || {
                    worker_main(shared, index);
                })
                .unwrap_or_else(|_| fatal(&RuntimeError::ThreadSpawnFailed));
            worker_threads.push(handle);
        }

        let monitor = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("weft-monitor".into())
                .spawn(move || monitor::monitor_main(shared))
                .unwrap_or_else(|_| fatal(&RuntimeError::ThreadSpawnFailed))
        };

        kdebug!("runtime started with {} workers", worker_count);

        Runtime {
            shared,
            monitor: Some(monitor),
            _worker_threads: worker_threads,
        }
    }

    /// Submit a raw entry function with a sized argument blob.
    ///
    /// `sizes[i] ∈ {1, 2, 4, 8}`; each field is zero-extended into one
    /// integer argument register. Validation errors are the only ones
    /// returned; allocation failure aborts.
    ///
    /// # Safety
    ///
    /// `entry`'s real signature must accept the packed words as its leading
    /// integer arguments; the runtime jumps to it with exactly that register
    /// state.
    pub unsafe fn submit_raw(
        &self,
        location: &'static str,
        entry: RawEntry,
        sizes: &[usize],
        blob: &[u8],
    ) -> RtResult<CoroutineHandle> {
        let args = ArgPack::from_blob(sizes, blob)?;
        unsafe { self.submit_packed(location, entry as usize, &args) }
    }

    /// Spawn a closure as a coroutine.
    ///
    /// The typed front-end: the closure is boxed and a fixed entry shim
    /// reboxes and calls it, so there is no argument-width failure mode.
    pub fn spawn<F>(&self, f: F) -> CoroutineHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let boxed: Box<dyn FnOnce() + Send + 'static> = Box::new(f);
        let closure = Box::into_raw(Box::new(boxed));
        let args = ArgPack::one(closure as u64);
        // Safety: closure_entry consumes exactly one pointer-sized argument.
        unsafe {
            self.submit_packed(std::any::type_name::<F>(), closure_entry as usize, &args)
        }
        .unwrap_or_else(|err| fatal(&err))
    }

    /// Shared enqueue path: create the coroutine and make it runnable on the
    /// global queue, with preemption masked around the critical section.
    pub(crate) unsafe fn submit_packed(
        &self,
        location: &'static str,
        entry: usize,
        args: &ArgPack,
    ) -> RtResult<CoroutineHandle> {
        let _mask = signal::MaskGuard::new();

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let coroutine =
            match Coroutine::create(id, location, entry, args, self.shared.config.stack_size) {
                Ok(coroutine) => coroutine,
                Err(err) => fatal(&err),
            };

        let ptr = CoroutinePtr::from_box(coroutine);
        {
            let mut queue = self.shared.global.lock().unwrap();
            // Runnable atomically with enqueue: the state flips while the
            // only reference sits in our hands, under the global lock.
            unsafe { ptr.as_ref() }.set_state(CoroutineState::Runnable);
            queue.push_back(ptr);
        }
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        ktrace!("submitted coroutine {} from {}", id, location);

        Ok(CoroutineHandle::new(id))
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Coroutines waiting on the global queue (not yet dispatched)
    pub fn global_backlog(&self) -> usize {
        self.shared.global.lock().unwrap().len()
    }

    /// Coroutines on a worker's local queue
    pub fn local_backlog(&self, worker: usize) -> Option<usize> {
        self.shared.workers.get(worker).map(|w| w.queue_len())
    }

    /// Snapshot the runtime's counters
    pub fn stats(&self) -> RuntimeStats {
        let counters = &self.shared.stats;
        RuntimeStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            reclaimed: counters.reclaimed.load(Ordering::Relaxed),
            preemptions: self
                .shared
                .workers
                .iter()
                .map(|w| w.preemptions.load(Ordering::SeqCst))
                .sum(),
            preempt_signals: counters.preempt_signals.load(Ordering::Relaxed),
            wakes: counters.wakes.load(Ordering::Relaxed),
        }
    }

    /// Shut the runtime down: cooperative quiesce with a drain deadline.
    ///
    /// Stops the monitor, then wakes or preempts every worker until all of
    /// them park in the `Dead` phase. Once the pool is quiet, coroutines
    /// still queued are freed without running; if the deadline expires first
    /// they are leaked and a warning is logged.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }

        let deadline = Instant::now() + self.shared.config.shutdown_deadline;
        loop {
            let mut all_dead = true;
            for worker in self.shared.workers.iter() {
                match worker.phase() {
                    WorkerPhase::Dead => {}
                    WorkerPhase::Running => {
                        all_dead = false;
                        let thread = worker.thread_id.load(Ordering::SeqCst) as libc::pthread_t;
                        signal::send_preempt(thread);
                    }
                    _ => {
                        all_dead = false;
                        worker.semaphore.post();
                    }
                }
            }
            if all_dead {
                break;
            }
            if Instant::now() >= deadline {
                kwarn!("shutdown deadline expired; leaking queued coroutines");
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        // Every worker is parked in Dead and will never touch a queue again;
        // reclaim whatever never got to run.
        let mut freed = 0u64;
        self.shared
            .global
            .lock()
            .unwrap()
            .drain_with(|coroutine: CoroutinePtr| {
                // Safety: sole holder, worker pool is quiesced.
                unsafe { coroutine.destroy() };
                freed += 1;
            });
        for worker in self.shared.workers.iter() {
            worker.queue.lock().drain_with(|coroutine| {
                // Safety: sole holder, worker pool is quiesced.
                unsafe { coroutine.destroy() };
                freed += 1;
            });
        }
        if freed > 0 {
            kdebug!("shutdown freed {} queued coroutines", freed);
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Entry shim for closure coroutines: rebox and call
unsafe extern "C" fn closure_entry(closure: usize) -> usize {
    // Safety: the pointer was produced by Box::into_raw in spawn() and is
    // called exactly once.
    let f = unsafe { Box::from_raw(closure as *mut Box<dyn FnOnce() + Send>) };
    (*f)();
    0
}
