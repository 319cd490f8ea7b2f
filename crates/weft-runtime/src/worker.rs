//! Worker threads
//!
//! A worker is an OS thread that hosts one local run queue and one
//! *scheduler coroutine*: a coroutine whose body is the scheduling loop and
//! whose frame is the re-entry target after every preemption and exit. The
//! bootstrap below runs on the OS thread's native stack exactly once and
//! never returns: all later execution alternates between the scheduler stack
//! and user coroutine stacks.

use crate::arch::{self, RegisterFrame};
use crate::coroutine::{Coroutine, CoroutinePtr};
use crate::parking::IdleSemaphore;
use crate::runtime::{fatal, Shared};
use crate::sched;
use crate::signal;
use crate::stack::StackRegion;
use crate::tls;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use weft_core::args::ArgPack;
use weft_core::error::RtResult;
use weft_core::queue::RunQueue;
use weft_core::spinlock::SpinLock;
use weft_core::state::WorkerPhase;
use weft_core::ktrace;

/// Scheduler coroutines run logging and destructor code; give them more room
/// than user coroutines get by default.
const SCHED_STACK_SIZE: usize = 64 * 1024;

/// Alternate signal stack per worker
const ALT_STACK_SIZE: usize = 32 * 1024;

/// Per-worker record.
///
/// Lives inside the runtime's shared worker array for the process lifetime;
/// the signal handler reaches it through the thread-local pointer installed
/// at bootstrap.
pub struct Worker {
    id: usize,

    /// Local run queue. Spinlocked so the monitor's enqueue and the worker's
    /// selection contend without a syscall in either path.
    pub(crate) queue: SpinLock<RunQueue<CoroutinePtr>>,

    /// The coroutine this worker is executing, detached from every queue.
    /// Readable lock-free by the signal handler and the monitor.
    current: AtomicPtr<Coroutine>,

    phase: AtomicU8,

    /// pthread identity, stored at bootstrap for the monitor's pthread_kill
    pub(crate) thread_id: AtomicU64,

    /// Monotonic stamp of the running coroutine's slice start
    pub(crate) slice_start_ns: AtomicU64,

    /// Idle semaphore: posted by the monitor, waited on by the scheduler
    pub(crate) semaphore: IdleSemaphore,

    /// Forced preemptions taken on this worker
    pub(crate) preemptions: AtomicU64,

    /// Slice ages below this are stale signals (see `stale_slice`)
    stale_preempt_ns: u64,

    // Scheduler coroutine: frame written once at bootstrap, then only ever
    // read by restore_context.
    sched_frame: UnsafeCell<RegisterFrame>,
    sched_stack: StackRegion,
    alt_stack: StackRegion,
}

// Safety: every cross-thread field is an atomic or internally locked; the
// UnsafeCell frame is written once during bootstrap before any other thread
// observes the worker as running.
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    pub(crate) fn new(id: usize, quantum_ns: u64) -> RtResult<Worker> {
        Ok(Worker {
            id,
            queue: SpinLock::new(RunQueue::new()),
            current: AtomicPtr::new(ptr::null_mut()),
            phase: AtomicU8::new(WorkerPhase::Created as u8),
            thread_id: AtomicU64::new(0),
            slice_start_ns: AtomicU64::new(0),
            semaphore: IdleSemaphore::new(),
            preemptions: AtomicU64::new(0),
            stale_preempt_ns: quantum_ns / 8,
            sched_frame: UnsafeCell::new(RegisterFrame::zeroed()),
            sched_stack: StackRegion::allocate(SCHED_STACK_SIZE)?,
            alt_stack: StackRegion::allocate(ALT_STACK_SIZE)?,
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub(crate) fn phase(&self) -> WorkerPhase {
        WorkerPhase::from(self.phase.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn current_raw(&self) -> *mut Coroutine {
        self.current.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn take_current(&self) -> *mut Coroutine {
        self.current.swap(ptr::null_mut(), Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn put_current(&self, coroutine: *mut Coroutine) {
        self.current.store(coroutine, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn start_slice(&self, now_ns: u64) {
        self.slice_start_ns.store(now_ns, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn note_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::SeqCst);
    }

    /// True when a preemption signal observed `now_ns` into the wall clock
    /// must be stale: the monitor only fires after a full quantum, so a
    /// signal landing within a fraction of a fresh slice was aimed at a
    /// previous coroutine and is discarded. This closes the window where a
    /// late delivery could interrupt the scheduler between unmasking and
    /// completing the restore into the next coroutine.
    #[inline]
    pub(crate) fn stale_slice(&self, now_ns: u64) -> bool {
        let age = now_ns.saturating_sub(self.slice_start_ns.load(Ordering::SeqCst));
        age < self.stale_preempt_ns
    }

    #[inline]
    pub(crate) fn sched_frame_ptr(&self) -> *mut RegisterFrame {
        self.sched_frame.get()
    }

    /// Local queue depth (takes the spinlock)
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Thread-safe append to the local queue (monitor dispatch path)
    pub(crate) fn enqueue_local(&self, coroutine: CoroutinePtr) {
        self.queue.lock().push_back(coroutine);
    }
}

/// OS-thread entry for a worker. Never returns.
///
/// Binds the thread to its worker record, installs the alternate signal
/// stack, masks SIGURG, builds the scheduler coroutine's frame and restores
/// into it. The `Arc` stays on this native stack frame forever, keeping the
/// shared runtime record alive for the signal handler.
pub(crate) fn worker_main(shared: Arc<Shared>, index: usize) -> ! {
    let worker: &Worker = &shared.workers[index];

    tls::set_current_worker(worker as *const Worker);
    worker
        .thread_id
        // Safety: querying own thread id.
        .store(unsafe { libc::pthread_self() } as u64, Ordering::SeqCst);

    signal::mask_preempt();
    if let Err(err) = signal::install_alt_stack(&worker.alt_stack) {
        fatal(&err);
    }

    let mut args = ArgPack::empty();
    args.push_word(Arc::as_ptr(&shared) as u64)
        .expect("two words fit");
    args.push_word(worker as *const Worker as u64)
        .expect("two words fit");

    ktrace!("worker {}: bootstrap complete", index);

    // Safety: the scheduler stack is exclusively this worker's; the frame is
    // written before the first restore and never rewritten.
    unsafe {
        arch::init_frame(
            &mut *worker.sched_frame_ptr(),
            worker.sched_stack.top(),
            sched::scheduler_loop as usize,
            args.words(),
            arch::exit_trampoline as usize,
        );
        arch::restore_context(worker.sched_frame_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_QUANTUM_NS: u64 = 20_000_000;

    #[test]
    fn test_new_worker_initial_state() {
        let worker = Worker::new(3, TEST_QUANTUM_NS).unwrap();
        assert_eq!(worker.id(), 3);
        assert_eq!(worker.phase(), WorkerPhase::Created);
        assert!(worker.current_raw().is_null());
        assert_eq!(worker.queue_len(), 0);
    }

    #[test]
    fn test_phase_round_trip() {
        let worker = Worker::new(0, TEST_QUANTUM_NS).unwrap();
        worker.set_phase(WorkerPhase::Idle);
        assert_eq!(worker.phase(), WorkerPhase::Idle);
        worker.set_phase(WorkerPhase::Running);
        assert_eq!(worker.phase(), WorkerPhase::Running);
    }

    #[test]
    fn test_current_take_put() {
        let worker = Worker::new(0, TEST_QUANTUM_NS).unwrap();
        let fake = 0x1000 as *mut Coroutine;
        worker.put_current(fake);
        assert_eq!(worker.current_raw(), fake);
        assert_eq!(worker.take_current(), fake);
        assert!(worker.current_raw().is_null());
        assert!(worker.take_current().is_null());
    }

    #[test]
    fn test_stale_slice_window() {
        let worker = Worker::new(0, TEST_QUANTUM_NS).unwrap();
        let start = crate::time::now_ns();
        worker.start_slice(start);
        // Fresh slice: a signal now is stale.
        assert!(worker.stale_slice(start + 1));
        // Past the quantum: genuine.
        assert!(!worker.stale_slice(start + TEST_QUANTUM_NS + 1));
    }
}
