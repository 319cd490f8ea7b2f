//! # weft-core
//!
//! Platform-agnostic types for the weft coroutine runtime: state machines,
//! argument packing, the run queue, and the internal locking/logging
//! primitives. No OS-specific code lives here; everything that touches
//! signals, threads or raw memory is in `weft-runtime`.

pub mod args;
pub mod error;
pub mod kprint;
pub mod queue;
pub mod spinlock;
pub mod state;

pub use args::ArgPack;
pub use error::{RtResult, RuntimeError};
pub use queue::RunQueue;
pub use spinlock::{SpinGuard, SpinLock};
pub use state::{CoroutineState, WorkerPhase};

/// Tunables fixed at compile time
pub mod constants {
    /// Default number of worker threads
    pub const WORKING_THREADS_COUNT: usize = 1;

    /// Reserved for future CPU-affinity support; not used by the core
    pub const PROCESSORS_COUNT: usize = 1;

    /// Usable bytes per coroutine stack (guard page excluded)
    pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

    /// General-purpose registers in an aarch64 frame (x0..x30)
    pub const REGISTERS_COUNT: usize = 31;

    /// Wall-clock time slice before a running coroutine is preempted
    pub const QUANTUM_NS: u64 = 20_000_000;

    /// Sleep between monitor iterations
    pub const MONITOR_TICK_US: u64 = 500;

    /// Maximum argument fields per coroutine entry function
    pub const MAX_ARGS: usize = 8;
}
