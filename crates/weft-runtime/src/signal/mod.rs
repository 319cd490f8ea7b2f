//! Preemption signal plumbing
//!
//! SIGURG carries forced preemption: the monitor sends it to a worker whose
//! coroutine has outrun its time slice, and the handler reifies the
//! interrupted register state into the coroutine's frame before re-entering
//! the scheduler.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    } else {
        compile_error!("weft-runtime requires a Unix signal interface");
    }
}
