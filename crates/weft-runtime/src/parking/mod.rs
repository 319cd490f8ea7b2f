//! Idle semaphore for worker threads
//!
//! Each worker owns one semaphore. The scheduling loop waits on it when its
//! local queue has nothing runnable; the monitor posts it when work lands on
//! an idle worker. Counting semantics: posts made while the worker is busy
//! are consumed on the next wait, so wakes are never lost.

use std::time::Duration;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexSemaphore as IdleSemaphore;
    } else {
        mod fallback;
        pub use fallback::CondvarSemaphore as IdleSemaphore;
    }
}

/// Shared interface of the platform semaphores (kept in sync by the tests)
#[allow(dead_code)]
fn _interface_check(sem: &IdleSemaphore) {
    sem.post();
    let _: bool = sem.wait(Some(Duration::from_millis(1)));
    let _: usize = sem.waiters();
}
