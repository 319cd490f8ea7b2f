//! Futex-backed counting semaphore (Linux)
//!
//! The futex word is the permit count. `post` increments and wakes one
//! waiter; `wait` consumes a permit or sleeps until the word becomes
//! non-zero. No permits are ever lost: a post while nobody waits is picked
//! up by the next wait.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

pub struct FutexSemaphore {
    permits: AtomicU32,
    waiters: AtomicUsize,
}

impl FutexSemaphore {
    pub fn new() -> Self {
        Self {
            permits: AtomicU32::new(0),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Try to consume one permit without blocking.
    fn try_acquire(&self) -> bool {
        let mut current = self.permits.load(Ordering::Acquire);
        while current > 0 {
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Block until a permit is available or the timeout expires.
    ///
    /// Returns true if a permit was consumed.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        loop {
            if self.try_acquire() {
                return true;
            }

            self.waiters.fetch_add(1, Ordering::SeqCst);

            let ts = timeout.map(|d| libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: d.subsec_nanos() as libc::c_long,
            });
            let ts_ptr = ts
                .as_ref()
                .map(|t| t as *const libc::timespec)
                .unwrap_or(std::ptr::null());

            // FUTEX_WAIT: sleep only while the permit count is still zero.
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    self.permits.as_ptr(),
                    libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                    0u32,
                    ts_ptr,
                    std::ptr::null::<u32>(),
                    0u32,
                )
            };

            self.waiters.fetch_sub(1, Ordering::SeqCst);

            if rc != 0 {
                let err = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                if err == libc::ETIMEDOUT {
                    // One last chance for a permit posted during wakeup.
                    return self.try_acquire();
                }
                // EAGAIN (word changed) or EINTR: retry the acquire loop.
            }
        }
    }

    /// Add one permit and wake a waiter if any
    pub fn post(&self) {
        self.permits.fetch_add(1, Ordering::Release);
        if self.waiters.load(Ordering::Acquire) > 0 {
            unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    self.permits.as_ptr(),
                    libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                    1i32,
                    std::ptr::null::<libc::timespec>(),
                    std::ptr::null::<u32>(),
                    0u32,
                );
            }
        }
    }

    /// Threads currently blocked in `wait` (hint, may be stale)
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}

impl Default for FutexSemaphore {
    fn default() -> Self {
        Self::new()
    }
}
