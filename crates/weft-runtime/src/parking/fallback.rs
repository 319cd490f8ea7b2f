//! Condvar-backed counting semaphore (non-Linux fallback)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct CondvarSemaphore {
    permits: Mutex<usize>,
    condvar: Condvar,
    waiters: AtomicUsize,
}

impl CondvarSemaphore {
    pub fn new() -> Self {
        Self {
            permits: Mutex::new(0),
            condvar: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut permits = self.permits.lock().unwrap();
        self.waiters.fetch_add(1, Ordering::SeqCst);

        let consumed = match timeout {
            Some(t) => {
                let deadline = std::time::Instant::now() + t;
                loop {
                    if *permits > 0 {
                        *permits -= 1;
                        break true;
                    }
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    let (guard, _) = self
                        .condvar
                        .wait_timeout(permits, deadline - now)
                        .unwrap();
                    permits = guard;
                }
            }
            None => {
                while *permits == 0 {
                    permits = self.condvar.wait(permits).unwrap();
                }
                *permits -= 1;
                true
            }
        };

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        consumed
    }

    pub fn post(&self) {
        *self.permits.lock().unwrap() += 1;
        self.condvar.notify_one();
    }

    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}

impl Default for CondvarSemaphore {
    fn default() -> Self {
        Self::new()
    }
}
