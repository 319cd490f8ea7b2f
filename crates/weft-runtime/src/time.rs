//! Monotonic clock in nanoseconds
//!
//! The monitor compares `now_ns()` against each worker's slice-start stamp,
//! so both sides need the same raw monotonic source; `CLOCK_MONOTONIC` via
//! libc keeps the value a plain u64 that fits in an atomic.

/// Nanoseconds from the monotonic clock
#[inline]
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // Safety: ts is a valid out-pointer; CLOCK_MONOTONIC never fails on Linux.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_advances_across_sleep() {
        let a = now_ns();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_ns();
        assert!(b - a >= 4_000_000);
    }
}
