//! # weft: preemptive M:N coroutine runtime
//!
//! Multiplexes lightweight coroutines, each with its own stack, over a fixed
//! pool of OS worker threads. A monitor thread distributes submitted
//! coroutines round-robin and time-slices CPU-bound ones with an
//! asynchronous signal: user code needs no yield points, a coroutine that
//! outruns its 20 ms quantum is preempted mid-instruction and resumed later
//! exactly where it stopped.
//!
//! ## Quick start
//!
//! ```no_run
//! use weft::{Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::start(RuntimeConfig::default().workers(2));
//!
//! runtime.spawn(|| {
//!     let mut total = 0u64;
//!     for i in 0..1_000_000u64 {
//!         total = total.wrapping_add(i);
//!     }
//!     println!("sum: {}", total);
//! });
//!
//! std::thread::sleep(std::time::Duration::from_millis(100));
//! runtime.shutdown();
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  submit/spawn ──► global queue ──► monitor ──► worker local queues
//!                                      │               │
//!                                      │ SIGURG        │ restore_context
//!                                      ▼               ▼
//!                                worker threads ◄── scheduler coroutine
//! ```
//!
//! Each worker hosts a *scheduler coroutine* whose body is the scheduling
//! loop; preemption captures the interrupted coroutine's registers from the
//! signal's ucontext and restores the scheduler frame, which picks the next
//! runnable coroutine in strict FIFO order with O(1) queue rotation.

// Core types
pub use weft_core::args::ArgPack;
pub use weft_core::constants;
pub use weft_core::error::{RtResult, RuntimeError};
pub use weft_core::state::{CoroutineState, WorkerPhase};

// Logging macros
pub use weft_core::kprint;
pub use weft_core::{kdebug, kerror, kinfo, ktrace, kwarn};

// Runtime
pub use weft_runtime::{
    CoroutineHandle, RawEntry, Runtime, RuntimeConfig, RuntimeStats, MAX_WORKERS,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_spawn_runs_to_completion() {
        let runtime = Runtime::start(RuntimeConfig::default().workers(1));
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        runtime.spawn(move || {
            flag.store(true, Ordering::SeqCst);
        });

        assert!(wait_until(Duration::from_secs(2), || ran
            .load(Ordering::SeqCst)));
        assert!(wait_until(Duration::from_secs(2), || runtime
            .stats()
            .reclaimed
            >= 1));
        runtime.shutdown();
    }

    #[test]
    fn test_argument_registers_reach_the_body() {
        static ARG0: AtomicU64 = AtomicU64::new(0);
        static ARG1: AtomicU64 = AtomicU64::new(0);
        static ARG2: AtomicU64 = AtomicU64::new(0);
        static ARG3: AtomicU64 = AtomicU64::new(0);
        static SEEN: AtomicBool = AtomicBool::new(false);

        unsafe extern "C" fn record(a: u64, b: u64, c: u64, d: u64) -> usize {
            ARG0.store(a, Ordering::SeqCst);
            ARG1.store(b, Ordering::SeqCst);
            ARG2.store(c, Ordering::SeqCst);
            ARG3.store(d, Ordering::SeqCst);
            SEEN.store(true, Ordering::SeqCst);
            0
        }

        let runtime = Runtime::start(RuntimeConfig::default().workers(1));

        let blob: &[u8] = &[
            0x11, // 1-byte field
            0x22, 0x22, // 2-byte field
            0x33, 0x33, 0x33, 0x33, // 4-byte field
            0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, 0x44, // 8-byte field
        ];
        let entry: RawEntry = unsafe {
            std::mem::transmute(record as unsafe extern "C" fn(u64, u64, u64, u64) -> usize)
        };
        let handle = unsafe {
            runtime
                .submit_raw("record_args", entry, &[1, 2, 4, 8], blob)
                .unwrap()
        };
        assert!(handle.id() > 0);

        assert!(wait_until(Duration::from_secs(2), || SEEN
            .load(Ordering::SeqCst)));
        assert_eq!(ARG0.load(Ordering::SeqCst), 0x11);
        assert_eq!(ARG1.load(Ordering::SeqCst), 0x2222);
        assert_eq!(ARG2.load(Ordering::SeqCst), 0x3333_3333);
        assert_eq!(ARG3.load(Ordering::SeqCst), 0x4444_4444_4444_4444);
        runtime.shutdown();
    }

    #[test]
    fn test_arg_size_three_rejected() {
        unsafe extern "C" fn nop(_arg: usize) -> usize {
            0
        }

        let runtime = Runtime::start(RuntimeConfig::default().workers(1));
        let err = unsafe {
            runtime
                .submit_raw("bad_width", nop, &[3], &[1, 2, 3])
                .unwrap_err()
        };
        assert_eq!(err, RuntimeError::UnsupportedArgSize { size: 3 });
        runtime.shutdown();
    }

    #[test]
    fn test_zero_workers_accepts_but_never_runs() {
        let runtime = Runtime::start(RuntimeConfig::default().workers(0));
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        runtime.spawn(move || {
            flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(30));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(runtime.global_backlog(), 1);
        runtime.shutdown();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_round_robin_leaves_surplus_on_global_queue() {
        // Slow the monitor down so the first tick is observable, then check
        // that one round-robin round dispatched exactly one per worker.
        let runtime = Runtime::start(
            RuntimeConfig::default()
                .workers(2)
                .monitor_tick(Duration::from_millis(500)),
        );
        let release = Arc::new(AtomicBool::new(false));

        for _ in 0..3 {
            let release = Arc::clone(&release);
            runtime.spawn(move || {
                while !release.load(Ordering::SeqCst) {
                    std::hint::spin_loop();
                }
            });
        }

        assert!(wait_until(Duration::from_secs(2), || runtime
            .stats()
            .dispatched
            == 2));
        assert_eq!(runtime.global_backlog(), 1);

        // The surplus goes out on a later tick, then everything finishes.
        assert!(wait_until(Duration::from_secs(2), || runtime
            .stats()
            .dispatched
            == 3));
        release.store(true, Ordering::SeqCst);
        assert!(wait_until(Duration::from_secs(5), || runtime
            .stats()
            .reclaimed
            == 3));
        runtime.shutdown();
    }

    #[test]
    fn test_single_coroutine_makes_progress() {
        let runtime = Runtime::start(RuntimeConfig::default().workers(1));
        let iterations = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&iterations);

        runtime.spawn(move || {
            let (mut a, mut b) = (0u64, 1u64);
            loop {
                let next = a.wrapping_add(b);
                a = b;
                b = next;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        std::thread::sleep(Duration::from_millis(250));
        assert!(iterations.load(Ordering::Relaxed) >= 10);
        runtime.shutdown();
    }

    #[test]
    fn test_preemption_of_cpu_bound_coroutines() {
        let runtime = Runtime::start(RuntimeConfig::default().workers(1));

        let spin_for = |duration: Duration| {
            move || {
                let end = Instant::now() + duration;
                while Instant::now() < end {
                    std::hint::spin_loop();
                }
            }
        };
        runtime.spawn(spin_for(Duration::from_millis(150)));
        runtime.spawn(spin_for(Duration::from_millis(150)));

        assert!(wait_until(Duration::from_secs(5), || runtime
            .stats()
            .reclaimed
            == 2));
        // Two 150 ms hogs sharing one worker under a 20 ms quantum trade
        // places several times; the handler counts each forced switch.
        assert!(
            runtime.stats().preemptions >= 3,
            "expected at least 3 preemptions, saw {}",
            runtime.stats().preemptions
        );
        runtime.shutdown();
    }

    #[test]
    fn test_fair_time_slicing() {
        let runtime = Runtime::start(RuntimeConfig::default().workers(1));
        let counters: Vec<Arc<AtomicU64>> =
            (0..3).map(|_| Arc::new(AtomicU64::new(0))).collect();

        for counter in &counters {
            let counter = Arc::clone(counter);
            runtime.spawn(move || loop {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        std::thread::sleep(Duration::from_secs(1));
        let counts: Vec<u64> = counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        runtime.shutdown();

        let total: u64 = counts.iter().sum();
        assert!(total > 0);
        let ideal = total as f64 / 3.0;
        for (i, &count) in counts.iter().enumerate() {
            let share = count as f64 / ideal;
            assert!(
                (0.8..=1.2).contains(&share),
                "coroutine {} got share {:.2} of ideal (counts: {:?})",
                i,
                share,
                counts
            );
        }
    }

    #[test]
    fn test_shutdown_terminates_promptly() {
        let runtime = Runtime::start(RuntimeConfig::default().workers(1));
        runtime.spawn(|| {
            let end = Instant::now() + Duration::from_millis(50);
            while Instant::now() < end {
                std::hint::spin_loop();
            }
        });

        std::thread::sleep(Duration::from_millis(50));
        let begin = Instant::now();
        runtime.shutdown();
        assert!(begin.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_thousand_immediate_coroutines_reclaimed() {
        let runtime = Runtime::start(
            RuntimeConfig::default()
                .workers(2)
                .monitor_tick(Duration::from_micros(200)),
        );

        for _ in 0..1000 {
            runtime.spawn(|| {});
        }

        assert!(
            wait_until(Duration::from_secs(10), || runtime.stats().reclaimed == 1000),
            "reclaimed {} of 1000",
            runtime.stats().reclaimed
        );
        assert_eq!(runtime.global_backlog(), 0);
        runtime.shutdown();
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let runtime = Runtime::start(RuntimeConfig::default().workers(1));
        let a = runtime.spawn(|| {});
        let b = runtime.spawn(|| {});
        assert_ne!(a.id(), b.id());
        runtime.shutdown();
    }
}
