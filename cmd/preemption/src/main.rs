//! Preemption demo
//!
//! Two CPU-bound coroutines with no yield points share a single worker; the
//! monitor's SIGURG time-slicing keeps both making progress. The final
//! counter ratio and the preemption count show the fairness at work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft::{Runtime, RuntimeConfig};

fn main() {
    println!("=== weft preemption demo ===\n");

    let runtime = Runtime::start(RuntimeConfig::default().workers(1));

    let counters: Vec<Arc<AtomicU64>> = (0..2).map(|_| Arc::new(AtomicU64::new(0))).collect();

    for (n, counter) in counters.iter().enumerate() {
        let counter = Arc::clone(counter);
        runtime.spawn(move || {
            println!("[hog {}] spinning for 500 ms with no yield points", n);
            let end = Instant::now() + Duration::from_millis(500);
            while Instant::now() < end {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            println!("[hog {}] finished", n);
        });
    }

    // Progress report while both hogs fight over the one worker.
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(150));
        let a = counters[0].load(Ordering::Relaxed);
        let b = counters[1].load(Ordering::Relaxed);
        println!("progress: hog0 {:>12}  hog1 {:>12}", a, b);
    }

    let stats = runtime.stats();
    println!(
        "\nforced preemptions: {} (signals sent: {})",
        stats.preemptions, stats.preempt_signals
    );

    let a = counters[0].load(Ordering::Relaxed) as f64;
    let b = counters[1].load(Ordering::Relaxed) as f64;
    if a > 0.0 && b > 0.0 {
        println!("counter ratio: {:.2}", a.max(b) / a.min(b));
    }

    runtime.shutdown();
    println!("\n=== done ===");
}
