//! Basic weft example
//!
//! Spawns a few coroutines, waits for them, prints runtime counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft::{Runtime, RuntimeConfig};

fn main() {
    println!("=== weft basic example ===\n");

    let runtime = Runtime::start(RuntimeConfig::default().workers(2));

    let completed = Arc::new(AtomicUsize::new(0));
    let total = 4;

    for n in 0..total {
        let completed = completed.clone();
        let handle = runtime.spawn(move || {
            let mut checksum = 0u64;
            for i in 0..200_000u64 {
                checksum = checksum.wrapping_mul(31).wrapping_add(i ^ n as u64);
            }
            println!("[coroutine {}] done, checksum {:x}", n, checksum);
            completed.fetch_add(1, Ordering::SeqCst);
        });
        println!("submitted coroutine {} (handle {})", n, handle.id());
    }

    println!("\nwaiting for completion...");
    let start = Instant::now();
    while completed.load(Ordering::SeqCst) < total {
        if start.elapsed() > Duration::from_secs(5) {
            println!("WARNING: timed out waiting for coroutines");
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = runtime.stats();
    println!(
        "\n{}/{} completed: submitted {}, dispatched {}, reclaimed {}",
        completed.load(Ordering::SeqCst),
        total,
        stats.submitted,
        stats.dispatched,
        stats.reclaimed
    );

    runtime.shutdown();
    println!("\n=== done ===");
}
