//! Runtime configuration

use std::time::Duration;
use weft_core::constants::{
    DEFAULT_STACK_SIZE, MONITOR_TICK_US, QUANTUM_NS, WORKING_THREADS_COUNT,
};

/// Upper bound on worker threads
pub const MAX_WORKERS: usize = 64;

/// Configuration for the coroutine runtime
///
/// The defaults reproduce the fixed tunables of the core design: one worker,
/// 16 KiB stacks, a 20 ms time slice and a 500 µs monitor tick.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads. Zero is allowed: submission works, nothing
    /// ever runs.
    pub workers: usize,

    /// Usable stack bytes per coroutine (a guard page is added on top)
    pub stack_size: usize,

    /// Wall-clock time slice before a running coroutine is preempted
    pub quantum: Duration,

    /// Sleep between monitor iterations
    pub monitor_tick: Duration,

    /// How long shutdown waits for workers to quiesce
    pub shutdown_deadline: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: WORKING_THREADS_COUNT,
            stack_size: DEFAULT_STACK_SIZE,
            quantum: Duration::from_nanos(QUANTUM_NS),
            monitor_tick: Duration::from_micros(MONITOR_TICK_US),
            shutdown_deadline: Duration::from_millis(200),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    /// Set the usable stack size per coroutine
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Set the preemption time slice
    pub fn quantum(mut self, d: Duration) -> Self {
        self.quantum = d;
        self
    }

    /// Set the monitor tick interval
    pub fn monitor_tick(mut self, d: Duration) -> Self {
        self.monitor_tick = d;
        self
    }

    /// Set the shutdown drain deadline
    pub fn shutdown_deadline(mut self, d: Duration) -> Self {
        self.shutdown_deadline = d;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.workers > MAX_WORKERS {
            return Err("workers exceeds MAX_WORKERS");
        }
        if self.stack_size < 4096 {
            return Err("stack_size must be at least one page");
        }
        if self.monitor_tick.is_zero() {
            return Err("monitor_tick must be non-zero");
        }
        if self.quantum.is_zero() {
            return Err("quantum must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_workers_allowed() {
        assert!(RuntimeConfig::default().workers(0).validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_stack() {
        let config = RuntimeConfig::default().stack_size(1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_quantum() {
        let config = RuntimeConfig::default().quantum(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let config = RuntimeConfig::new()
            .workers(4)
            .stack_size(64 * 1024)
            .quantum(Duration::from_millis(5));
        assert_eq!(config.workers, 4);
        assert_eq!(config.stack_size, 64 * 1024);
        assert_eq!(config.quantum, Duration::from_millis(5));
    }
}
