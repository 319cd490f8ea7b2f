//! Leveled stderr logging for the runtime
//!
//! printk-style macros: no global subscriber, no allocation on the log path,
//! one locked write per line so concurrent workers do not interleave.
//!
//! Configured from the environment on first use:
//! - `WEFT_LOG=<off|error|warn|info|debug|trace|0..5>`: level (default info)
//! - `WEFT_LOG_FLUSH=1`: flush stderr after every line (crash debugging)

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    fn from_env(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);
static CONFIGURED: AtomicBool = AtomicBool::new(false);

/// Read `WEFT_LOG`/`WEFT_LOG_FLUSH`. Runs once; later calls are no-ops.
pub fn init() {
    if CONFIGURED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Ok(value) = std::env::var("WEFT_LOG") {
        LEVEL.store(LogLevel::from_env(&value) as u8, Ordering::Relaxed);
    }
    if let Ok(value) = std::env::var("WEFT_LOG_FLUSH") {
        let on = matches!(value.as_str(), "1" | "true" | "yes" | "on");
        FLUSH.store(on, Ordering::Relaxed);
    }
}

/// Override the level programmatically (tests silence output this way).
pub fn set_level(level: LogLevel) {
    CONFIGURED.store(true, Ordering::SeqCst);
    LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: LogLevel) -> bool {
    if !CONFIGURED.load(Ordering::Relaxed) {
        init();
    }
    level as u8 <= LEVEL.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn _emit(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = write!(out, "{} ", level.prefix());
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {
        $crate::kprint::_emit($crate::kprint::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::kprint::_emit($crate::kprint::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {
        $crate::kprint::_emit($crate::kprint::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        $crate::kprint::_emit($crate::kprint::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        $crate::kprint::_emit($crate::kprint::LogLevel::Trace, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::from_env("trace"), LogLevel::Trace);
        assert_eq!(LogLevel::from_env("2"), LogLevel::Warn);
        assert_eq!(LogLevel::from_env("bogus"), LogLevel::Info);
    }

    #[test]
    fn test_macros_compile() {
        set_level(LogLevel::Off);
        kerror!("e {}", 1);
        kwarn!("w");
        kinfo!("i");
        kdebug!("d");
        ktrace!("t");
    }
}
