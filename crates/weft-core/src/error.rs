//! Error types for the coroutine runtime

use core::fmt;

/// Result alias for runtime operations
pub type RtResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by the runtime.
///
/// Only the argument-validation variants are ever returned to the embedder
/// (from `submit_raw`). Everything else is a structural failure the runtime
/// cannot recover from: the caller is expected to log it and abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Argument field width not in {1, 2, 4, 8}
    UnsupportedArgSize { size: usize },

    /// More argument fields than integer argument registers can carry
    TooManyArgs { count: usize },

    /// Argument blob length disagrees with the declared field sizes
    ArgBlobMismatch { expected: usize, actual: usize },

    /// mmap/mprotect for a coroutine or signal stack failed (errno)
    StackAllocationFailed(i32),

    /// sigaction for the preemption signal failed during init (errno)
    SignalInstallFailed(i32),

    /// sigaltstack failed during worker bootstrap (errno)
    AltStackFailed(i32),

    /// Worker or monitor OS thread could not be spawned
    ThreadSpawnFailed,

    /// A structural invariant was observed broken
    InvariantViolation(&'static str),
}

impl RuntimeError {
    /// True for errors `submit_raw` reports to the caller; false for the
    /// fatal kinds that abort the process.
    #[inline]
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            RuntimeError::UnsupportedArgSize { .. }
                | RuntimeError::TooManyArgs { .. }
                | RuntimeError::ArgBlobMismatch { .. }
        )
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UnsupportedArgSize { size } => {
                write!(f, "unsupported argument size: {} bytes", size)
            }
            RuntimeError::TooManyArgs { count } => {
                write!(f, "too many arguments: {}", count)
            }
            RuntimeError::ArgBlobMismatch { expected, actual } => {
                write!(
                    f,
                    "argument blob is {} bytes, sizes declare {}",
                    actual, expected
                )
            }
            RuntimeError::StackAllocationFailed(errno) => {
                write!(f, "stack allocation failed (errno {})", errno)
            }
            RuntimeError::SignalInstallFailed(errno) => {
                write!(f, "preemption signal install failed (errno {})", errno)
            }
            RuntimeError::AltStackFailed(errno) => {
                write!(f, "alternate signal stack install failed (errno {})", errno)
            }
            RuntimeError::ThreadSpawnFailed => write!(f, "failed to spawn runtime thread"),
            RuntimeError::InvariantViolation(what) => {
                write!(f, "invariant violation: {}", what)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = RuntimeError::UnsupportedArgSize { size: 3 };
        assert_eq!(format!("{}", e), "unsupported argument size: 3 bytes");

        let e = RuntimeError::ArgBlobMismatch {
            expected: 15,
            actual: 12,
        };
        assert_eq!(
            format!("{}", e),
            "argument blob is 12 bytes, sizes declare 15"
        );
    }

    #[test]
    fn test_caller_error_split() {
        assert!(RuntimeError::UnsupportedArgSize { size: 3 }.is_caller_error());
        assert!(RuntimeError::TooManyArgs { count: 9 }.is_caller_error());
        assert!(!RuntimeError::StackAllocationFailed(12).is_caller_error());
        assert!(!RuntimeError::InvariantViolation("x").is_caller_error());
    }
}
