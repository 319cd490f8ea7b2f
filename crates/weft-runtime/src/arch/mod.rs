//! Architecture-specific context machinery
//!
//! Each module provides the byte-stable `RegisterFrame`, the noreturn
//! `restore_context` primitive, initial-frame construction and the
//! ucontext capture used by the preemption handler. `restore_context` is the
//! sole mechanism for transferring control between the scheduler coroutine
//! and user coroutines.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use aarch64::*;
    } else {
        compile_error!("unsupported architecture: weft-runtime needs x86_64 or aarch64");
    }
}
