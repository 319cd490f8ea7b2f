//! Coroutine and worker state machines

use core::fmt;

/// State of a coroutine
///
/// Stored as an `AtomicU8` on the coroutine record; the selector scan and the
/// monitor drain read it without holding the owning queue's lock, so every
/// load/store is sequentially consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroutineState {
    /// Built but not yet enqueued anywhere
    Created = 0,

    /// Sitting on the global queue or a worker's local queue
    Runnable = 1,

    /// Executing on a worker right now
    Running = 2,

    /// Parked in a blocking syscall (reserved; no producer yet)
    Syscall = 3,

    /// Parked on an external event (reserved; no producer yet)
    Waiting = 4,

    /// Entry function returned; awaiting destruction by whichever queue
    /// observes it
    Done = 5,
}

impl CoroutineState {
    /// Eligible for selection by `pick_next`
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, CoroutineState::Runnable)
    }

    /// Terminal; the holder frees the coroutine
    #[inline]
    pub const fn is_done(&self) -> bool {
        matches!(self, CoroutineState::Done)
    }

    /// Skipped by selection but left in place.
    ///
    /// `Syscall` and `Waiting` have no producers in the current core and are
    /// treated exactly like `Running` wherever a queue is scanned.
    #[inline]
    pub const fn is_occupied(&self) -> bool {
        matches!(
            self,
            CoroutineState::Running | CoroutineState::Syscall | CoroutineState::Waiting
        )
    }
}

impl From<u8> for CoroutineState {
    fn from(v: u8) -> Self {
        match v {
            0 => CoroutineState::Created,
            1 => CoroutineState::Runnable,
            2 => CoroutineState::Running,
            3 => CoroutineState::Syscall,
            4 => CoroutineState::Waiting,
            _ => CoroutineState::Done,
        }
    }
}

impl From<CoroutineState> for u8 {
    fn from(s: CoroutineState) -> u8 {
        s as u8
    }
}

impl fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoroutineState::Created => "created",
            CoroutineState::Runnable => "runnable",
            CoroutineState::Running => "running",
            CoroutineState::Syscall => "syscall",
            CoroutineState::Waiting => "waiting",
            CoroutineState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Phase of a worker thread
///
/// `Created → Idle ⇄ Scheduling → Running → (Scheduling | Idle)`, terminal
/// `Dead`. Atomic; the monitor reads it to decide between waking an idle
/// worker and preempting a long-running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    /// Allocated, OS thread not yet in its loop
    Created = 0,

    /// Blocked on the idle semaphore
    Idle = 1,

    /// Inside the scheduling loop, preemption masked
    Scheduling = 2,

    /// A user coroutine is executing, preemption open
    Running = 3,

    /// Quiesced on shutdown; never leaves this phase
    Dead = 4,
}

impl From<u8> for WorkerPhase {
    fn from(v: u8) -> Self {
        match v {
            0 => WorkerPhase::Created,
            1 => WorkerPhase::Idle,
            2 => WorkerPhase::Scheduling,
            3 => WorkerPhase::Running,
            _ => WorkerPhase::Dead,
        }
    }
}

impl From<WorkerPhase> for u8 {
    fn from(p: WorkerPhase) -> u8 {
        p as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runnable_classification() {
        assert!(CoroutineState::Runnable.is_runnable());
        assert!(!CoroutineState::Running.is_runnable());
        assert!(!CoroutineState::Created.is_runnable());
        assert!(!CoroutineState::Done.is_runnable());
    }

    #[test]
    fn test_occupied_covers_reserved_states() {
        assert!(CoroutineState::Running.is_occupied());
        assert!(CoroutineState::Syscall.is_occupied());
        assert!(CoroutineState::Waiting.is_occupied());
        assert!(!CoroutineState::Runnable.is_occupied());
        assert!(!CoroutineState::Done.is_occupied());
    }

    #[test]
    fn test_state_u8_round_trip() {
        for s in [
            CoroutineState::Created,
            CoroutineState::Runnable,
            CoroutineState::Running,
            CoroutineState::Syscall,
            CoroutineState::Waiting,
            CoroutineState::Done,
        ] {
            assert_eq!(CoroutineState::from(u8::from(s)), s);
        }
    }

    #[test]
    fn test_worker_phase_round_trip() {
        for p in [
            WorkerPhase::Created,
            WorkerPhase::Idle,
            WorkerPhase::Scheduling,
            WorkerPhase::Running,
            WorkerPhase::Dead,
        ] {
            assert_eq!(WorkerPhase::from(u8::from(p)), p);
        }
    }
}
