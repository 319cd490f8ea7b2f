//! Coroutine record: stack, register frame, state, identity

use crate::arch::{self, RegisterFrame};
use crate::stack::StackRegion;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};
use weft_core::args::ArgPack;
use weft_core::error::RtResult;
use weft_core::state::CoroutineState;

/// Entry signature of a raw-submitted coroutine body.
///
/// The runtime seeds up to [`weft_core::constants::MAX_ARGS`] packed words
/// into the platform's integer argument registers before the first
/// instruction; bodies taking several scalar arguments are submitted by
/// casting through this type, which is sound exactly when the packed words
/// match the body's real signature.
pub type RawEntry = unsafe extern "C" fn(usize) -> usize;

/// A user-space schedulable unit with its own stack.
///
/// Owned by whichever queue currently holds it, or by the worker whose
/// `current` it is; the last holder of a `Done` coroutine frees it. The
/// record is only ever moved around as a raw pointer ([`CoroutinePtr`]) once
/// it leaves `create`.
pub struct Coroutine {
    // Written by the preemption handler while the coroutine runs, read by
    // restore_context; never touched while the coroutine sits in a queue.
    frame: UnsafeCell<RegisterFrame>,
    stack: StackRegion,
    state: AtomicU8,
    id: u64,
    location: &'static str,
}

impl Coroutine {
    /// Allocate the stack and build the initial frame: pc at `entry`, args in
    /// the argument registers, the exit trampoline as the return target.
    pub(crate) fn create(
        id: u64,
        location: &'static str,
        entry: usize,
        args: &ArgPack,
        stack_size: usize,
    ) -> RtResult<Box<Coroutine>> {
        let stack = StackRegion::allocate(stack_size)?;
        let coroutine = Box::new(Coroutine {
            frame: UnsafeCell::new(RegisterFrame::zeroed()),
            stack,
            state: AtomicU8::new(CoroutineState::Created as u8),
            id,
            location,
        });
        // Safety: the stack was just mapped and is exclusively ours.
        unsafe {
            arch::init_frame(
                &mut *coroutine.frame.get(),
                coroutine.stack.top(),
                entry,
                args.words(),
                arch::exit_trampoline as usize,
            );
        }
        Ok(coroutine)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn location(&self) -> &'static str {
        self.location
    }

    #[inline]
    pub fn state(&self) -> CoroutineState {
        CoroutineState::from(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn set_state(&self, state: CoroutineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn frame_ptr(&self) -> *const RegisterFrame {
        self.frame.get()
    }

    #[inline]
    pub(crate) fn frame_mut_ptr(&self) -> *mut RegisterFrame {
        self.frame.get()
    }
}

/// Raw coroutine pointer moved between queues and `current` slots.
///
/// Exactly one holder exists at any instant; destroying through a stale copy
/// is the holder's responsibility to avoid.
#[derive(Clone, Copy)]
pub(crate) struct CoroutinePtr(NonNull<Coroutine>);

// Safety: ownership is transferred with the value; the pointee's shared
// fields are atomics.
unsafe impl Send for CoroutinePtr {}

impl CoroutinePtr {
    pub(crate) fn from_box(coroutine: Box<Coroutine>) -> Self {
        // Box::into_raw never returns null.
        Self(unsafe { NonNull::new_unchecked(Box::into_raw(coroutine)) })
    }

    pub(crate) fn from_raw(ptr: *mut Coroutine) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub(crate) fn raw(self) -> *mut Coroutine {
        self.0.as_ptr()
    }

    /// # Safety
    ///
    /// The pointee must still be alive (not destroyed by another holder).
    #[inline]
    pub(crate) unsafe fn as_ref<'a>(self) -> &'a Coroutine {
        unsafe { self.0.as_ref() }
    }

    /// Free the coroutine: frame, stack, record.
    ///
    /// # Safety
    ///
    /// Caller must be the sole holder and the coroutine must not be running.
    pub(crate) unsafe fn destroy(self) {
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// Opaque handle returned by submission.
///
/// Carries only the coroutine's identity; it stays valid to hold after the
/// coroutine reaches `Done`, but no longer names a live coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoroutineHandle {
    id: u64,
}

impl CoroutineHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn nop_entry(_arg: usize) -> usize {
        0
    }

    #[test]
    fn test_create_initial_state() {
        let args = ArgPack::one(42);
        let coroutine =
            Coroutine::create(1, "test", nop_entry as usize, &args, 16 * 1024).unwrap();
        assert_eq!(coroutine.id(), 1);
        assert_eq!(coroutine.location(), "test");
        assert_eq!(coroutine.state(), CoroutineState::Created);
    }

    #[test]
    fn test_state_transitions_visible() {
        let coroutine = Coroutine::create(
            2,
            "test",
            nop_entry as usize,
            &ArgPack::empty(),
            16 * 1024,
        )
        .unwrap();
        coroutine.set_state(CoroutineState::Runnable);
        assert_eq!(coroutine.state(), CoroutineState::Runnable);
        coroutine.set_state(CoroutineState::Done);
        assert!(coroutine.state().is_done());
    }

    #[test]
    fn test_ptr_round_trip() {
        let coroutine = Coroutine::create(
            3,
            "test",
            nop_entry as usize,
            &ArgPack::empty(),
            16 * 1024,
        )
        .unwrap();
        let ptr = CoroutinePtr::from_box(coroutine);
        assert_eq!(unsafe { ptr.as_ref() }.id(), 3);
        unsafe { ptr.destroy() };
    }
}
