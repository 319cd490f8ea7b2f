//! Stack regions: coroutine stacks, scheduler stacks, alternate signal stacks
//!
//! Each region is an anonymous private mapping with a PROT_NONE guard page at
//! the low end, so running off the bottom of a coroutine stack faults instead
//! of silently corrupting the neighbouring allocation. Stacks grow downward;
//! the initial stack pointer is the high end, aligned down to 16 bytes.

use weft_core::error::{RtResult, RuntimeError};

const PAGE_SIZE: usize = 4096;

/// An owned mapped region used as a call stack
pub struct StackRegion {
    base: *mut u8,
    total: usize,
    usable: usize,
}

// Safety: the region is exclusively owned; the raw base pointer is only an
// address, never aliased mutable state.
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

impl StackRegion {
    /// Map a region with `usable` writable bytes (rounded up to whole pages)
    /// plus one guard page below them.
    pub fn allocate(usable: usize) -> RtResult<Self> {
        let usable = usable.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let total = usable + PAGE_SIZE;

        // Safety: anonymous mapping, kernel picks the address.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(RuntimeError::StackAllocationFailed(errno()));
        }
        let base = base as *mut u8;

        // Guard page at the low end; stacks grow toward it.
        // Safety: base..base+PAGE_SIZE is inside the fresh mapping.
        let ret = unsafe { libc::mprotect(base as *mut libc::c_void, PAGE_SIZE, libc::PROT_NONE) };
        if ret != 0 {
            let err = errno();
            unsafe { libc::munmap(base as *mut libc::c_void, total) };
            return Err(RuntimeError::StackAllocationFailed(err));
        }

        Ok(Self {
            base,
            total,
            usable,
        })
    }

    /// Initial stack pointer: the high address, 16-byte aligned downward
    #[inline]
    pub fn top(&self) -> *mut u8 {
        let top = self.base as usize + self.total;
        (top & !0xF) as *mut u8
    }

    /// Lowest writable address (just above the guard page)
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        // Safety: guard page is the first page of the mapping.
        unsafe { self.base.add(PAGE_SIZE) }
    }

    /// Writable bytes
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.usable
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        // Safety: base/total describe the mapping created in allocate().
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total);
        }
    }
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_write() {
        let stack = StackRegion::allocate(16 * 1024).unwrap();
        assert_eq!(stack.usable_size(), 16 * 1024);

        // The whole usable span is writable.
        let bottom = stack.bottom();
        unsafe {
            *bottom = 0xAB;
            *stack.top().sub(1) = 0xCD;
            assert_eq!(*bottom, 0xAB);
        }
    }

    #[test]
    fn test_top_is_aligned() {
        let stack = StackRegion::allocate(16 * 1024).unwrap();
        assert_eq!(stack.top() as usize % 16, 0);
        assert!(stack.top() as usize > stack.bottom() as usize);
    }

    #[test]
    fn test_usable_rounds_to_pages() {
        let stack = StackRegion::allocate(1000).unwrap();
        assert_eq!(stack.usable_size(), 4096);
    }
}
