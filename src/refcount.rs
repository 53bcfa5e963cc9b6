//! Atomic reference counter embedded in every object header.
//!
//! `get` mints one reference, `put` returns one. Minting only ever happens
//! from an existing reference, so increments are `Relaxed`; returns are
//! `Release` and whoever takes the count to zero issues an `Acquire` fence
//! before tearing the object down.

use core::sync::atomic::{fence, AtomicUsize, Ordering};

/// Soft cap on outstanding references. Crossing it aborts, matching `Arc`.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// A `sub` would have driven the count below zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Underflow {
    pub current: usize,
}

#[derive(Debug)]
pub(crate) struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    pub(crate) const fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// Current count. Only meaningful as a snapshot.
    #[inline]
    pub(crate) fn load(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Acquire one reference; returns the new count.
    #[inline]
    pub(crate) fn get(&self) -> usize {
        self.add(1)
    }

    /// Acquire `n` references; returns the new count.
    #[inline]
    pub(crate) fn add(&self, n: usize) -> usize {
        let prev = self.count.fetch_add(n, Ordering::Relaxed);
        if prev > MAX_REFCOUNT {
            // Follow Arc semantics: abort on overflow rather than continue unsafely.
            std::process::abort();
        }
        debug_assert!(prev > 0, "reference minted from a dead object");
        prev + n
    }

    /// Return one reference; returns the remaining count.
    ///
    /// When this returns 0 the caller owns the object exclusively.
    #[inline]
    pub(crate) fn put(&self) -> usize {
        let prev = self.count.fetch_sub(1, Ordering::Release);
        assert!(prev > 0, "RefCount underflow");
        if prev == 1 {
            fence(Ordering::Acquire);
        }
        prev - 1
    }

    /// Return `n` references at once, refusing to go below zero.
    pub(crate) fn sub(&self, n: usize) -> Result<usize, Underflow> {
        let mut cur = self.count.load(Ordering::Relaxed);
        loop {
            if n > cur {
                return Err(Underflow { current: cur });
            }
            match self.count.compare_exchange_weak(
                cur,
                cur - n,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if cur == n {
                        fence(Ordering::Acquire);
                    }
                    return Ok(cur - n);
                }
                Err(actual) => cur = actual,
            }
        }
    }
}
