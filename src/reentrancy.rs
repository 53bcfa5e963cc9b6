//! Debug-only destruction guard.
//!
//! Marks an object header while its destructor runs so that raw-pointer
//! re-entry (`Obj::adjust_raw` on an object being torn down) can be
//! caught. Diagnostic builds keep an atomic flag; other builds compile
//! this to a zero-sized no-op.

#[cfg(any(debug_assertions, feature = "diagnostics"))]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(not(any(debug_assertions, feature = "diagnostics")))]
use core::marker::PhantomData;

/// Per-object destruction tracker, embedded in the object header.
#[derive(Debug)]
pub(crate) struct DebugDestroying {
    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    active: AtomicBool,
}

impl DebugDestroying {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(any(debug_assertions, feature = "diagnostics"))]
            active: AtomicBool::new(false),
        }
    }

    /// Enter the destruction section. Entering twice is a bug.
    #[inline]
    pub(crate) fn enter(&self) -> DestroyGuard<'_> {
        #[cfg(any(debug_assertions, feature = "diagnostics"))]
        {
            let was = self.active.swap(true, Ordering::AcqRel);
            assert!(!was, "object destroyed twice");
            DestroyGuard { owner: self }
        }

        #[cfg(not(any(debug_assertions, feature = "diagnostics")))]
        {
            DestroyGuard { _z: PhantomData }
        }
    }

    /// Whether a destructor is currently running. Always false when
    /// diagnostics are compiled out.
    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        #[cfg(any(debug_assertions, feature = "diagnostics"))]
        {
            self.active.load(Ordering::Acquire)
        }

        #[cfg(not(any(debug_assertions, feature = "diagnostics")))]
        {
            false
        }
    }
}

impl Default for DebugDestroying {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugDestroying::enter`.
pub(crate) struct DestroyGuard<'a> {
    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    owner: &'a DebugDestroying,
    #[cfg(not(any(debug_assertions, feature = "diagnostics")))]
    _z: PhantomData<&'a ()>,
}

impl Drop for DestroyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(any(debug_assertions, feature = "diagnostics"))]
        self.owner.active.store(false, Ordering::Release);
    }
}
