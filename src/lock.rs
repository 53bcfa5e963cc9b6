//! Embedded object locks, tracked lock state and adjustable guards.
//!
//! An object allocated with `LockClass::Mutex` or `LockClass::RwLock`
//! carries a raw `parking_lot` lock in its header. The lock is advisory
//! with respect to the payload: `Obj<T>` always derefs to `&T`, and state
//! that must only change under the lock lives in `Guarded<U>` fields.
//!
//! The header also tracks the lock state (`>0` readers, `-1` writer) so
//! that `Obj::lock_state` can report it and diagnostics can count held
//! locks.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::sync::atomic::{AtomicIsize, Ordering};

use parking_lot::lock_api::{
    GuardNoSend, RawMutex as _, RawRwLock as _, RawRwLockDowngrade as _,
};
use parking_lot::{RawMutex, RawRwLock};

use crate::error::{misuse, LockError};
use crate::obj::Obj;
use crate::stats;

/// Which lock, if any, an object embeds.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum LockClass {
    #[default]
    None,
    Mutex,
    RwLock,
}

/// Requested or held lock strength. `Write` is stronger than `Read`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum LockMode {
    Read,
    Write,
}

/// Observed lock state of an object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LockState {
    Unlocked,
    Read(usize),
    Write,
}

enum RawLock {
    None,
    Mutex(RawMutex),
    RwLock(RawRwLock),
}

const WRITER: isize = -1;

pub(crate) struct ObjLock {
    raw: RawLock,
    state: AtomicIsize,
}

impl ObjLock {
    pub(crate) fn new(class: LockClass) -> Self {
        let raw = match class {
            LockClass::None => RawLock::None,
            LockClass::Mutex => RawLock::Mutex(RawMutex::INIT),
            LockClass::RwLock => RawLock::RwLock(RawRwLock::INIT),
        };
        Self {
            raw,
            state: AtomicIsize::new(0),
        }
    }

    pub(crate) fn class(&self) -> LockClass {
        match self.raw {
            RawLock::None => LockClass::None,
            RawLock::Mutex(_) => LockClass::Mutex,
            RawLock::RwLock(_) => LockClass::RwLock,
        }
    }

    pub(crate) fn state(&self) -> LockState {
        match self.state.load(Ordering::Acquire) {
            0 => LockState::Unlocked,
            WRITER => LockState::Write,
            n => LockState::Read(n.unsigned_abs()),
        }
    }

    /// Block until the lock is held; returns the effective mode.
    fn acquire(&self, mode: LockMode) -> Result<LockMode, LockError> {
        let held = match (&self.raw, mode) {
            (RawLock::None, _) => return Err(LockError::NoLock),
            (RawLock::Mutex(m), _) => {
                m.lock();
                LockMode::Write
            }
            (RawLock::RwLock(l), LockMode::Read) => {
                l.lock_shared();
                LockMode::Read
            }
            (RawLock::RwLock(l), LockMode::Write) => {
                l.lock_exclusive();
                LockMode::Write
            }
        };
        self.mark_acquired(held);
        Ok(held)
    }

    fn try_acquire(&self, mode: LockMode) -> Result<Option<LockMode>, LockError> {
        let held = match (&self.raw, mode) {
            (RawLock::None, _) => return Err(LockError::NoLock),
            (RawLock::Mutex(m), _) => m.try_lock().then_some(LockMode::Write),
            (RawLock::RwLock(l), LockMode::Read) => l.try_lock_shared().then_some(LockMode::Read),
            (RawLock::RwLock(l), LockMode::Write) => {
                l.try_lock_exclusive().then_some(LockMode::Write)
            }
        };
        if let Some(held) = held {
            self.mark_acquired(held);
        }
        Ok(held)
    }

    fn mark_acquired(&self, held: LockMode) {
        match held {
            LockMode::Read => {
                self.state.fetch_add(1, Ordering::AcqRel);
            }
            LockMode::Write => self.state.store(WRITER, Ordering::Release),
        }
        stats::lock_acquired();
    }

    /// # Safety
    /// The caller must hold the lock in `held` mode.
    unsafe fn release(&self, held: LockMode) {
        stats::lock_released();
        match (&self.raw, held) {
            (RawLock::None, _) => {}
            (RawLock::Mutex(m), _) => {
                self.state.store(0, Ordering::Release);
                m.unlock();
            }
            (RawLock::RwLock(l), LockMode::Read) => {
                self.state.fetch_sub(1, Ordering::AcqRel);
                l.unlock_shared();
            }
            (RawLock::RwLock(l), LockMode::Write) => {
                self.state.store(0, Ordering::Release);
                l.unlock_exclusive();
            }
        }
    }

    /// Turn a held write lock into a read lock with no unlocked window.
    ///
    /// # Safety
    /// The caller must hold the rwlock exclusively.
    unsafe fn downgrade(&self) {
        if let RawLock::RwLock(l) = &self.raw {
            // Still exclusive here, so nobody else touches the state.
            self.state.store(1, Ordering::Release);
            l.downgrade();
        }
    }
}

impl<T> Obj<T> {
    /// The lock class chosen at allocation.
    pub fn lock_class(&self) -> LockClass {
        self.header().lock.class()
    }

    /// Current lock state. A snapshot; it may change immediately.
    pub fn lock_state(&self) -> LockState {
        self.header().lock.state()
    }

    /// Block until the object lock is held in (at least) `mode`.
    ///
    /// Locking an object allocated with `LockClass::None` is a
    /// programming error: it panics in diagnostic builds and returns
    /// `LockError::NoLock` otherwise.
    pub fn lock(&self, mode: LockMode) -> Result<ObjGuard<'_, T>, LockError> {
        match self.header().lock.acquire(mode) {
            Ok(held) => Ok(ObjGuard {
                obj: self,
                mode: held,
                _not_send: PhantomData,
            }),
            Err(e) => {
                misuse!("lock({mode:?}) on an object allocated without a lock");
                Err(e)
            }
        }
    }

    /// Take the object lock only if it is immediately available.
    ///
    /// `Ok(None)` is ordinary contention, not an error.
    pub fn try_lock(&self, mode: LockMode) -> Result<Option<ObjGuard<'_, T>>, LockError> {
        match self.header().lock.try_acquire(mode) {
            Ok(held) => Ok(held.map(|mode| ObjGuard {
                obj: self,
                mode,
                _not_send: PhantomData,
            })),
            Err(e) => {
                misuse!("try_lock({mode:?}) on an object allocated without a lock");
                Err(e)
            }
        }
    }
}

/// RAII guard for an object lock. Releases on drop.
///
/// The raw locks must be released on the thread that took them, so a
/// guard cannot be sent to another thread:
///
/// ```compile_fail
/// use rc_container::{LockClass, LockMode, Obj, ObjOptions};
///
/// let o = Box::leak(Box::new(Obj::with_options(0u32, ObjOptions::new().lock(LockClass::Mutex))));
/// let g = o.lock(LockMode::Write).unwrap();
/// std::thread::spawn(move || drop(g));
/// ```
#[must_use = "the object is unlocked as soon as the guard is dropped"]
pub struct ObjGuard<'a, T> {
    obj: &'a Obj<T>,
    mode: LockMode,
    _not_send: PhantomData<GuardNoSend>,
}

impl<'a, T> ObjGuard<'a, T> {
    /// Mode currently held. Mutex-class objects always report `Write`.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// The object this guard locks.
    pub fn obj(&self) -> &'a Obj<T> {
        self.obj
    }

    /// Move the held lock to `requested`, disturbing it as little as
    /// possible, and return the resulting mode.
    ///
    /// - Already at least as strong and `keep_stronger`: unchanged.
    /// - Read to write: the shared lock is released and the exclusive
    ///   lock acquired; other writers may run in between, so re-check
    ///   anything read under the shared lock.
    /// - Write to read without `keep_stronger`: downgraded atomically.
    ///
    /// Mutex-class locks have a single strength and never change.
    pub fn adjust(&mut self, requested: LockMode, keep_stronger: bool) -> LockMode {
        let lock = &self.obj.header().lock;
        if lock.class() != LockClass::RwLock || requested == self.mode {
            return self.mode;
        }
        match (self.mode, requested) {
            (LockMode::Read, LockMode::Write) => {
                // SAFETY: this guard holds the shared lock.
                unsafe { lock.release(LockMode::Read) };
                let held = lock.acquire(LockMode::Write);
                debug_assert_eq!(held, Ok(LockMode::Write));
                self.mode = LockMode::Write;
            }
            (LockMode::Write, LockMode::Read) if !keep_stronger => {
                // SAFETY: this guard holds the exclusive lock.
                unsafe { lock.downgrade() };
                self.mode = LockMode::Read;
            }
            _ => {}
        }
        self.mode
    }

    /// Downgrade a write lock to a read lock without releasing it.
    pub fn downgrade(&mut self) -> LockMode {
        self.adjust(LockMode::Read, false)
    }

    /// Release the lock now.
    pub fn unlock(self) {}
}

impl<T> Deref for ObjGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.obj
    }
}

impl<T> Drop for ObjGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the guard holds the lock in `self.mode`.
        unsafe { self.obj.header().lock.release(self.mode) };
    }
}

impl<T> fmt::Debug for ObjGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjGuard")
            .field("obj", &self.obj.as_ptr())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Payload state protected by the owning object's lock.
///
/// Place a `Guarded<U>` directly in the payload of a lock-bearing object.
/// Any guard of that object grants shared access; a write-mode guard
/// grants exclusive access. Guards of other objects are rejected.
pub struct Guarded<U> {
    value: UnsafeCell<U>,
}

// SAFETY: shared access is handed out only under the owner's lock (read
// or write), exclusive access only under its write lock.
unsafe impl<U: Send + Sync> Sync for Guarded<U> {}

impl<U> Guarded<U> {
    pub const fn new(value: U) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    pub fn get<'g, T>(&'g self, guard: &'g ObjGuard<'_, T>) -> &'g U {
        self.assert_owned_by(guard);
        // SAFETY: the owner is locked for at least reading for 'g.
        unsafe { &*self.value.get() }
    }

    pub fn get_mut<'g, T>(&'g self, guard: &'g mut ObjGuard<'_, T>) -> &'g mut U {
        self.assert_owned_by(guard);
        assert!(
            guard.mode == LockMode::Write,
            "Guarded::get_mut requires a write lock"
        );
        // SAFETY: the owner is exclusively locked and the guard is
        // mutably borrowed for 'g, so no other access path exists.
        unsafe { &mut *self.value.get() }
    }

    /// Direct access when the payload itself is exclusively borrowed,
    /// e.g. inside a destructor.
    pub fn get_exclusive(&mut self) -> &mut U {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> U {
        self.value.into_inner()
    }

    fn assert_owned_by<T>(&self, guard: &ObjGuard<'_, T>) {
        let base = guard.obj.as_ptr() as usize;
        let end = base + core::mem::size_of::<T>();
        let start = self as *const Self as usize;
        assert!(
            base <= start && start + core::mem::size_of::<Self>() <= end,
            "Guarded accessed through a guard of a different object"
        );
    }
}

impl<U: Default> Default for Guarded<U> {
    fn default() -> Self {
        Self::new(U::default())
    }
}

impl<U> fmt::Debug for Guarded<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Guarded(..)")
    }
}
