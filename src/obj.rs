//! Managed objects: a payload plus a private header holding the
//! reference count, the embedded lock and the destructor.
//!
//! `Obj<T>` is the shared handle. `Clone` takes a reference, `Drop`
//! returns one, and whichever thread returns the last reference runs the
//! destructor and frees the block. The tagged forms (`bump`, `release`)
//! and the raw-pointer form (`adjust_raw`) feed the diagnostic registry.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ops::Deref;
use core::panic::Location;
use core::ptr::{self, NonNull};
use std::alloc::{self, Layout};

use crate::error::{misuse, AllocError};
use crate::lock::{LockClass, ObjLock};
use crate::reentrancy::DebugDestroying;
use crate::refcount::{RefCount, Underflow};
use crate::stats::{self, AllocationRecord, Registration};

/// Callback run once, at the transition of the count to zero, before the
/// payload itself is dropped.
pub type Destructor<T> = Box<dyn FnOnce(&mut T) + Send>;

// Payload first so a payload pointer is also a pointer to the block.
#[repr(C)]
struct ObjInner<T> {
    payload: T,
    header: Header<T>,
}

pub(crate) struct Header<T> {
    refs: RefCount,
    pub(crate) lock: ObjLock,
    destructor: UnsafeCell<Option<Destructor<T>>>,
    destroying: DebugDestroying,
    registration: Registration,
}

/// Allocation options for a managed object.
pub struct ObjOptions<T> {
    lock: LockClass,
    destructor: Option<Destructor<T>>,
    tag: Option<&'static str>,
}

impl<T> ObjOptions<T> {
    pub fn new() -> Self {
        Self {
            lock: LockClass::None,
            destructor: None,
            tag: None,
        }
    }

    /// Embed a lock of the given class.
    pub fn lock(mut self, class: LockClass) -> Self {
        self.lock = class;
        self
    }

    /// Run `f` with the payload when the last reference is released.
    pub fn on_destroy<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.destructor = Some(Box::new(f));
        self
    }

    /// Label the allocation in the diagnostic registry.
    pub fn tag(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }
}

impl<T> Default for ObjOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ObjOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjOptions")
            .field("lock", &self.lock)
            .field("destructor", &self.destructor.is_some())
            .field("tag", &self.tag)
            .finish()
    }
}

/// Shared handle to a managed object.
pub struct Obj<T> {
    ptr: NonNull<ObjInner<T>>,
    _owns: PhantomData<ObjInner<T>>,
}

// SAFETY: like `Arc<T>`, handles may move between and be shared across
// threads as long as the payload itself is thread-safe. The destructor
// slot is only touched by the thread that owns the final reference.
unsafe impl<T: Send + Sync> Send for Obj<T> {}
unsafe impl<T: Send + Sync> Sync for Obj<T> {}

impl<T> Obj<T> {
    /// Allocate an object with no lock and no destructor.
    #[track_caller]
    pub fn new(value: T) -> Self {
        Self::with_options(value, ObjOptions::new())
    }

    /// Allocate an object. Allocation failure goes to the global
    /// allocation-error handler, as with `Box::new`.
    #[track_caller]
    pub fn with_options(value: T, options: ObjOptions<T>) -> Self {
        match Self::alloc_at(value, options, Location::caller()) {
            Ok(obj) => obj,
            Err(_) => alloc::handle_alloc_error(Layout::new::<ObjInner<T>>()),
        }
    }

    /// Allocate an object, reporting memory exhaustion to the caller.
    #[track_caller]
    pub fn try_with_options(value: T, options: ObjOptions<T>) -> Result<Self, AllocError> {
        Self::alloc_at(value, options, Location::caller())
    }

    fn alloc_at(
        value: T,
        options: ObjOptions<T>,
        location: &'static Location<'static>,
    ) -> Result<Self, AllocError> {
        let layout = Layout::new::<ObjInner<T>>();
        // SAFETY: the header makes the layout non-zero-sized.
        let raw = unsafe { alloc::alloc(layout) }.cast::<ObjInner<T>>();
        let Some(ptr) = NonNull::new(raw) else {
            return Err(AllocError {
                size: layout.size(),
            });
        };
        let registration = stats::object_allocated(AllocationRecord {
            type_name: core::any::type_name::<T>(),
            size: mem::size_of::<T>(),
            tag: options.tag,
            location,
        });
        let inner = ObjInner {
            payload: value,
            header: Header {
                refs: RefCount::new(1),
                lock: ObjLock::new(options.lock),
                destructor: UnsafeCell::new(options.destructor),
                destroying: DebugDestroying::new(),
                registration,
            },
        };
        // SAFETY: freshly allocated with the layout of `ObjInner<T>`.
        unsafe { ptr.as_ptr().write(inner) };
        Ok(Self {
            ptr,
            _owns: PhantomData,
        })
    }

    fn inner(&self) -> &ObjInner<T> {
        // SAFETY: the block stays alive while this handle holds a reference.
        unsafe { self.ptr.as_ref() }
    }

    pub(crate) fn header(&self) -> &Header<T> {
        &self.inner().header
    }

    /// Current number of references. A snapshot.
    pub fn ref_count(&self) -> usize {
        self.header().refs.load()
    }

    /// Whether both handles refer to the same object.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Address of the payload; stable for the object's lifetime.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr().cast_const().cast::<T>()
    }

    /// Mutable access when this is the only reference.
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if this.header().refs.load() == 1 {
            // SAFETY: no other handle exists and `this` is borrowed mutably.
            Some(unsafe { &mut (*this.ptr.as_ptr()).payload })
        } else {
            None
        }
    }

    /// Take another reference, recording `tag` and the caller's location.
    #[track_caller]
    pub fn bump(&self, tag: &'static str) -> Self {
        let count = self.header().refs.get();
        stats::tagged_refs_changed(1, count, tag, Location::caller());
        Self {
            ptr: self.ptr,
            _owns: PhantomData,
        }
    }

    /// Give up this reference, recording `tag` and the caller's location.
    ///
    /// Returns the number of references left; 0 means this call destroyed
    /// the object.
    #[track_caller]
    pub fn release(self, tag: &'static str) -> usize {
        let this = ManuallyDrop::new(self);
        let remaining = this.header().refs.put();
        stats::tagged_refs_changed(-1, remaining, tag, Location::caller());
        if remaining == 0 {
            // SAFETY: the count reached zero in this call.
            unsafe { Self::destroy(this.ptr) };
        }
        remaining
    }

    /// Convert into a raw payload pointer, keeping the reference.
    pub fn into_raw(this: Self) -> *const T {
        let ptr = this.as_ptr();
        mem::forget(this);
        ptr
    }

    /// Rebuild a handle from `into_raw`, taking over its reference.
    ///
    /// # Safety
    /// `ptr` must come from `Obj::<T>::into_raw` and the reference it
    /// carries must not have been returned already.
    pub unsafe fn from_raw(ptr: *const T) -> Self {
        Self {
            ptr: NonNull::new_unchecked(ptr.cast_mut().cast::<ObjInner<T>>()),
            _owns: PhantomData,
        }
    }

    /// Add `delta` references to the object behind a raw pointer and
    /// return the new count. At 0 the object is destroyed before
    /// returning.
    ///
    /// A zero delta, a delta that would drive the count negative, or a
    /// call made while the object's destructor runs is a programming
    /// error; none of them changes the count.
    ///
    /// # Safety
    /// `ptr` must come from `Obj::<T>::into_raw` and the caller must own
    /// at least one reference to the object (or `-delta` of them when
    /// `delta` is negative).
    #[track_caller]
    pub unsafe fn adjust_raw(ptr: *const T, delta: isize, tag: &'static str) -> usize {
        let block = ptr.cast::<ObjInner<T>>();
        let header = &(*block).header;
        if delta == 0 {
            misuse!("reference adjustment by zero ({tag})");
            return header.refs.load();
        }
        if header.destroying.is_active() {
            misuse!("reference adjustment on an object being destroyed ({tag})");
            return 0;
        }
        let count = if delta > 0 {
            header.refs.add(delta.unsigned_abs())
        } else {
            match header.refs.sub(delta.unsigned_abs()) {
                Ok(n) => n,
                Err(Underflow { current }) => {
                    misuse!("reference count {current} driven negative by {delta} ({tag})");
                    return current;
                }
            }
        };
        stats::tagged_refs_changed(delta, count, tag, Location::caller());
        if count == 0 {
            Self::destroy(NonNull::new_unchecked(block.cast_mut()));
        }
        count
    }

    /// Run the destructor, drop the payload and free the block.
    ///
    /// # Safety
    /// The count must have just reached zero, so the caller owns the
    /// block exclusively.
    unsafe fn destroy(ptr: NonNull<ObjInner<T>>) {
        let inner = &mut *ptr.as_ptr();
        // Declared first so it also runs when the destructor unwinds.
        let _free = Teardown {
            ptr,
            registration: inner.header.registration,
        };
        let _destroying = inner.header.destroying.enter();
        if let Some(destructor) = inner.header.destructor.get_mut().take() {
            destructor(&mut inner.payload);
        }
    }
}

/// Drops the payload and frees the block of an object whose count
/// reached zero.
struct Teardown<T> {
    ptr: NonNull<ObjInner<T>>,
    registration: Registration,
}

impl<T> Drop for Teardown<T> {
    fn drop(&mut self) {
        // SAFETY: built only by `Obj::destroy`, which owns the block.
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            alloc::dealloc(self.ptr.as_ptr().cast::<u8>(), Layout::new::<ObjInner<T>>());
        }
        stats::object_destroyed(self.registration);
    }
}

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Self {
        self.header().refs.get();
        stats::refs_changed(1);
        Self {
            ptr: self.ptr,
            _owns: PhantomData,
        }
    }
}

impl<T> Drop for Obj<T> {
    fn drop(&mut self) {
        let remaining = self.header().refs.put();
        stats::refs_changed(-1);
        if remaining == 0 {
            // SAFETY: this handle returned the last reference.
            unsafe { Self::destroy(self.ptr) };
        }
    }
}

impl<T> Deref for Obj<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().payload
    }
}

impl<T> AsRef<T> for Obj<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: fmt::Debug> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("refs", &self.ref_count())
            .field("lock", &self.lock_class())
            .field("value", &**self)
            .finish()
    }
}
