//! A process-wide slot holding at most one managed object.
//!
//! Typical use is a `static` holding the current configuration: readers
//! take a reference with `get` and keep using it after a writer swaps in
//! a new object with `replace`.

use core::fmt;

use parking_lot::RwLock;

use crate::obj::Obj;

pub struct GlobalObj<T> {
    slot: RwLock<Option<Obj<T>>>,
}

impl<T> GlobalObj<T> {
    /// An empty slot. Usable in `static` initializers.
    pub const fn new() -> Self {
        Self {
            slot: parking_lot::const_rwlock(None),
        }
    }

    /// Store a new reference to `obj` and hand back the previous one.
    pub fn replace(&self, obj: &Obj<T>) -> Option<Obj<T>> {
        let next = obj.clone();
        self.slot.write().replace(next)
    }

    /// Store `obj`, releasing the previous occupant after the slot is
    /// unlocked.
    pub fn set(&self, obj: &Obj<T>) {
        drop(self.replace(obj));
    }

    /// Take a reference to the current occupant.
    pub fn get(&self) -> Option<Obj<T>> {
        self.slot.read().clone()
    }

    /// Empty the slot and hand back the occupant's reference.
    pub fn take(&self) -> Option<Obj<T>> {
        self.slot.write().take()
    }

    /// Empty the slot, releasing the occupant.
    pub fn release(&self) {
        drop(self.take());
    }

    pub fn is_set(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl<T> Default for GlobalObj<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for GlobalObj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalObj").field(&*self.slot.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::ObjOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    static CONFIG: GlobalObj<String> = GlobalObj::new();

    #[test]
    fn static_slot_replace_get_release() {
        assert!(CONFIG.get().is_none());
        let first = Obj::new("v1".to_string());
        assert!(CONFIG.replace(&first).is_none());
        assert_eq!(first.ref_count(), 2);

        let reader = CONFIG.get().unwrap();
        let second = Obj::new("v2".to_string());
        let old = CONFIG.replace(&second).unwrap();
        assert!(Obj::ptr_eq(&old, &first));
        drop(old);
        // A reader keeps the old object alive after the swap.
        assert_eq!(*reader, "v1");
        assert_eq!(first.ref_count(), 2);
        drop(reader);

        assert_eq!(*CONFIG.get().unwrap(), "v2");
        CONFIG.release();
        assert!(!CONFIG.is_set());
        assert_eq!(second.ref_count(), 1);
    }

    #[test]
    fn release_runs_destructor_of_last_reference() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let slot = GlobalObj::new();
        slot.set(&Obj::with_options(
            3u32,
            ObjOptions::new().on_destroy(move |_: &mut u32| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        slot.release();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destructor_may_touch_the_slot() {
        let slot = Arc::new(GlobalObj::<u32>::new());
        let inner = Arc::clone(&slot);
        slot.set(&Obj::with_options(
            1,
            ObjOptions::new().on_destroy(move |_: &mut u32| {
                assert!(inner.get().is_some());
            }),
        ));
        slot.set(&Obj::new(2));
        assert_eq!(*slot.get().unwrap(), 2);
        slot.release();
    }
}
