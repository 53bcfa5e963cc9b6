//! Process-wide diagnostic counters and live-object registry.
//!
//! Compiled in for debug builds and for builds with the `diagnostics`
//! feature. Everywhere else the hooks below are empty inline functions
//! and `snapshot()` reports zeros.
//!
//! The counters are updated independently, so a `Stats` snapshot is not
//! atomic across fields. Use it for leak hunting and tests, never for
//! correctness decisions.
//!
//! Plain `Clone`/`Drop` of an `Obj` only touches the atomic counters.
//! Tagged operations (`Obj::bump`, `Obj::release`, `Obj::adjust_raw`,
//! tagged allocation) are also tallied per tag, and emit `trace` events
//! when `RC_CONTAINER_TRACE_REFS` is set.

use core::panic::Location;

/// Whether this build carries diagnostics.
pub const ENABLED: bool = cfg!(any(debug_assertions, feature = "diagnostics"));

/// Environment variable enabling per-reference `trace` events.
pub const TRACE_REFS_ENV: &str = "RC_CONTAINER_TRACE_REFS";

/// Snapshot of the process-wide counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Live managed objects.
    pub objects: isize,
    /// Payload bytes held by live managed objects.
    pub bytes: isize,
    /// Live containers.
    pub containers: isize,
    /// Outstanding references across all live objects.
    pub refs: isize,
    /// Object locks currently held (each reader counts once).
    pub locked: isize,
}

/// Where and how a live object was allocated.
#[derive(Clone, Debug)]
pub struct AllocationRecord {
    pub type_name: &'static str,
    pub size: usize,
    pub tag: Option<&'static str>,
    pub location: &'static Location<'static>,
}

#[cfg(any(debug_assertions, feature = "diagnostics"))]
mod imp {
    use super::{AllocationRecord, Stats};
    use core::panic::Location;
    use core::sync::atomic::{AtomicIsize, Ordering};
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use slotmap::{DefaultKey, SlotMap};

    static OBJECTS: AtomicIsize = AtomicIsize::new(0);
    static BYTES: AtomicIsize = AtomicIsize::new(0);
    static CONTAINERS: AtomicIsize = AtomicIsize::new(0);
    static REFS: AtomicIsize = AtomicIsize::new(0);
    static LOCKED: AtomicIsize = AtomicIsize::new(0);

    static TRACE_REFS: Lazy<bool> =
        Lazy::new(|| std::env::var_os(super::TRACE_REFS_ENV).is_some_and(|v| v != "0"));

    #[derive(Default)]
    struct Registry {
        live: SlotMap<DefaultKey, AllocationRecord>,
        tags: hashbrown::HashMap<&'static str, isize>,
    }

    static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));

    #[derive(Copy, Clone, Debug)]
    pub(crate) struct Registration {
        key: DefaultKey,
    }

    pub(crate) fn snapshot() -> Stats {
        Stats {
            objects: OBJECTS.load(Ordering::Relaxed),
            bytes: BYTES.load(Ordering::Relaxed),
            containers: CONTAINERS.load(Ordering::Relaxed),
            refs: REFS.load(Ordering::Relaxed),
            locked: LOCKED.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn object_allocated(record: AllocationRecord) -> Registration {
        OBJECTS.fetch_add(1, Ordering::Relaxed);
        BYTES.fetch_add(record.size as isize, Ordering::Relaxed);
        REFS.fetch_add(1, Ordering::Relaxed);
        let tag = record.tag;
        let location = record.location;
        let key = REGISTRY.lock().live.insert(record);
        if *TRACE_REFS {
            tracing::trace!(
                tag = tag.unwrap_or(""),
                file = location.file(),
                line = location.line(),
                "object allocated"
            );
        }
        Registration { key }
    }

    pub(crate) fn object_destroyed(registration: Registration) {
        let record = REGISTRY.lock().live.remove(registration.key);
        let Some(record) = record else {
            return;
        };
        OBJECTS.fetch_sub(1, Ordering::Relaxed);
        BYTES.fetch_sub(record.size as isize, Ordering::Relaxed);
        if *TRACE_REFS {
            tracing::trace!(
                type_name = record.type_name,
                tag = record.tag.unwrap_or(""),
                "object destroyed"
            );
        }
    }

    #[inline]
    pub(crate) fn refs_changed(delta: isize) {
        REFS.fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn tagged_refs_changed(
        delta: isize,
        count: usize,
        tag: &'static str,
        location: &'static Location<'static>,
    ) {
        REFS.fetch_add(delta, Ordering::Relaxed);
        {
            let mut reg = REGISTRY.lock();
            let slot = reg.tags.entry(tag).or_insert(0);
            *slot += delta;
            if *slot == 0 {
                reg.tags.remove(tag);
            }
        }
        if *TRACE_REFS {
            tracing::trace!(
                tag,
                delta,
                count,
                file = location.file(),
                line = location.line(),
                "object reference adjusted"
            );
        }
    }

    #[inline]
    pub(crate) fn container_created() {
        CONTAINERS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn container_destroyed() {
        CONTAINERS.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn lock_acquired() {
        LOCKED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn lock_released() {
        LOCKED.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn live_objects() -> Vec<AllocationRecord> {
        REGISTRY.lock().live.values().cloned().collect()
    }

    pub(crate) fn refs_by_tag() -> Vec<(&'static str, isize)> {
        let mut out: Vec<_> = REGISTRY
            .lock()
            .tags
            .iter()
            .map(|(tag, n)| (*tag, *n))
            .collect();
        out.sort_unstable();
        out
    }
}

#[cfg(not(any(debug_assertions, feature = "diagnostics")))]
mod imp {
    use super::{AllocationRecord, Stats};
    use core::panic::Location;

    #[derive(Copy, Clone, Debug)]
    pub(crate) struct Registration;

    #[inline(always)]
    pub(crate) fn snapshot() -> Stats {
        Stats::default()
    }

    #[inline(always)]
    pub(crate) fn object_allocated(_record: AllocationRecord) -> Registration {
        Registration
    }

    #[inline(always)]
    pub(crate) fn object_destroyed(_registration: Registration) {}

    #[inline(always)]
    pub(crate) fn refs_changed(_delta: isize) {}

    #[inline(always)]
    pub(crate) fn tagged_refs_changed(
        _delta: isize,
        _count: usize,
        _tag: &'static str,
        _location: &'static Location<'static>,
    ) {
    }

    #[inline(always)]
    pub(crate) fn container_created() {}

    #[inline(always)]
    pub(crate) fn container_destroyed() {}

    #[inline(always)]
    pub(crate) fn lock_acquired() {}

    #[inline(always)]
    pub(crate) fn lock_released() {}

    pub(crate) fn live_objects() -> Vec<AllocationRecord> {
        Vec::new()
    }

    pub(crate) fn refs_by_tag() -> Vec<(&'static str, isize)> {
        Vec::new()
    }
}

pub(crate) use imp::{
    container_created, container_destroyed, lock_acquired, lock_released, object_allocated,
    object_destroyed, refs_changed, tagged_refs_changed, Registration,
};

/// Read all counters. Zeros when diagnostics are compiled out.
pub fn snapshot() -> Stats {
    imp::snapshot()
}

/// Allocation records of every live managed object.
pub fn live_objects() -> Vec<AllocationRecord> {
    imp::live_objects()
}

/// Outstanding tagged references per tag, sorted by tag.
///
/// A tag that was used to take and later release the same number of
/// references does not appear.
pub fn refs_by_tag() -> Vec<(&'static str, isize)> {
    imp::refs_by_tag()
}

/// Emit the counters, live objects and unbalanced tags as `debug` events.
pub fn log_live_objects() {
    let s = snapshot();
    tracing::debug!(
        objects = s.objects,
        bytes = s.bytes,
        containers = s.containers,
        refs = s.refs,
        locked = s.locked,
        "object stats"
    );
    for record in live_objects() {
        tracing::debug!(
            type_name = record.type_name,
            size = record.size,
            tag = record.tag.unwrap_or(""),
            file = record.location.file(),
            line = record.location.line(),
            "live object"
        );
    }
    for (tag, refs) in refs_by_tag() {
        tracing::debug!(tag, refs, "unbalanced tag");
    }
}
