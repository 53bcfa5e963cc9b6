//! Container: a fixed array of buckets holding references to managed
//! objects, with caller-supplied hash and comparison callbacks.
//!
//! Each bucket is its own `RwLock`, so operations on different buckets
//! run in parallel. Every node carries a link sequence number taken
//! under the bucket lock; nodes stay sorted by it (ascending for append
//! order, descending for prepend order), which is what lets iterators
//! resume after concurrent unlinks.
//!
//! References released by an operation are dropped only after the
//! bucket lock is gone, so destructors may call back into the container.

use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ops::Range;
use core::ptr;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::collections::hash_map::RandomState;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{IntegrityError, LinkError};
use crate::iter::{Iter, IterOptions};
use crate::obj::Obj;
use crate::stats;
use crate::traversal::{Action, Cmp, Collect, Limit, Outcome, Scope, Search, Traversal};

type HashFn<T, K> = Box<dyn Fn(Search<'_, T, K>) -> u64 + Send + Sync>;
type CmpFn<T, K> = Box<dyn Fn(&T, Search<'_, T, K>) -> bool + Send + Sync>;

/// How `link` treats an object that matches an existing member.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum DuplicatePolicy {
    /// Link it anyway.
    #[default]
    Allow,
    /// Refuse if a member compares equal.
    RejectKey,
    /// Refuse only if this exact object is already a member.
    RejectObject,
    /// Swap it in place of the member that compares equal.
    Replace,
}

/// Where `link` places an object within its bucket.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum InsertOrder {
    #[default]
    Append,
    Prepend,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ContainerOptions {
    pub duplicates: DuplicatePolicy,
    pub order: InsertOrder,
}

impl ContainerOptions {
    pub fn duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn order(mut self, order: InsertOrder) -> Self {
        self.order = order;
        self
    }
}

/// Bucket load figures from `Container::stats`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ContainerStats {
    pub buckets: usize,
    pub objects: usize,
    pub empty_buckets: usize,
    pub max_bucket_len: usize,
}

pub(crate) struct Node<T> {
    pub(crate) seq: u64,
    pub(crate) obj: Obj<T>,
}

pub(crate) type Bucket<T> = Vec<Node<T>>;

pub struct Container<T, K: ?Sized = T> {
    buckets: Box<[RwLock<Bucket<T>>]>,
    hash_fn: HashFn<T, K>,
    cmp_fn: CmpFn<T, K>,
    options: ContainerOptions,
    next_seq: AtomicU64,
    count: AtomicUsize,
}

impl<T, K> Container<T, K>
where
    T: 'static,
    K: ?Sized + Hash + Eq + 'static,
{
    /// Container whose hash and comparison both come from a key
    /// projection.
    ///
    /// ```
    /// use rc_container::{Container, Obj, Search};
    ///
    /// struct Peer { name: String }
    ///
    /// let peers: Container<Peer, str> = Container::keyed(17, |p: &Peer| p.name.as_str());
    /// peers.link(&Obj::new(Peer { name: "alice".into() })).unwrap();
    /// assert!(peers.find(Search::Key("alice")).is_some());
    /// ```
    pub fn keyed<F>(bucket_count: usize, key_of: F) -> Self
    where
        F: Fn(&T) -> &K + Send + Sync + 'static,
    {
        Self::keyed_with_options(bucket_count, key_of, ContainerOptions::default())
    }

    pub fn keyed_with_options<F>(bucket_count: usize, key_of: F, options: ContainerOptions) -> Self
    where
        F: Fn(&T) -> &K + Send + Sync + 'static,
    {
        let hasher = RandomState::new();
        let key_of = Arc::new(key_of);
        let hash_key = Arc::clone(&key_of);
        Self::with_options(
            bucket_count,
            move |s: Search<'_, T, K>| match s {
                Search::Object(o) => hasher.hash_one((*hash_key)(o)),
                Search::Key(k) => hasher.hash_one(k),
            },
            move |o: &T, s: Search<'_, T, K>| match s {
                Search::Object(p) => (*key_of)(o) == (*key_of)(p),
                Search::Key(k) => (*key_of)(o) == k,
            },
            options,
        )
    }
}

impl<T, K: ?Sized> Container<T, K> {
    /// Create a container with `bucket_count` buckets (at least one).
    pub fn new<H, C>(bucket_count: usize, hash_fn: H, cmp_fn: C) -> Self
    where
        H: Fn(Search<'_, T, K>) -> u64 + Send + Sync + 'static,
        C: Fn(&T, Search<'_, T, K>) -> bool + Send + Sync + 'static,
    {
        Self::with_options(bucket_count, hash_fn, cmp_fn, ContainerOptions::default())
    }

    pub fn with_options<H, C>(
        bucket_count: usize,
        hash_fn: H,
        cmp_fn: C,
        options: ContainerOptions,
    ) -> Self
    where
        H: Fn(Search<'_, T, K>) -> u64 + Send + Sync + 'static,
        C: Fn(&T, Search<'_, T, K>) -> bool + Send + Sync + 'static,
    {
        let n = bucket_count.max(1);
        let buckets = std::iter::repeat_with(|| RwLock::new(Vec::new()))
            .take(n)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        stats::container_created();
        tracing::debug!(buckets = n, ?options, "container created");
        Self {
            buckets,
            hash_fn: Box::new(hash_fn),
            cmp_fn: Box::new(cmp_fn),
            options,
            next_seq: AtomicU64::new(1),
            count: AtomicUsize::new(0),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn options(&self) -> ContainerOptions {
        self.options
    }

    /// Number of linked objects.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Hash of `search` under this container's hash callback; feed it to
    /// `Traversal::in_bucket` to confine a callback to one bucket.
    pub fn hash_of(&self, search: Search<'_, T, K>) -> u64 {
        (self.hash_fn)(search)
    }

    pub(crate) fn bucket_index(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    pub(crate) fn bucket(&self, index: usize) -> &RwLock<Bucket<T>> {
        &self.buckets[index]
    }

    pub(crate) fn ascending(&self) -> bool {
        self.options.order == InsertOrder::Append
    }

    pub(crate) fn note_unlinked(&self, n: usize) {
        self.count.fetch_sub(n, Ordering::AcqRel);
    }

    fn range(&self, scope: Scope) -> Range<usize> {
        match scope {
            Scope::All => 0..self.buckets.len(),
            Scope::Bucket(hash) => {
                let i = self.bucket_index(hash);
                i..i + 1
            }
        }
    }

    /// Link `obj`, taking one reference to it.
    pub fn link(&self, obj: &Obj<T>) -> Result<(), LinkError> {
        let index = self.bucket_index(self.hash_of(Search::Object(&**obj)));
        let replaced = {
            let mut bucket = self.buckets[index].write();
            self.link_locked(&mut bucket, obj)?
        };
        drop(replaced);
        Ok(())
    }

    /// Link every object; returns how many were accepted.
    pub fn link_all<'o, I>(&self, objs: I) -> usize
    where
        I: IntoIterator<Item = &'o Obj<T>>,
        T: 'o,
    {
        objs.into_iter().filter(|o| self.link(o).is_ok()).count()
    }

    /// Insert under a held bucket lock. Returns a replaced member, which
    /// the caller must drop after unlocking.
    fn link_locked(&self, bucket: &mut Bucket<T>, obj: &Obj<T>) -> Result<Option<Obj<T>>, LinkError> {
        let probe = Search::Object(&**obj);
        match self.options.duplicates {
            DuplicatePolicy::Allow => {}
            DuplicatePolicy::RejectKey => {
                if bucket.iter().any(|n| (self.cmp_fn)(&*n.obj, probe)) {
                    return Err(LinkError::Duplicate);
                }
            }
            DuplicatePolicy::RejectObject => {
                if bucket.iter().any(|n| Obj::ptr_eq(&n.obj, obj)) {
                    return Err(LinkError::Duplicate);
                }
            }
            DuplicatePolicy::Replace => {
                if let Some(node) = bucket.iter_mut().find(|n| (self.cmp_fn)(&*n.obj, probe)) {
                    // The newcomer inherits the old position and sequence number.
                    return Ok(Some(core::mem::replace(&mut node.obj, obj.clone())));
                }
            }
        }
        let node = Node {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            obj: obj.clone(),
        };
        match self.options.order {
            InsertOrder::Append => bucket.push(node),
            InsertOrder::Prepend => bucket.insert(0, node),
        }
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(None)
    }

    /// Remove this exact object; returns whether it was a member.
    pub fn unlink(&self, obj: &Obj<T>) -> bool {
        let index = self.bucket_index(self.hash_of(Search::Object(&**obj)));
        let removed = {
            let mut bucket = self.buckets[index].write();
            self.unlink_locked(&mut bucket, obj)
        };
        removed.is_some()
    }

    fn unlink_locked(&self, bucket: &mut Bucket<T>, obj: &Obj<T>) -> Option<Obj<T>> {
        let at = bucket.iter().position(|n| Obj::ptr_eq(&n.obj, obj))?;
        let node = bucket.remove(at);
        self.note_unlinked(1);
        Some(node.obj)
    }

    /// Whether this exact object is a member.
    pub fn contains(&self, obj: &Obj<T>) -> bool {
        let index = self.bucket_index(self.hash_of(Search::Object(&**obj)));
        self.buckets[index]
            .read()
            .iter()
            .any(|n| Obj::ptr_eq(&n.obj, obj))
    }

    /// The unifying search primitive: walk the buckets `traversal`
    /// selects, ask `matcher` about each member, and act on matches.
    ///
    /// `Find` scans hold a bucket's read lock, `Unlink` scans its write
    /// lock, one bucket at a time. Within a bucket every verdict is taken
    /// before anything is removed, so a panicking matcher leaves the
    /// bucket as it was.
    pub fn callback<M, R>(&self, traversal: Traversal, mut matcher: M) -> Outcome<T>
    where
        M: FnMut(&T) -> R,
        R: Into<Cmp>,
    {
        let mut out = Outcome::new();
        let mut released = Vec::new();
        for index in self.range(traversal.scope) {
            let stop = match traversal.action {
                Action::Find => {
                    let bucket = self.buckets[index].read();
                    scan_find(bucket.as_slice(), &traversal, &mut matcher, &mut out)
                }
                Action::Unlink => {
                    let mut bucket = self.buckets[index].write();
                    self.scan_unlink(&mut bucket, &traversal, &mut matcher, &mut out, &mut released)
                }
            };
            if stop {
                break;
            }
        }
        drop(released);
        out
    }

    fn scan_unlink<M, R>(
        &self,
        bucket: &mut Bucket<T>,
        traversal: &Traversal,
        matcher: &mut M,
        out: &mut Outcome<T>,
        released: &mut Vec<Obj<T>>,
    ) -> bool
    where
        M: FnMut(&T) -> R,
        R: Into<Cmp>,
    {
        let mut hits = Vec::new();
        let mut stop = false;
        for (i, node) in bucket.iter().enumerate() {
            let verdict: Cmp = matcher(&*node.obj).into();
            if verdict.is_match() {
                hits.push(i);
                if traversal.limit == Limit::First {
                    stop = true;
                    break;
                }
            }
            if verdict.stops() {
                stop = true;
                break;
            }
        }
        if hits.is_empty() {
            return stop;
        }
        let mut taken: Vec<Obj<T>> = hits.iter().rev().map(|&i| bucket.remove(i).obj).collect();
        taken.reverse();
        self.note_unlinked(taken.len());
        out.matched += taken.len();
        match traversal.collect {
            Collect::References => out.objects.append(&mut taken),
            Collect::Nothing => released.append(&mut taken),
        }
        stop
    }

    /// First member matching `search` under the comparison callback.
    pub fn find(&self, search: Search<'_, T, K>) -> Option<Obj<T>> {
        let t = Traversal::find().in_bucket(self.hash_of(search));
        self.callback(t, |o| (self.cmp_fn)(o, search)).first()
    }

    /// Every member matching `search`.
    pub fn find_all(&self, search: Search<'_, T, K>) -> Vec<Obj<T>> {
        let t = Traversal::find().multiple().in_bucket(self.hash_of(search));
        self.callback(t, |o| (self.cmp_fn)(o, search)).objects
    }

    /// Unlink the first member matching `search` and hand back the
    /// container's reference to it.
    pub fn remove(&self, search: Search<'_, T, K>) -> Option<Obj<T>> {
        let t = Traversal::unlink().in_bucket(self.hash_of(search));
        self.callback(t, |o| (self.cmp_fn)(o, search)).first()
    }

    /// Unlink every member; returns how many there were.
    pub fn unlink_all(&self) -> usize {
        self.callback(Traversal::unlink().multiple().nodata(), |_| true)
            .matched
    }

    /// Link every member of `other` into this container; returns how
    /// many were accepted. Copying a container into itself links
    /// nothing.
    pub fn dup_from<K2: ?Sized>(&self, other: &Container<T, K2>) -> usize {
        if ptr::eq(self.buckets.as_ptr().cast::<()>(), other.buckets.as_ptr().cast::<()>()) {
            return 0;
        }
        other.iter().filter(|o| self.link(o).is_ok()).count()
    }

    pub fn iter(&self) -> Iter<'_, T, K> {
        Iter::new(self, IterOptions::default())
    }

    pub fn iter_with(&self, options: IterOptions) -> Iter<'_, T, K> {
        Iter::new(self, options)
    }

    /// Lock every bucket for writing, in ascending order.
    ///
    /// The guard offers the container operations without further
    /// locking, for callers that must compose several of them
    /// atomically.
    pub fn write(&self) -> ContainerGuard<'_, T, K> {
        ContainerGuard {
            container: self,
            buckets: self.buckets.iter().map(|b| b.write()).collect(),
            pending: Vec::new(),
        }
    }

    /// Lock every bucket for reading, in ascending order.
    pub fn read(&self) -> ContainerReadGuard<'_, T, K> {
        ContainerReadGuard {
            container: self,
            buckets: self.buckets.iter().map(|b| b.read()).collect(),
        }
    }

    /// Verify that every member sits in the bucket its hash selects, that
    /// link order holds, and that the member count is right.
    pub fn check(&self) -> Result<(), IntegrityError> {
        let guard = self.read();
        let mut actual = 0;
        for (index, bucket) in guard.buckets.iter().enumerate() {
            for (position, node) in bucket.iter().enumerate() {
                let expected = self.bucket_index(self.hash_of(Search::Object(&*node.obj)));
                if expected != index {
                    return Err(IntegrityError::WrongBucket {
                        found: index,
                        expected,
                    });
                }
                if position > 0 {
                    let prev = bucket[position - 1].seq;
                    let ordered = if self.ascending() {
                        prev < node.seq
                    } else {
                        prev > node.seq
                    };
                    if !ordered {
                        return Err(IntegrityError::OutOfOrder {
                            bucket: index,
                            position,
                        });
                    }
                }
            }
            actual += bucket.len();
        }
        let counted = self.count();
        if counted != actual {
            return Err(IntegrityError::CountMismatch { counted, actual });
        }
        Ok(())
    }

    /// Bucket load distribution.
    pub fn stats(&self) -> ContainerStats {
        let mut s = ContainerStats {
            buckets: self.buckets.len(),
            ..ContainerStats::default()
        };
        for bucket in self.buckets.iter() {
            let len = bucket.read().len();
            s.objects += len;
            s.max_bucket_len = s.max_bucket_len.max(len);
            if len == 0 {
                s.empty_buckets += 1;
            }
        }
        s
    }
}

fn scan_find<T, M, R>(
    bucket: &[Node<T>],
    traversal: &Traversal,
    matcher: &mut M,
    out: &mut Outcome<T>,
) -> bool
where
    M: FnMut(&T) -> R,
    R: Into<Cmp>,
{
    for node in bucket {
        let verdict: Cmp = matcher(&*node.obj).into();
        if verdict.is_match() {
            out.matched += 1;
            if traversal.collect == Collect::References {
                out.objects.push(node.obj.clone());
            }
            if traversal.limit == Limit::First {
                return true;
            }
        }
        if verdict.stops() {
            return true;
        }
    }
    false
}

impl<T, K: ?Sized> Drop for Container<T, K> {
    fn drop(&mut self) {
        stats::container_destroyed();
        tracing::debug!(objects = self.count(), "container destroyed");
    }
}

impl<T, K: ?Sized> fmt::Debug for Container<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("buckets", &self.buckets.len())
            .field("count", &self.count())
            .field("options", &self.options)
            .finish()
    }
}

/// Every bucket of a container, write-locked.
///
/// Operations through the guard never lock. References the guard
/// releases (unlinked under `Collect::Nothing`, or replaced) are dropped
/// after the bucket locks, when the guard goes away.
pub struct ContainerGuard<'a, T, K: ?Sized = T> {
    container: &'a Container<T, K>,
    buckets: Vec<RwLockWriteGuard<'a, Bucket<T>>>,
    pending: Vec<Obj<T>>,
}

impl<T, K: ?Sized> ContainerGuard<'_, T, K> {
    pub fn count(&self) -> usize {
        self.container.count()
    }

    pub fn link(&mut self, obj: &Obj<T>) -> Result<(), LinkError> {
        let c = self.container;
        let index = c.bucket_index(c.hash_of(Search::Object(&**obj)));
        if let Some(old) = c.link_locked(&mut self.buckets[index], obj)? {
            self.pending.push(old);
        }
        Ok(())
    }

    pub fn unlink(&mut self, obj: &Obj<T>) -> bool {
        let c = self.container;
        let index = c.bucket_index(c.hash_of(Search::Object(&**obj)));
        match c.unlink_locked(&mut self.buckets[index], obj) {
            Some(removed) => {
                self.pending.push(removed);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, search: Search<'_, T, K>) -> Option<Obj<T>> {
        let c = self.container;
        let bucket = &self.buckets[c.bucket_index(c.hash_of(search))];
        bucket
            .iter()
            .find(|n| (c.cmp_fn)(&*n.obj, search))
            .map(|n| n.obj.clone())
    }

    /// `Container::callback` over the already-held locks.
    pub fn callback<M, R>(&mut self, traversal: Traversal, mut matcher: M) -> Outcome<T>
    where
        M: FnMut(&T) -> R,
        R: Into<Cmp>,
    {
        let c = self.container;
        let mut out = Outcome::new();
        for index in c.range(traversal.scope) {
            let bucket = &mut self.buckets[index];
            let stop = match traversal.action {
                Action::Find => scan_find(bucket.as_slice(), &traversal, &mut matcher, &mut out),
                Action::Unlink => {
                    c.scan_unlink(&mut **bucket, &traversal, &mut matcher, &mut out, &mut self.pending)
                }
            };
            if stop {
                break;
            }
        }
        out
    }

    /// References to every member, in traversal order.
    pub fn objects(&self) -> Vec<Obj<T>> {
        collect_objects(&self.buckets)
    }
}

impl<T, K: ?Sized> Drop for ContainerGuard<'_, T, K> {
    fn drop(&mut self) {
        self.buckets.clear();
        self.pending.clear();
    }
}

/// Every bucket of a container, read-locked: a consistent snapshot.
pub struct ContainerReadGuard<'a, T, K: ?Sized = T> {
    container: &'a Container<T, K>,
    buckets: Vec<RwLockReadGuard<'a, Bucket<T>>>,
}

impl<T, K: ?Sized> ContainerReadGuard<'_, T, K> {
    pub fn count(&self) -> usize {
        self.container.count()
    }

    pub fn find(&self, search: Search<'_, T, K>) -> Option<Obj<T>> {
        let c = self.container;
        let bucket = &self.buckets[c.bucket_index(c.hash_of(search))];
        bucket
            .iter()
            .find(|n| (c.cmp_fn)(&*n.obj, search))
            .map(|n| n.obj.clone())
    }

    pub fn objects(&self) -> Vec<Obj<T>> {
        collect_objects(&self.buckets)
    }
}

fn collect_objects<T, B>(buckets: &[B]) -> Vec<Obj<T>>
where
    B: core::ops::Deref<Target = Bucket<T>>,
{
    buckets
        .iter()
        .flat_map(|b| b.iter().map(|n| n.obj.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[derive(Debug)]
    struct Chan {
        name: String,
        exten: u32,
    }

    fn chan(name: &str, exten: u32) -> Obj<Chan> {
        Obj::new(Chan {
            name: name.to_string(),
            exten,
        })
    }

    fn by_name(buckets: usize) -> Container<Chan, str> {
        Container::keyed(buckets, |c: &Chan| c.name.as_str())
    }

    /// Hash every object to the same bucket.
    fn one_bucket(options: ContainerOptions) -> Container<Chan, str> {
        Container::with_options(
            7,
            |_s: Search<'_, Chan, str>| 0,
            |c: &Chan, s: Search<'_, Chan, str>| match s {
                Search::Object(o) => c.name == o.name,
                Search::Key(k) => c.name == k,
            },
            options,
        )
    }

    #[test]
    fn link_takes_one_reference_and_unlink_returns_it() {
        let c = by_name(5);
        let a = chan("SIP/a", 1);
        c.link(&a).unwrap();
        assert_eq!(a.ref_count(), 2);
        assert_eq!(c.count(), 1);
        assert!(c.contains(&a));
        assert!(c.unlink(&a));
        assert_eq!(a.ref_count(), 1);
        assert!(!c.unlink(&a));
        assert!(c.find(Search::Key("SIP/a")).is_none());
    }

    #[test]
    fn zero_buckets_becomes_a_list() {
        let c = by_name(0);
        assert_eq!(c.bucket_count(), 1);
        c.link(&chan("x", 1)).unwrap();
        assert!(c.find(Search::Key("x")).is_some());
    }

    #[test]
    fn allow_policy_keeps_duplicates() {
        let c = by_name(3);
        c.link(&chan("dup", 1)).unwrap();
        c.link(&chan("dup", 2)).unwrap();
        let all = c.find_all(Search::Key("dup"));
        let extens: Vec<u32> = all.iter().map(|o| o.exten).collect();
        assert_eq!(extens, vec![1, 2]);
    }

    #[test]
    fn reject_key_policy_refuses_equal_member() {
        let c = Container::keyed_with_options(
            3,
            |c: &Chan| c.name.as_str(),
            ContainerOptions::default().duplicates(DuplicatePolicy::RejectKey),
        );
        let first = chan("k", 1);
        let second = chan("k", 2);
        c.link(&first).unwrap();
        assert_eq!(c.link(&second), Err(LinkError::Duplicate));
        assert_eq!(second.ref_count(), 1);
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn reject_object_policy_allows_equal_but_distinct() {
        let c = Container::keyed_with_options(
            3,
            |c: &Chan| c.name.as_str(),
            ContainerOptions::default().duplicates(DuplicatePolicy::RejectObject),
        );
        let a = chan("k", 1);
        c.link(&a).unwrap();
        assert_eq!(c.link(&a), Err(LinkError::Duplicate));
        c.link(&chan("k", 2)).unwrap();
        assert_eq!(c.count(), 2);
    }

    #[test]
    fn replace_policy_swaps_member() {
        let c = Container::keyed_with_options(
            3,
            |c: &Chan| c.name.as_str(),
            ContainerOptions::default().duplicates(DuplicatePolicy::Replace),
        );
        let old = chan("k", 1);
        let new = chan("k", 2);
        c.link(&old).unwrap();
        c.link(&new).unwrap();
        assert_eq!(c.count(), 1);
        assert_eq!(old.ref_count(), 1);
        assert_eq!(new.ref_count(), 2);
        assert_eq!(c.find(Search::Key("k")).unwrap().exten, 2);
        c.check().unwrap();
    }

    #[test]
    fn prepend_order_reverses_bucket() {
        let c = one_bucket(ContainerOptions::default().order(InsertOrder::Prepend));
        for (i, n) in ["a", "b", "c"].iter().enumerate() {
            c.link(&chan(n, i as u32)).unwrap();
        }
        let names: Vec<String> = c.iter().map(|o| o.name.clone()).collect();
        assert_eq!(names, ["c", "b", "a"]);
        c.check().unwrap();
    }

    #[test]
    fn unlink_multiple_returns_matches_and_leaves_rest() {
        let c = one_bucket(ContainerOptions::default());
        let a = chan("A", 1);
        let b = chan("B", 2);
        let d = chan("C", 3);
        c.link_all([&a, &b, &d]);
        let out = c.callback(Traversal::unlink().multiple(), |o: &Chan| o.name != "A");
        assert_eq!(out.matched, 2);
        let names: Vec<&str> = out.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["B", "C"]);
        drop(out);
        assert_eq!(c.count(), 1);
        assert!(c.find(Search::Key("B")).is_none());
        assert!(c.find(Search::Key("C")).is_none());
        assert!(c.find(Search::Key("A")).is_some());
        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    fn nodata_counts_without_references() {
        let c = by_name(4);
        let objs: Vec<_> = (0..6).map(|i| chan(&format!("c{i}"), i)).collect();
        c.link_all(&objs);
        let out = c.callback(Traversal::find().multiple().nodata(), |o: &Chan| o.exten % 2 == 0);
        assert_eq!(out.matched, 3);
        assert!(out.objects.is_empty());
        assert!(objs.iter().all(|o| o.ref_count() == 2));
    }

    #[test]
    fn stop_verdict_ends_traversal() {
        let c = one_bucket(ContainerOptions::default());
        for i in 0..5 {
            c.link(&chan(&format!("c{i}"), i)).unwrap();
        }
        let mut seen = 0;
        let out = c.callback(Traversal::find().multiple(), |o: &Chan| {
            seen += 1;
            match o.exten {
                1 => Cmp::Match,
                2 => Cmp::MatchStop,
                _ => Cmp::Skip,
            }
        });
        assert_eq!(out.matched, 2);
        assert_eq!(seen, 3);
    }

    #[test]
    fn remove_hands_back_container_reference() {
        let c = by_name(2);
        let a = chan("gone", 9);
        c.link(&a).unwrap();
        let r = c.remove(Search::Key("gone")).unwrap();
        assert!(Obj::ptr_eq(&r, &a));
        assert_eq!(a.ref_count(), 2);
        drop(r);
        assert_eq!(a.ref_count(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn panicking_matcher_leaves_container_usable() {
        let c = one_bucket(ContainerOptions::default());
        let objs: Vec<_> = (0..4).map(|i| chan(&format!("p{i}"), i)).collect();
        c.link_all(&objs);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            c.callback(Traversal::unlink().multiple(), |o: &Chan| {
                if o.exten == 2 {
                    panic!("matcher failure");
                }
                true
            })
        }));
        assert!(res.is_err());
        assert_eq!(c.count(), 4);
        c.check().unwrap();
        assert!(objs.iter().all(|o| o.ref_count() == 2));
        assert_eq!(c.unlink_all(), 4);
    }

    #[test]
    fn guard_composes_operations_without_relocking() {
        let c = by_name(4);
        let a = chan("a", 1);
        let b = chan("b", 2);
        {
            let mut g = c.write();
            g.link(&a).unwrap();
            assert!(g.find(Search::Key("a")).is_some());
            let out = g.callback(Traversal::find().multiple(), |_: &Chan| true);
            assert_eq!(out.matched, 1);
            drop(out);
            if g.find(Search::Key("b")).is_none() {
                g.link(&b).unwrap();
            }
            assert!(g.unlink(&a));
            assert_eq!(g.count(), 1);
            // The unlinked reference is held until the guard drops.
            assert_eq!(a.ref_count(), 2);
        }
        assert_eq!(a.ref_count(), 1);
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn read_guard_sees_consistent_snapshot() {
        let c = by_name(8);
        for i in 0..10 {
            c.link(&chan(&format!("r{i}"), i)).unwrap();
        }
        let g = c.read();
        let names: BTreeSet<String> = g.objects().iter().map(|o| o.name.clone()).collect();
        assert_eq!(names.len(), 10);
        assert_eq!(g.count(), 10);
        assert!(g.find(Search::Key("r3")).is_some());
    }

    #[test]
    fn dup_from_links_every_member() {
        let src = by_name(4);
        for i in 0..5 {
            src.link(&chan(&format!("d{i}"), i)).unwrap();
        }
        let dst = by_name(2);
        assert_eq!(dst.dup_from(&src), 5);
        assert_eq!(dst.count(), 5);
        for o in src.iter() {
            assert_eq!(o.ref_count(), 3);
        }
    }

    #[test]
    fn dup_from_itself_links_nothing() {
        let c = by_name(4);
        let objs: Vec<_> = (0..3).map(|i| chan(&format!("e{i}"), i)).collect();
        c.link_all(&objs);
        assert_eq!(c.dup_from(&c), 0);
        assert_eq!(c.count(), 3);
        assert!(objs.iter().all(|o| o.ref_count() == 2));
    }

    #[test]
    fn stats_reflect_bucket_load() {
        let c = one_bucket(ContainerOptions::default());
        for i in 0..3 {
            c.link(&chan(&format!("s{i}"), i)).unwrap();
        }
        let s = c.stats();
        assert_eq!(s.buckets, 7);
        assert_eq!(s.objects, 3);
        assert_eq!(s.empty_buckets, 6);
        assert_eq!(s.max_bucket_len, 3);
    }

    #[test]
    fn destructor_may_call_back_into_container() {
        let registry = Arc::new(by_name(4));
        let hook = Arc::clone(&registry);
        let member = Obj::with_options(
            Chan {
                name: "m".to_string(),
                exten: 0,
            },
            crate::obj::ObjOptions::new().on_destroy(move |_: &mut Chan| {
                hook.link(&chan("successor", 1)).unwrap();
            }),
        );
        registry.link(&member).unwrap();
        drop(member);
        // The container held the last reference; the destructor runs
        // after the bucket lock is released and links a replacement.
        assert_eq!(registry.unlink_all(), 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.find(Search::Key("successor")).is_some());
        registry.check().unwrap();
    }
}
