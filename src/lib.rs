//! rc-container: reference-counted managed objects with embedded,
//! adjustable locks, and bucketed hash containers that hold references
//! to them.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a shared substrate for long-lived registries (channels, peers,
//!   configuration trees) where many threads find, hold and release the
//!   same objects, and where lifetime is decided by reference counts
//!   rather than by any single owner.
//! - Layers:
//!   - RefCount (refcount): atomic count with overflow abort and checked
//!     multi-step decrements.
//!   - Obj<T> (obj): one allocation holding the payload and a header
//!     (count, lock, destructor, diagnostic registration). The thread
//!     that returns the last reference runs the destructor and frees.
//!   - ObjGuard / Guarded (lock): the embedded lock, its tracked state and
//!     strength adjustment (upgrade, atomic downgrade).
//!   - Container<T, K> (container, traversal): fixed bucket array with
//!     one RwLock per bucket; caller-supplied hash and comparison
//!     callbacks; one traversal primitive (`callback`) behind find,
//!     remove and bulk unlink.
//!   - Iter (iter): cursor of bucket plus link sequence number.
//!   - GlobalObj (global): a process-wide replaceable slot.
//!   - stats: counters and a live-object registry, compiled in for debug
//!     builds and the `diagnostics` feature only.
//!
//! Constraints
//! - `Obj<T>` is `Send + Sync` exactly when `T` is.
//! - A container holds one reference per membership; linking clones,
//!   unlinking hands that reference back or drops it.
//! - Bucket locks are held one at a time, except by `Container::write`
//!   and `Container::read`, which take every bucket in ascending order.
//! - No lock ordering is imposed between object locks and bucket locks.
//!   Matchers and hash callbacks run under a bucket lock and must not
//!   lock the same container again (use the container guard instead).
//!
//! Reentrancy policy
//! - References released by container operations are dropped after the
//!   bucket lock is gone, so destructors may reenter any container.
//! - A destructor runs once. Taking a reference to an object from inside
//!   its own destructor is reported as misuse.
//!
//! Misuse
//! - Driving a count negative, locking an object allocated without a
//!   lock, and similar programming errors panic in diagnostic builds.
//!   Release builds log them through `tracing` and leave state alone.
//!
//! Overflow semantics
//! - A reference count beyond `isize::MAX` aborts the process, as `Arc`
//!   does.

mod container;
mod error;
mod global;
mod iter;
mod lock;
mod obj;
mod reentrancy;
mod refcount;
pub mod stats;
mod traversal;

// Public surface
pub use container::{
    Container, ContainerGuard, ContainerOptions, ContainerReadGuard, ContainerStats,
    DuplicatePolicy, InsertOrder,
};
pub use error::{AllocError, IntegrityError, LinkError, LockError};
pub use global::GlobalObj;
pub use iter::{Iter, IterOptions};
pub use lock::{Guarded, LockClass, LockMode, LockState, ObjGuard};
pub use obj::{Destructor, Obj, ObjOptions};
pub use traversal::{Action, Cmp, Collect, Limit, Outcome, Scope, Search, Traversal};
