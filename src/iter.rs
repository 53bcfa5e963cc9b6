//! Iteration over a container that tolerates concurrent link/unlink.
//!
//! The cursor is a bucket position plus the link sequence number of the
//! last member yielded. Each `next` locks one bucket, binary-searches for
//! the first node past the cursor and lets the lock go again, so the
//! member the cursor points at may be unlinked (or the bucket reshaped)
//! between calls without the walk losing its place.

use core::iter::FusedIterator;

use crate::container::{Container, Node};
use crate::obj::Obj;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct IterOptions {
    /// Walk buckets, and members within each bucket, in reverse.
    pub descending: bool,
    /// Remove each member from the container as it is yielded; the
    /// caller receives the container's reference.
    pub unlink: bool,
}

impl IterOptions {
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn unlink(mut self) -> Self {
        self.unlink = true;
        self
    }
}

/// Cursor over a container's members. Yields one reference per member.
pub struct Iter<'a, T, K: ?Sized = T> {
    container: &'a Container<T, K>,
    options: IterOptions,
    /// Buckets finished so far, counted in walk order.
    bucket: usize,
    /// Sequence number of the last member yielded from the current bucket.
    last: Option<u64>,
}

impl<'a, T, K: ?Sized> Iter<'a, T, K> {
    pub(crate) fn new(container: &'a Container<T, K>, options: IterOptions) -> Self {
        Self {
            container,
            options,
            bucket: 0,
            last: None,
        }
    }

    pub fn options(&self) -> IterOptions {
        self.options
    }

    fn bucket_index(&self) -> Option<usize> {
        let n = self.container.bucket_count();
        if self.bucket >= n {
            None
        } else if self.options.descending {
            Some(n - 1 - self.bucket)
        } else {
            Some(self.bucket)
        }
    }

    /// Position in `nodes` of the first member the cursor has not passed.
    fn cursor_at(&self, nodes: &[Node<T>]) -> Option<usize> {
        // Whether sequence numbers grow along the walk direction.
        let rising = self.container.ascending() != self.options.descending;
        let passed = |node: &Node<T>| match self.last {
            None => false,
            Some(last) if rising => node.seq <= last,
            Some(last) => node.seq >= last,
        };
        if self.options.descending {
            // Passed members form a suffix.
            let end = nodes.partition_point(|n| !passed(n));
            end.checked_sub(1)
        } else {
            let start = nodes.partition_point(passed);
            (start < nodes.len()).then_some(start)
        }
    }
}

impl<T, K: ?Sized> Iterator for Iter<'_, T, K> {
    type Item = Obj<T>;

    fn next(&mut self) -> Option<Obj<T>> {
        while let Some(index) = self.bucket_index() {
            let lock = self.container.bucket(index);
            let found = if self.options.unlink {
                let mut nodes = lock.write();
                self.cursor_at(&nodes).map(|at| {
                    let node = nodes.remove(at);
                    self.container.note_unlinked(1);
                    node
                })
            } else {
                let nodes = lock.read();
                self.cursor_at(&nodes).map(|at| Node {
                    seq: nodes[at].seq,
                    obj: nodes[at].obj.clone(),
                })
            };
            match found {
                Some(node) => {
                    self.last = Some(node.seq);
                    return Some(node.obj);
                }
                None => {
                    self.bucket += 1;
                    self.last = None;
                }
            }
        }
        None
    }
}

impl<T, K: ?Sized> FusedIterator for Iter<'_, T, K> {}
