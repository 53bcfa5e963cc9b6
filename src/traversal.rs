//! Search descriptions and traversal policies for `Container::callback`.

use crate::obj::Obj;

/// What a caller is looking for: a whole object or just its key.
///
/// Hash and comparison callbacks receive this so a container can be
/// searched by key without building a probe object.
pub enum Search<'a, T, K: ?Sized = T> {
    Object(&'a T),
    Key(&'a K),
}

impl<T, K: ?Sized> Clone for Search<'_, T, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, K: ?Sized> Copy for Search<'_, T, K> {}

/// Matcher verdict for one object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Cmp {
    /// Not a match; keep going.
    Skip,
    /// A match; keep going if the traversal allows more than one.
    Match,
    /// Not a match; end the traversal.
    Stop,
    /// A match; end the traversal after it.
    MatchStop,
}

impl Cmp {
    pub fn is_match(self) -> bool {
        matches!(self, Cmp::Match | Cmp::MatchStop)
    }

    pub fn stops(self) -> bool {
        matches!(self, Cmp::Stop | Cmp::MatchStop)
    }
}

impl From<bool> for Cmp {
    fn from(matched: bool) -> Self {
        if matched {
            Cmp::Match
        } else {
            Cmp::Skip
        }
    }
}

/// Which buckets a traversal visits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Scope {
    All,
    /// Only the bucket this hash selects.
    Bucket(u64),
}

/// What happens to a matched object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Action {
    /// Leave it in the container.
    Find,
    /// Remove it from the container within the same locked scan.
    Unlink,
}

/// How many matches a traversal takes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Limit {
    First,
    All,
}

/// Whether matched objects are handed back.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Collect {
    /// Return one reference per match.
    References,
    /// Only count matches; unlinked objects are released.
    Nothing,
}

/// A composed traversal policy.
///
/// ```
/// use rc_container::{Action, Limit, Traversal};
///
/// let t = Traversal::unlink().multiple();
/// assert_eq!(t.action, Action::Unlink);
/// assert_eq!(t.limit, Limit::All);
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Traversal {
    pub scope: Scope,
    pub action: Action,
    pub limit: Limit,
    pub collect: Collect,
}

impl Traversal {
    /// First match anywhere, returned as a reference.
    pub const fn find() -> Self {
        Self {
            scope: Scope::All,
            action: Action::Find,
            limit: Limit::First,
            collect: Collect::References,
        }
    }

    /// First match anywhere, removed and returned.
    pub const fn unlink() -> Self {
        Self {
            action: Action::Unlink,
            ..Self::find()
        }
    }

    /// Take every match instead of the first.
    pub const fn multiple(mut self) -> Self {
        self.limit = Limit::All;
        self
    }

    /// Count matches without handing back references.
    pub const fn nodata(mut self) -> Self {
        self.collect = Collect::Nothing;
        self
    }

    /// Restrict the scan to the bucket selected by `hash`.
    pub const fn in_bucket(mut self, hash: u64) -> Self {
        self.scope = Scope::Bucket(hash);
        self
    }
}

impl Default for Traversal {
    fn default() -> Self {
        Self::find()
    }
}

/// Result of a traversal.
#[derive(Debug)]
pub struct Outcome<T> {
    /// Number of matches acted on.
    pub matched: usize,
    /// References to the matches, in traversal order. Empty under
    /// `Collect::Nothing`.
    pub objects: Vec<Obj<T>>,
}

impl<T> Outcome<T> {
    pub(crate) fn new() -> Self {
        Self {
            matched: 0,
            objects: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matched == 0
    }

    /// The first returned reference; the rest are released.
    pub fn first(self) -> Option<Obj<T>> {
        self.objects.into_iter().next()
    }
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for Outcome<T> {
    type Item = Obj<T>;
    type IntoIter = std::vec::IntoIter<Obj<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.into_iter()
    }
}
