//! Pending item containers
//!
//! Each buffer flavor keeps its pending items in a container implementing
//! [`PendingSet`]. The containers are plain data structures; all locking
//! happens in the engine.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Holding area of a buffer
pub(crate) trait PendingSet: Send + 'static {
    type Item: Send + 'static;

    fn insert(&mut self, item: Self::Item);

    fn len(&self) -> usize;

    /// Remove everything, leaving the set empty
    fn take_all(&mut self) -> Vec<Self::Item>;
}

// ============================================================================
// Ordered (stash)
// ============================================================================

/// Insertion-ordered items
#[derive(Debug)]
pub(crate) struct OrderedSet<T> {
    items: VecDeque<T>,
}

impl<T> OrderedSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub(crate) fn take_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove the item at a signed position
    ///
    /// `0` is the oldest item, `-1` the newest.
    pub(crate) fn take_at(&mut self, position: isize) -> Option<T> {
        let index = resolve_position(self.items.len(), position)?;
        self.items.remove(index)
    }
}

impl<T: Send + 'static> PendingSet for OrderedSet<T> {
    type Item = T;

    fn insert(&mut self, item: T) {
        self.items.push_back(item);
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn take_all(&mut self) -> Vec<T> {
        Vec::from(std::mem::take(&mut self.items))
    }
}

/// Map a signed position to an index into `len` items
///
/// Non-negative positions count from the head, negative ones from the tail.
pub(crate) fn resolve_position(len: usize, position: isize) -> Option<usize> {
    if position >= 0 {
        let index = position.unsigned_abs();
        (index < len).then_some(index)
    } else {
        len.checked_sub(position.unsigned_abs())
    }
}

// ============================================================================
// Spool (spooler)
// ============================================================================

/// Items of a spooler
///
/// The insertion strategy is picked at construction. Only the distinct
/// strategy needs `Eq + Hash`, so accumulating spoolers take any item type.
pub(crate) struct SpoolSet<T> {
    items: Box<dyn PendingSet<Item = T>>,
    distinct: bool,
}

impl<T: Send + 'static> SpoolSet<T> {
    /// Plain multiset, duplicates are kept
    pub(crate) fn accumulate() -> Self {
        Self {
            items: Box::new(Accumulate(Vec::new())),
            distinct: false,
        }
    }

    pub(crate) fn is_distinct(&self) -> bool {
        self.distinct
    }
}

impl<T: Eq + Hash + Send + 'static> SpoolSet<T> {
    /// Equal items coalesce, the last one written is kept
    pub(crate) fn distinct() -> Self {
        Self {
            items: Box::new(Distinct(HashSet::new())),
            distinct: true,
        }
    }
}

impl<T: Send + 'static> PendingSet for SpoolSet<T> {
    type Item = T;

    fn insert(&mut self, item: T) {
        self.items.insert(item);
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn take_all(&mut self) -> Vec<T> {
        self.items.take_all()
    }
}

struct Accumulate<T>(Vec<T>);

impl<T: Send + 'static> PendingSet for Accumulate<T> {
    type Item = T;

    fn insert(&mut self, item: T) {
        self.0.push(item);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn take_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.0)
    }
}

struct Distinct<T>(HashSet<T>);

impl<T: Eq + Hash + Send + 'static> PendingSet for Distinct<T> {
    type Item = T;

    fn insert(&mut self, item: T) {
        // Last write wins: `replace` swaps out the stored value too.
        self.0.replace(item);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn take_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.0).into_iter().collect()
    }
}

impl<T: Send + 'static> fmt::Debug for SpoolSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpoolSet")
            .field("distinct", &self.distinct)
            .field("len", &self.items.len())
            .finish()
    }
}

// ============================================================================
// Keyed
// ============================================================================

/// A value whose identity is its key
///
/// Equality and hashing look at `key` only, so a distinct spooler of
/// `Keyed<K, V>` keeps the latest `value` per key.
///
/// ```
/// use batchbuf::Keyed;
///
/// let a = Keyed::new("cpu", 10);
/// let b = Keyed::new("cpu", 20);
/// assert_eq!(a, b);
/// assert_eq!(b.into_value(), 20);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Keyed<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Keyed<K, V> {
    #[must_use]
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }
}

impl<K: PartialEq, V> PartialEq for Keyed<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<K: Eq, V> Eq for Keyed<K, V> {}

impl<K: Hash, V> Hash for Keyed<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
