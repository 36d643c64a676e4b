//! Tag-keyed object tables.
//!
//! The bridge only ever sees `u64` tags. Tags start at `1`, so `0` stays
//! free to mean "no object", and are never reused within a table, so a
//! stale tag can never reach a newer object.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tether_bridge::Epoch;

struct Entry<T: ?Sized> {
    value: Arc<T>,
    epoch: Epoch,
}

/// Concurrent tag -> object table.
pub struct HandleTable<T: ?Sized> {
    entries: DashMap<u64, Entry<T>>,
    next: AtomicU64,
}

impl<T: ?Sized> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.entries.len())
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: ?Sized> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }
}

impl<T: ?Sized> HandleTable<T> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, minted under `epoch`, and return its tag.
    ///
    /// # Panics
    ///
    /// Panics if the tag space is exhausted.
    pub fn insert(&self, epoch: Epoch, value: Arc<T>) -> u64 {
        let tag = self.next.fetch_add(1, Ordering::Relaxed);
        assert_ne!(tag, 0, "handle table tag space exhausted");
        self.entries.insert(tag, Entry { value, epoch });
        tag
    }

    /// The object behind `tag`.
    #[must_use]
    pub fn get(&self, tag: u64) -> Option<Arc<T>> {
        self.entries.get(&tag).map(|entry| Arc::clone(&entry.value))
    }

    /// The epoch `tag` was minted under.
    #[must_use]
    pub fn epoch(&self, tag: u64) -> Option<Epoch> {
        self.entries.get(&tag).map(|entry| entry.epoch)
    }

    /// The minting epoch of a live `tag` that is no longer the calling
    /// thread's current lease. `None` for current and unknown tags.
    #[must_use]
    pub fn stale_epoch(&self, tag: u64) -> Option<Epoch> {
        self.epoch(tag).filter(|epoch| !epoch.is_current())
    }

    /// Remove and return the object behind `tag`.
    pub fn remove(&self, tag: u64) -> Option<Arc<T>> {
        self.entries.remove(&tag).map(|(_, entry)| entry.value)
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
