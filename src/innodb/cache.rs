//! Shared LRU page cache.
//!
//! [`PageCache`] holds validated, immutable [`Page`]s keyed by page number.
//! Any number of [`Tablespace`](crate::innodb::tablespace::Tablespace)
//! handles over the same file can share one cache through an `Arc`; the
//! [`LruCache`] sits behind a mutex, and entries are never modified after
//! insertion, so a hit needs no re-validation.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::innodb::page::Page;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident: usize,
}

/// Bounded, thread-safe LRU cache of decoded pages.
#[derive(Debug)]
pub struct PageCache {
    pages: Mutex<LruCache<u64, Arc<Page>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PageCache {
    /// Create a cache holding at most `capacity` pages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PageCache {
            pages: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Convenience constructor for sharing between handles.
    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    /// Look up a page, promoting it to most recently used.
    pub fn get(&self, page_no: u64) -> Option<Arc<Page>> {
        let found = self.pages.lock().get(&page_no).cloned();
        match found {
            Some(page) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(page_no, "page cache hit");
                Some(page)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a page, evicting the least recently used entry when full.
    ///
    /// If the page is already cached the existing entry wins and is returned,
    /// so concurrent readers of the same page converge on one allocation.
    pub fn insert(&self, page: Arc<Page>) -> Arc<Page> {
        let mut pages = self.pages.lock();
        if let Some(existing) = pages.get(&page.page_no) {
            return Arc::clone(existing);
        }
        if let Some((victim, _)) = pages.push(page.page_no, Arc::clone(&page)) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(page_no = victim, "page cache eviction");
        }
        page
    }

    /// True if the page is resident (does not affect recency or counters).
    pub fn contains(&self, page_no: u64) -> bool {
        self.pages.lock().contains(&page_no)
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.pages.lock().cap().get()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.pages.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident: self.len(),
        }
    }
}
