//! UUID-addressed cache of list-result pages.
//!
//! A long-running search stays alive as a suspended stream; every page it
//! produces is kept as a materialized snapshot so clients can reload or
//! paginate backward. The cache is insertion-ordered and bounded: past the
//! capacity the oldest key is evicted, and an evicted UUID simply behaves
//! like a fresh query.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};

use crate::types::ApiError;

/// One page pulled from a result stream, before the pagination bookkeeping
/// is attached.
pub struct StreamPage {
    /// `{success, next, results}` page body.
    pub value: Value,
    pub result_count: usize,
    pub has_next: bool,
}

/// A lazy page producer. Synchronous: callers pump it from a worker thread.
/// After the final page it keeps returning empty last pages rather than
/// erroring.
pub trait ResultStream: Send {
    fn next_page(&mut self) -> Result<StreamPage, ApiError>;
}

/// Cache slot: either a finished page or the suspended stream that will
/// produce it.
pub enum CacheEntry {
    Materialized(Value),
    Suspended {
        stream: Box<dyn ResultStream>,
        /// UUID of the page before this one.
        prev: Option<String>,
        /// Result offset at which this page will start.
        next_offset: usize,
    },
}

/// Insertion-ordered, bounded page cache.
pub struct PageCache {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    capacity: usize,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new(), capacity }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store a page, evicting the oldest entries past capacity. Replacing an
    /// existing key (a suspended page becoming materialized) keeps its
    /// position.
    pub fn insert(&mut self, uuid: String, entry: CacheEntry) {
        if self.entries.insert(uuid.clone(), entry).is_none() {
            self.order.push_back(uuid);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// A materialized page for idempotent replay, if this UUID holds one.
    pub fn replay(&self, uuid: &str) -> Option<Value> {
        match self.entries.get(uuid) {
            Some(CacheEntry::Materialized(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Take a suspended stream out of the cache to resume it. Materialized
    /// entries are left alone.
    pub fn take_suspended(
        &mut self,
        uuid: &str,
    ) -> Option<(Box<dyn ResultStream>, Option<String>, usize)> {
        match self.entries.get(uuid) {
            Some(CacheEntry::Suspended { .. }) => {}
            _ => return None,
        }
        self.order.retain(|k| k != uuid);
        match self.entries.remove(uuid) {
            Some(CacheEntry::Suspended { stream, prev, next_offset }) => {
                Some((stream, prev, next_offset))
            }
            _ => None,
        }
    }
}
