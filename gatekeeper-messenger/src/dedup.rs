// SPDX-License-Identifier: MIT OR Apache-2.0

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::message::MessageId;

/// Default number of message ids remembered for deduplication.
pub const DEFAULT_DEDUP_WINDOW: usize = 1024;

/// Bounded set of recently seen message ids.
///
/// Once the window is full the least recently seen id is forgotten.
#[derive(Debug)]
pub struct DedupWindow {
    seen: LruCache<MessageId, ()>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Records the id, returns `true` if it was seen before.
    pub fn check_and_insert(&mut self, id: &MessageId) -> bool {
        self.seen.put(id.clone(), ()).is_some()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}
