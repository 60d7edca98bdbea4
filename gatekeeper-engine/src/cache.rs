// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use gatekeeper_core::{ContextSet, Timestamp};
use parking_lot::RwLock;

use crate::resolver::ResolvedData;

/// Versions a cached view was computed from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CacheStamp {
    /// Generation of the holder's own node set.
    pub holder: u64,

    /// Process-wide generation of all groups.
    pub groups: u64,
}

#[derive(Debug)]
struct CacheEntry {
    data: Arc<ResolvedData>,
    stamp: CacheStamp,
}

/// Memoized resolutions of one holder, keyed by query context.
///
/// Entries are filled lazily and checked on every access: an entry computed from another holder
/// or group generation, or one containing a temporary node which has expired since, is treated
/// as missing.
#[derive(Debug, Default)]
pub struct CachedData {
    entries: RwLock<HashMap<ContextSet, CacheEntry>>,
}

impl CachedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached view for the context if it is still valid.
    pub fn get(&self, context: &ContextSet, stamp: CacheStamp, now: Timestamp) -> Option<Arc<ResolvedData>> {
        let entries = self.entries.read();
        let entry = entries.get(context)?;
        if entry.stamp != stamp {
            return None;
        }
        if entry.data.earliest_expiry().is_some_and(|expiry| expiry <= now) {
            return None;
        }
        Some(entry.data.clone())
    }

    pub fn insert(&self, context: ContextSet, stamp: CacheStamp, data: Arc<ResolvedData>) {
        self.entries
            .write()
            .insert(context, CacheEntry { data, stamp });
    }

    /// Drops all entries.
    pub fn invalidate(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use gatekeeper_core::{ContextSet, Holder, Node, Timestamp, User};
    use uuid::Uuid;

    use super::{CacheStamp, CachedData};
    use crate::resolver::resolve;

    #[test]
    fn stale_entries_are_missed() {
        let cache = CachedData::new();
        let context = ContextSet::empty();
        let stamp = CacheStamp {
            holder: 1,
            groups: 1,
        };

        let mut user = User::new(Uuid::new_v4(), None);
        user.permissions_mut().set_node(
            Node::builder("vip")
                .expiry(Timestamp::new(100))
                .build()
                .unwrap(),
        );
        let data = resolve(&user, &context, &BTreeMap::new(), Timestamp::new(50)).data;
        cache.insert(context.clone(), stamp, Arc::new(data));

        assert!(cache.get(&context, stamp, Timestamp::new(99)).is_some());
        assert!(cache.get(&context, stamp, Timestamp::new(100)).is_none());

        let newer = CacheStamp {
            holder: 2,
            groups: 1,
        };
        assert!(cache.get(&context, newer, Timestamp::new(50)).is_none());

        let other_context = ContextSet::empty().add("server", "hub").unwrap();
        assert!(cache.get(&other_context, stamp, Timestamp::new(50)).is_none());

        cache.invalidate();
        assert!(cache.is_empty());
    }
}
