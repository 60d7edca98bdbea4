// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bookkeeping for evicting idle users and shedding expired nodes.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
#[cfg(not(test))]
use std::time::Instant;

use gatekeeper_core::HolderId;
#[cfg(test)]
use mock_instant::thread_local::Instant;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

/// Knows whether a user currently has an active session on the host platform.
pub trait SessionTracker: Send + Sync + 'static {
    fn is_online(&self, uuid: &Uuid) -> bool;
}

/// Sessions reported to the engine through login and logout.
#[derive(Debug, Default)]
pub struct Sessions {
    online: RwLock<HashSet<Uuid>>,
}

impl Sessions {
    pub fn login(&self, uuid: Uuid) {
        self.online.write().insert(uuid);
    }

    pub fn logout(&self, uuid: Uuid) {
        self.online.write().remove(&uuid);
    }

    pub fn online(&self) -> Vec<Uuid> {
        self.online.read().iter().copied().collect()
    }
}

impl SessionTracker for Sessions {
    fn is_online(&self, uuid: &Uuid) -> bool {
        self.online.read().contains(uuid)
    }
}

/// Tracks when users were last used and which holders carry expired nodes.
///
/// A user becomes an eviction candidate once it was not used for longer than the timeout and
/// neither the engine's own sessions nor the host's session tracker consider it online.
pub struct Housekeeper {
    timeout: Duration,
    usage: Mutex<HashMap<Uuid, Instant>>,
    sessions: Sessions,
    tracker: Option<Arc<dyn SessionTracker>>,
    expired: Mutex<BTreeSet<HolderId>>,
}

impl Housekeeper {
    pub fn new(timeout: Duration, tracker: Option<Arc<dyn SessionTracker>>) -> Self {
        Self {
            timeout,
            usage: Mutex::new(HashMap::new()),
            sessions: Sessions::default(),
            tracker,
            expired: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn record_usage(&self, uuid: Uuid) {
        self.usage.lock().insert(uuid, Instant::now());
    }

    pub fn forget(&self, uuid: Uuid) {
        self.usage.lock().remove(&uuid);
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub fn is_online(&self, uuid: &Uuid) -> bool {
        self.sessions.is_online(uuid)
            || self
                .tracker
                .as_ref()
                .is_some_and(|tracker| tracker.is_online(uuid))
    }

    /// Loaded users which can be evicted now.
    ///
    /// Users without a usage record count as used right now.
    pub fn eviction_candidates(&self, loaded: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
        let mut usage = self.usage.lock();
        let mut candidates = Vec::new();
        for uuid in loaded {
            let last_used = *usage.entry(uuid).or_insert_with(Instant::now);
            if last_used.elapsed() < self.timeout {
                continue;
            }
            if self.is_online(&uuid) {
                continue;
            }
            candidates.push(uuid);
        }
        candidates
    }

    /// Remembers holders on which expired nodes were seen.
    pub fn queue_expired(&self, holders: impl IntoIterator<Item = HolderId>) {
        self.expired.lock().extend(holders);
    }

    pub fn take_expired(&self) -> BTreeSet<HolderId> {
        std::mem::take(&mut *self.expired.lock())
    }
}

impl std::fmt::Debug for Housekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Housekeeper")
            .field("timeout", &self.timeout)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
