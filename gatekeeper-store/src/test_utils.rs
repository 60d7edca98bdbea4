// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage wrappers for testing how the engine behaves around slow or failing backends.
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::memory::MemoryStorage;
use crate::models::{GroupData, HeldPermission, LogEntry, TrackData, UserData};
use crate::traits::{Storage, StorageError};

#[derive(Debug, Default)]
struct Instruments {
    user_loads: AtomicUsize,
    user_saves: AtomicUsize,
    group_loads: AtomicUsize,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

/// In-memory storage which counts calls and can be switched into a failing or slow mode.
#[derive(Clone, Debug, Default)]
pub struct InstrumentedStorage {
    inner: MemoryStorage,
    instruments: Arc<Instruments>,
}

impl InstrumentedStorage {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            instruments: Arc::default(),
        }
    }

    /// Underlying storage, shared with this wrapper.
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Every subsequent call fails with a backend error while set.
    pub fn set_failing(&self, failing: bool) {
        self.instruments.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every subsequent call by the given duration.
    pub fn set_delay(&self, delay: Duration) {
        self.instruments
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn user_loads(&self) -> usize {
        self.instruments.user_loads.load(Ordering::SeqCst)
    }

    pub fn user_saves(&self) -> usize {
        self.instruments.user_saves.load(Ordering::SeqCst)
    }

    pub fn group_loads(&self) -> usize {
        self.instruments.group_loads.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), StorageError> {
        let delay = self.instruments.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.instruments.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                backend: self.name().to_string(),
                reason: "backend switched to failing mode".to_string(),
            });
        }
        Ok(())
    }
}

impl Storage for InstrumentedStorage {
    fn name(&self) -> &str {
        "instrumented"
    }

    async fn load_user(
        &self,
        uuid: Uuid,
        username: Option<&str>,
    ) -> Result<Option<UserData>, StorageError> {
        self.instruments.user_loads.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.inner.load_user(uuid, username).await
    }

    async fn save_user(&self, user: UserData) -> Result<(), StorageError> {
        self.instruments.user_saves.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.inner.save_user(user).await
    }

    async fn unique_users(&self) -> Result<BTreeSet<Uuid>, StorageError> {
        self.enter().await?;
        self.inner.unique_users().await
    }

    async fn load_group(&self, name: &str) -> Result<Option<GroupData>, StorageError> {
        self.instruments.group_loads.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.inner.load_group(name).await
    }

    async fn create_and_load_group(&self, name: &str) -> Result<GroupData, StorageError> {
        self.enter().await?;
        self.inner.create_and_load_group(name).await
    }

    async fn save_group(&self, group: GroupData) -> Result<(), StorageError> {
        self.enter().await?;
        self.inner.save_group(group).await
    }

    async fn delete_group(&self, name: &str) -> Result<(), StorageError> {
        self.enter().await?;
        self.inner.delete_group(name).await
    }

    async fn load_all_groups(&self) -> Result<Vec<GroupData>, StorageError> {
        self.instruments.group_loads.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.inner.load_all_groups().await
    }

    async fn load_track(&self, name: &str) -> Result<Option<TrackData>, StorageError> {
        self.enter().await?;
        self.inner.load_track(name).await
    }

    async fn create_and_load_track(&self, name: &str) -> Result<TrackData, StorageError> {
        self.enter().await?;
        self.inner.create_and_load_track(name).await
    }

    async fn save_track(&self, track: TrackData) -> Result<(), StorageError> {
        self.enter().await?;
        self.inner.save_track(track).await
    }

    async fn delete_track(&self, name: &str) -> Result<(), StorageError> {
        self.enter().await?;
        self.inner.delete_track(name).await
    }

    async fn load_all_tracks(&self) -> Result<Vec<TrackData>, StorageError> {
        self.enter().await?;
        self.inner.load_all_tracks().await
    }

    async fn users_with_permission(
        &self,
        permission: &str,
    ) -> Result<Vec<HeldPermission<Uuid>>, StorageError> {
        self.enter().await?;
        self.inner.users_with_permission(permission).await
    }

    async fn groups_with_permission(
        &self,
        permission: &str,
    ) -> Result<Vec<HeldPermission<String>>, StorageError> {
        self.enter().await?;
        self.inner.groups_with_permission(permission).await
    }

    async fn log_action(&self, entry: LogEntry) -> Result<(), StorageError> {
        self.enter().await?;
        self.inner.log_action(entry).await
    }

    async fn action_log(&self) -> Result<Vec<LogEntry>, StorageError> {
        self.enter().await?;
        self.inner.action_log().await
    }
}
