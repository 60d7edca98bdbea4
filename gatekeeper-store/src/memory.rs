// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for users, groups, tracks and the action log.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use crate::models::{GroupData, HeldPermission, LogEntry, TrackData, UserData};
use crate::traits::{Storage, StorageError};

#[derive(Debug, Default)]
struct InnerMemoryStorage {
    users: BTreeMap<Uuid, UserData>,
    groups: BTreeMap<String, GroupData>,
    tracks: BTreeMap<String, TrackData>,
    log: Vec<LogEntry>,
}

/// Storage backend keeping everything in memory.
///
/// Cloning is cheap, clones share the same underlying state. This allows several engines inside
/// one process to act like peers sharing one database.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<InnerMemoryStorage>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_user(
        &self,
        uuid: Uuid,
        username: Option<&str>,
    ) -> Result<Option<UserData>, StorageError> {
        let mut inner = self.inner.write().await;
        let Some(user) = inner.users.get_mut(&uuid) else {
            return Ok(None);
        };
        if let Some(username) = username {
            user.username = Some(username.to_string());
        }
        Ok(Some(user.clone()))
    }

    async fn save_user(&self, user: UserData) -> Result<(), StorageError> {
        trace!(uuid = %user.uuid, "save user");
        let mut inner = self.inner.write().await;
        inner.users.insert(user.uuid, user);
        Ok(())
    }

    async fn unique_users(&self) -> Result<BTreeSet<Uuid>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.users.keys().copied().collect())
    }

    async fn load_group(&self, name: &str) -> Result<Option<GroupData>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.groups.get(name).cloned())
    }

    async fn create_and_load_group(&self, name: &str) -> Result<GroupData, StorageError> {
        let mut inner = self.inner.write().await;
        let group = inner
            .groups
            .entry(name.to_string())
            .or_insert_with(|| GroupData::new(name));
        Ok(group.clone())
    }

    async fn save_group(&self, group: GroupData) -> Result<(), StorageError> {
        trace!(name = %group.name, "save group");
        let mut inner = self.inner.write().await;
        inner.groups.insert(group.name.clone(), group);
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        inner
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::GroupNotFound(name.to_string()))
    }

    async fn load_all_groups(&self) -> Result<Vec<GroupData>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.groups.values().cloned().collect())
    }

    async fn load_track(&self, name: &str) -> Result<Option<TrackData>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.tracks.get(name).cloned())
    }

    async fn create_and_load_track(&self, name: &str) -> Result<TrackData, StorageError> {
        let mut inner = self.inner.write().await;
        let track = inner
            .tracks
            .entry(name.to_string())
            .or_insert_with(|| TrackData::new(name));
        Ok(track.clone())
    }

    async fn save_track(&self, track: TrackData) -> Result<(), StorageError> {
        trace!(name = %track.name, "save track");
        let mut inner = self.inner.write().await;
        inner.tracks.insert(track.name.clone(), track);
        Ok(())
    }

    async fn delete_track(&self, name: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        inner
            .tracks
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::TrackNotFound(name.to_string()))
    }

    async fn load_all_tracks(&self) -> Result<Vec<TrackData>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.tracks.values().cloned().collect())
    }

    async fn users_with_permission(
        &self,
        permission: &str,
    ) -> Result<Vec<HeldPermission<Uuid>>, StorageError> {
        let inner = self.inner.read().await;
        let held = inner
            .users
            .values()
            .flat_map(|user| {
                user.nodes
                    .iter()
                    .filter(|node| node.permission().eq_ignore_ascii_case(permission))
                    .map(|node| HeldPermission {
                        holder: user.uuid,
                        node: node.clone(),
                    })
            })
            .collect();
        Ok(held)
    }

    async fn groups_with_permission(
        &self,
        permission: &str,
    ) -> Result<Vec<HeldPermission<String>>, StorageError> {
        let inner = self.inner.read().await;
        let held = inner
            .groups
            .values()
            .flat_map(|group| {
                group
                    .nodes
                    .iter()
                    .filter(|node| node.permission().eq_ignore_ascii_case(permission))
                    .map(|node| HeldPermission {
                        holder: group.name.clone(),
                        node: node.clone(),
                    })
            })
            .collect();
        Ok(held)
    }

    async fn log_action(&self, entry: LogEntry) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        inner.log.push(entry);
        Ok(())
    }

    async fn action_log(&self) -> Result<Vec<LogEntry>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.log.clone())
    }
}
