// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{GroupData, HeldPermission, LogEntry, TrackData, UserData};

/// Interface for persisting and querying users, groups, tracks and the action log.
///
/// All methods are asynchronous and may be awaited from any thread. They are the only places in
/// the engine where execution suspends. Backends may honour cancellation by stopping work when
/// the returned future is dropped, but are not required to.
pub trait Storage: Send + Sync + 'static {
    /// Returns a short, human-readable name of the backend, used in logs.
    fn name(&self) -> &str;

    /// Loads the persisted state of a user.
    ///
    /// Returns `None` if the user was never saved. A given username is stored as the latest known
    /// name of the user.
    fn load_user(
        &self,
        uuid: Uuid,
        username: Option<&str>,
    ) -> impl Future<Output = Result<Option<UserData>, StorageError>> + Send;

    fn save_user(&self, user: UserData) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Returns the identifiers of all users known to the backend.
    fn unique_users(&self) -> impl Future<Output = Result<BTreeSet<Uuid>, StorageError>> + Send;

    /// Loads a group, returns `None` if it does not exist.
    fn load_group(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<GroupData>, StorageError>> + Send;

    /// Creates an empty group unless it already exists and returns its persisted state.
    fn create_and_load_group(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<GroupData, StorageError>> + Send;

    fn save_group(&self, group: GroupData) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn delete_group(&self, name: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn load_all_groups(&self) -> impl Future<Output = Result<Vec<GroupData>, StorageError>> + Send;

    /// Loads a track, returns `None` if it does not exist.
    fn load_track(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<TrackData>, StorageError>> + Send;

    /// Creates an empty track unless it already exists and returns its persisted state.
    fn create_and_load_track(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<TrackData, StorageError>> + Send;

    fn save_track(&self, track: TrackData) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn delete_track(&self, name: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn load_all_tracks(&self) -> impl Future<Output = Result<Vec<TrackData>, StorageError>> + Send;

    /// Returns every user node with the given permission, compared case-insensitively.
    fn users_with_permission(
        &self,
        permission: &str,
    ) -> impl Future<Output = Result<Vec<HeldPermission<Uuid>>, StorageError>> + Send;

    /// Returns every group node with the given permission, compared case-insensitively.
    fn groups_with_permission(
        &self,
        permission: &str,
    ) -> impl Future<Output = Result<Vec<HeldPermission<String>>, StorageError>> + Send;

    /// Appends an entry to the action log.
    fn log_action(&self, entry: LogEntry) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Returns the full action log, oldest entry first.
    fn action_log(&self) -> impl Future<Output = Result<Vec<LogEntry>, StorageError>> + Send;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("group '{0}' does not exist")]
    GroupNotFound(String),

    #[error("track '{0}' does not exist")]
    TrackNotFound(String),

    #[error("storage backend '{backend}' failed: {reason}")]
    Backend { backend: String, reason: String },
}
