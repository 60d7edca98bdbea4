// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::future::try_join_all;
use gatekeeper_core::{ContextSet, User};
use gatekeeper_store::{HeldPermission, Storage, UserData};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::cell::HolderCell;
use crate::error::EngineError;
use crate::events::{Event, EventBus};

/// Table of loaded users.
///
/// Loading is single-flight per user: while one load of a user is in progress, concurrent callers
/// wait for it and then pick up its result from the table.
pub struct UserManager<S> {
    storage: Arc<S>,
    events: Arc<EventBus>,
    users: RwLock<HashMap<Uuid, Arc<HolderCell<User>>>>,
    loading: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    apply_default_group: bool,
}

impl<S> UserManager<S>
where
    S: Storage,
{
    pub fn new(storage: Arc<S>, events: Arc<EventBus>, apply_default_group: bool) -> Self {
        Self {
            storage,
            events,
            users: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
            apply_default_group,
        }
    }

    /// Returns the loaded user or loads it from storage.
    ///
    /// Users unknown to storage are created in memory, inheriting the default group. Nothing is
    /// inserted into the table if storage fails.
    pub async fn load(
        &self,
        uuid: Uuid,
        username: Option<&str>,
    ) -> Result<Arc<HolderCell<User>>, EngineError> {
        if let Some(cell) = self.get_loaded_and_rename(uuid, username) {
            return Ok(cell);
        }

        let slot = self.loading.lock().entry(uuid).or_default().clone();
        let _guard = slot.lock().await;

        // Someone else might have finished loading while we were waiting.
        if let Some(cell) = self.get_loaded_and_rename(uuid, username) {
            return Ok(cell);
        }

        let result = self.fetch(uuid, username).await;
        let cell = match result {
            Ok(user) => {
                let cell = Arc::new(HolderCell::new(user));
                self.users.write().insert(uuid, cell.clone());
                cell
            }
            Err(err) => {
                self.loading.lock().remove(&uuid);
                return Err(err);
            }
        };
        self.loading.lock().remove(&uuid);

        debug!(%uuid, "loaded user");
        self.events.emit(Event::UserLoad { uuid });
        Ok(cell)
    }

    /// Loads several users concurrently, failing if any of them fails.
    pub async fn load_many(
        &self,
        uuids: impl IntoIterator<Item = Uuid>,
    ) -> Result<Vec<Arc<HolderCell<User>>>, EngineError> {
        try_join_all(uuids.into_iter().map(|uuid| self.load(uuid, None))).await
    }

    /// Re-reads a loaded user from storage, returns `false` if the user is not loaded.
    pub async fn reload(&self, uuid: Uuid) -> Result<bool, EngineError> {
        let Some(cell) = self.get_if_loaded(uuid) else {
            return Ok(false);
        };

        let _guard = cell.lock_io().await;
        let username = cell.read().username().map(str::to_string);
        let fresh = self.fetch(uuid, username.as_deref()).await?;
        cell.write().refresh(fresh);
        cell.cache().invalidate();

        debug!(%uuid, "reloaded user");
        self.events.emit(Event::UserDataRecalculate { uuid });
        Ok(true)
    }

    /// Writes the current state of a loaded user to storage.
    pub async fn save(&self, uuid: Uuid) -> Result<(), EngineError> {
        let cell = self
            .get_if_loaded(uuid)
            .ok_or(EngineError::UserNotLoaded(uuid))?;

        let _guard = cell.lock_io().await;
        let data = UserData::from(&*cell.read());
        self.storage.save_user(data).await?;

        trace!(%uuid, "saved user");
        Ok(())
    }

    pub fn get_if_loaded(&self, uuid: Uuid) -> Option<Arc<HolderCell<User>>> {
        self.users.read().get(&uuid).cloned()
    }

    /// Finds a loaded user by name, ignoring case.
    pub fn get_by_username(&self, username: &str) -> Option<Arc<HolderCell<User>>> {
        self.users
            .read()
            .values()
            .find(|cell| {
                cell.read()
                    .username()
                    .is_some_and(|name| name.eq_ignore_ascii_case(username))
            })
            .cloned()
    }

    pub fn is_loaded(&self, uuid: Uuid) -> bool {
        self.users.read().contains_key(&uuid)
    }

    /// Identifiers of all loaded users.
    pub fn loaded(&self) -> Vec<Uuid> {
        self.users.read().keys().copied().collect()
    }

    /// Loaded users together with their cells.
    pub fn cells(&self) -> Vec<(Uuid, Arc<HolderCell<User>>)> {
        self.users
            .read()
            .iter()
            .map(|(uuid, cell)| (*uuid, cell.clone()))
            .collect()
    }

    /// Drops a user from memory, returns `false` if it was not loaded.
    pub fn unload(&self, uuid: Uuid) -> bool {
        let removed = self.users.write().remove(&uuid).is_some();
        if removed {
            debug!(%uuid, "unloaded user");
            self.events.emit(Event::UserUnload { uuid });
        }
        removed
    }

    /// Returns `true` if the user is loaded or known to storage.
    pub async fn has_registered(&self, uuid: Uuid) -> Result<bool, EngineError> {
        if self.is_loaded(uuid) {
            return Ok(true);
        }
        Ok(self.storage.unique_users().await?.contains(&uuid))
    }

    /// Identifiers of all loaded users and all users known to storage.
    pub async fn all_identifiers(&self) -> Result<BTreeSet<Uuid>, EngineError> {
        let mut uuids = self.storage.unique_users().await?;
        uuids.extend(self.loaded());
        Ok(uuids)
    }

    /// Searches storage for users holding a permission, optionally only in exactly the given
    /// context.
    pub async fn with_permission(
        &self,
        permission: &str,
        context: Option<&ContextSet>,
    ) -> Result<Vec<HeldPermission<Uuid>>, EngineError> {
        let mut held = self.storage.users_with_permission(permission).await?;
        if let Some(context) = context {
            held.retain(|entry| entry.node.context() == context);
        }
        Ok(held)
    }

    fn get_loaded_and_rename(
        &self,
        uuid: Uuid,
        username: Option<&str>,
    ) -> Option<Arc<HolderCell<User>>> {
        let cell = self.get_if_loaded(uuid)?;
        if let Some(username) = username {
            let changed = cell.read().username() != Some(username);
            if changed {
                cell.write().set_username(Some(username.to_string()));
            }
        }
        Some(cell)
    }

    async fn fetch(&self, uuid: Uuid, username: Option<&str>) -> Result<User, EngineError> {
        let storage = self.storage.clone();
        let name = username.map(str::to_string);

        // Runs detached, so a load completes even when the caller stops waiting for it.
        let data = tokio::spawn(async move { storage.load_user(uuid, name.as_deref()).await })
            .await??;

        let mut user = match data {
            Some(data) => data.into_user(),
            None => User::new(uuid, None),
        };
        if let Some(username) = username {
            user.set_username(Some(username.to_string()));
        }
        if self.apply_default_group && user.apply_default_group() {
            debug!(%uuid, "gave user without parents the default group");
        }
        Ok(user)
    }
}
