// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gatekeeper_core::{DEFAULT_GROUP, Group, Holder, normalize_name};
use gatekeeper_store::{GroupData, HeldPermission, Storage};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::cell::HolderCell;
use crate::error::EngineError;
use crate::resolver::GroupLookup;

/// Table of all groups, loaded in bulk and kept for the lifetime of the engine.
///
/// Any change to any group bumps one shared generation counter. Cached views of every holder
/// remember the counter they were computed with, so a group edit invalidates all of them at once.
pub struct GroupManager<S> {
    storage: Arc<S>,
    groups: RwLock<BTreeMap<String, Arc<HolderCell<Group>>>>,
    generation: AtomicU64,
}

impl<S> GroupManager<S>
where
    S: Storage,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            groups: RwLock::new(BTreeMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Marks every cached view depending on groups as stale.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Replaces the table with the groups known to storage, creating the default group if it
    /// is missing.
    ///
    /// Groups which are already loaded keep their cell, only their nodes are replaced.
    pub async fn load_all(&self) -> Result<(), EngineError> {
        let mut fresh = BTreeMap::new();
        for data in self.storage.load_all_groups().await? {
            let group = data.into_group()?;
            fresh.insert(group.name().to_string(), group);
        }
        if !fresh.contains_key(DEFAULT_GROUP) {
            let group = self
                .storage
                .create_and_load_group(DEFAULT_GROUP)
                .await?
                .into_group()?;
            fresh.insert(group.name().to_string(), group);
        }

        let count = fresh.len();
        // Cell locks are only taken after the table lock is released, resolvers take them in
        // the opposite order.
        let mut updates = Vec::new();
        {
            let mut groups = self.groups.write();
            groups.retain(|name, _| fresh.contains_key(name));
            for (name, group) in fresh {
                match groups.get(&name) {
                    Some(cell) => updates.push((cell.clone(), group)),
                    None => {
                        groups.insert(name, Arc::new(HolderCell::new(group)));
                    }
                }
            }
        }
        for (cell, group) in updates {
            replace_nodes(&cell, group);
        }
        self.bump_generation();

        debug!(count, "loaded all groups");
        Ok(())
    }

    /// Re-reads a single group from storage, returns `None` if storage does not know it.
    pub async fn load(&self, name: &str) -> Result<Option<Arc<HolderCell<Group>>>, EngineError> {
        let name = normalize_name(name)?;
        let Some(data) = self.storage.load_group(&name).await? else {
            return Ok(None);
        };
        let group = data.into_group()?;

        let (cell, replacement) = {
            let mut groups = self.groups.write();
            match groups.get(&name).cloned() {
                Some(cell) => (cell, Some(group)),
                None => {
                    let cell = Arc::new(HolderCell::new(group));
                    groups.insert(name, cell.clone());
                    (cell, None)
                }
            }
        };
        if let Some(group) = replacement {
            replace_nodes(&cell, group);
        }
        self.bump_generation();
        Ok(Some(cell))
    }

    pub fn get(&self, name: &str) -> Option<Arc<HolderCell<Group>>> {
        let name = normalize_name(name).ok()?;
        self.groups.read().get(&name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of all groups in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        self.groups.read().keys().cloned().collect()
    }

    /// All groups in alphabetical order.
    pub fn all(&self) -> Vec<Arc<HolderCell<Group>>> {
        self.groups.read().values().cloned().collect()
    }

    /// Creates a new, empty group.
    pub async fn create(&self, name: &str) -> Result<Arc<HolderCell<Group>>, EngineError> {
        let name = normalize_name(name)?;
        if self.contains(&name) || self.storage.load_group(&name).await?.is_some() {
            return Err(EngineError::GroupExists(name));
        }

        let group = self
            .storage
            .create_and_load_group(&name)
            .await?
            .into_group()?;
        let cell = Arc::new(HolderCell::new(group));
        self.groups.write().insert(name.clone(), cell.clone());
        self.bump_generation();

        debug!(group = %name, "created group");
        Ok(cell)
    }

    /// Deletes a group from storage and memory. The default group can not be deleted.
    pub async fn delete(&self, name: &str) -> Result<(), EngineError> {
        let name = normalize_name(name)?;
        if name == DEFAULT_GROUP {
            return Err(EngineError::DeleteDefaultGroup);
        }
        let cell = self
            .get(&name)
            .ok_or_else(|| EngineError::GroupNotFound(name.clone()))?;

        let _guard = cell.lock_io().await;
        self.storage.delete_group(&name).await?;
        self.groups.write().remove(&name);
        self.bump_generation();

        debug!(group = %name, "deleted group");
        Ok(())
    }

    /// Writes the current state of a group to storage.
    pub async fn save(&self, name: &str) -> Result<(), EngineError> {
        let cell = self
            .get(name)
            .ok_or_else(|| EngineError::GroupNotFound(name.to_string()))?;

        let _guard = cell.lock_io().await;
        let data = GroupData::from(&*cell.read());
        self.storage.save_group(data).await?;

        trace!(group = %name, "saved group");
        Ok(())
    }

    /// Searches storage for groups holding a permission.
    pub async fn with_permission(
        &self,
        permission: &str,
    ) -> Result<Vec<HeldPermission<String>>, EngineError> {
        Ok(self.storage.groups_with_permission(permission).await?)
    }
}

impl<S> GroupLookup for GroupManager<S> {
    fn with_group<R>(&self, name: &str, f: impl FnOnce(&Group) -> R) -> Option<R> {
        let cell = self.groups.read().get(name).cloned()?;
        let group = cell.read();
        Some(f(&group))
    }
}

fn replace_nodes(cell: &HolderCell<Group>, group: Group) {
    let nodes: Vec<_> = group.permissions().nodes().cloned().collect();
    cell.write().permissions_mut().replace_nodes(nodes);
    cell.cache().invalidate();
}
