// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use gatekeeper_core::{HolderError, Track, normalize_name};
use gatekeeper_store::{Storage, TrackData};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::EngineError;

/// Table of all tracks, loaded in bulk and kept for the lifetime of the engine.
///
/// Tracks are small, so callers get copies and changes go through [`TrackManager::modify`].
/// Whether the referenced groups exist is checked by the engine when a track is read.
pub struct TrackManager<S> {
    storage: Arc<S>,
    tracks: RwLock<BTreeMap<String, Track>>,
}

impl<S> TrackManager<S>
where
    S: Storage,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            tracks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Replaces the table with the tracks known to storage.
    pub async fn load_all(&self) -> Result<(), EngineError> {
        let mut fresh = BTreeMap::new();
        for data in self.storage.load_all_tracks().await? {
            let track = data.into_track()?;
            fresh.insert(track.name().to_string(), track);
        }

        let count = fresh.len();
        *self.tracks.write() = fresh;
        debug!(count, "loaded all tracks");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Track> {
        let name = normalize_name(name).ok()?;
        self.tracks.read().get(&name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.tracks.read().keys().cloned().collect()
    }

    /// All tracks in alphabetical order.
    pub fn all(&self) -> Vec<Track> {
        self.tracks.read().values().cloned().collect()
    }

    pub async fn create(&self, name: &str) -> Result<Track, EngineError> {
        let name = normalize_name(name)?;
        if self.contains(&name) || self.storage.load_track(&name).await?.is_some() {
            return Err(EngineError::TrackExists(name));
        }

        let track = self
            .storage
            .create_and_load_track(&name)
            .await?
            .into_track()?;
        self.tracks.write().insert(name.clone(), track.clone());

        debug!(track = %name, "created track");
        Ok(track)
    }

    pub async fn delete(&self, name: &str) -> Result<(), EngineError> {
        let name = normalize_name(name)?;
        if !self.contains(&name) {
            return Err(EngineError::TrackNotFound(name));
        }

        self.storage.delete_track(&name).await?;
        self.tracks.write().remove(&name);

        debug!(track = %name, "deleted track");
        Ok(())
    }

    /// Applies a change to a track in memory.
    pub fn modify<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Track) -> Result<R, HolderError>,
    ) -> Result<R, EngineError> {
        let name = normalize_name(name)?;
        let mut tracks = self.tracks.write();
        let track = tracks
            .get_mut(&name)
            .ok_or_else(|| EngineError::TrackNotFound(name.clone()))?;
        Ok(f(track)?)
    }

    /// Writes the current state of a track to storage.
    pub async fn save(&self, name: &str) -> Result<(), EngineError> {
        let track = self
            .get(name)
            .ok_or_else(|| EngineError::TrackNotFound(name.to_string()))?;
        self.storage.save_track(TrackData::from(&track)).await?;

        trace!(track = %track.name(), "saved track");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use gatekeeper_core::HolderError;
    use gatekeeper_store::{MemoryStorage, Storage};

    use super::TrackManager;
    use crate::error::EngineError;

    #[tokio::test]
    async fn modify_and_persist() {
        let storage = MemoryStorage::new();
        let tracks = TrackManager::new(Arc::new(storage.clone()));

        tracks.create("Staff").await.unwrap();
        tracks
            .modify("staff", |track| {
                track.append("default")?;
                track.append("mod")
            })
            .unwrap();
        assert_matches!(
            tracks.modify("staff", |track| track.append("mod")),
            Err(EngineError::Holder(HolderError::AlreadyOnTrack(_)))
        );
        tracks.save("staff").await.unwrap();

        let stored = storage.load_track("staff").await.unwrap().unwrap();
        assert_eq!(stored.groups, vec!["default", "mod"]);

        let fresh = TrackManager::new(Arc::new(storage));
        fresh.load_all().await.unwrap();
        assert_eq!(fresh.get("staff").unwrap().groups(), &["default", "mod"]);

        fresh.delete("staff").await.unwrap();
        assert_matches!(
            fresh.delete("staff").await,
            Err(EngineError::TrackNotFound(_))
        );
    }
}
