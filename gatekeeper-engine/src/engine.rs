// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, Weak};
use std::time::Duration;

use gatekeeper_core::{
    ContextSet, Holder, HolderId, InsertOutcome, Node, PermissionHolder, Timestamp,
    Track, Tristate, User,
};
use gatekeeper_messenger::{Message, MessageKind, Messenger, PingId, Transport};
use gatekeeper_store::{HeldPermission, LogEntry, Storage};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::cache::CacheStamp;
use crate::cell::HolderCell;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{Event, EventBus};
use crate::housekeeper::{Housekeeper, SessionTracker};
use crate::manager::{GroupManager, TrackManager, UserManager};
use crate::resolver::{ResolvedData, resolve};

/// Shortest interval the background housekeeper runs at.
const MIN_HOUSEKEEPER_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running permissions engine.
///
/// The engine owns the tables of loaded users, groups and tracks, answers permission queries
/// from memoized views and keeps peers sharing the same storage informed through the messenger.
/// Cloning is cheap, all clones refer to the same engine.
///
/// Mutations only change in-memory state. Call [`Engine::save`] afterwards to persist them and
/// notify other instances.
pub struct Engine<S, T> {
    inner: Arc<EngineInner<S, T>>,
}

struct EngineInner<S, T> {
    config: EngineConfig,
    storage: Arc<S>,
    events: Arc<EventBus>,
    users: UserManager<S>,
    groups: GroupManager<S>,
    tracks: TrackManager<S>,
    housekeeper: Housekeeper,
    messenger: Option<Messenger<T>>,
    plugin_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl<S, T> Clone for Engine<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A user's step along a track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackMove {
    /// Group the user was in before, `None` if the user was not on the track.
    pub from: Option<String>,

    /// Group the user is in now, `None` if the user left the track.
    pub to: Option<String>,
}

impl<S, T> Engine<S, T>
where
    S: Storage,
    T: Transport,
{
    pub fn builder(storage: S, transport: T) -> Builder<S, T> {
        Builder::new(storage, transport)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &S {
        &self.inner.storage
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn users(&self) -> &UserManager<S> {
        &self.inner.users
    }

    pub fn groups(&self) -> &GroupManager<S> {
        &self.inner.groups
    }

    pub fn tracks(&self) -> &TrackManager<S> {
        &self.inner.tracks
    }

    pub fn housekeeper(&self) -> &Housekeeper {
        &self.inner.housekeeper
    }

    /// Messenger of this engine, `None` if messaging is disabled.
    pub fn messenger(&self) -> Option<&Messenger<T>> {
        self.inner.messenger.as_ref()
    }

    /// Returns `true` if both handles refer to the same engine.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Users

    /// Loads a user, see [`UserManager::load`].
    pub async fn load_user(
        &self,
        uuid: Uuid,
        username: Option<&str>,
    ) -> Result<Arc<HolderCell<User>>, EngineError> {
        let cell = self.inner.users.load(uuid, username).await?;
        self.inner.housekeeper.record_usage(uuid);
        Ok(cell)
    }

    pub async fn load_users(
        &self,
        uuids: impl IntoIterator<Item = Uuid>,
    ) -> Result<Vec<Arc<HolderCell<User>>>, EngineError> {
        let cells = self.inner.users.load_many(uuids).await?;
        for cell in &cells {
            self.inner.housekeeper.record_usage(cell.read().uuid());
        }
        Ok(cells)
    }

    /// Loads a user for a new session and marks the session online.
    pub async fn login(
        &self,
        uuid: Uuid,
        username: &str,
    ) -> Result<Arc<HolderCell<User>>, EngineError> {
        let result = self.inner.users.load(uuid, Some(username)).await;
        self.inner.events.emit(Event::UserLoginProcess {
            uuid,
            username: username.to_string(),
            loaded: result.is_ok(),
        });

        let cell = result?;
        self.inner.housekeeper.sessions().login(uuid);
        self.inner.housekeeper.record_usage(uuid);
        info!(%uuid, username, "user logged in");
        Ok(cell)
    }

    /// Marks a session offline. The user stays loaded until the housekeeper evicts it.
    pub fn logout(&self, uuid: Uuid) {
        self.inner.housekeeper.sessions().logout(uuid);
        self.inner.housekeeper.record_usage(uuid);
        debug!(%uuid, "user logged out");
    }

    pub fn unload_user(&self, uuid: Uuid) -> bool {
        self.inner.housekeeper.forget(uuid);
        self.inner.users.unload(uuid)
    }

    /// Unloads a user unless it is online. Returns `true` if the user was unloaded.
    pub fn cleanup_user(&self, uuid: Uuid) -> bool {
        if self.inner.housekeeper.is_online(&uuid) {
            return false;
        }
        self.unload_user(uuid)
    }

    /// Re-reads a loaded user from storage, returns `false` if it is not loaded.
    pub async fn reload_user(&self, uuid: Uuid) -> Result<bool, EngineError> {
        self.inner.users.reload(uuid).await
    }

    /// Switches the primary group of a loaded user to a group it inherits.
    pub fn set_primary_group(&self, uuid: Uuid, group: &str) -> Result<(), EngineError> {
        let cell = self
            .inner
            .users
            .get_if_loaded(uuid)
            .ok_or(EngineError::UserNotLoaded(uuid))?;
        cell.write().set_primary_group(group)?;
        Ok(())
    }

    // Groups and tracks

    pub async fn create_group(&self, name: &str) -> Result<(), EngineError> {
        let cell = self.inner.groups.create(name).await?;
        let name = cell.read().name().to_string();
        self.inner.events.emit(Event::GroupCreate { name });
        self.notify(MessageKind::Update).await;
        Ok(())
    }

    pub async fn delete_group(&self, name: &str) -> Result<(), EngineError> {
        self.inner.groups.delete(name).await?;
        self.inner.events.emit(Event::GroupDelete {
            name: name.to_lowercase(),
        });
        self.notify(MessageKind::Update).await;
        Ok(())
    }

    pub async fn create_track(&self, name: &str) -> Result<(), EngineError> {
        let track = self.inner.tracks.create(name).await?;
        self.inner.events.emit(Event::TrackCreate {
            name: track.name().to_string(),
        });
        self.notify(MessageKind::Update).await;
        Ok(())
    }

    pub async fn delete_track(&self, name: &str) -> Result<(), EngineError> {
        self.inner.tracks.delete(name).await?;
        self.inner.events.emit(Event::TrackDelete {
            name: name.to_lowercase(),
        });
        self.notify(MessageKind::Update).await;
        Ok(())
    }

    /// Returns a track after checking that every group on it exists.
    pub fn track(&self, name: &str) -> Result<Track, EngineError> {
        let track = self
            .inner
            .tracks
            .get(name)
            .ok_or_else(|| EngineError::TrackNotFound(name.to_lowercase()))?;
        if let Some(missing) = track
            .groups()
            .iter()
            .find(|group| !self.inner.groups.contains(group))
        {
            return Err(EngineError::DanglingReference {
                track: track.name().to_string(),
                group: missing.clone(),
            });
        }
        Ok(track)
    }

    /// Appends a group to a track, the group needs to exist.
    pub fn track_append(&self, track: &str, group: &str) -> Result<(), EngineError> {
        if !self.inner.groups.contains(group) {
            return Err(EngineError::GroupNotFound(group.to_lowercase()));
        }
        self.inner
            .tracks
            .modify(track, |track| track.append(group))
    }

    /// Inserts a group into a track at the given position, the group needs to exist.
    pub fn track_insert(&self, track: &str, position: usize, group: &str) -> Result<(), EngineError> {
        if !self.inner.groups.contains(group) {
            return Err(EngineError::GroupNotFound(group.to_lowercase()));
        }
        self.inner
            .tracks
            .modify(track, |track| track.insert(position, group))
    }

    pub fn track_remove(&self, track: &str, group: &str) -> Result<(), EngineError> {
        self.inner
            .tracks
            .modify(track, |track| track.remove(group))
    }

    pub fn track_clear(&self, track: &str) -> Result<(), EngineError> {
        self.inner.tracks.modify(track, |track| {
            track.clear();
            Ok(())
        })
    }

    // Node mutations

    /// Adds a node to a user or group.
    ///
    /// An almost-equal node is replaced, unless strict insertion is configured in which case the
    /// call fails with a conflict.
    pub fn set_node(&self, target: &HolderId, node: Node) -> Result<InsertOutcome, EngineError> {
        let strict = self.inner.config.strict_insertion;
        let outcome = self.with_holder_mut(target, |holder| {
            if strict {
                holder.set_node_strict(node.clone())
            } else {
                Ok(holder.set_node(node.clone()))
            }
        })??;

        if let InsertOutcome::Replaced(replaced) = &outcome {
            for old in replaced {
                self.inner.events.emit(Event::NodeRemove {
                    target: target.clone(),
                    node: old.clone(),
                });
            }
        }
        if outcome.is_changed() {
            self.inner.events.emit(Event::NodeAdd {
                target: target.clone(),
                node,
            });
        }
        Ok(outcome)
    }

    /// Removes nodes equal to the given one when ignoring value and expiry.
    pub fn unset_node(&self, target: &HolderId, node: &Node) -> Result<Vec<Node>, EngineError> {
        let removed = self.with_holder_mut(target, |holder| holder.unset_node(node))?;
        for node in &removed {
            self.inner.events.emit(Event::NodeRemove {
                target: target.clone(),
                node: node.clone(),
            });
        }
        Ok(removed)
    }

    /// Removes every node matching the filter.
    pub fn clear_nodes(
        &self,
        target: &HolderId,
        filter: impl FnMut(&Node) -> bool,
    ) -> Result<Vec<Node>, EngineError> {
        let removed = self.with_holder_mut(target, |holder| holder.clear_nodes(filter))?;
        if !removed.is_empty() {
            self.inner.events.emit(Event::NodeClear {
                target: target.clone(),
                nodes: removed.clone(),
            });
        }
        Ok(removed)
    }

    /// Applies several changes to one holder while holding its write lock.
    ///
    /// Permission queries observe either none or all of the changes. No node events are emitted.
    pub fn batch<R>(
        &self,
        target: &HolderId,
        f: impl FnOnce(&mut PermissionHolder) -> R,
    ) -> Result<R, EngineError> {
        self.with_holder_mut(target, f)
    }

    /// Persists a holder and tells other instances about it.
    pub async fn save(&self, target: &HolderId) -> Result<(), EngineError> {
        match target {
            HolderId::User(uuid) => {
                self.inner.users.save(*uuid).await?;
                self.notify(MessageKind::UserUpdate(*uuid)).await;
            }
            HolderId::Group(name) => {
                self.inner.groups.save(name).await?;
                self.notify(MessageKind::Update).await;
            }
            HolderId::Track(name) => {
                self.inner.tracks.save(name).await?;
                self.notify(MessageKind::Update).await;
            }
        }
        Ok(())
    }

    fn with_holder_mut<R>(
        &self,
        target: &HolderId,
        f: impl FnOnce(&mut PermissionHolder) -> R,
    ) -> Result<R, EngineError> {
        match target {
            HolderId::User(uuid) => {
                let cell = self
                    .inner
                    .users
                    .get_if_loaded(*uuid)
                    .ok_or(EngineError::UserNotLoaded(*uuid))?;
                let mut user = cell.write();
                let result = f(user.permissions_mut());
                user.validate_primary_group();
                Ok(result)
            }
            HolderId::Group(name) => {
                let cell = self
                    .inner
                    .groups
                    .get(name)
                    .ok_or_else(|| EngineError::GroupNotFound(name.clone()))?;
                let (result, changed) = {
                    let mut group = cell.write();
                    let generation = group.permissions().generation();
                    let result = f(group.permissions_mut());
                    (result, group.permissions().generation() != generation)
                };
                if changed {
                    self.inner.groups.bump_generation();
                }
                Ok(result)
            }
            HolderId::Track(_) => Err(EngineError::NotAPermissionHolder(target.clone())),
        }
    }

    // Queries

    /// Effective view of a loaded user in the given context.
    pub fn user_data(
        &self,
        uuid: Uuid,
        context: &ContextSet,
    ) -> Result<Arc<ResolvedData>, EngineError> {
        let cell = self
            .inner
            .users
            .get_if_loaded(uuid)
            .ok_or(EngineError::UserNotLoaded(uuid))?;
        self.inner.housekeeper.record_usage(uuid);
        Ok(self.resolve_cached(&cell, context))
    }

    /// Effective view of a group in the given context.
    pub fn group_data(
        &self,
        name: &str,
        context: &ContextSet,
    ) -> Result<Arc<ResolvedData>, EngineError> {
        let cell = self
            .inner
            .groups
            .get(name)
            .ok_or_else(|| EngineError::GroupNotFound(name.to_lowercase()))?;
        Ok(self.resolve_cached(&cell, context))
    }

    /// Verdict for a permission of a loaded user, [`Tristate::Undefined`] if it is not loaded.
    pub fn check_permission(&self, uuid: Uuid, permission: &str, context: &ContextSet) -> Tristate {
        match self.user_data(uuid, context) {
            Ok(data) => data.check(permission),
            Err(_) => Tristate::Undefined,
        }
    }

    /// Loaded users for which the permission resolves to anything but undefined.
    pub fn loaded_with_permission(&self, permission: &str, context: &ContextSet) -> Vec<Uuid> {
        self.inner
            .users
            .cells()
            .into_iter()
            .filter(|(_, cell)| self.resolve_cached(cell, context).check(permission).is_defined())
            .map(|(uuid, _)| uuid)
            .collect()
    }

    /// Users in storage holding a permission, optionally only in exactly the given context.
    pub async fn users_with_permission(
        &self,
        permission: &str,
        context: Option<&ContextSet>,
    ) -> Result<Vec<HeldPermission<Uuid>>, EngineError> {
        self.inner.users.with_permission(permission, context).await
    }

    /// Groups in storage holding a permission, optionally only in exactly the given context.
    pub async fn groups_with_permission(
        &self,
        permission: &str,
        context: Option<&ContextSet>,
    ) -> Result<Vec<HeldPermission<String>>, EngineError> {
        let mut held = self.inner.groups.with_permission(permission).await?;
        if let Some(context) = context {
            held.retain(|entry| entry.node.context() == context);
        }
        Ok(held)
    }

    fn resolve_cached<H: Holder>(&self, cell: &HolderCell<H>, context: &ContextSet) -> Arc<ResolvedData> {
        let now = Timestamp::now();
        let groups = &self.inner.groups;
        // Read before resolving, so group changes during traversal make the entry stale.
        let group_generation = groups.generation();

        let holder = cell.read();
        let stamp = CacheStamp {
            holder: holder.permissions().generation(),
            groups: group_generation,
        };
        if let Some(data) = cell.cache().get(context, stamp, now) {
            return data;
        }

        let resolution = resolve(&*holder, context, groups, now);
        drop(holder);

        if !resolution.expired.is_empty() {
            trace!(holders = resolution.expired.len(), "queue holders with expired nodes");
            self.inner.housekeeper.queue_expired(resolution.expired);
        }

        let data = Arc::new(resolution.data);
        cell.cache().insert(context.clone(), stamp, data.clone());
        data
    }

    // Tracks

    /// Moves a loaded user one group up a track in the given context and persists the user.
    ///
    /// A user not on the track is put on its first group. In the empty context the primary group
    /// follows the user along the track.
    pub async fn promote(
        &self,
        uuid: Uuid,
        track: &str,
        context: &ContextSet,
    ) -> Result<TrackMove, EngineError> {
        let track = self.track(track)?;
        let cell = self
            .inner
            .users
            .get_if_loaded(uuid)
            .ok_or(EngineError::UserNotLoaded(uuid))?;

        let step = {
            let mut user = cell.write();
            promote_user(&mut user, &track, context)?
        };

        self.save(&HolderId::User(uuid)).await?;
        let to = step.to.clone().unwrap_or_default();
        info!(%uuid, track = %track.name(), from = ?step.from, %to, "promoted user");
        self.inner.events.emit(Event::UserPromote {
            uuid,
            track: track.name().to_string(),
            from: step.from.clone(),
            to,
            context: context.clone(),
        });
        Ok(step)
    }

    /// Moves a loaded user one group down a track in the given context and persists the user.
    ///
    /// A user on the first group of the track leaves the track.
    pub async fn demote(
        &self,
        uuid: Uuid,
        track: &str,
        context: &ContextSet,
    ) -> Result<TrackMove, EngineError> {
        let track = self.track(track)?;
        let cell = self
            .inner
            .users
            .get_if_loaded(uuid)
            .ok_or(EngineError::UserNotLoaded(uuid))?;

        let step = {
            let mut user = cell.write();
            demote_user(&mut user, &track, context)?
        };

        self.save(&HolderId::User(uuid)).await?;
        let from = step.from.clone().unwrap_or_default();
        info!(%uuid, track = %track.name(), %from, to = ?step.to, "demoted user");
        self.inner.events.emit(Event::UserDemote {
            uuid,
            track: track.name().to_string(),
            from,
            to: step.to.clone(),
            context: context.clone(),
        });
        Ok(step)
    }

    // Synchronisation

    /// Re-reads groups and tracks, drops all cached views and reloads online users.
    pub async fn sync(&self) -> Result<(), EngineError> {
        let _guard = self.inner.plugin_lock.lock().await;
        self.inner.events.emit(Event::PreSync);

        self.inner.groups.load_all().await?;
        self.inner.tracks.load_all().await?;
        for (_, cell) in self.inner.users.cells() {
            cell.cache().invalidate();
        }

        let online: Vec<Uuid> = self
            .inner
            .users
            .loaded()
            .into_iter()
            .filter(|uuid| self.inner.housekeeper.is_online(uuid))
            .collect();
        for uuid in online {
            if let Err(err) = self.inner.users.reload(uuid).await {
                warn!(%uuid, %err, "failed reloading online user");
            }
        }

        self.inner.events.emit(Event::PostSync);
        debug!("synchronised with storage");
        Ok(())
    }

    /// Persists an action log entry and broadcasts it to other instances.
    pub async fn log_action(&self, entry: LogEntry) -> Result<(), EngineError> {
        self.inner.storage.log_action(entry.clone()).await?;
        self.notify(MessageKind::Log(entry)).await;
        Ok(())
    }

    pub async fn action_log(&self) -> Result<Vec<LogEntry>, EngineError> {
        Ok(self.inner.storage.action_log().await?)
    }

    async fn notify(&self, kind: MessageKind) {
        let Some(messenger) = &self.inner.messenger else {
            return;
        };
        // Peers fall back to the next full reload when they miss a notice.
        if let Err(err) = messenger.send(kind).await {
            warn!(%err, "failed notifying other instances");
        }
    }

    async fn handle_message(&self, message: Message) {
        self.inner.events.emit(Event::MessageReceive {
            id: message.id.clone(),
            kind: message.kind.clone(),
        });

        match message.kind {
            MessageKind::Update => {
                if let Err(err) = self.sync().await {
                    warn!(%err, "failed synchronising after update notice");
                }
            }
            MessageKind::UserUpdate(uuid) => match self.inner.users.reload(uuid).await {
                Ok(true) => debug!(%uuid, "reloaded user after update notice"),
                Ok(false) => trace!(%uuid, "ignore update notice for unloaded user"),
                Err(err) => warn!(%uuid, %err, "failed reloading user after update notice"),
            },
            MessageKind::Log(entry) => {
                self.inner.events.emit(Event::LogReceive {
                    log_id: message.id,
                    entry,
                });
            }
        }
    }

    // Housekeeping

    /// Runs one housekeeper pass.
    ///
    /// Idle users without an online session are unloaded. Expired nodes are removed from holders
    /// on which the resolver saw them and, with the expiry audit enabled, from every loaded
    /// holder; changed holders are persisted. Failures are logged and never abort the pass.
    pub async fn tick(&self) {
        let candidates = self
            .inner
            .housekeeper
            .eviction_candidates(self.inner.users.loaded());
        for uuid in candidates {
            if self.cleanup_user(uuid) {
                trace!(%uuid, "evicted idle user");
            }
        }

        let mut targets = self.inner.housekeeper.take_expired();
        if self.inner.config.expiry_audit {
            targets.extend(self.inner.users.loaded().into_iter().map(HolderId::User));
            targets.extend(self.inner.groups.names().into_iter().map(HolderId::Group));
        }

        let now = Timestamp::now();
        for target in targets {
            let removed = match self.with_holder_mut(&target, |holder| holder.remove_expired(now)) {
                Ok(removed) => removed,
                Err(err) => {
                    trace!(%target, %err, "skip expiry audit");
                    continue;
                }
            };
            if removed.is_empty() {
                continue;
            }

            debug!(%target, count = removed.len(), "removed expired nodes");
            for node in removed {
                self.inner.events.emit(Event::NodeRemove {
                    target: target.clone(),
                    node,
                });
            }
            if let Err(err) = self.save(&target).await {
                warn!(%target, %err, "failed persisting expiry audit");
            }
        }
    }

    /// Stops background tasks and closes the messenger.
    pub async fn shutdown(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let _guard = self.inner.plugin_lock.lock().await;
        self.inner.cancel.cancel();
        if let Some(messenger) = &self.inner.messenger {
            if let Err(err) = messenger.close().await {
                warn!(%err, "failed closing messenger");
            }
        }
        info!(server = %self.inner.config.server_name, "engine shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    fn spawn_message_handler(&self) {
        let Some(messenger) = &self.inner.messenger else {
            return;
        };
        let mut rx = messenger.subscribe();
        let inner = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = rx.recv() => result,
                };

                let Some(engine) = upgrade(&inner) else {
                    break;
                };
                match result {
                    Ok(message) => engine.handle_message(message).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed messages, synchronising with storage");
                        if let Err(err) = engine.sync().await {
                            warn!(%err, "failed synchronising after missed messages");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            trace!("stop message handler");
        });
    }

    fn spawn_housekeeper(&self) {
        let inner = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let period = self
            .inner
            .config
            .housekeeper_interval
            .max(MIN_HOUSEKEEPER_INTERVAL);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => (),
                }
                let Some(engine) = upgrade(&inner) else {
                    break;
                };
                engine.tick().await;
            }
            trace!("stop housekeeper");
        });
    }
}

fn upgrade<S, T>(inner: &Weak<EngineInner<S, T>>) -> Option<Engine<S, T>> {
    inner.upgrade().map(|inner| Engine { inner })
}

/// Groups of the track the user inherits in exactly the given context.
fn track_positions(user: &User, track: &Track, context: &ContextSet) -> Vec<String> {
    let now = Timestamp::now();
    user.permissions()
        .nodes()
        .filter(|node| node.value() && node.context() == context && !node.is_expired(now))
        .filter_map(Node::as_inheritance)
        .filter(|group| track.contains(group))
        .map(str::to_string)
        .collect()
}

fn edge(group: &str, context: &ContextSet) -> Result<Node, EngineError> {
    Ok(Node::inheritance(group).context(context.clone()).build()?)
}

fn promote_user(user: &mut User, track: &Track, context: &ContextSet) -> Result<TrackMove, EngineError> {
    let positions = track_positions(user, track, context);
    let (from, to) = match positions.as_slice() {
        [] => {
            let first = track.groups().first().ok_or_else(|| EngineError::EndOfTrack {
                user: user.uuid(),
                track: track.name().to_string(),
            })?;
            (None, first.clone())
        }
        [current] => {
            let next = track
                .next(current)?
                .ok_or_else(|| EngineError::EndOfTrack {
                    user: user.uuid(),
                    track: track.name().to_string(),
                })?
                .to_string();
            user.permissions_mut().unset_node(&edge(current, context)?);
            (Some(current.clone()), next)
        }
        _ => {
            return Err(EngineError::AmbiguousTrackPosition {
                user: user.uuid(),
                track: track.name().to_string(),
            });
        }
    };

    user.permissions_mut().set_node(edge(&to, context)?);
    if context.is_empty() {
        user.set_primary_group(&to)?;
    }
    user.validate_primary_group();

    Ok(TrackMove { from, to: Some(to) })
}

fn demote_user(user: &mut User, track: &Track, context: &ContextSet) -> Result<TrackMove, EngineError> {
    let positions = track_positions(user, track, context);
    let current = match positions.as_slice() {
        [] => {
            return Err(EngineError::NotOnTrack {
                user: user.uuid(),
                track: track.name().to_string(),
            });
        }
        [current] => current.clone(),
        _ => {
            return Err(EngineError::AmbiguousTrackPosition {
                user: user.uuid(),
                track: track.name().to_string(),
            });
        }
    };

    let previous = track.previous(&current)?.map(str::to_string);
    user.permissions_mut().unset_node(&edge(&current, context)?);
    if let Some(previous) = &previous {
        user.permissions_mut().set_node(edge(previous, context)?);
        if context.is_empty() {
            user.set_primary_group(previous)?;
        }
    }
    user.validate_primary_group();

    Ok(TrackMove {
        from: Some(current),
        to: previous,
    })
}

impl<S, T> std::fmt::Debug for Engine<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("server_name", &self.inner.config.server_name)
            .finish_non_exhaustive()
    }
}

/// Configures and starts an [`Engine`].
pub struct Builder<S, T> {
    storage: S,
    transport: T,
    config: Option<EngineConfig>,
    session_tracker: Option<Arc<dyn SessionTracker>>,
    ping_id: Option<PingId>,
}

impl<S, T> Builder<S, T>
where
    S: Storage,
    T: Transport,
{
    pub fn new(storage: S, transport: T) -> Self {
        Self {
            storage,
            transport,
            config: None,
            session_tracker: None,
            ping_id: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Host collaborator telling which users are online. Users it reports are never evicted.
    pub fn session_tracker(mut self, tracker: impl SessionTracker) -> Self {
        self.session_tracker = Some(Arc::new(tracker));
        self
    }

    /// Identifier of this instance in messenger envelopes, random if not set.
    pub fn ping_id(mut self, ping_id: PingId) -> Self {
        self.ping_id = Some(ping_id);
        self
    }

    /// Loads groups and tracks and starts the messenger and housekeeper.
    ///
    /// Needs to be called from within a tokio runtime.
    pub async fn spawn(self) -> Result<Engine<S, T>, EngineError> {
        let config = self.config.unwrap_or_default();
        let storage = Arc::new(self.storage);
        let events = Arc::new(EventBus::new());

        let groups = GroupManager::new(storage.clone());
        let tracks = TrackManager::new(storage.clone());
        groups.load_all().await?;
        tracks.load_all().await?;

        let users = UserManager::new(storage.clone(), events.clone(), config.apply_default_group);
        let housekeeper = Housekeeper::new(config.housekeeper_timeout, self.session_tracker);

        let messenger = if config.messenger_enabled {
            let mut builder = Messenger::builder(self.transport).config(config.messenger.clone());
            if let Some(ping_id) = self.ping_id {
                builder = builder.ping_id(ping_id);
            }
            Some(builder.spawn())
        } else {
            None
        };

        info!(
            server = %config.server_name,
            storage = storage.name(),
            groups = groups.names().len(),
            tracks = tracks.names().len(),
            messenger = messenger.is_some(),
            "started engine"
        );

        let engine = Engine {
            inner: Arc::new(EngineInner {
                config,
                storage,
                events,
                users,
                groups,
                tracks,
                housekeeper,
                messenger,
                plugin_lock: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
            }),
        };
        engine.spawn_message_handler();
        engine.spawn_housekeeper();

        Ok(engine)
    }
}
