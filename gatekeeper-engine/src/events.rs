// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notifications about state changes inside the engine.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gatekeeper_core::{ContextSet, HolderId, Node};
use gatekeeper_messenger::{MessageId, MessageKind};
use gatekeeper_store::LogEntry;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A user was loaded into memory.
    UserLoad { uuid: Uuid },

    /// A user logged in and their data is ready. `loaded` is `false` if loading failed.
    UserLoginProcess {
        uuid: Uuid,
        username: String,
        loaded: bool,
    },

    /// A user was evicted from memory.
    UserUnload { uuid: Uuid },

    /// A loaded user was refreshed from storage.
    UserDataRecalculate { uuid: Uuid },

    NodeAdd { target: HolderId, node: Node },

    NodeRemove { target: HolderId, node: Node },

    /// Several nodes were removed at once.
    NodeClear { target: HolderId, nodes: Vec<Node> },

    GroupCreate { name: String },

    GroupDelete { name: String },

    TrackCreate { name: String },

    TrackDelete { name: String },

    UserPromote {
        uuid: Uuid,
        track: String,
        from: Option<String>,
        to: String,
        context: ContextSet,
    },

    UserDemote {
        uuid: Uuid,
        track: String,
        from: String,
        to: Option<String>,
        context: ContextSet,
    },

    /// A full reload of groups, tracks and online users begins.
    PreSync,

    /// A full reload finished and all caches were dropped.
    PostSync,

    /// Another instance logged an action.
    LogReceive { log_id: MessageId, entry: LogEntry },

    /// A message from another instance was accepted.
    MessageReceive { id: MessageId, kind: MessageKind },
}

/// Identifier of a registered handler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registry of event handlers.
///
/// Events are delivered synchronously, in registration order, on the thread which caused them.
/// Handlers should return quickly and must not emit events themselves.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<BTreeMap<SubscriptionId, Handler>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.write().insert(id, Arc::new(handler));
        id
    }

    /// Removes a handler, returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.write().remove(&id).is_some()
    }

    pub fn emit(&self, event: Event) {
        // Handlers are cloned out so they may (un)subscribe without deadlocking.
        let handlers: Vec<Handler> = self.handlers.read().values().cloned().collect();
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.len())
            .finish()
    }
}
