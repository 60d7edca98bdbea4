// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permission resolution and holder lifecycle of the gatekeeper permissions engine.
//!
//! An [`Engine`] keeps users, groups and tracks in memory, answers tristate permission checks
//! through per-context memoized views and persists changes through a [`Storage`] backend.
//! Several engines sharing one backend keep each other up-to-date through the messenger.
//!
//! ```no_run
//! # use gatekeeper_core::{ContextSet, HolderId, Node};
//! # use gatekeeper_engine::{Engine, EngineError};
//! # use gatekeeper_messenger::MemoryHub;
//! # use gatekeeper_store::MemoryStorage;
//! # async fn run() -> Result<(), EngineError> {
//! let hub = MemoryHub::default();
//! let engine = Engine::builder(MemoryStorage::new(), hub.transport())
//!     .spawn()
//!     .await?;
//!
//! let uuid = uuid::Uuid::new_v4();
//! engine.login(uuid, "alice").await?;
//! engine.set_node(&HolderId::User(uuid), Node::builder("essentials.fly").build()?)?;
//! engine.save(&HolderId::User(uuid)).await?;
//!
//! let verdict = engine.check_permission(uuid, "essentials.fly", &ContextSet::empty());
//! assert!(verdict.as_bool());
//! # Ok(())
//! # }
//! ```
//!
//! [`Storage`]: gatekeeper_store::Storage
mod cache;
mod cell;
pub mod command;
mod config;
mod engine;
mod error;
mod events;
pub mod export;
mod housekeeper;
pub mod import;
mod manager;
pub mod provider;
pub mod resolver;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;

pub use cache::{CacheStamp, CachedData};
pub use cell::HolderCell;
pub use config::{
    DEFAULT_EXPORT_MAX_SHARDS, DEFAULT_EXPORT_SHARD_SIZE, DEFAULT_HOUSEKEEPER_INTERVAL,
    DEFAULT_HOUSEKEEPER_TIMEOUT, EngineConfig,
};
pub use engine::{Builder, Engine, TrackMove};
pub use error::{EngineError, ErrorKind};
pub use events::{Event, EventBus, SubscriptionId};
pub use export::{ExportError, ExportSummary, Exporter};
pub use housekeeper::{Housekeeper, SessionTracker, Sessions};
pub use import::{ImportError, ImportSummary, Importer};
pub use manager::{GroupManager, TrackManager, UserManager};
pub use resolver::ResolvedData;
