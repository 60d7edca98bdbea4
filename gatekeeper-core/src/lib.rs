// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data model of the gatekeeper permissions engine.
//!
//! A [`Node`] is one permission assignment, qualified by a [`ContextSet`] and optionally expiring
//! at a [`Timestamp`]. Nodes are owned by holders: [`User`]s and [`Group`]s carry a
//! [`PermissionHolder`], inheritance between them is expressed by `group.<name>` nodes. A
//! [`Track`] is an ordered ladder of group names.
pub mod context;
pub mod holder;
pub mod node;
pub mod timestamp;
pub mod tristate;

pub use context::{ContextError, ContextSet};
pub use holder::{
    DEFAULT_GROUP, Group, Holder, HolderError, HolderId, InsertOutcome, NodeMap,
    PermissionHolder, Track, User, normalize_name,
};
pub use node::{ChatMeta, ChatMetaType, Node, NodeBuilder, NodeEquality, NodeError, NodeKind};
pub use timestamp::Timestamp;
pub use tristate::Tristate;
