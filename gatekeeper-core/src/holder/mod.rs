// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entities owning permission nodes: users, groups and tracks.
//!
//! Users and groups share the node operations of [`PermissionHolder`]. Inheritance is expressed
//! purely through `group.<name>` nodes, holders never point at each other directly.
mod group;
mod node_map;
mod track;
mod user;

use std::fmt::Display;

use thiserror::Error;
use uuid::Uuid;

use crate::context::ContextSet;
use crate::node::{ChatMetaType, Node, NodeEquality, NodeError, NodeKind};
use crate::timestamp::Timestamp;

pub use group::{DEFAULT_GROUP, Group, normalize_name};
pub use node_map::{InsertOutcome, NodeMap};
pub use track::Track;
pub use user::User;

/// Identifier of a holder of any kind.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HolderId {
    User(Uuid),
    Group(String),
    Track(String),
}

impl Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HolderId::User(uuid) => write!(f, "user {}", uuid),
            HolderId::Group(name) => write!(f, "group {}", name),
            HolderId::Track(name) => write!(f, "track {}", name),
        }
    }
}

/// Common surface of users and groups.
pub trait Holder {
    fn id(&self) -> HolderId;

    fn permissions(&self) -> &PermissionHolder;

    fn permissions_mut(&mut self) -> &mut PermissionHolder;
}

/// Node set of a user or group together with its cache generation.
///
/// Every mutation which changes the node set bumps the generation, so memoized views computed
/// from an older generation can be detected as stale.
#[derive(Clone, Debug, Default)]
pub struct PermissionHolder {
    nodes: NodeMap,
    generation: u64,
}

impl PermissionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: NodeMap::from_nodes(nodes),
            generation: 0,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_map(&self) -> &NodeMap {
        &self.nodes
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the whole node set, for example after re-reading it from storage.
    pub fn replace_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) {
        self.nodes = NodeMap::from_nodes(nodes);
        self.bump();
    }

    /// Adds a node, silently superseding nodes with the same permission and context.
    pub fn set_node(&mut self, node: Node) -> InsertOutcome {
        let outcome = self.nodes.insert(node);
        if outcome.is_changed() {
            self.bump();
        }
        outcome
    }

    /// Adds a node but refuses to supersede an almost-equal one.
    pub fn set_node_strict(&mut self, node: Node) -> Result<InsertOutcome, HolderError> {
        if self.nodes.contains(&node, NodeEquality::Exact) {
            return Ok(InsertOutcome::Unchanged);
        }
        if let Some(existing) = self.nodes.find_almost_equal(&node) {
            return Err(HolderError::Conflict(existing.clone()));
        }
        Ok(self.set_node(node))
    }

    /// Removes nodes with the same permission and context, ignoring value and expiry.
    pub fn unset_node(&mut self, node: &Node) -> Vec<Node> {
        self.remove_where(|existing| existing.equals(node, NodeEquality::IgnoreValueOrExpiry))
    }

    /// Removes every node matching the filter.
    pub fn clear_nodes(&mut self, filter: impl FnMut(&Node) -> bool) -> Vec<Node> {
        self.remove_where(filter)
    }

    pub fn has_node(&self, node: &Node, equality: NodeEquality) -> bool {
        self.nodes.contains(node, equality)
    }

    pub fn remove_expired(&mut self, now: Timestamp) -> Vec<Node> {
        let removed = self.nodes.remove_expired(now);
        if !removed.is_empty() {
            self.bump();
        }
        removed
    }

    /// Inheritance edges which apply in the given context.
    pub fn parents<'a>(&'a self, context: &'a ContextSet) -> impl Iterator<Item = &'a Node> {
        self.nodes
            .iter()
            .filter(move |node| node.as_inheritance().is_some() && context.satisfies(node.context()))
    }

    /// Returns `true` if any inheritance edge points at the group, regardless of context.
    pub fn inherits(&self, group: &str) -> bool {
        self.nodes
            .iter()
            .filter_map(Node::as_inheritance)
            .any(|parent| parent.eq_ignore_ascii_case(group))
    }

    /// Sets a meta value, replacing all values of that key in exactly this context.
    pub fn set_meta(
        &mut self,
        key: &str,
        value: &str,
        context: ContextSet,
        expiry: Option<Timestamp>,
    ) -> Result<Node, HolderError> {
        let node = Node::meta(key, value)
            .context(context)
            .maybe_expiry(expiry)
            .build()?;
        let key = key.to_lowercase();
        self.remove_where(|existing| {
            existing.context() == node.context()
                && existing.as_meta().is_some_and(|(existing_key, _)| existing_key == key)
        });
        self.set_node(node.clone());
        Ok(node)
    }

    /// Removes all values of a meta key in exactly this context.
    pub fn unset_meta(&mut self, key: &str, context: &ContextSet) -> Vec<Node> {
        let key = key.to_lowercase();
        self.remove_where(|existing| {
            existing.context() == context
                && existing.as_meta().is_some_and(|(existing_key, _)| existing_key == key)
        })
    }

    pub fn add_chat_meta(
        &mut self,
        kind: ChatMetaType,
        priority: i32,
        text: &str,
        context: ContextSet,
        expiry: Option<Timestamp>,
    ) -> Result<Node, HolderError> {
        let node = Node::chat_meta(kind, priority, text)
            .context(context)
            .maybe_expiry(expiry)
            .build()?;
        self.set_node(node.clone());
        Ok(node)
    }

    /// Removes prefixes or suffixes with the given priority in exactly this context.
    ///
    /// Without a text every entry of that priority is removed.
    pub fn remove_chat_meta(
        &mut self,
        kind: ChatMetaType,
        priority: i32,
        text: Option<&str>,
        context: &ContextSet,
    ) -> Vec<Node> {
        self.remove_where(|existing| {
            existing.context() == context
                && existing.as_chat_meta(kind).is_some_and(|chat_meta| {
                    chat_meta.priority == priority
                        && text.is_none_or(|text| chat_meta.text == text)
                })
        })
    }

    /// Removes meta, prefix and suffix nodes, optionally only those in the given context.
    pub fn clear_meta(&mut self, context: Option<&ContextSet>) -> Vec<Node> {
        self.remove_where(|existing| {
            let is_meta = matches!(
                existing.kind(),
                NodeKind::Meta { .. } | NodeKind::Prefix(_) | NodeKind::Suffix(_)
            );
            is_meta && context.is_none_or(|context| existing.context() == context)
        })
    }

    fn remove_where(&mut self, filter: impl FnMut(&Node) -> bool) -> Vec<Node> {
        let removed = self.nodes.remove_where(filter);
        if !removed.is_empty() {
            self.bump();
        }
        removed
    }

    fn bump(&mut self) {
        self.generation += 1;
    }
}

impl PartialEq for PermissionHolder {
    /// Holders are equal when they carry the same nodes, regardless of order and generation.
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl Eq for PermissionHolder {}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HolderError {
    #[error("node conflicts with existing node '{0}'")]
    Conflict(Node),

    #[error("invalid holder name '{0}'")]
    InvalidName(String),

    #[error("user does not inherit group '{0}'")]
    NotInherited(String),

    #[error("track already contains group '{0}'")]
    AlreadyOnTrack(String),

    #[error("track does not contain group '{0}'")]
    NotOnTrack(String),

    #[error("position {0} is out of bounds")]
    OutOfBounds(usize),

    #[error(transparent)]
    Node(#[from] NodeError),
}
