// SPDX-License-Identifier: MIT OR Apache-2.0

//! Atomic permission assignments.
//!
//! A [`Node`] grants (`value = true`) or explicitly denies (`value = false`) one permission,
//! optionally restricted to a [`ContextSet`] and optionally expiring at an absolute
//! [`Timestamp`]. Some permission strings carry extra meaning and are parsed into a
//! [`NodeKind`]: inheritance edges (`group.<name>`), chat meta (`prefix.<priority>.<text>`,
//! `suffix.<priority>.<text>`), meta key-values (`meta.<key>.<value>`), weights (`weight.<n>`) and
//! display names (`displayname.<text>`).
mod kind;

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ContextSet;
use crate::timestamp::Timestamp;

pub use kind::{ChatMeta, ChatMetaType, NodeKind};
pub(crate) use kind::{GROUP_PREFIX, META_PREFIX, strip_prefix_ignore_case};

const WILDCARD: &str = "*";
const WILDCARD_SUFFIX: &str = ".*";

/// Graded equality relations between nodes, from strictest to loosest.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeEquality {
    /// Permission, value, context and expiry are equal.
    Exact,

    /// Permission, context and expiry are equal.
    IgnoreValue,

    /// Permission and context are equal.
    IgnoreValueOrExpiry,

    /// Only the permission is equal.
    SamePermission,
}

/// Ordering class of a node inside a holder, lower classes come first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityClass {
    PermanentExact,
    PermanentWildcard,
    TemporaryExact,
    TemporaryWildcard,
}

/// A single permission assignment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    permission: String,
    value: bool,
    context: ContextSet,
    expiry: Option<Timestamp>,
    kind: NodeKind,
}

impl Node {
    pub fn builder(permission: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(permission)
    }

    /// Inheritance edge towards the given group.
    pub fn inheritance(group: &str) -> NodeBuilder {
        NodeBuilder::new(format!("{GROUP_PREFIX}{}", group.to_lowercase()))
    }

    pub fn chat_meta(kind: ChatMetaType, priority: i32, text: &str) -> NodeBuilder {
        NodeBuilder::new(format!("{}{priority}.{text}", kind.permission_prefix()))
    }

    pub fn prefix(priority: i32, text: &str) -> NodeBuilder {
        Self::chat_meta(ChatMetaType::Prefix, priority, text)
    }

    pub fn suffix(priority: i32, text: &str) -> NodeBuilder {
        Self::chat_meta(ChatMetaType::Suffix, priority, text)
    }

    pub fn meta(key: &str, value: &str) -> NodeBuilder {
        NodeBuilder::new(format!("{META_PREFIX}{}.{value}", key.to_lowercase()))
    }

    pub fn weight(weight: i32) -> NodeBuilder {
        NodeBuilder::new(format!("{}{weight}", kind::WEIGHT_PREFIX))
    }

    pub fn display_name(name: &str) -> NodeBuilder {
        NodeBuilder::new(format!("{}{name}", kind::DISPLAY_NAME_PREFIX))
    }

    pub fn permission(&self) -> &str {
        &self.permission
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn context(&self) -> &ContextSet {
        &self.context
    }

    pub fn expiry(&self) -> Option<Timestamp> {
        self.expiry
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    pub fn is_permanent(&self) -> bool {
        self.expiry.is_none()
    }

    /// Returns `true` if the node carries an expiry which lies at or before `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_wildcard(&self) -> bool {
        self.permission == WILDCARD || self.permission.ends_with(WILDCARD_SUFFIX)
    }

    /// Number of dot-separated segments in front of the trailing `*`, `None` for non-wildcards.
    ///
    /// `*` has level 0, `a.*` level 1, `a.b.*` level 2. Higher levels are more specific.
    pub fn wildcard_level(&self) -> Option<usize> {
        if self.permission == WILDCARD {
            return Some(0);
        }
        if !self.permission.ends_with(WILDCARD_SUFFIX) {
            return None;
        }
        Some(self.permission.matches('.').count())
    }

    /// Returns `true` if the node applies to the given permission in the given query context.
    ///
    /// The query context needs to satisfy the node's context. The permission matches when it is
    /// equal to the node's permission (ignoring case) or when the node is a wildcard covering it:
    /// `a.b.*` covers `a.b.x` and `a.b.x.y` but not `a.b`, `*` covers everything.
    pub fn matches(&self, permission: &str, context: &ContextSet) -> bool {
        context.satisfies(&self.context) && self.matches_permission(permission)
    }

    pub fn matches_permission(&self, permission: &str) -> bool {
        if self.permission.eq_ignore_ascii_case(permission) {
            return true;
        }

        if self.permission == WILDCARD {
            return true;
        }

        match self.permission.strip_suffix(WILDCARD) {
            Some(prefix) if prefix.ends_with('.') => {
                permission.len() > prefix.len() && strip_prefix_ignore_case(permission, prefix).is_some()
            }
            _ => false,
        }
    }

    /// Applies one of the graded equality relations.
    pub fn equals(&self, other: &Node, equality: NodeEquality) -> bool {
        let same_permission = self.permission.eq_ignore_ascii_case(&other.permission);
        match equality {
            NodeEquality::Exact => {
                same_permission
                    && self.value == other.value
                    && self.context == other.context
                    && self.expiry == other.expiry
            }
            NodeEquality::IgnoreValue => {
                same_permission && self.context == other.context && self.expiry == other.expiry
            }
            NodeEquality::IgnoreValueOrExpiry => same_permission && self.context == other.context,
            NodeEquality::SamePermission => same_permission,
        }
    }

    /// Equal when ignoring either the value or the expiry.
    ///
    /// Two almost-equal nodes on the same holder would contradict each other, for example a
    /// grant and a deny differing only in sign.
    pub fn almost_equals(&self, other: &Node) -> bool {
        if self.equals(other, NodeEquality::IgnoreValue) {
            return true;
        }
        self.permission.eq_ignore_ascii_case(&other.permission)
            && self.value == other.value
            && self.context == other.context
    }

    pub fn priority_class(&self) -> PriorityClass {
        match (self.is_temporary(), self.is_wildcard()) {
            (false, false) => PriorityClass::PermanentExact,
            (false, true) => PriorityClass::PermanentWildcard,
            (true, false) => PriorityClass::TemporaryExact,
            (true, true) => PriorityClass::TemporaryWildcard,
        }
    }

    /// Name of the inherited group if this is an inheritance edge.
    pub fn as_inheritance(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Inheritance { group } => Some(group),
            _ => None,
        }
    }

    pub fn as_prefix(&self) -> Option<&ChatMeta> {
        match &self.kind {
            NodeKind::Prefix(chat_meta) => Some(chat_meta),
            _ => None,
        }
    }

    pub fn as_suffix(&self) -> Option<&ChatMeta> {
        match &self.kind {
            NodeKind::Suffix(chat_meta) => Some(chat_meta),
            _ => None,
        }
    }

    pub fn as_chat_meta(&self, kind: ChatMetaType) -> Option<&ChatMeta> {
        match kind {
            ChatMetaType::Prefix => self.as_prefix(),
            ChatMetaType::Suffix => self.as_suffix(),
        }
    }

    pub fn as_meta(&self) -> Option<(&str, &str)> {
        match &self.kind {
            NodeKind::Meta { key, value } => Some((key, value)),
            _ => None,
        }
    }

    pub fn as_weight(&self) -> Option<i32> {
        match &self.kind {
            NodeKind::Weight(weight) => Some(*weight),
            _ => None,
        }
    }

    pub fn as_display_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::DisplayName(name) => Some(name),
            _ => None,
        }
    }

    /// Permanent, context-free edge towards an already normalized group name.
    pub(crate) fn edge_to(group: &str) -> Node {
        Node {
            permission: format!("{GROUP_PREFIX}{group}"),
            value: true,
            context: ContextSet::empty(),
            expiry: None,
            kind: NodeKind::Inheritance {
                group: group.to_string(),
            },
        }
    }

    /// Returns a builder initialised with this node's fields.
    pub fn to_builder(&self) -> NodeBuilder {
        NodeBuilder {
            permission: self.permission.clone(),
            value: self.value,
            context: self.context.clone(),
            expiry: self.expiry,
        }
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.permission, self.value)?;
        if !self.context.is_empty() {
            write!(f, " ({})", self.context)?;
        }
        if let Some(expiry) = self.expiry {
            write!(f, " until {}", expiry)?;
        }
        Ok(())
    }
}

/// Builder for validated nodes.
#[derive(Clone, Debug)]
pub struct NodeBuilder {
    permission: String,
    value: bool,
    context: ContextSet,
    expiry: Option<Timestamp>,
}

impl NodeBuilder {
    pub fn new(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            value: true,
            context: ContextSet::empty(),
            expiry: None,
        }
    }

    pub fn value(mut self, value: bool) -> Self {
        self.value = value;
        self
    }

    pub fn context(mut self, context: ContextSet) -> Self {
        self.context = context;
        self
    }

    pub fn expiry(mut self, expiry: Timestamp) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn maybe_expiry(mut self, expiry: Option<Timestamp>) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn permanent(mut self) -> Self {
        self.expiry = None;
        self
    }

    pub fn build(self) -> Result<Node, NodeError> {
        let permission = self.permission.trim().to_string();
        if permission.is_empty() {
            return Err(NodeError::EmptyPermission);
        }

        let kind = NodeKind::parse(&permission)?;

        Ok(Node {
            permission,
            value: self.value,
            context: self.context,
            expiry: self.expiry,
            kind,
        })
    }
}

/// Serialised representation of a node, the kind is derived again on deserialisation.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawNode {
    permission: String,
    value: bool,
    #[serde(default)]
    context: ContextSet,
    #[serde(default)]
    expiry: Option<Timestamp>,
}

impl TryFrom<RawNode> for Node {
    type Error = NodeError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        NodeBuilder::new(raw.permission)
            .value(raw.value)
            .context(raw.context)
            .maybe_expiry(raw.expiry)
            .build()
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        Self {
            permission: node.permission,
            value: node.value,
            context: node.context,
            expiry: node.expiry,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node permission must not be empty")]
    EmptyPermission,

    #[error("malformed node '{0}'")]
    Malformed(String),
}
