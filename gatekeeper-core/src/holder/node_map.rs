// SPDX-License-Identifier: MIT OR Apache-2.0

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::node::{Node, NodeEquality, PriorityClass};
use crate::timestamp::Timestamp;

/// Sort key of a node inside a holder: priority class, then more specific wildcards, then
/// insertion order.
type SortKey = (PriorityClass, Reverse<Option<usize>>, u64);

/// What happened when a node was inserted into a [`NodeMap`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// An identical node was already present, nothing changed.
    Unchanged,

    /// The node was added.
    Inserted,

    /// The node was added and superseded the returned nodes.
    Replaced(Vec<Node>),
}

impl InsertOutcome {
    pub fn is_changed(&self) -> bool {
        !matches!(self, InsertOutcome::Unchanged)
    }
}

/// Sorted set of nodes owned by a holder.
///
/// Iteration yields nodes in priority order: permanent exact nodes, permanent wildcards,
/// temporary exact nodes, temporary wildcards. Ties are broken by insertion order. No two nodes
/// inside the map are equal, and no two nodes share permission and context.
#[derive(Clone, Debug, Default)]
pub struct NodeMap {
    entries: BTreeMap<SortKey, Node>,
    next_seq: u64,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map by inserting all given nodes in order.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut map = Self::new();
        for node in nodes {
            map.insert(node);
        }
        map
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a node, superseding every node with the same permission and context.
    pub fn insert(&mut self, node: Node) -> InsertOutcome {
        if self.contains(&node, NodeEquality::Exact) {
            return InsertOutcome::Unchanged;
        }

        let replaced = self.remove_where(|existing| {
            existing.equals(&node, NodeEquality::IgnoreValueOrExpiry)
        });

        let key = self.next_key(&node);
        self.entries.insert(key, node);

        if replaced.is_empty() {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Replaced(replaced)
        }
    }

    /// Returns the first node which is almost equal to the given one, if any.
    pub fn find_almost_equal(&self, node: &Node) -> Option<&Node> {
        self.iter().find(|existing| existing.almost_equals(node))
    }

    pub fn contains(&self, node: &Node, equality: NodeEquality) -> bool {
        self.iter().any(|existing| existing.equals(node, equality))
    }

    /// Removes all nodes for which the predicate returns `true` and returns them in priority
    /// order.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&Node) -> bool) -> Vec<Node> {
        let keys: Vec<SortKey> = self
            .entries
            .iter()
            .filter(|(_, node)| predicate(node))
            .map(|(key, _)| *key)
            .collect();

        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    /// Removes every node which expired at or before `now`.
    pub fn remove_expired(&mut self, now: Timestamp) -> Vec<Node> {
        self.remove_where(|node| node.is_expired(now))
    }

    /// Earliest expiry of all temporary nodes.
    pub fn earliest_expiry(&self) -> Option<Timestamp> {
        self.iter().filter_map(Node::expiry).min()
    }

    fn next_key(&mut self, node: &Node) -> SortKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        (node.priority_class(), Reverse(node.wildcard_level()), seq)
    }
}

impl PartialEq for NodeMap {
    /// Two maps are equal when they hold the same nodes, regardless of insertion order.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|node| other.contains(node, NodeEquality::Exact))
    }
}

impl Eq for NodeMap {}
