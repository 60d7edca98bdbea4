// SPDX-License-Identifier: MIT OR Apache-2.0

//! Weighted inheritance traversal producing the effective view of a holder.
//!
//! Starting at the queried holder, inheritance edges applying in the query context are followed
//! through a priority queue ordered by the weight of the target group (highest first) and the
//! order in which edges were discovered. Every group is visited at most once, which makes cyclic
//! group graphs terminate. Nodes applying in the query context are collected on the way and sorted
//! into an accumulator; the first entry per permission decides the verdict.
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use gatekeeper_core::{
    ChatMeta, ContextSet, Group, Holder, HolderId, Node, NodeKind, Timestamp, Tristate,
};
use tracing::trace;

/// Read access to loaded groups by name.
pub trait GroupLookup {
    /// Calls `f` with the named group, returns `None` if no such group is loaded.
    fn with_group<R>(&self, name: &str, f: impl FnOnce(&Group) -> R) -> Option<R>;
}

impl GroupLookup for BTreeMap<String, Group> {
    fn with_group<R>(&self, name: &str, f: impl FnOnce(&Group) -> R) -> Option<R> {
        self.get(name).map(f)
    }
}

/// Fully resolved permissions, chat meta and meta of a holder in one context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedData {
    permissions: HashMap<String, bool>,
    prefix: Option<ChatMeta>,
    suffix: Option<ChatMeta>,
    meta: BTreeMap<String, String>,
    weight: Option<i32>,
    display_name: Option<String>,
    inherited_groups: Vec<String>,
    earliest_expiry: Option<Timestamp>,
}

impl ResolvedData {
    /// Verdict for a permission.
    ///
    /// The exact permission is looked up first, then wildcards from most to least specific:
    /// `a.b.c` tries `a.b.c`, `a.b.*`, `a.*` and finally `*`.
    pub fn check(&self, permission: &str) -> Tristate {
        let permission = permission.trim().to_lowercase();
        if let Some(value) = self.permissions.get(&permission) {
            return Tristate::from(*value);
        }

        let mut current = permission.as_str();
        while let Some((parent, _)) = current.rsplit_once('.') {
            if let Some(value) = self.permissions.get(&format!("{parent}.*")) {
                return Tristate::from(*value);
            }
            current = parent;
        }

        Tristate::from(self.permissions.get("*").copied())
    }

    /// Every permission with its value, wildcards included.
    pub fn permissions(&self) -> &HashMap<String, bool> {
        &self.permissions
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_ref().map(|chat_meta| chat_meta.text.as_str())
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_ref().map(|chat_meta| chat_meta.text.as_str())
    }

    /// Winning prefix together with its priority.
    pub fn prefix_entry(&self) -> Option<&ChatMeta> {
        self.prefix.as_ref()
    }

    /// Winning suffix together with its priority.
    pub fn suffix_entry(&self) -> Option<&ChatMeta> {
        self.suffix.as_ref()
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn weight(&self) -> Option<i32> {
        self.weight
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Names of all groups reached during traversal, in visiting order.
    pub fn inherited_groups(&self) -> &[String] {
        &self.inherited_groups
    }

    /// Earliest expiry of any temporary node which contributed to this view.
    ///
    /// The view is stale from that moment on.
    pub fn earliest_expiry(&self) -> Option<Timestamp> {
        self.earliest_expiry
    }
}

/// Outcome of a traversal.
#[derive(Debug)]
pub struct Resolution {
    pub data: ResolvedData,

    /// Holders on which expired nodes were encountered.
    pub expired: BTreeSet<HolderId>,
}

/// Position of a node's owner in the traversal.
#[derive(Copy, Clone, Debug)]
struct Origin {
    /// `0` for the queried holder, `1` for inherited groups.
    tier: u8,
    weight: i32,
    depth: usize,
    traversal: usize,
}

#[derive(Debug)]
struct Candidate<'a> {
    node: &'a Node,
    origin: Origin,
    insertion: usize,
}

impl Candidate<'_> {
    /// Accumulator order, smaller keys come first.
    ///
    /// Equal effective weight means same tier, same group weight and same inheritance depth.
    /// Among those, more specific contexts and permanent nodes are preferred and an explicit
    /// deny sorts before a grant.
    fn sort_key(&self) -> (u8, Reverse<i32>, usize, Reverse<usize>, bool, bool, usize, usize) {
        (
            self.origin.tier,
            Reverse(self.origin.weight),
            self.origin.depth,
            Reverse(self.node.context().len()),
            self.node.is_temporary(),
            self.node.value(),
            self.origin.traversal,
            self.insertion,
        )
    }
}

/// Edge waiting in the traversal queue.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PendingEdge {
    weight: i32,
    discovered: Reverse<usize>,
    depth: Reverse<usize>,
    group: String,
}

/// Nodes collected while walking the inheritance graph.
struct Traversal<'c> {
    context: &'c ContextSet,
    now: Timestamp,
    accumulated: Vec<(Node, Origin, usize)>,
    expired: BTreeSet<HolderId>,
    earliest_expiry: Option<Timestamp>,
}

impl Traversal<'_> {
    /// Accumulates the nodes of one holder and returns the groups it inherits from, together with
    /// their inheritance depth.
    fn collect<'n>(
        &mut self,
        holder_id: HolderId,
        nodes: impl Iterator<Item = &'n Node>,
        origin: Origin,
    ) -> Vec<(String, usize)> {
        let mut parents = Vec::new();
        for (insertion, node) in nodes.enumerate() {
            if node.is_expired(self.now) {
                self.expired.insert(holder_id.clone());
                continue;
            }
            if !self.context.satisfies(node.context()) {
                continue;
            }
            if let Some(expiry) = node.expiry() {
                self.earliest_expiry = Some(
                    self.earliest_expiry
                        .map_or(expiry, |current| current.min(expiry)),
                );
            }
            match node.as_inheritance() {
                Some(group) => {
                    // Negated edges are not followed.
                    if node.value() {
                        parents.push((group.to_string(), origin.depth + 1));
                    }
                }
                None => self.accumulated.push((node.clone(), origin, insertion)),
            }
        }
        parents
    }
}

/// Resolves the effective view of a holder in the given query context.
///
/// Never fails: unknown groups are skipped and unknown permissions resolve to
/// [`Tristate::Undefined`].
pub fn resolve<H, G>(root: &H, context: &ContextSet, groups: &G, now: Timestamp) -> Resolution
where
    H: Holder,
    G: GroupLookup,
{
    let root_id = root.id();
    let mut visited = BTreeSet::new();
    if let HolderId::Group(name) = &root_id {
        visited.insert(name.clone());
    }

    let mut traversal = Traversal {
        context,
        now,
        accumulated: Vec::new(),
        expired: BTreeSet::new(),
        earliest_expiry: None,
    };
    let mut queue = BinaryHeap::new();
    let mut discovered = 0;
    let mut inherited_groups = Vec::new();

    let root_origin = Origin {
        tier: 0,
        weight: 0,
        depth: 0,
        traversal: 0,
    };
    // The root's lock is held by the caller, so the root is never looked up again.
    for (group, depth) in traversal.collect(root_id, root.permissions().nodes(), root_origin) {
        if !visited.contains(&group) {
            push_edge(&mut queue, groups, group, depth, &mut discovered);
        }
    }

    let mut visits = 0;
    while let Some(edge) = queue.pop() {
        if !visited.insert(edge.group.clone()) {
            trace!(group = %edge.group, "skip visited group");
            continue;
        }

        visits += 1;
        let origin = Origin {
            tier: 1,
            weight: edge.weight,
            depth: edge.depth.0,
            traversal: visits,
        };

        let Some(parents) = groups.with_group(&edge.group, |group| {
            traversal.collect(group.id(), group.permissions().nodes(), origin)
        }) else {
            trace!(group = %edge.group, "skip unknown group");
            continue;
        };
        inherited_groups.push(edge.group);

        for (group, depth) in parents {
            if !visited.contains(&group) {
                push_edge(&mut queue, groups, group, depth, &mut discovered);
            }
        }
    }

    let mut candidates: Vec<Candidate<'_>> = traversal
        .accumulated
        .iter()
        .map(|(node, origin, insertion)| Candidate {
            node,
            origin: *origin,
            insertion: *insertion,
        })
        .collect();
    candidates.sort_by_key(Candidate::sort_key);

    let mut data = ResolvedData {
        inherited_groups,
        earliest_expiry: traversal.earliest_expiry,
        ..Default::default()
    };
    let mut weight_origin = None;

    for candidate in &candidates {
        let node = candidate.node;
        data.permissions
            .entry(node.permission().to_lowercase())
            .or_insert(node.value());

        if !node.value() {
            continue;
        }

        match node.kind() {
            NodeKind::Prefix(chat_meta) => pick_chat_meta(&mut data.prefix, chat_meta),
            NodeKind::Suffix(chat_meta) => pick_chat_meta(&mut data.suffix, chat_meta),
            NodeKind::Meta { key, value } => {
                data.meta.entry(key.clone()).or_insert_with(|| value.clone());
            }
            NodeKind::Weight(weight) => {
                let origin = (candidate.origin.tier, candidate.origin.traversal);
                match weight_origin {
                    None => {
                        weight_origin = Some(origin);
                        data.weight = Some(*weight);
                    }
                    Some(current) if current == origin => {
                        data.weight = data.weight.max(Some(*weight));
                    }
                    Some(_) => (),
                }
            }
            NodeKind::DisplayName(name) => {
                if data.display_name.is_none() {
                    data.display_name = Some(name.clone());
                }
            }
            NodeKind::Regular | NodeKind::Inheritance { .. } => (),
        }
    }

    Resolution {
        data,
        expired: traversal.expired,
    }
}

fn push_edge<G: GroupLookup>(
    queue: &mut BinaryHeap<PendingEdge>,
    groups: &G,
    group: String,
    depth: usize,
    discovered: &mut usize,
) {
    let weight = groups.with_group(&group, Group::weight).unwrap_or_default();
    queue.push(PendingEdge {
        weight,
        discovered: Reverse(*discovered),
        depth: Reverse(depth),
        group,
    });
    *discovered += 1;
}

/// Keeps the entry with the highest priority, the earlier one on ties.
fn pick_chat_meta(current: &mut Option<ChatMeta>, candidate: &ChatMeta) {
    let replace = current
        .as_ref()
        .is_none_or(|existing| candidate.priority > existing.priority);
    if replace {
        *current = Some(candidate.clone());
    }
}
