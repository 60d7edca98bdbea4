// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::context::ContextSet;
use crate::holder::{Holder, HolderError, HolderId, PermissionHolder};
use crate::node::Node;

/// Name of the group every user inherits unless explicitly detached.
pub const DEFAULT_GROUP: &str = "default";

/// Lowercases and validates a group or track name.
pub fn normalize_name(name: &str) -> Result<String, HolderError> {
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) || name.contains('|') {
        return Err(HolderError::InvalidName(name.to_string()));
    }
    Ok(name.to_lowercase())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    name: String,
    permissions: PermissionHolder,
}

impl Group {
    pub fn new(name: &str) -> Result<Self, HolderError> {
        Ok(Self {
            name: normalize_name(name)?,
            permissions: PermissionHolder::new(),
        })
    }

    pub fn with_nodes(name: &str, nodes: impl IntoIterator<Item = Node>) -> Result<Self, HolderError> {
        Ok(Self {
            name: normalize_name(name)?,
            permissions: PermissionHolder::from_nodes(nodes),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_GROUP
    }

    /// Highest `weight.<n>` among the group's context-free nodes, `0` when there is none.
    pub fn weight(&self) -> i32 {
        self.global_nodes()
            .filter_map(Node::as_weight)
            .max()
            .unwrap_or_default()
    }

    /// First context-free `displayname.<text>` of the group.
    pub fn display_name(&self) -> Option<&str> {
        self.global_nodes().find_map(Node::as_display_name)
    }

    fn global_nodes(&self) -> impl Iterator<Item = &Node> {
        self.permissions
            .nodes()
            .filter(|node| node.context() == &ContextSet::empty())
    }
}

impl Holder for Group {
    fn id(&self) -> HolderId {
        HolderId::Group(self.name.clone())
    }

    fn permissions(&self) -> &PermissionHolder {
        &self.permissions
    }

    fn permissions_mut(&mut self) -> &mut PermissionHolder {
        &mut self.permissions
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use super::{Group, normalize_name};
    use crate::context::ContextSet;
    use crate::holder::{Holder, HolderError};
    use crate::node::Node;

    #[test]
    fn names_are_normalized() {
        assert_eq!(Group::new(" Admin ").unwrap().name(), "admin");
        assert_matches!(normalize_name(""), Err(HolderError::InvalidName(_)));
        assert_matches!(normalize_name("two words"), Err(HolderError::InvalidName(_)));
    }

    #[test]
    fn weight_and_display_name() {
        let mut group = Group::new("admin").unwrap();
        assert_eq!(group.weight(), 0);

        let permissions = group.permissions_mut();
        permissions.set_node(Node::weight(10).build().unwrap());
        permissions.set_node(Node::weight(20).build().unwrap());
        permissions.set_node(
            Node::weight(99)
                .context(ContextSet::from_str("server=hub").unwrap())
                .build()
                .unwrap(),
        );
        permissions.set_node(Node::display_name("Admins").build().unwrap());

        assert_eq!(group.weight(), 20);
        assert_eq!(group.display_name(), Some("Admins"));
    }
}
