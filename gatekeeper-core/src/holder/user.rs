// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::warn;
use uuid::Uuid;

use crate::holder::{DEFAULT_GROUP, Holder, HolderError, HolderId, PermissionHolder, normalize_name};
use crate::node::Node;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    uuid: Uuid,
    username: Option<String>,
    primary_group: String,
    permissions: PermissionHolder,
}

impl User {
    /// Creates a fresh user inheriting the default group.
    pub fn new(uuid: Uuid, username: Option<String>) -> Self {
        let mut permissions = PermissionHolder::new();
        permissions.set_node(default_edge());
        Self {
            uuid,
            username,
            primary_group: DEFAULT_GROUP.to_string(),
            permissions,
        }
    }

    /// Restores a user from persisted parts.
    ///
    /// A primary group the user does not inherit is coerced to the default group.
    pub fn from_parts(
        uuid: Uuid,
        username: Option<String>,
        primary_group: &str,
        nodes: impl IntoIterator<Item = Node>,
    ) -> Self {
        let mut user = Self {
            uuid,
            username,
            primary_group: primary_group.trim().to_lowercase(),
            permissions: PermissionHolder::from_nodes(nodes),
        };
        user.validate_primary_group();
        user
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_username(&mut self, username: Option<String>) {
        self.username = username;
    }

    pub fn primary_group(&self) -> &str {
        &self.primary_group
    }

    /// Switches the primary group to one the user inherits through a global, granting edge.
    pub fn set_primary_group(&mut self, group: &str) -> Result<(), HolderError> {
        let group = normalize_name(group)?;
        if !self.can_be_primary(&group) {
            return Err(HolderError::NotInherited(group));
        }
        self.primary_group = group;
        Ok(())
    }

    /// Coerces the primary group to `default` if the user does not inherit it globally anymore.
    ///
    /// Returns `true` if the primary group was changed.
    pub fn validate_primary_group(&mut self) -> bool {
        if self.primary_group == DEFAULT_GROUP || self.can_be_primary(&self.primary_group) {
            return false;
        }
        warn!(
            user = %self.uuid,
            primary_group = %self.primary_group,
            "primary group is not inherited, falling back to default"
        );
        self.primary_group = DEFAULT_GROUP.to_string();
        true
    }

    /// Adds the default group edge to a user without any parent groups.
    ///
    /// Returns `true` if the edge was added.
    pub fn apply_default_group(&mut self) -> bool {
        let has_parents = self
            .permissions
            .nodes()
            .any(|node| node.as_inheritance().is_some());
        if has_parents {
            return false;
        }
        self.permissions.set_node(default_edge());
        true
    }

    /// Negated edges and edges limited to a context do not qualify a primary group.
    fn can_be_primary(&self, group: &str) -> bool {
        self.permissions.nodes().any(|node| {
            node.value()
                && node.context().is_empty()
                && node
                    .as_inheritance()
                    .is_some_and(|parent| parent.eq_ignore_ascii_case(group))
        })
    }

    pub fn inherits_default(&self) -> bool {
        self.permissions.inherits(DEFAULT_GROUP)
    }

    /// Takes over the state of a freshly loaded copy of this user.
    ///
    /// The node set is replaced in place, so the generation keeps counting upwards.
    pub fn refresh(&mut self, fresh: User) {
        self.username = fresh.username;
        self.primary_group = fresh.primary_group;
        self.permissions.replace_nodes(fresh.permissions.nodes().cloned().collect::<Vec<_>>());
    }
}

impl Holder for User {
    fn id(&self) -> HolderId {
        HolderId::User(self.uuid)
    }

    fn permissions(&self) -> &PermissionHolder {
        &self.permissions
    }

    fn permissions_mut(&mut self) -> &mut PermissionHolder {
        &mut self.permissions
    }
}

fn default_edge() -> Node {
    Node::edge_to(DEFAULT_GROUP)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use uuid::Uuid;

    use super::User;
    use crate::context::ContextSet;
    use crate::holder::{Holder, HolderError};
    use crate::node::Node;

    #[test]
    fn new_users_inherit_default() {
        let user = User::new(Uuid::new_v4(), Some("alice".into()));
        assert!(user.inherits_default());
        assert_eq!(user.primary_group(), "default");
    }

    #[test]
    fn primary_group_is_coerced() {
        let user = User::from_parts(
            Uuid::new_v4(),
            None,
            "mod",
            [Node::inheritance("default").build().unwrap()],
        );
        assert_eq!(user.primary_group(), "default");

        let user = User::from_parts(
            Uuid::new_v4(),
            None,
            "Mod",
            [Node::inheritance("mod").build().unwrap()],
        );
        assert_eq!(user.primary_group(), "mod");
    }

    #[test]
    fn switch_primary_group() {
        let mut user = User::new(Uuid::new_v4(), None);
        assert_matches!(
            user.set_primary_group("mod"),
            Err(HolderError::NotInherited(_))
        );

        user.permissions_mut()
            .set_node(Node::inheritance("mod").build().unwrap());
        user.set_primary_group("mod").unwrap();
        assert_eq!(user.primary_group(), "mod");
    }

    #[test]
    fn primary_group_needs_global_grant() {
        let mut user = User::new(Uuid::new_v4(), None);
        user.permissions_mut()
            .set_node(Node::inheritance("vip").value(false).build().unwrap());
        let hub = ContextSet::from_pairs([("server", "hub")]).unwrap();
        user.permissions_mut()
            .set_node(Node::inheritance("mod").context(hub).build().unwrap());

        assert_matches!(
            user.set_primary_group("vip"),
            Err(HolderError::NotInherited(_))
        );
        assert_matches!(
            user.set_primary_group("mod"),
            Err(HolderError::NotInherited(_))
        );
        assert_eq!(user.primary_group(), "default");

        let user = User::from_parts(
            Uuid::new_v4(),
            None,
            "vip",
            [Node::inheritance("vip").value(false).build().unwrap()],
        );
        assert_eq!(user.primary_group(), "default");
    }

    #[test]
    fn refresh_keeps_generation_growing() {
        let uuid = Uuid::new_v4();
        let mut user = User::new(uuid, None);
        user.permissions_mut()
            .set_node(Node::builder("fly").build().unwrap());
        let generation = user.permissions().generation();

        let fresh = User::from_parts(
            uuid,
            Some("alice".into()),
            "mod",
            [Node::inheritance("mod").build().unwrap()],
        );
        user.refresh(fresh);

        assert!(user.permissions().generation() > generation);
        assert_eq!(user.username(), Some("alice"));
        assert_eq!(user.primary_group(), "mod");
        assert!(!user.inherits_default());
    }

    #[test]
    fn default_applies_only_without_parents() {
        let mut user = User::from_parts(Uuid::new_v4(), None, "default", []);
        assert!(user.apply_default_group());
        assert!(!user.apply_default_group());
        assert!(user.inherits_default());
    }
}
