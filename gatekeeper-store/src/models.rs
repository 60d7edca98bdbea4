// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;

use gatekeeper_core::{Group, Holder, HolderError, Node, Timestamp, Track, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted state of a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub uuid: Uuid,
    pub username: Option<String>,
    pub primary_group: String,
    pub nodes: Vec<Node>,
}

impl UserData {
    /// Restores the user, coercing an invalid primary group to the default group.
    pub fn into_user(self) -> User {
        User::from_parts(self.uuid, self.username, &self.primary_group, self.nodes)
    }
}

impl From<&User> for UserData {
    fn from(user: &User) -> Self {
        Self {
            uuid: user.uuid(),
            username: user.username().map(str::to_string),
            primary_group: user.primary_group().to_string(),
            nodes: user.permissions().nodes().cloned().collect(),
        }
    }
}

/// Persisted state of a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupData {
    pub name: String,
    pub nodes: Vec<Node>,
}

impl GroupData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
        }
    }

    pub fn into_group(self) -> Result<Group, HolderError> {
        Group::with_nodes(&self.name, self.nodes)
    }
}

impl From<&Group> for GroupData {
    fn from(group: &Group) -> Self {
        Self {
            name: group.name().to_string(),
            nodes: group.permissions().nodes().cloned().collect(),
        }
    }
}

/// Persisted state of a track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackData {
    pub name: String,
    pub groups: Vec<String>,
}

impl TrackData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            groups: Vec::new(),
        }
    }

    pub fn into_track(self) -> Result<Track, HolderError> {
        Track::with_groups(&self.name, self.groups.iter().map(String::as_str))
    }
}

impl From<&Track> for TrackData {
    fn from(track: &Track) -> Self {
        Self {
            name: track.name().to_string(),
            groups: track.groups().to_vec(),
        }
    }
}

/// A node held by some holder, as returned by permission searches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldPermission<ID> {
    pub holder: ID,
    pub node: Node,
}

/// Entity an action was performed on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogTarget {
    User { uuid: Uuid, name: Option<String> },
    Group { name: String },
    Track { name: String },
}

impl Display for LogTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogTarget::User {
                uuid,
                name: Some(name),
            } => write!(f, "user {} ({})", name, uuid),
            LogTarget::User { uuid, name: None } => write!(f, "user {}", uuid),
            LogTarget::Group { name } => write!(f, "group {}", name),
            LogTarget::Track { name } => write!(f, "track {}", name),
        }
    }
}

/// Entry of the administrative action log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub actor: Uuid,
    pub actor_name: String,
    pub target: LogTarget,
    pub action: String,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(actor: Uuid, actor_name: &str, target: LogTarget, action: &str) -> Self {
        Self {
            timestamp: Timestamp::now(),
            actor,
            actor_name: actor_name.to_string(),
            target,
            action: action.to_string(),
        }
    }
}

impl Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} -> {}: {}",
            self.timestamp, self.actor_name, self.target, self.action
        )
    }
}

#[cfg(test)]
mod tests {
    use gatekeeper_core::{Holder, Node, User};
    use uuid::Uuid;

    use super::{GroupData, TrackData, UserData};

    #[test]
    fn user_data_restores_primary_group() {
        let mut user = User::new(Uuid::new_v4(), Some("alice".into()));
        user.permissions_mut()
            .set_node(Node::inheritance("mod").build().unwrap());
        user.set_primary_group("mod").unwrap();

        let data = UserData::from(&user);
        assert_eq!(data.primary_group, "mod");
        assert_eq!(data.clone().into_user(), user);

        // Remove the edge: the primary group falls back to default on restore.
        let mut data = data;
        data.nodes.retain(|node| node.as_inheritance() != Some("mod"));
        assert_eq!(data.into_user().primary_group(), "default");
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(GroupData::new("").into_group().is_err());
        assert!(TrackData::new("with space").into_track().is_err());
    }
}
