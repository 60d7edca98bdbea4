// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;

use crate::node::NodeError;

pub(crate) const GROUP_PREFIX: &str = "group.";
pub(crate) const PREFIX_PREFIX: &str = "prefix.";
pub(crate) const SUFFIX_PREFIX: &str = "suffix.";
pub(crate) const META_PREFIX: &str = "meta.";
pub(crate) const WEIGHT_PREFIX: &str = "weight.";
pub(crate) const DISPLAY_NAME_PREFIX: &str = "displayname.";

/// Which of the two chat meta slots a node occupies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChatMetaType {
    Prefix,
    Suffix,
}

impl ChatMetaType {
    pub(crate) fn permission_prefix(&self) -> &'static str {
        match self {
            ChatMetaType::Prefix => PREFIX_PREFIX,
            ChatMetaType::Suffix => SUFFIX_PREFIX,
        }
    }
}

impl Display for ChatMetaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChatMetaType::Prefix => "prefix",
            ChatMetaType::Suffix => "suffix",
        };

        write!(f, "{}", s)
    }
}

/// Prefix or suffix with its priority.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChatMeta {
    pub priority: i32,
    pub text: String,
}

/// Parsed form of a node's permission string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Regular,

    /// `group.<name>`, an inheritance edge towards the named group.
    Inheritance { group: String },

    /// `prefix.<priority>.<text>`
    Prefix(ChatMeta),

    /// `suffix.<priority>.<text>`
    Suffix(ChatMeta),

    /// `meta.<key>.<value>`
    Meta { key: String, value: String },

    /// `weight.<n>`
    Weight(i32),

    /// `displayname.<text>`
    DisplayName(String),
}

impl NodeKind {
    /// Derive the kind from a permission string.
    ///
    /// Permissions starting with one of the reserved prefixes must be well-formed, otherwise they
    /// are rejected.
    pub(crate) fn parse(permission: &str) -> Result<Self, NodeError> {
        let malformed = || NodeError::Malformed(permission.to_string());

        if let Some(group) = strip_prefix_ignore_case(permission, GROUP_PREFIX) {
            if group.is_empty() || group.contains(char::is_whitespace) {
                return Err(malformed());
            }
            return Ok(NodeKind::Inheritance {
                group: group.to_lowercase(),
            });
        }

        if let Some(rest) = strip_prefix_ignore_case(permission, PREFIX_PREFIX) {
            let chat_meta = parse_chat_meta(rest).ok_or_else(malformed)?;
            return Ok(NodeKind::Prefix(chat_meta));
        }

        if let Some(rest) = strip_prefix_ignore_case(permission, SUFFIX_PREFIX) {
            let chat_meta = parse_chat_meta(rest).ok_or_else(malformed)?;
            return Ok(NodeKind::Suffix(chat_meta));
        }

        if let Some(rest) = strip_prefix_ignore_case(permission, META_PREFIX) {
            let (key, value) = rest.split_once('.').ok_or_else(malformed)?;
            if key.is_empty() || value.is_empty() {
                return Err(malformed());
            }
            return Ok(NodeKind::Meta {
                key: key.to_lowercase(),
                value: value.to_string(),
            });
        }

        if let Some(rest) = strip_prefix_ignore_case(permission, WEIGHT_PREFIX) {
            let weight = rest.parse::<i32>().map_err(|_| malformed())?;
            return Ok(NodeKind::Weight(weight));
        }

        if let Some(name) = strip_prefix_ignore_case(permission, DISPLAY_NAME_PREFIX) {
            if name.is_empty() {
                return Err(malformed());
            }
            return Ok(NodeKind::DisplayName(name.to_string()));
        }

        Ok(NodeKind::Regular)
    }
}

/// Strips an ASCII prefix, comparing case-insensitively.
pub(crate) fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

fn parse_chat_meta(rest: &str) -> Option<ChatMeta> {
    let (priority, text) = rest.split_once('.')?;
    let priority = priority.parse::<i32>().ok()?;
    Some(ChatMeta {
        priority,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{ChatMeta, NodeKind};
    use crate::node::NodeError;

    #[test]
    fn parse_kinds() {
        assert_eq!(NodeKind::parse("essentials.fly").unwrap(), NodeKind::Regular);
        assert_eq!(
            NodeKind::parse("group.Admin").unwrap(),
            NodeKind::Inheritance {
                group: "admin".to_string()
            }
        );
        assert_eq!(
            NodeKind::parse("prefix.100.&c[Admin] ").unwrap(),
            NodeKind::Prefix(ChatMeta {
                priority: 100,
                text: "&c[Admin] ".to_string()
            })
        );
        assert_eq!(
            NodeKind::parse("suffix.-5.a.b").unwrap(),
            NodeKind::Suffix(ChatMeta {
                priority: -5,
                text: "a.b".to_string()
            })
        );
        assert_eq!(
            NodeKind::parse("meta.home-limit.3").unwrap(),
            NodeKind::Meta {
                key: "home-limit".to_string(),
                value: "3".to_string()
            }
        );
        assert_eq!(NodeKind::parse("weight.10").unwrap(), NodeKind::Weight(10));
        assert_eq!(
            NodeKind::parse("displayname.Admins").unwrap(),
            NodeKind::DisplayName("Admins".to_string())
        );
    }

    #[test]
    fn malformed_reserved_prefixes() {
        for permission in [
            "group.",
            "prefix.high.text",
            "prefix.10",
            "suffix.x",
            "meta.key",
            "meta..value",
            "weight.heavy",
            "displayname.",
        ] {
            assert_matches!(NodeKind::parse(permission), Err(NodeError::Malformed(_)));
        }
    }
}
