// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Verdict of a permission lookup.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tristate {
    /// Permission was explicitly granted.
    True,

    /// Permission was explicitly denied.
    False,

    /// No node matched the permission.
    #[default]
    Undefined,
}

impl Tristate {
    /// Returns the boolean value of this verdict, treating `Undefined` as `false`.
    pub fn as_bool(&self) -> bool {
        matches!(self, Tristate::True)
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Tristate::Undefined)
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value { Tristate::True } else { Tristate::False }
    }
}

impl From<Option<bool>> for Tristate {
    fn from(value: Option<bool>) -> Self {
        value.map(Tristate::from).unwrap_or_default()
    }
}

impl Display for Tristate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tristate::True => "true",
            Tristate::False => "false",
            Tristate::Undefined => "undefined",
        };

        write!(f, "{}", s)
    }
}
