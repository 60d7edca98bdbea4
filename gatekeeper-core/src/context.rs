// SPDX-License-Identifier: MIT OR Apache-2.0

//! Immutable key-multivalue sets qualifying nodes and queries.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known context key naming the server a process runs as.
pub const SERVER_KEY: &str = "server";

/// Well-known context key naming the world a player is in.
pub const WORLD_KEY: &str = "world";

/// Immutable mapping from keys to sets of values.
///
/// Keys are case-insensitive (stored lowercased), values are case-sensitive. All "mutators"
/// return a new set, the original is never changed.
///
/// A set `A` satisfies `B` if every `(key, value)` pair in `B` is also present in `A`. The empty
/// set is satisfied by every set.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContextSet(BTreeMap<String, BTreeSet<String>>);

impl ContextSet {
    /// The empty context set.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns a copy of this set with the given pair added.
    pub fn add(&self, key: &str, value: &str) -> Result<Self, ContextError> {
        let key = validate_key(key)?;
        let value = validate_value(value)?;

        let mut inner = self.0.clone();
        inner.entry(key).or_default().insert(value.to_string());
        Ok(Self(inner))
    }

    /// Builds a set from pairs, failing on the first invalid one.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ContextError> {
        let mut inner: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (key, value) in pairs {
            let key = validate_key(key)?;
            let value = validate_value(value)?;
            inner.entry(key).or_default().insert(value.to_string());
        }
        Ok(Self(inner))
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0
            .get(&key.trim().to_lowercase())
            .is_some_and(|values| values.contains(value))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&key.trim().to_lowercase())
    }

    /// Values stored for the given key.
    pub fn values(&self, key: &str) -> impl Iterator<Item = &str> {
        self.0
            .get(&key.trim().to_lowercase())
            .into_iter()
            .flat_map(|values| values.iter().map(String::as_str))
    }

    /// Returns `true` if every pair of `other` is also present in this set.
    pub fn satisfies(&self, other: &ContextSet) -> bool {
        other.0.iter().all(|(key, values)| {
            self.0
                .get(key)
                .is_some_and(|own_values| own_values.is_superset(values))
        })
    }

    /// Pairs present in both sets.
    pub fn intersection(&self, other: &ContextSet) -> ContextSet {
        let inner = self
            .0
            .iter()
            .filter_map(|(key, values)| {
                let other_values = other.0.get(key)?;
                let shared: BTreeSet<String> =
                    values.intersection(other_values).cloned().collect();
                if shared.is_empty() {
                    None
                } else {
                    Some((key.clone(), shared))
                }
            })
            .collect();
        Self(inner)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of `(key, value)` pairs in this set.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    /// All pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| (key.as_str(), value.as_str())))
    }
}

fn validate_key(key: &str) -> Result<String, ContextError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ContextError::EmptyKey);
    }
    if key.contains(['=', ',']) {
        return Err(ContextError::InvalidKey(key.to_string()));
    }
    Ok(key.to_lowercase())
}

fn validate_value(value: &str) -> Result<&str, ContextError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ContextError::EmptyValue);
    }
    if value.contains(',') {
        return Err(ContextError::InvalidValue(value.to_string()));
    }
    Ok(value)
}

impl Display for ContextSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs: Vec<String> = self
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        write!(f, "{}", pairs.join(","))
    }
}

impl FromStr for ContextSet {
    type Err = ContextError;

    /// Parses `k=v` pairs joined by `,`. The empty string is the empty set.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self::empty());
        }

        let pairs = value
            .split(',')
            .map(|pair| {
                pair.split_once('=')
                    .ok_or_else(|| ContextError::MalformedPair(pair.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_pairs(pairs)
    }
}

impl TryFrom<String> for ContextSet {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<ContextSet> for String {
    fn from(value: ContextSet) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("context key must not be empty")]
    EmptyKey,

    #[error("context value must not be empty")]
    EmptyValue,

    #[error("context key '{0}' contains a reserved character")]
    InvalidKey(String),

    #[error("context value '{0}' contains a reserved character")]
    InvalidValue(String),

    #[error("malformed context pair '{0}', expected key=value")]
    MalformedPair(String),
}
