// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::holder::{HolderError, HolderId, normalize_name};

/// Ordered, duplicate-free ladder of group names used for promotion and demotion.
///
/// A track only stores names. Whether the referenced groups exist is checked by whoever reads
/// the track against the currently loaded groups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    name: String,
    groups: Vec<String>,
}

impl Track {
    pub fn new(name: &str) -> Result<Self, HolderError> {
        Ok(Self {
            name: normalize_name(name)?,
            groups: Vec::new(),
        })
    }

    pub fn with_groups<'a>(
        name: &str,
        groups: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, HolderError> {
        let mut track = Self::new(name)?;
        for group in groups {
            track.append(group)?;
        }
        Ok(track)
    }

    pub fn id(&self) -> HolderId {
        HolderId::Track(self.name.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn append(&mut self, group: &str) -> Result<(), HolderError> {
        let group = self.check_absent(group)?;
        self.groups.push(group);
        Ok(())
    }

    pub fn insert(&mut self, position: usize, group: &str) -> Result<(), HolderError> {
        if position > self.groups.len() {
            return Err(HolderError::OutOfBounds(position));
        }
        let group = self.check_absent(group)?;
        self.groups.insert(position, group);
        Ok(())
    }

    pub fn remove(&mut self, group: &str) -> Result<(), HolderError> {
        let position = self
            .index_of(group)
            .ok_or_else(|| HolderError::NotOnTrack(group.to_lowercase()))?;
        self.groups.remove(position);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn contains(&self, group: &str) -> bool {
        self.index_of(group).is_some()
    }

    pub fn index_of(&self, group: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|existing| existing.eq_ignore_ascii_case(group.trim()))
    }

    /// Group following the given one, `None` if it is the last one.
    pub fn next(&self, group: &str) -> Result<Option<&str>, HolderError> {
        let position = self
            .index_of(group)
            .ok_or_else(|| HolderError::NotOnTrack(group.to_lowercase()))?;
        Ok(self.groups.get(position + 1).map(String::as_str))
    }

    /// Group preceding the given one, `None` if it is the first one.
    pub fn previous(&self, group: &str) -> Result<Option<&str>, HolderError> {
        let position = self
            .index_of(group)
            .ok_or_else(|| HolderError::NotOnTrack(group.to_lowercase()))?;
        Ok(position
            .checked_sub(1)
            .and_then(|previous| self.groups.get(previous))
            .map(String::as_str))
    }

    fn check_absent(&self, group: &str) -> Result<String, HolderError> {
        let group = normalize_name(group)?;
        if self.contains(&group) {
            return Err(HolderError::AlreadyOnTrack(group));
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::Track;
    use crate::holder::HolderError;

    #[test]
    fn ladder_operations() {
        let mut track = Track::with_groups("Staff", ["default", "mod", "admin"]).unwrap();
        assert_eq!(track.name(), "staff");
        assert_eq!(track.index_of("MOD"), Some(1));

        assert_eq!(track.next("default").unwrap(), Some("mod"));
        assert_eq!(track.next("admin").unwrap(), None);
        assert_eq!(track.previous("mod").unwrap(), Some("default"));
        assert_eq!(track.previous("default").unwrap(), None);
        assert_matches!(track.next("owner"), Err(HolderError::NotOnTrack(_)));

        track.insert(2, "helper").unwrap();
        assert_eq!(track.groups(), ["default", "mod", "helper", "admin"]);

        track.remove("mod").unwrap();
        assert_eq!(track.groups(), ["default", "helper", "admin"]);

        track.clear();
        assert!(track.is_empty());
    }

    #[test]
    fn duplicates_and_bounds() {
        let mut track = Track::with_groups("staff", ["default"]).unwrap();
        assert_matches!(track.append("Default"), Err(HolderError::AlreadyOnTrack(_)));
        assert_matches!(track.insert(5, "mod"), Err(HolderError::OutOfBounds(5)));
        assert_matches!(track.remove("mod"), Err(HolderError::NotOnTrack(_)));
    }
}
