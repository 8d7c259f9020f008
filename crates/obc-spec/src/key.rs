//! Registry lookup keys.

/// Looks up a spec either by name or by numeric id, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    /// Case-insensitive name.
    Name(&'a str),
    /// Numeric id.
    Id(u32),
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(name: &'a str) -> Self {
        Key::Name(name)
    }
}

impl<'a> From<&'a String> for Key<'a> {
    fn from(name: &'a String) -> Self {
        Key::Name(name)
    }
}

impl From<u8> for Key<'_> {
    fn from(id: u8) -> Self {
        Key::Id(u32::from(id))
    }
}

impl From<u16> for Key<'_> {
    fn from(id: u16) -> Self {
        Key::Id(u32::from(id))
    }
}

impl From<u32> for Key<'_> {
    fn from(id: u32) -> Self {
        Key::Id(id)
    }
}

impl std::fmt::Display for Key<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Name(name) => write!(f, "'{}'", name),
            Key::Id(id) => write!(f, "id {}", id),
        }
    }
}

/// Normalized form used by name indexes.
pub(crate) fn fold_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Name and id indexes over a list of specs, validated for uniqueness.
#[derive(Debug, Clone, Default)]
pub(crate) struct NameIdIndex {
    by_name: std::collections::HashMap<String, usize>,
    by_id: std::collections::HashMap<u32, usize>,
}

impl NameIdIndex {
    /// Index `(name, id)` pairs; the position in the iterator is the stored index.
    pub(crate) fn build<'a>(
        kind: &'static str,
        entries: impl IntoIterator<Item = (&'a str, u32)>,
    ) -> Result<Self, crate::SpecError> {
        let mut index = NameIdIndex::default();
        let mut names: Vec<&'a str> = Vec::new();
        for (i, (name, id)) in entries.into_iter().enumerate() {
            if let Some(&prev) = index.by_id.get(&id) {
                return Err(crate::SpecError::DuplicateId {
                    kind,
                    id,
                    first: names[prev].to_string(),
                    second: name.to_string(),
                });
            }
            if index.by_name.insert(fold_name(name), i).is_some() {
                return Err(crate::SpecError::DuplicateName {
                    kind,
                    name: name.to_string(),
                });
            }
            index.by_id.insert(id, i);
            names.push(name);
        }
        Ok(index)
    }

    pub(crate) fn find(&self, key: Key<'_>) -> Option<usize> {
        match key {
            Key::Name(name) => self.by_name.get(&fold_name(name)).copied(),
            Key::Id(id) => self.by_id.get(&id).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_rejects_duplicates() {
        let err = NameIdIndex::build("command", [("PING", 1), ("RESET", 1)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "duplicate command id 1: 'PING' and 'RESET'"
        );

        let err = NameIdIndex::build("command", [("ping", 1), ("PING", 2)]).unwrap_err();
        assert!(matches!(err, crate::SpecError::DuplicateName { .. }));
    }

    #[test]
    fn test_index_lookup_is_case_insensitive() {
        let index = NameIdIndex::build("command", [("Ping", 1), ("reset", 7)]).unwrap();
        assert_eq!(index.find(Key::Name("PING")), Some(0));
        assert_eq!(index.find(Key::Id(7)), Some(1));
        assert_eq!(index.find(Key::Id(9)), None);
    }
}
