use std::collections::HashMap;
use std::fmt;

/// What an original id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    User,
    Group,
    Folder,
    File,
    /// Room created for a shared folder.
    Room,
}

/// Id of an item in the export.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OriginalId {
    Num(i64),
    Key(String),
}

impl fmt::Display for OriginalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(id) => write!(f, "{}", id),
            Self::Key(key) => f.write_str(key),
        }
    }
}

impl From<i64> for OriginalId {
    fn from(id: i64) -> Self {
        Self::Num(id)
    }
}

impl From<&str> for OriginalId {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<&String> for OriginalId {
    fn from(key: &String) -> Self {
        Self::Key(key.clone())
    }
}

/// Maps original ids to the ids the platform assigned on import.
#[derive(Debug, Clone)]
pub struct IdMap<V> {
    entries: HashMap<(Kind, OriginalId), V>,
}

impl<V> Default for IdMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V: Copy> IdMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: Kind, original: impl Into<OriginalId>, value: V) {
        self.entries.insert((kind, original.into()), value);
    }

    pub fn get(&self, kind: Kind, original: impl Into<OriginalId>) -> Option<V> {
        self.entries.get(&(kind, original.into())).copied()
    }

    pub fn contains(&self, kind: Kind, original: impl Into<OriginalId>) -> bool {
        self.entries.contains_key(&(kind, original.into()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_do_not_collide() {
        let mut map = IdMap::new();
        map.insert(Kind::Folder, 7, 100i64);
        map.insert(Kind::File, 7, 200i64);

        assert_eq!(map.get(Kind::Folder, 7), Some(100));
        assert_eq!(map.get(Kind::File, 7), Some(200));
        assert_eq!(map.get(Kind::Room, 7), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_string_keys() {
        let mut map = IdMap::new();
        let id = uuid::Uuid::new_v4();
        map.insert(Kind::User, "u-1", id);

        assert!(map.contains(Kind::User, "u-1"));
        assert!(!map.contains(Kind::Group, "u-1"));
        assert_eq!(map.get(Kind::User, &"u-1".to_string()), Some(id));
    }
}
