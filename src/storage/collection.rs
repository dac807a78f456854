//! Collection descriptors for the document store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The named collections of the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Mutating API calls waiting for replay.
    PendingOperations,
    /// Application form submissions.
    FormQueue,
    /// Keyed read cache.
    CacheEntries,
}

/// How a collection identifies its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPath {
    /// Store-assigned, monotonically increasing integer in field `id`.
    AutoIncrement,
    /// Caller-chosen string in field `key`.
    Named,
}

impl Collection {
    /// Every collection, in schema order.
    pub const ALL: [Self; 3] = [Self::PendingOperations, Self::FormQueue, Self::CacheEntries];

    /// Backing table name.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::PendingOperations => "pending_operations",
            Self::FormQueue => "form_queue",
            Self::CacheEntries => "cache_entries",
        }
    }

    /// Key path of the collection.
    #[must_use]
    pub const fn key_path(self) -> KeyPath {
        match self {
            Self::PendingOperations | Self::FormQueue => KeyPath::AutoIncrement,
            Self::CacheEntries => KeyPath::Named,
        }
    }

    /// Name of the key field inside a record and of the key column.
    #[must_use]
    pub const fn key_field(self) -> &'static str {
        match self.key_path() {
            KeyPath::AutoIncrement => "id",
            KeyPath::Named => "key",
        }
    }

    /// Indexed fields. Each has a matching expression index in the schema.
    #[must_use]
    pub const fn indexes(self) -> &'static [&'static str] {
        match self {
            Self::PendingOperations => &["enqueued_at", "type"],
            Self::FormQueue => &["enqueued_at", "synced"],
            Self::CacheEntries => &["cached_at"],
        }
    }

    /// Whether `index` is declared on this collection.
    #[must_use]
    pub fn has_index(self, index: &str) -> bool {
        self.indexes().contains(&index)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Primary key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Id(i64),
    Name(String),
}

impl Key {
    /// The integer id, for auto-increment collections.
    #[must_use]
    pub const fn as_id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Name(_) => None,
        }
    }
}

impl From<i64> for Key {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_paths() {
        assert_eq!(Collection::PendingOperations.key_field(), "id");
        assert_eq!(Collection::FormQueue.key_path(), KeyPath::AutoIncrement);
        assert_eq!(Collection::CacheEntries.key_field(), "key");
    }

    #[test]
    fn test_indexes() {
        assert!(Collection::FormQueue.has_index("synced"));
        assert!(!Collection::CacheEntries.has_index("synced"));
        assert!(Collection::PendingOperations.has_index("type"));
    }
}
