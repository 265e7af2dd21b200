//! Index usage descriptors and the schema accessor used to build them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One column of an index definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPart {
    /// Column name.
    pub column: String,
    /// Bytes the part occupies in a search key.
    pub store_length: u32,
}

impl KeyPart {
    /// Creates a key part.
    pub fn new(column: impl Into<String>, store_length: u32) -> Self {
        Self {
            column: column.into(),
            store_length,
        }
    }
}

/// Index definition as exposed by the schema layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Ordered key parts.
    pub parts: Vec<KeyPart>,
}

impl IndexInfo {
    /// Creates an index definition.
    pub fn new(name: impl Into<String>, parts: Vec<KeyPart>) -> Self {
        Self {
            name: name.into(),
            parts,
        }
    }

    /// Total length of a search key covering every part.
    pub fn full_key_len(&self) -> u32 {
        self.parts.iter().map(|p| p.store_length).sum()
    }
}

/// Resolves index identifiers to their definitions.
pub trait IndexCatalog {
    /// Looks up index number `index_no` of `table`.
    fn index(&self, table: &str, index_no: usize) -> Option<&IndexInfo>;
    /// Returns every index of `table` in index-number order.
    fn indexes(&self, table: &str) -> &[IndexInfo];
}

/// Simple in-memory catalog used for tests and tooling.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<String, Vec<IndexInfo>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an index to `table`; its number is its position.
    pub fn with_index(mut self, table: impl Into<String>, index: IndexInfo) -> Self {
        self.tables.entry(table.into()).or_default().push(index);
        self
    }
}

impl IndexCatalog for InMemoryCatalog {
    fn index(&self, table: &str, index_no: usize) -> Option<&IndexInfo> {
        self.tables.get(table).and_then(|idx| idx.get(index_no))
    }

    fn indexes(&self, table: &str) -> &[IndexInfo] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// How an access method uses an index: name, used length, used columns.
///
/// An absent name or length renders as NULL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexUseDescriptor {
    key_name: Option<String>,
    key_len: Option<u32>,
    key_parts: Vec<String>,
}

impl IndexUseDescriptor {
    /// Descriptor for "no index".
    pub fn none() -> Self {
        Self::default()
    }

    /// Uses `index` with a search key of `key_len` bytes.
    ///
    /// Key parts are collected up to and including the part at which the
    /// cumulative stored length reaches `key_len`.
    pub fn from_index(index: &IndexInfo, key_len: u32) -> Self {
        let mut key_parts = Vec::new();
        let mut len = 0u32;
        for part in &index.parts {
            key_parts.push(part.column.clone());
            len = len.saturating_add(part.store_length);
            if len >= key_len {
                break;
            }
        }
        Self {
            key_name: Some(index.name.clone()),
            key_len: Some(key_len),
            key_parts,
        }
    }

    /// Resolves index `index_no` of `table` through `catalog`.
    pub fn resolve(
        catalog: &dyn IndexCatalog,
        table: &str,
        index_no: usize,
        key_len: u32,
    ) -> Option<Self> {
        catalog
            .index(table, index_no)
            .map(|info| Self::from_index(info, key_len))
    }

    /// Names a key that has no real definition (e.g. a hash-join key).
    pub fn pseudo_key(name: impl Into<String>) -> Self {
        Self {
            key_name: Some(name.into()),
            key_len: None,
            key_parts: Vec::new(),
        }
    }

    /// Sets the used key length.
    pub fn with_key_len(mut self, key_len: u32) -> Self {
        self.key_len = Some(key_len);
        self
    }

    /// Appends a used column.
    pub fn with_part(mut self, column: impl Into<String>) -> Self {
        self.key_parts.push(column.into());
        self
    }

    /// Index name, if any.
    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    /// Used key length, if known.
    pub fn key_len(&self) -> Option<u32> {
        self.key_len
    }

    /// Used columns in key order.
    pub fn key_parts(&self) -> &[String] {
        &self.key_parts
    }

    /// Whether no index is set.
    pub fn is_empty(&self) -> bool {
        self.key_name.is_none()
    }

    /// Resets to "no index".
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_index(
                "t1",
                IndexInfo::new("PRIMARY", vec![KeyPart::new("id", 4)]),
            )
            .with_index(
                "t1",
                IndexInfo::new(
                    "idx_ab",
                    vec![KeyPart::new("a", 4), KeyPart::new("b", 8)],
                ),
            )
    }

    #[test]
    fn prefix_key_uses_leading_parts_only() {
        let catalog = catalog();
        let used = IndexUseDescriptor::resolve(&catalog, "t1", 1, 4).expect("index exists");
        assert_eq!(used.key_name(), Some("idx_ab"));
        assert_eq!(used.key_len(), Some(4));
        assert_eq!(used.key_parts(), ["a".to_string()]);
    }

    #[test]
    fn full_key_lists_every_part() {
        let catalog = catalog();
        let info = catalog.index("t1", 1).expect("index exists");
        let used = IndexUseDescriptor::from_index(info, info.full_key_len());
        assert_eq!(used.key_parts().len(), 2);
    }

    #[test]
    fn pseudo_key_has_unknown_length() {
        let used = IndexUseDescriptor::pseudo_key("#hash#");
        assert_eq!(used.key_len(), None);
        assert!(!used.is_empty());
    }

    #[test]
    fn unknown_index_resolves_to_none() {
        assert!(IndexUseDescriptor::resolve(&catalog(), "t2", 0, 4).is_none());
    }
}
