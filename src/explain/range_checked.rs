//! "Range checked for each record" descriptor.
//!
//! The access method for the table is re-chosen for every outer row group, so
//! the ANALYZE answer to "which path was used" is a distribution: per-index
//! counts plus full-scan and index-merge counts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::explain::index_use::{IndexCatalog, IndexInfo};

/// Bitmap of index numbers (index `n` is bit `n`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyMap(pub u64);

impl KeyMap {
    /// Maximum number of indexes a map can describe.
    pub const MAX_KEYS: usize = 64;

    /// Empty map.
    pub const fn empty() -> Self {
        KeyMap(0)
    }

    /// Map with the given index numbers set; out-of-range numbers are dropped.
    pub fn from_indexes(indexes: impl IntoIterator<Item = usize>) -> Self {
        let mut map = KeyMap::empty();
        for idx in indexes {
            map.set(idx);
        }
        map
    }

    /// Sets bit `idx`.
    pub fn set(&mut self, idx: usize) {
        if idx < Self::MAX_KEYS {
            self.0 |= 1u64 << idx;
        }
    }

    /// Whether bit `idx` is set.
    pub fn is_set(&self, idx: usize) -> bool {
        idx < Self::MAX_KEYS && self.0 & (1u64 << idx) != 0
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::LowerHex for KeyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Strategy chosen for one row group of a range-checked table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeCheckChoice {
    /// No usable range: the whole table was scanned.
    FullScan,
    /// An index-merge plan was used.
    IndexMerge,
    /// A range scan over index number `n`.
    Index(usize),
}

/// Candidate keys and per-strategy visit counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCheckedDescriptor {
    key_set: Vec<String>,
    keys_map: KeyMap,
    full_scan: u64,
    index_merge: u64,
    keys_stat: Vec<u64>,
    keys_stat_names: Vec<Option<String>>,
}

impl RangeCheckedDescriptor {
    /// Builds the descriptor from every index of the table and the bitmap of
    /// candidates.
    pub fn new(table_indexes: &[IndexInfo], possible: KeyMap) -> Self {
        let mut key_set = Vec::new();
        let mut keys_stat_names = Vec::with_capacity(table_indexes.len());
        for (idx, info) in table_indexes.iter().enumerate() {
            if possible.is_set(idx) {
                key_set.push(info.name.clone());
                keys_stat_names.push(Some(info.name.clone()));
            } else {
                keys_stat_names.push(None);
            }
        }
        Self {
            key_set,
            keys_map: possible,
            full_scan: 0,
            index_merge: 0,
            keys_stat: vec![0; table_indexes.len()],
            keys_stat_names,
        }
    }

    /// Builds the descriptor using indexes resolved through `catalog`.
    pub fn from_catalog(catalog: &dyn IndexCatalog, table: &str, possible: KeyMap) -> Self {
        Self::new(catalog.indexes(table), possible)
    }

    /// Records the strategy chosen for one row group.
    ///
    /// Index numbers outside the table's index list are ignored.
    #[inline]
    pub fn collect(&mut self, choice: RangeCheckChoice) {
        match choice {
            RangeCheckChoice::FullScan => self.full_scan += 1,
            RangeCheckChoice::IndexMerge => self.index_merge += 1,
            RangeCheckChoice::Index(idx) => {
                if let Some(count) = self.keys_stat.get_mut(idx) {
                    *count += 1;
                }
            }
        }
    }

    /// Candidate key names in index order.
    pub fn key_set(&self) -> &[String] {
        &self.key_set
    }

    /// Candidate bitmap.
    pub fn keys_map(&self) -> KeyMap {
        self.keys_map
    }

    /// Row groups that fell back to a full scan.
    pub fn full_scan_count(&self) -> u64 {
        self.full_scan
    }

    /// Row groups that used an index merge.
    pub fn index_merge_count(&self) -> u64 {
        self.index_merge
    }

    /// Range scans recorded for index number `idx`.
    pub fn index_count(&self, idx: usize) -> u64 {
        self.keys_stat.get(idx).copied().unwrap_or(0)
    }

    /// Text for the tabular `Extra` column.
    pub fn tabular_text(&self) -> String {
        format!(
            "Range checked for each record (index map: 0x{:x})",
            self.keys_map
        )
    }

    /// Structured form; ANALYZE adds the per-strategy distribution.
    pub fn to_json(&self, is_analyze: bool) -> Value {
        let mut obj = Map::new();
        obj.insert("keys".into(), json!(self.key_set));
        if is_analyze {
            let mut r_keys = Map::new();
            r_keys.insert("full_scan".into(), json!(self.full_scan));
            r_keys.insert("index_merge".into(), json!(self.index_merge));
            if !self.keys_stat.is_empty() {
                let mut range = Map::new();
                for (name, count) in self.keys_stat_names.iter().zip(&self.keys_stat) {
                    if let Some(name) = name {
                        range.insert(name.clone(), json!(count));
                    }
                }
                r_keys.insert("range".into(), Value::Object(range));
            }
            obj.insert("r_keys".into(), Value::Object(r_keys));
        }
        Value::Object(obj)
    }
}
