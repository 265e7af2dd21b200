//! Range and index-merge access descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{ExplainError, Result};
use crate::explain::index_use::IndexUseDescriptor;

/// Quick-select strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickSelectKind {
    /// Ascending index range scan.
    Range,
    /// Descending index range scan.
    RangeDesc,
    /// Loose index scan for MIN/MAX grouping.
    GroupMinMax,
    /// Index-merge sort-union.
    IndexMergeSortUnion,
    /// Index-merge union over rowid-ordered scans.
    IndexMergeUnion,
    /// Index-merge intersection over rowid-ordered scans.
    IndexMergeIntersection,
    /// Index-merge sort-intersection.
    IndexMergeSortIntersection,
}

impl QuickSelectKind {
    /// Whether this strategy reads through exactly one index.
    pub fn is_basic(self) -> bool {
        matches!(
            self,
            QuickSelectKind::Range | QuickSelectKind::RangeDesc | QuickSelectKind::GroupMinMax
        )
    }

    /// Name used in `Extra` text and JSON for composite strategies.
    pub fn name(self) -> &'static str {
        match self {
            QuickSelectKind::Range | QuickSelectKind::RangeDesc => "range",
            QuickSelectKind::GroupMinMax => "group_min_max",
            QuickSelectKind::IndexMergeSortUnion => "sort_union",
            QuickSelectKind::IndexMergeUnion => "union",
            QuickSelectKind::IndexMergeIntersection => "intersect",
            QuickSelectKind::IndexMergeSortIntersection => "sort_intersect",
        }
    }
}

impl fmt::Display for QuickSelectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum QuickAccess {
    Basic(IndexUseDescriptor),
    Composite(Vec<QuickSelectDescriptor>),
}

/// Recursive description of a range or index-merge access path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuickSelectDescriptor {
    kind: QuickSelectKind,
    access: QuickAccess,
}

impl QuickSelectDescriptor {
    /// Single-index strategy reading through `range`.
    pub fn basic(kind: QuickSelectKind, range: IndexUseDescriptor) -> Result<Self> {
        if !kind.is_basic() {
            return Err(ExplainError::InvalidQuickSelect(
                "composite strategy built as basic",
            ));
        }
        Ok(Self {
            kind,
            access: QuickAccess::Basic(range),
        })
    }

    /// Shorthand for an ascending range scan.
    pub fn range(range: IndexUseDescriptor) -> Self {
        Self {
            kind: QuickSelectKind::Range,
            access: QuickAccess::Basic(range),
        }
    }

    /// Empty composite strategy; add members with [`Self::push_child`].
    pub fn composite(kind: QuickSelectKind) -> Result<Self> {
        if kind.is_basic() {
            return Err(ExplainError::InvalidQuickSelect(
                "basic strategy built as composite",
            ));
        }
        Ok(Self {
            kind,
            access: QuickAccess::Composite(Vec::new()),
        })
    }

    /// Appends a merged member scan.
    pub fn push_child(&mut self, child: QuickSelectDescriptor) -> Result<()> {
        match &mut self.access {
            QuickAccess::Composite(children) => {
                children.push(child);
                Ok(())
            }
            QuickAccess::Basic(_) => Err(ExplainError::InvalidQuickSelect(
                "basic strategy cannot hold children",
            )),
        }
    }

    /// Builder form of [`Self::push_child`].
    pub fn with_child(mut self, child: QuickSelectDescriptor) -> Result<Self> {
        self.push_child(child)?;
        Ok(self)
    }

    /// Strategy tag.
    pub fn kind(&self) -> QuickSelectKind {
        self.kind
    }

    /// True only for range, descending range, and group-min-max.
    pub fn is_basic(&self) -> bool {
        self.kind.is_basic()
    }

    /// Index used by a basic strategy.
    pub fn range_index(&self) -> Option<&IndexUseDescriptor> {
        match &self.access {
            QuickAccess::Basic(range) => Some(range),
            QuickAccess::Composite(_) => None,
        }
    }

    /// Member scans of a composite strategy, in append order.
    pub fn children(&self) -> &[QuickSelectDescriptor] {
        match &self.access {
            QuickAccess::Basic(_) => &[],
            QuickAccess::Composite(children) => children.as_slice(),
        }
    }

    /// `Extra` suffix: empty for basic strategies, the recursive form otherwise.
    pub fn extra_text(&self) -> String {
        let mut out = String::new();
        if !self.is_basic() {
            self.write_recursive(&mut out);
        }
        out
    }

    /// Key name for basic strategies, `type(child,...)` for composites.
    pub fn recursive_text(&self) -> String {
        let mut out = String::new();
        self.write_recursive(&mut out);
        out
    }

    fn write_recursive(&self, out: &mut String) {
        match &self.access {
            QuickAccess::Basic(range) => out.push_str(range.key_name().unwrap_or_default()),
            QuickAccess::Composite(children) => {
                out.push_str(self.kind.name());
                out.push('(');
                for (idx, child) in children.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    child.write_recursive(out);
                }
                out.push(')');
            }
        }
    }

    /// Contents of the tabular `key` column.
    pub fn key_text(&self) -> String {
        match &self.access {
            QuickAccess::Basic(range) => range.key_name().unwrap_or_default().to_string(),
            QuickAccess::Composite(children) => children
                .iter()
                .map(QuickSelectDescriptor::key_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Contents of the tabular `key_len` column.
    pub fn key_len_text(&self) -> String {
        match &self.access {
            QuickAccess::Basic(range) => range
                .key_len()
                .map(|len| len.to_string())
                .unwrap_or_default(),
            QuickAccess::Composite(children) => children
                .iter()
                .map(QuickSelectDescriptor::key_len_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Structured form used under `index_merge`.
    pub fn to_json(&self) -> Value {
        match &self.access {
            QuickAccess::Basic(range) => json!({
                "range": {
                    "key": range.key_name(),
                    "used_key_parts": range.key_parts(),
                }
            }),
            QuickAccess::Composite(children) => {
                let members: Vec<Value> = children.iter().map(Self::to_json).collect();
                let mut obj = Map::new();
                obj.insert(self.kind.name().to_string(), Value::Array(members));
                Value::Object(obj)
            }
        }
    }
}
