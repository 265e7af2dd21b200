//! EXPLAIN record for one table reference of a join.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::explain::expr::ConditionText;
use crate::explain::index_use::IndexUseDescriptor;
use crate::explain::node::BasicJoin;
use crate::explain::quick_select::QuickSelectDescriptor;
use crate::explain::range_checked::{RangeCheckChoice, RangeCheckedDescriptor};
use crate::explain::tracker::{AccessTracker, TimeTracker};

/// Join/access method reported in the `type` column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    /// Not determined.
    #[default]
    Unknown,
    /// Table with exactly one row.
    System,
    /// At most one matching row, read once.
    Const,
    /// One row per outer row through a unique key.
    EqRef,
    /// Non-unique key lookup.
    Ref,
    /// Key lookup decided at execution time.
    MaybeRef,
    /// Full table scan.
    All,
    /// Index range scan.
    Range,
    /// Full index scan.
    Index,
    /// Full-text index.
    Fulltext,
    /// Key lookup plus NULL values.
    RefOrNull,
    /// Unique-key subquery lookup.
    UniqueSubquery,
    /// Non-unique-key subquery lookup.
    IndexSubquery,
    /// Index merge.
    IndexMerge,
    /// Hash join over a full scan.
    HashAll,
    /// Hash join over a range scan.
    HashRange,
    /// Hash join over an index.
    HashIndex,
    /// Hash join over an index merge.
    HashIndexMerge,
}

impl AccessType {
    /// Name printed in tabular and JSON output.
    pub fn name(self) -> &'static str {
        match self {
            AccessType::Unknown => "UNKNOWN",
            AccessType::System => "system",
            AccessType::Const => "const",
            AccessType::EqRef => "eq_ref",
            AccessType::Ref => "ref",
            AccessType::MaybeRef => "MAYBE_REF",
            AccessType::All => "ALL",
            AccessType::Range => "range",
            AccessType::Index => "index",
            AccessType::Fulltext => "fulltext",
            AccessType::RefOrNull => "ref_or_null",
            AccessType::UniqueSubquery => "unique_subquery",
            AccessType::IndexSubquery => "index_subquery",
            AccessType::IndexMerge => "index_merge",
            AccessType::HashAll => "hash_ALL",
            AccessType::HashRange => "hash_range",
            AccessType::HashIndex => "hash_index",
            AccessType::HashIndexMerge => "hash_index_merge",
        }
    }

    /// Whether this is one of the hash-join methods.
    pub fn is_hash_join(self) -> bool {
        matches!(
            self,
            AccessType::HashAll
                | AccessType::HashRange
                | AccessType::HashIndex
                | AccessType::HashIndexMerge
        )
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Annotation shown in the `Extra` column.
///
/// Parameterized tags read their parameters from the owning
/// [`TableAccessNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtraTag {
    /// Pushed index condition.
    UsingIndexCondition,
    /// Pushed index condition evaluated by batched key access.
    UsingIndexConditionBka,
    /// Index-merge quick select.
    Using,
    /// Access method re-chosen per row group.
    RangeCheckedForEachRecord,
    /// Condition pushed to the storage engine.
    UsingWhereWithPushedCondition,
    /// Attached WHERE part.
    UsingWhere,
    /// NOT EXISTS short-circuit.
    NotExists,
    /// Covering index read.
    UsingIndex,
    /// Full scan when the lookup key is NULL.
    FullScanOnNullKey,
    /// Information-schema: table not opened.
    SkipOpenTable,
    /// Information-schema: only definition opened.
    OpenFrmOnly,
    /// Information-schema: table fully opened.
    OpenFullTable,
    /// Information-schema: no database scanned.
    Scanned0Databases,
    /// Information-schema: one database scanned.
    Scanned1Database,
    /// Information-schema: all databases scanned.
    ScannedAllDatabases,
    /// Loose index scan for GROUP BY.
    UsingIndexForGroupBy,
    /// Multi-range read; prints the stored MRR text.
    UsingMrr,
    /// DISTINCT short-circuit.
    Distinct,
    /// Semi-join loose scan.
    LooseScan,
    /// Duplicate weedout starts here.
    StartTemporary,
    /// Duplicate weedout ends here.
    EndTemporary,
    /// Semi-join first match.
    FirstMatch,
    /// Join buffering.
    UsingJoinBuffer,
    /// Const table had no matching row.
    ConstRowNotFound,
    /// Unique lookup had no matching row.
    UniqueRowNotFound,
    /// ON condition is always false.
    ImpossibleOnCondition,
}

impl ExtraTag {
    /// Fixed text of the tag; parameterized tags extend it when rendered.
    pub fn text(self) -> &'static str {
        match self {
            ExtraTag::UsingIndexCondition => "Using index condition",
            ExtraTag::UsingIndexConditionBka => "Using index condition(BKA)",
            ExtraTag::Using => "Using ",
            ExtraTag::RangeCheckedForEachRecord => "Range checked for each record",
            ExtraTag::UsingWhereWithPushedCondition => "Using where with pushed condition",
            ExtraTag::UsingWhere => "Using where",
            ExtraTag::NotExists => "Not exists",
            ExtraTag::UsingIndex => "Using index",
            ExtraTag::FullScanOnNullKey => "Full scan on NULL key",
            ExtraTag::SkipOpenTable => "Skip_open_table",
            ExtraTag::OpenFrmOnly => "Open_frm_only",
            ExtraTag::OpenFullTable => "Open_full_table",
            ExtraTag::Scanned0Databases => "Scanned 0 databases",
            ExtraTag::Scanned1Database => "Scanned 1 database",
            ExtraTag::ScannedAllDatabases => "Scanned all databases",
            ExtraTag::UsingIndexForGroupBy => "Using index for group-by",
            ExtraTag::UsingMrr => "Rowid-ordered scan",
            ExtraTag::Distinct => "Distinct",
            ExtraTag::LooseScan => "LooseScan",
            ExtraTag::StartTemporary => "Start temporary",
            ExtraTag::EndTemporary => "End temporary",
            ExtraTag::FirstMatch => "FirstMatch",
            ExtraTag::UsingJoinBuffer => "Using join buffer",
            ExtraTag::ConstRowNotFound => "const row not found",
            ExtraTag::UniqueRowNotFound => "unique row not found",
            ExtraTag::ImpossibleOnCondition => "Impossible ON condition",
        }
    }
}

/// Join buffering used when reading this table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinBufferInfo {
    /// Buffer extends the previous table's buffer instead of copying rows.
    pub incremental: bool,
    /// Join algorithm (`BNL`, `BNLH`, `BKA`, `BKAH`); `None` when unbuffered.
    pub join_alg: Option<String>,
    /// Multi-range read description, empty when unused.
    pub mrr_type: String,
}

impl JoinBufferInfo {
    /// Buffered join with the given algorithm.
    pub fn new(join_alg: impl Into<String>, incremental: bool) -> Self {
        Self {
            incremental,
            join_alg: Some(join_alg.into()),
            mrr_type: String::new(),
        }
    }

    /// Whether join buffering is in use.
    pub fn is_using_jbuf(&self) -> bool {
        self.join_alg.is_some()
    }

    /// `flat` or `incremental`.
    pub fn buffer_type(&self) -> &'static str {
        if self.incremental {
            "incremental"
        } else {
            "flat"
        }
    }
}

/// Runtime counters of one table access, without its plan fields.
pub struct TableTrackers<'a> {
    node: &'a mut TableAccessNode,
}

impl TableTrackers<'_> {
    /// Rows read from the table.
    pub fn tracker(&mut self) -> &mut AccessTracker {
        &mut self.node.tracker
    }

    /// Time spent reading the table.
    pub fn op_tracker(&mut self) -> &mut TimeTracker {
        &mut self.node.op_tracker
    }

    /// Rows read back from the join buffer.
    pub fn jbuf_tracker(&mut self) -> &mut AccessTracker {
        &mut self.node.jbuf_tracker
    }

    /// Records a range-checked row group; no-op for other tables.
    #[inline]
    pub fn collect_range_check(&mut self, choice: RangeCheckChoice) {
        if let Some(checked) = self.node.range_checked.as_mut() {
            checked.collect(choice);
        }
    }

    /// Table `index` of the semi-join materialization nest hanging off this
    /// table.
    pub fn nest_table(&mut self, index: usize) -> Option<TableTrackers<'_>> {
        self.node
            .sjm_nest
            .as_mut()?
            .tables
            .get_mut(index)
            .map(TableAccessNode::trackers_mut)
    }
}

/// Full EXPLAIN/ANALYZE record for one table reference.
///
/// `rows` and `filtered` are `None` when the optimizer had no meaningful
/// estimate; they render as NULL rather than zero.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableAccessNode {
    /// Table name or synthetic name such as `<derived2>`.
    pub table_name: String,
    /// Partitions read, when partition pruning applies.
    pub used_partitions: Option<String>,
    /// Select id of a materialized derived table read through this entry.
    pub derived_select_number: Option<u32>,
    /// Select id of a non-merged semi-join read through this entry.
    pub non_merged_sjm_number: Option<u32>,
    /// Access method.
    pub access_type: AccessType,
    /// Candidate index names; empty renders as NULL.
    pub possible_keys: Vec<String>,
    /// Chosen index.
    pub key: IndexUseDescriptor,
    /// Table index for `hash_index`; `key` then holds the hash pseudo-key.
    pub hash_next_key: IndexUseDescriptor,
    /// Columns or constants compared against the key.
    pub ref_list: Vec<String>,
    /// Estimated rows.
    pub rows: Option<u64>,
    /// Estimated percentage of rows kept by the condition.
    pub filtered: Option<f64>,
    /// Text for [`ExtraTag::UsingMrr`].
    pub mrr_type: String,
    /// Table named by [`ExtraTag::FirstMatch`].
    pub firstmatch_table_name: String,
    /// Loose index scan is scanning rather than jumping.
    pub loose_scan_is_scanning: bool,
    /// Range or index-merge details.
    pub quick_info: Option<QuickSelectDescriptor>,
    /// Range-checked-for-each-record details.
    pub range_checked: Option<RangeCheckedDescriptor>,
    /// Full scan happens when the lookup key is NULL.
    pub full_scan_on_null_key: bool,
    /// Join buffering details.
    pub join_buffer: JoinBufferInfo,
    /// Duplicate weedout range starts at this table.
    pub start_dups_weedout: bool,
    /// Duplicate weedout range ends at this table.
    pub end_dups_weedout: bool,
    /// Attached condition checked when reading rows.
    pub where_cond: Option<ConditionText>,
    /// Condition checked against join-buffer rows.
    pub cache_cond: Option<ConditionText>,
    /// Condition pushed into the index.
    pub pushed_index_cond: Option<ConditionText>,
    /// Materialized semi-join nest.
    pub sjm_nest: Option<Box<BasicJoin>>,
    /// Table reads.
    pub tracker: AccessTracker,
    /// Time spent reading the table.
    pub op_tracker: TimeTracker,
    /// Join-buffer reads.
    pub jbuf_tracker: AccessTracker,
    extra_tags: Vec<ExtraTag>,
}

impl TableAccessNode {
    /// Record for `table_name` read with `access_type`.
    pub fn new(table_name: impl Into<String>, access_type: AccessType) -> Self {
        Self {
            table_name: table_name.into(),
            access_type,
            ..Self::default()
        }
    }

    /// Record for a materialized derived table produced by `select_id`.
    pub fn derived(select_id: u32) -> Self {
        Self {
            table_name: format!("<derived{select_id}>"),
            derived_select_number: Some(select_id),
            access_type: AccessType::All,
            ..Self::default()
        }
    }

    /// Record for a non-merged semi-join produced by `select_id`.
    pub fn non_merged_semi_join(select_id: u32) -> Self {
        Self {
            table_name: format!("<subquery{select_id}>"),
            non_merged_sjm_number: Some(select_id),
            access_type: AccessType::EqRef,
            ..Self::default()
        }
    }

    /// Counter-only view for the executor.
    pub fn trackers_mut(&mut self) -> TableTrackers<'_> {
        TableTrackers { node: self }
    }

    /// Appends an `Extra` tag; tags keep insertion order and are not deduplicated.
    pub fn push_extra_tag(&mut self, tag: ExtraTag) {
        match tag {
            ExtraTag::StartTemporary => self.start_dups_weedout = true,
            ExtraTag::EndTemporary => self.end_dups_weedout = true,
            _ => {}
        }
        self.extra_tags.push(tag);
    }

    /// Builder form of [`Self::push_extra_tag`].
    pub fn with_extra(mut self, tag: ExtraTag) -> Self {
        self.push_extra_tag(tag);
        self
    }

    /// Tags in insertion order.
    pub fn extra_tags(&self) -> &[ExtraTag] {
        &self.extra_tags
    }

    /// Whether `tag` was pushed at least once.
    pub fn has_extra(&self, tag: ExtraTag) -> bool {
        self.extra_tags.contains(&tag)
    }

    /// Observed filter fraction, including join-buffer filtering.
    pub fn r_filtered(&self) -> f64 {
        let mut fraction = self.tracker.filtered_fraction();
        if self.join_buffer.is_using_jbuf() {
            fraction *= self.jbuf_tracker.filtered_fraction();
        }
        fraction
    }

    /// Contents of the `key` column; JSON uses the recursive quick-select form.
    pub fn key_text(&self, for_json: bool) -> String {
        let is_hj = self.access_type.is_hash_join();
        let mut out = String::new();
        if let Some(name) = self.key.key_name() {
            if is_hj {
                out.push_str("#hash#");
            }
            out.push_str(name);
            if is_hj && self.access_type != AccessType::HashAll {
                out.push(':');
            }
        }
        if let Some(quick) = &self.quick_info {
            if for_json {
                out.push_str(&quick.recursive_text());
            } else {
                out.push_str(&quick.key_text());
            }
        }
        if self.access_type == AccessType::HashIndex {
            out.push_str(self.hash_next_key.key_name().unwrap_or_default());
        }
        out
    }

    /// Contents of the `key_len` column.
    pub fn key_len_text(&self) -> String {
        let is_hj = self.access_type.is_hash_join();
        let mut out = String::new();
        if let Some(len) = self.key.key_len() {
            out.push_str(&len.to_string());
            if is_hj && self.access_type != AccessType::HashAll {
                out.push(':');
            }
        }
        if let Some(quick) = &self.quick_info {
            out.push_str(&quick.key_len_text());
        }
        if self.access_type == AccessType::HashIndex {
            if let Some(len) = self.hash_next_key.key_len() {
                out.push_str(&len.to_string());
            }
        }
        out
    }

    /// Key columns to report under `used_key_parts`.
    pub fn used_key_parts(&self) -> &[String] {
        match &self.quick_info {
            Some(quick) if quick.is_basic() => quick
                .range_index()
                .map(IndexUseDescriptor::key_parts)
                .unwrap_or_default(),
            _ => self.key.key_parts(),
        }
    }

    /// Renders one tag with its parameters.
    pub fn tag_text(&self, tag: ExtraTag) -> String {
        match tag {
            ExtraTag::Using => {
                let quick = self
                    .quick_info
                    .as_ref()
                    .map(QuickSelectDescriptor::extra_text)
                    .unwrap_or_default();
                format!("{}{}", tag.text(), quick)
            }
            ExtraTag::RangeCheckedForEachRecord => match &self.range_checked {
                Some(desc) => desc.tabular_text(),
                None => tag.text().to_string(),
            },
            ExtraTag::UsingJoinBuffer => {
                let jbuf = &self.join_buffer;
                let mut out = format!(
                    "{} ({}, {} join)",
                    tag.text(),
                    jbuf.buffer_type(),
                    jbuf.join_alg.as_deref().unwrap_or_default()
                );
                if !jbuf.mrr_type.is_empty() {
                    out.push_str("; ");
                    out.push_str(&jbuf.mrr_type);
                }
                out
            }
            ExtraTag::FirstMatch if !self.firstmatch_table_name.is_empty() => {
                format!("FirstMatch({})", self.firstmatch_table_name)
            }
            ExtraTag::UsingIndexForGroupBy if self.loose_scan_is_scanning => {
                format!("{} (scanning)", tag.text())
            }
            ExtraTag::UsingMrr => self.mrr_type.clone(),
            _ => tag.text().to_string(),
        }
    }

    /// Composes the `Extra` column; select-level flags go after the tags.
    pub fn extra_text(&self, using_temporary: bool, using_filesort: bool) -> String {
        let mut parts: Vec<String> = self.extra_tags.iter().map(|t| self.tag_text(*t)).collect();
        if using_temporary {
            parts.push("Using temporary".to_string());
        }
        if using_filesort {
            parts.push("Using filesort".to_string());
        }
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::quick_select::QuickSelectKind;

    #[test]
    fn extra_keeps_insertion_order_and_repeats() {
        let mut tab = TableAccessNode::new("t1", AccessType::Ref);
        tab.push_extra_tag(ExtraTag::UsingWhere);
        tab.push_extra_tag(ExtraTag::UsingIndex);
        tab.push_extra_tag(ExtraTag::UsingWhere);
        assert_eq!(
            tab.extra_text(true, true),
            "Using where; Using index; Using where; Using temporary; Using filesort"
        );
    }

    #[test]
    fn join_buffer_text_includes_algorithm_and_mrr() {
        let mut tab = TableAccessNode::new("t2", AccessType::All);
        tab.join_buffer = JoinBufferInfo::new("BNL", false);
        tab.push_extra_tag(ExtraTag::UsingWhere);
        tab.push_extra_tag(ExtraTag::UsingJoinBuffer);
        assert_eq!(
            tab.extra_text(false, false),
            "Using where; Using join buffer (flat, BNL join)"
        );
        tab.join_buffer = JoinBufferInfo::new("BKA", true);
        tab.join_buffer.mrr_type = "Key-ordered scan".into();
        assert_eq!(
            tab.tag_text(ExtraTag::UsingJoinBuffer),
            "Using join buffer (incremental, BKA join); Key-ordered scan"
        );
    }

    #[test]
    fn first_match_and_group_by_parameters() {
        let mut tab = TableAccessNode::new("t3", AccessType::Range);
        assert_eq!(tab.tag_text(ExtraTag::FirstMatch), "FirstMatch");
        tab.firstmatch_table_name = "t1".into();
        assert_eq!(tab.tag_text(ExtraTag::FirstMatch), "FirstMatch(t1)");
        tab.loose_scan_is_scanning = true;
        assert_eq!(
            tab.tag_text(ExtraTag::UsingIndexForGroupBy),
            "Using index for group-by (scanning)"
        );
    }

    #[test]
    fn index_merge_key_columns() {
        let mut tab = TableAccessNode::new("t1", AccessType::IndexMerge);
        let quick = QuickSelectDescriptor::composite(QuickSelectKind::IndexMergeUnion)
            .and_then(|q| {
                q.with_child(QuickSelectDescriptor::range(
                    IndexUseDescriptor::pseudo_key("a").with_key_len(4),
                ))
            })
            .and_then(|q| {
                q.with_child(QuickSelectDescriptor::range(
                    IndexUseDescriptor::pseudo_key("b").with_key_len(5),
                ))
            })
            .expect("valid composite");
        tab.quick_info = Some(quick);
        tab.push_extra_tag(ExtraTag::Using);
        assert_eq!(tab.key_text(false), "a,b");
        assert_eq!(tab.key_text(true), "union(a,b)");
        assert_eq!(tab.key_len_text(), "4,5");
        assert_eq!(tab.extra_text(false, false), "Using union(a,b)");
    }

    #[test]
    fn hash_join_keys_are_prefixed() {
        let mut tab = TableAccessNode::new("t2", AccessType::HashIndex);
        tab.key = IndexUseDescriptor::pseudo_key("a").with_key_len(5);
        tab.hash_next_key = IndexUseDescriptor::pseudo_key("idx_a").with_key_len(5);
        assert_eq!(tab.key_text(false), "#hash#a:idx_a");
        assert_eq!(tab.key_len_text(), "5:5");
    }

    #[test]
    fn r_filtered_multiplies_join_buffer_fraction() {
        let mut tab = TableAccessNode::new("t2", AccessType::All);
        tab.join_buffer = JoinBufferInfo::new("BNL", false);
        tab.tracker.on_scan_init();
        for _ in 0..10 {
            tab.tracker.on_record_read();
        }
        for _ in 0..5 {
            tab.tracker.on_record_after_filter();
        }
        tab.jbuf_tracker.on_scan_init();
        for _ in 0..4 {
            tab.jbuf_tracker.on_record_read();
        }
        tab.jbuf_tracker.on_record_after_filter();
        assert!((tab.r_filtered() - 0.125).abs() < 1e-12);
    }

    #[test]
    fn weedout_tags_set_flags() {
        let tab = TableAccessNode::new("t1", AccessType::All)
            .with_extra(ExtraTag::StartTemporary)
            .with_extra(ExtraTag::EndTemporary);
        assert!(tab.start_dups_weedout);
        assert!(tab.end_dups_weedout);
    }
}
