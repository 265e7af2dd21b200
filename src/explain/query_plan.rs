//! Per-statement plan registry and render entry points.

use std::collections::BTreeMap;
use std::hash::Hasher;
use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, trace};
use xxhash_rust::xxh64::Xxh64;

use crate::config::{ExplainFlags, ExplainFormat};
use crate::error::{ExplainError, Result};
use crate::explain::node::{
    InsertPlan, NodeKind, NodePayload, NodeTrackers, PlanNode, SelectPlan, UnionPlan,
};
use crate::explain::tabular::{self, ExplainColumns, ExplainRow, RowSink};

/// Plan of one statement: every planned block, keyed by select id.
///
/// Selects and unions live in separate maps because a union is registered
/// under its first member's id, which the member select also claims. Within
/// each map an id may be added once. Single-table UPDATE/DELETE and INSERT
/// plans have their own slots.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryPlan {
    selects: BTreeMap<u32, PlanNode>,
    unions: BTreeMap<u32, PlanNode>,
    upd_del_plan: Option<PlanNode>,
    insert_plan: Option<PlanNode>,
    operations: u32,
    ready: bool,
}

impl QueryPlan {
    /// Empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.ready {
            error!("attempt to modify a query plan after it was marked ready");
            return Err(ExplainError::PlanSealed);
        }
        Ok(())
    }

    /// Registers a SELECT, UNION, or bare join node.
    pub fn add_node(&mut self, node: PlanNode) -> Result<()> {
        self.ensure_open()?;
        let kind = node.kind();
        if kind.is_dml() {
            error!(kind = %kind, "DML plans must use their dedicated slot");
            return Err(ExplainError::UnsupportedNode(kind));
        }
        if let Some(union) = node.as_union() {
            if union.members().is_empty() {
                return Err(ExplainError::EmptyUnion);
            }
        }
        let select_id = node.select_id();
        let map = match kind {
            NodeKind::Union => &mut self.unions,
            _ => &mut self.selects,
        };
        if map.contains_key(&select_id) {
            error!(select_id, kind = %kind, "select id registered twice");
            return Err(ExplainError::DuplicateSelectId { select_id, kind });
        }
        map.insert(select_id, node);
        self.operations += 1;
        debug!(select_id, kind = %kind, operations = self.operations, "registered plan node");
        Ok(())
    }

    /// Sets the statement's INSERT plan.
    pub fn add_insert_plan(&mut self, plan: InsertPlan) -> Result<()> {
        self.ensure_open()?;
        if self.insert_plan.is_some() {
            error!("INSERT plan set twice");
            return Err(ExplainError::DmlPlanAlreadySet(NodeKind::Insert));
        }
        self.insert_plan = Some(PlanNode::insert(plan));
        self.operations += 1;
        debug!(operations = self.operations, "registered INSERT plan");
        Ok(())
    }

    /// Sets the statement's single-table UPDATE or DELETE plan.
    pub fn add_update_delete_plan(&mut self, node: PlanNode) -> Result<()> {
        self.ensure_open()?;
        let kind = node.kind();
        if !matches!(kind, NodeKind::Update | NodeKind::Delete) {
            return Err(ExplainError::UnsupportedNode(kind));
        }
        if self.upd_del_plan.is_some() {
            error!(kind = %kind, "UPDATE/DELETE plan set twice");
            return Err(ExplainError::DmlPlanAlreadySet(kind));
        }
        self.upd_del_plan = Some(node);
        self.operations += 1;
        debug!(kind = %kind, operations = self.operations, "registered DML plan");
        Ok(())
    }

    /// Union registered under `select_id`, otherwise the select.
    pub fn get_node(&self, select_id: u32) -> Option<&PlanNode> {
        self.unions
            .get(&select_id)
            .or_else(|| self.selects.get(&select_id))
    }

    /// Mutable form of [`Self::get_node`]; fails once the plan is sealed.
    pub fn get_node_mut(&mut self, select_id: u32) -> Result<Option<&mut PlanNode>> {
        self.ensure_open()?;
        if self.unions.contains_key(&select_id) {
            return Ok(self.unions.get_mut(&select_id));
        }
        Ok(self.selects.get_mut(&select_id))
    }

    /// Select with `select_id`, even when a union shares the id.
    pub fn get_select(&self, select_id: u32) -> Option<&SelectPlan> {
        self.selects.get(&select_id).and_then(PlanNode::as_select)
    }

    /// Mutable form of [`Self::get_select`]; fails once the plan is sealed.
    pub fn get_select_mut(&mut self, select_id: u32) -> Result<Option<&mut SelectPlan>> {
        self.ensure_open()?;
        Ok(self
            .selects
            .get_mut(&select_id)
            .and_then(PlanNode::as_select_mut))
    }

    /// Node wrapping the select with `select_id`.
    pub fn get_select_node(&self, select_id: u32) -> Option<&PlanNode> {
        self.selects
            .get(&select_id)
            .filter(|node| node.kind() == NodeKind::Select)
    }

    /// Union registered under `select_id`.
    pub fn get_union(&self, select_id: u32) -> Option<&UnionPlan> {
        self.unions.get(&select_id).and_then(PlanNode::as_union)
    }

    /// Mutable form of [`Self::get_union`]; fails once the plan is sealed.
    pub fn get_union_mut(&mut self, select_id: u32) -> Result<Option<&mut UnionPlan>> {
        self.ensure_open()?;
        Ok(self
            .unions
            .get_mut(&select_id)
            .and_then(PlanNode::as_union_mut))
    }

    /// UPDATE or DELETE plan, if any.
    pub fn update_delete_plan(&self) -> Option<&PlanNode> {
        self.upd_del_plan.as_ref()
    }

    /// Mutable form of [`Self::update_delete_plan`]; fails once the plan is
    /// sealed.
    pub fn update_delete_plan_mut(&mut self) -> Result<Option<&mut PlanNode>> {
        self.ensure_open()?;
        Ok(self.upd_del_plan.as_mut())
    }

    /// Counters of the select or bare join registered under `select_id`.
    /// Available before and after sealing.
    pub fn trackers_mut(&mut self, select_id: u32) -> Option<NodeTrackers<'_>> {
        self.selects.get_mut(&select_id).map(NodeTrackers::new)
    }

    /// Counters of the union registered under `select_id`.
    pub fn union_trackers_mut(&mut self, select_id: u32) -> Option<NodeTrackers<'_>> {
        self.unions.get_mut(&select_id).map(NodeTrackers::new)
    }

    /// Counters of the UPDATE or DELETE plan.
    pub fn dml_trackers_mut(&mut self) -> Option<NodeTrackers<'_>> {
        self.upd_del_plan.as_mut().map(NodeTrackers::new)
    }

    /// INSERT plan, if any.
    pub fn insert_plan(&self) -> Option<&InsertPlan> {
        match self.insert_plan.as_ref().map(PlanNode::payload) {
            Some(NodePayload::Insert(plan)) => Some(plan),
            _ => None,
        }
    }

    /// Whether there is anything to explain.
    pub fn has_plan(&self) -> bool {
        self.insert_plan.is_some() || self.upd_del_plan.is_some() || self.get_node(1).is_some()
    }

    /// Number of successful registrations.
    pub fn operations(&self) -> u32 {
        self.operations
    }

    /// Seals the structure. Afterwards only the `*trackers_mut` views hand out
    /// mutable access.
    pub fn mark_ready(&mut self) {
        self.ready = true;
        trace!(operations = self.operations, "query plan ready");
    }

    /// Whether [`Self::mark_ready`] was called.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Resolves a child reference made by block `parent`.
    pub(crate) fn resolve_child(&self, select_id: u32, parent: u32) -> Result<&PlanNode> {
        self.get_node(select_id).ok_or_else(|| {
            error!(select_id, parent, "plan references a missing select");
            ExplainError::MissingNode { select_id, parent }
        })
    }

    fn root(&self) -> Result<&PlanNode> {
        if let Some(node) = &self.upd_del_plan {
            return Ok(node);
        }
        if let Some(node) = &self.insert_plan {
            return Ok(node);
        }
        self.get_node(1).ok_or(ExplainError::NoQueryPlan)
    }

    /// Every tabular row, root first, children depth-first.
    pub fn explain_rows(&self) -> Result<Vec<ExplainRow>> {
        let mut rows = Vec::new();
        self.root()?.render_tabular(self, &mut rows)?;
        Ok(rows)
    }

    /// Sends the tabular rendering to `sink`; nothing is sent on failure.
    pub fn render_tabular(
        &self,
        sink: &mut dyn RowSink,
        flags: ExplainFlags,
        is_analyze: bool,
    ) -> Result<()> {
        debug!(format = "tabular", is_analyze, "rendering query plan");
        let rows = self.explain_rows()?;
        tabular::flush_rows(sink, ExplainColumns::new(flags, is_analyze), &rows)?;
        debug!(rows = rows.len(), "rendered query plan");
        Ok(())
    }

    /// JSON document for the whole statement.
    pub fn render_json_value(&self, is_analyze: bool) -> Result<Value> {
        self.root()?.to_json(self, is_analyze)
    }

    /// Writes the pretty-printed JSON document to `writer`.
    pub fn render_json(&self, writer: &mut dyn Write, is_analyze: bool) -> Result<()> {
        debug!(format = "json", is_analyze, "rendering query plan");
        self.root()?.render_json(self, writer, is_analyze)
    }

    /// Tab-separated tabular text with a header line.
    pub fn render_to_string(&self, flags: ExplainFlags, is_analyze: bool) -> Result<String> {
        let rows = self.explain_rows()?;
        tabular::rows_to_string(ExplainColumns::new(flags, is_analyze), &rows)
    }

    /// Renders in `format` to a string.
    pub fn render_text(
        &self,
        format: ExplainFormat,
        flags: ExplainFlags,
        is_analyze: bool,
    ) -> Result<String> {
        match format {
            ExplainFormat::Tabular => self.render_to_string(flags, is_analyze),
            ExplainFormat::Json => Ok(serde_json::to_string_pretty(
                &self.render_json_value(is_analyze)?,
            )?),
        }
    }

    /// Sends the result set a client sees: rows for tabular output, one
    /// `EXPLAIN` cell holding the document for JSON.
    pub fn send_to_client(
        &self,
        sink: &mut dyn RowSink,
        format: ExplainFormat,
        flags: ExplainFlags,
        is_analyze: bool,
    ) -> Result<()> {
        match format {
            ExplainFormat::Tabular => self.render_tabular(sink, flags, is_analyze),
            ExplainFormat::Json => {
                let text = self.render_text(format, flags, is_analyze)?;
                sink.send_header(&["EXPLAIN"])?;
                sink.send_row(vec![Some(text)])
            }
        }
    }

    /// Hash of the EXPLAIN (not ANALYZE) JSON rendering; runtime counters do
    /// not affect it.
    pub fn plan_digest(&self) -> Result<u64> {
        let value = self.render_json_value(false)?;
        let mut hasher = Xxh64::new(0);
        hasher.write(&serde_json::to_vec(&value)?);
        Ok(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::node::{DeletePlan, UpdatePlan};
    use crate::explain::table_access::{AccessType, TableAccessNode};
    use crate::explain::tabular::ResultSet;

    fn simple_select(id: u32) -> PlanNode {
        PlanNode::select(SelectPlan::new(
            id,
            "SIMPLE",
            vec![TableAccessNode::new("t1", AccessType::All)],
        ))
    }

    #[test]
    fn union_and_select_share_an_id() {
        let mut plan = QueryPlan::new();
        plan.add_node(simple_select(2)).expect("select");
        plan.add_node(PlanNode::union(UnionPlan::new(vec![2, 3]).expect("members")))
            .expect("union");
        assert_eq!(plan.get_node(2).map(PlanNode::kind), Some(NodeKind::Union));
        assert!(plan.get_select(2).is_some());
        assert!(plan.get_union(2).is_some());
        assert_eq!(plan.operations(), 2);
    }

    #[test]
    fn duplicate_select_is_rejected() {
        let mut plan = QueryPlan::new();
        plan.add_node(simple_select(1)).expect("first");
        let err = plan.add_node(simple_select(1)).unwrap_err();
        assert_eq!(err.code(), "DuplicateSelectId");
        assert_eq!(plan.operations(), 1);
    }

    #[test]
    fn second_dml_plan_is_rejected() {
        let mut plan = QueryPlan::new();
        plan.add_update_delete_plan(PlanNode::update(UpdatePlan::new("t1", AccessType::All)))
            .expect("first");
        let err = plan
            .add_update_delete_plan(PlanNode::delete(DeletePlan::new("t1", AccessType::All)))
            .unwrap_err();
        assert_eq!(err.code(), "DmlPlanAlreadySet");
        assert!(plan.add_insert_plan(InsertPlan::new("t2")).is_ok());
        assert!(plan.add_insert_plan(InsertPlan::new("t2")).is_err());
    }

    #[test]
    fn dml_through_add_node_is_rejected() {
        let mut plan = QueryPlan::new();
        let err = plan
            .add_node(PlanNode::insert(InsertPlan::new("t1")))
            .unwrap_err();
        assert_eq!(err.code(), "UnsupportedNode");
    }

    #[test]
    fn sealed_plan_rejects_additions() {
        let mut plan = QueryPlan::new();
        plan.add_node(simple_select(1)).expect("select");
        plan.mark_ready();
        assert!(plan.is_ready());
        let err = plan.add_node(simple_select(2)).unwrap_err();
        assert_eq!(err.code(), "PlanSealed");
        plan.trackers_mut(1)
            .expect("select")
            .table(0)
            .expect("table")
            .tracker()
            .on_scan_init();
        assert_eq!(plan.get_select(1).map(|s| s.tables()[0].tracker.loops()), Some(1));
    }

    #[test]
    fn sealed_plan_hands_out_only_trackers() {
        let mut plan = QueryPlan::new();
        plan.add_node(simple_select(2)).expect("select 2");
        plan.add_node(simple_select(3)).expect("select 3");
        plan.add_node(PlanNode::union(UnionPlan::new(vec![2, 3]).expect("members")))
            .expect("union");
        plan.add_node(simple_select(1).with_child(2)).expect("root");
        plan.get_node_mut(1)
            .expect("plan open")
            .expect("root")
            .add_child(3);
        plan.mark_ready();

        assert_eq!(plan.get_node_mut(1).unwrap_err().code(), "PlanSealed");
        assert_eq!(plan.get_select_mut(2).unwrap_err().code(), "PlanSealed");
        assert_eq!(plan.get_union_mut(2).unwrap_err().code(), "PlanSealed");
        assert_eq!(plan.update_delete_plan_mut().unwrap_err().code(), "PlanSealed");

        plan.union_trackers_mut(2)
            .expect("union")
            .fake_select_tracker()
            .expect("union counters")
            .on_scan_init();
        assert!(plan.trackers_mut(9).is_none());
        assert_eq!(plan.get_node(1).map(PlanNode::children), Some(&[2, 3][..]));
        assert_eq!(plan.get_node(2).map(PlanNode::select_id), Some(2));
        let rows = plan.explain_rows().expect("render");
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn has_plan_requires_root() {
        let mut plan = QueryPlan::new();
        assert!(!plan.has_plan());
        plan.add_node(simple_select(2)).expect("select");
        assert!(!plan.has_plan());
        assert_eq!(plan.explain_rows().unwrap_err().code(), "NoQueryPlan");
        plan.add_node(simple_select(1)).expect("select");
        assert!(plan.has_plan());
    }

    #[test]
    fn missing_child_fails_whole_render() {
        let mut plan = QueryPlan::new();
        plan.add_node(simple_select(1).with_child(5)).expect("select");
        let mut sink = ResultSet::new();
        let err = plan
            .render_tabular(&mut sink, ExplainFlags::NONE, false)
            .unwrap_err();
        assert_eq!(err.code(), "MissingNode");
        assert!(sink.rows.is_empty());
        assert!(sink.columns.is_empty());
    }

    #[test]
    fn json_goes_to_client_as_one_cell() {
        let mut plan = QueryPlan::new();
        plan.add_node(simple_select(1)).expect("select");
        let mut sink = ResultSet::new();
        plan.send_to_client(&mut sink, ExplainFormat::Json, ExplainFlags::NONE, false)
            .expect("render");
        assert_eq!(sink.columns, vec!["EXPLAIN"]);
        let doc: Value = serde_json::from_str(sink.cell(0, "EXPLAIN").expect("cell"))
            .expect("valid json");
        assert_eq!(doc["query_block"]["select_id"], 1);
    }

    #[test]
    fn digest_ignores_runtime_counters() {
        let mut plan = QueryPlan::new();
        plan.add_node(simple_select(1)).expect("select");
        let before = plan.plan_digest().expect("digest");
        let mut block = plan.trackers_mut(1).expect("select");
        let mut tab = block.table(0).expect("table");
        tab.tracker().on_scan_init();
        tab.tracker().on_record_read();
        assert_eq!(plan.plan_digest().expect("digest"), before);
    }
}
