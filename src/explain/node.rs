//! Plan nodes: one per planned query block or DML statement.
//!
//! A node keeps the fields every kind shares (connection type, logical
//! children) next to a kind-specific payload. Children are select ids and are
//! resolved through the owning [`QueryPlan`](crate::explain::QueryPlan) when
//! the plan is rendered.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};
use crate::explain::expr::ConditionText;
use crate::explain::index_use::IndexUseDescriptor;
use crate::explain::quick_select::QuickSelectDescriptor;
use crate::explain::table_access::{AccessType, TableAccessNode, TableTrackers};
use crate::explain::tracker::{AccessTracker, TimeTracker};

/// Discriminant of a [`PlanNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// UNION of several selects.
    Union,
    /// SELECT query block.
    Select,
    /// Join without select-level flags (semi-join materialization nest).
    BasicJoin,
    /// Single-table UPDATE.
    Update,
    /// Single-table DELETE.
    Delete,
    /// INSERT.
    Insert,
}

impl NodeKind {
    /// Upper-case name used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Union => "UNION",
            NodeKind::Select => "SELECT",
            NodeKind::BasicJoin => "BASIC JOIN",
            NodeKind::Update => "UPDATE",
            NodeKind::Delete => "DELETE",
            NodeKind::Insert => "INSERT",
        }
    }

    /// Whether the kind is a single-table DML plan.
    pub fn is_dml(self) -> bool {
        matches!(self, NodeKind::Update | NodeKind::Delete | NodeKind::Insert)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a query block is connected to the block that references it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Ordinary subquery.
    #[default]
    Other,
    /// Materialized derived table in a FROM clause.
    Derived,
    /// Non-merged semi-join materialization.
    NonMergedSemiJoin,
}

impl ConnectionType {
    /// Whether the block is reached through a table's `materialized` member
    /// instead of `subqueries` in JSON output.
    pub fn is_materialized(self) -> bool {
        !matches!(self, ConnectionType::Other)
    }
}

/// Tables of a join, in join order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BasicJoin {
    /// Select id of the block the join belongs to.
    pub select_id: u32,
    /// Table accesses; fixed once the join is built.
    pub tables: Box<[TableAccessNode]>,
}

impl BasicJoin {
    /// Freezes `tables` into a join for `select_id`.
    pub fn new(select_id: u32, tables: Vec<TableAccessNode>) -> Self {
        Self {
            select_id,
            tables: tables.into_boxed_slice(),
        }
    }
}

/// Either a degenerate message or the join that produces the rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectDetail {
    /// Degenerate plan such as `Impossible WHERE`; no table rows.
    Message(String),
    /// Regular join.
    Join(Box<[TableAccessNode]>),
}

/// A SELECT query block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectPlan {
    /// Select id assigned by the optimizer.
    pub select_id: u32,
    /// `SIMPLE`, `PRIMARY`, `SUBQUERY`, `DERIVED`, ...
    pub select_type: String,
    /// Message or join; never both.
    pub detail: SelectDetail,
    /// Constant condition folded at optimization time.
    pub exec_const_cond: Option<ConditionText>,
    /// Results go through a temporary table.
    pub using_temporary: bool,
    /// Results are sorted with filesort.
    pub using_filesort: bool,
    /// Time spent executing the block.
    pub time_tracker: TimeTracker,
    using_temporary_read_tracker: AccessTracker,
}

impl SelectPlan {
    /// Block reading `tables` in join order.
    pub fn new(select_id: u32, select_type: impl Into<String>, tables: Vec<TableAccessNode>) -> Self {
        Self::from_detail(
            select_id,
            select_type,
            SelectDetail::Join(tables.into_boxed_slice()),
        )
    }

    /// Degenerate block that only reports `message`.
    pub fn with_message(
        select_id: u32,
        select_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::from_detail(select_id, select_type, SelectDetail::Message(message.into()))
    }

    fn from_detail(select_id: u32, select_type: impl Into<String>, detail: SelectDetail) -> Self {
        Self {
            select_id,
            select_type: select_type.into(),
            detail,
            exec_const_cond: None,
            using_temporary: false,
            using_filesort: false,
            time_tracker: TimeTracker::new(),
            using_temporary_read_tracker: AccessTracker::new(),
        }
    }

    /// Degenerate message, if the block has one.
    pub fn message(&self) -> Option<&str> {
        match &self.detail {
            SelectDetail::Message(msg) => Some(msg.as_str()),
            SelectDetail::Join(_) => None,
        }
    }

    /// Table accesses in join order; empty for message blocks.
    pub fn tables(&self) -> &[TableAccessNode] {
        match &self.detail {
            SelectDetail::Message(_) => &[],
            SelectDetail::Join(tables) => &tables[..],
        }
    }

    /// Mutable access for the executor's trackers.
    pub fn tables_mut(&mut self) -> &mut [TableAccessNode] {
        match &mut self.detail {
            SelectDetail::Message(_) => &mut [],
            SelectDetail::Join(tables) => &mut tables[..],
        }
    }

    /// Reads from the block's temporary table.
    pub fn temp_table_tracker(&self) -> &AccessTracker {
        &self.using_temporary_read_tracker
    }

    /// Executor hook for [`Self::temp_table_tracker`].
    pub fn temp_table_tracker_mut(&mut self) -> &mut AccessTracker {
        &mut self.using_temporary_read_tracker
    }
}

/// A UNION of several select blocks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "UnionPlanRepr")]
pub struct UnionPlan {
    union_members: Vec<u32>,
    /// Select type of the synthetic result row.
    pub fake_select_type: String,
    /// The union result is sorted.
    pub using_filesort: bool,
    /// The union result is materialized in a temporary table.
    pub using_tmp: bool,
    fake_select_tracker: AccessTracker,
    tmptable_read_tracker: AccessTracker,
}

/// Wire form of [`UnionPlan`]; checked on the way in.
#[derive(Deserialize)]
struct UnionPlanRepr {
    union_members: Vec<u32>,
    fake_select_type: String,
    using_filesort: bool,
    using_tmp: bool,
    fake_select_tracker: AccessTracker,
    tmptable_read_tracker: AccessTracker,
}

impl TryFrom<UnionPlanRepr> for UnionPlan {
    type Error = ExplainError;

    fn try_from(repr: UnionPlanRepr) -> Result<Self> {
        let mut plan = Self::new(repr.union_members)?;
        plan.fake_select_type = repr.fake_select_type;
        plan.using_filesort = repr.using_filesort;
        plan.using_tmp = repr.using_tmp;
        plan.fake_select_tracker = repr.fake_select_tracker;
        plan.tmptable_read_tracker = repr.tmptable_read_tracker;
        Ok(plan)
    }
}

impl UnionPlan {
    /// Union over `members`, which must not be empty.
    pub fn new(members: Vec<u32>) -> Result<Self> {
        if members.is_empty() {
            return Err(ExplainError::EmptyUnion);
        }
        Ok(Self {
            union_members: members,
            fake_select_type: "UNION RESULT".to_string(),
            using_filesort: false,
            using_tmp: true,
            fake_select_tracker: AccessTracker::new(),
            tmptable_read_tracker: AccessTracker::new(),
        })
    }

    /// Appends a member select.
    pub fn add_member(&mut self, select_id: u32) {
        self.union_members.push(select_id);
    }

    /// Member select ids in union order.
    pub fn members(&self) -> &[u32] {
        &self.union_members
    }

    /// Id of the first member, which the union is registered under. Member
    /// lists are never empty, whether built or deserialized.
    pub fn select_id(&self) -> u32 {
        self.union_members.first().copied().unwrap_or_default()
    }

    /// `<unionA,B,...>`.
    pub fn table_name(&self) -> String {
        let ids: Vec<String> = self.union_members.iter().map(u32::to_string).collect();
        format!("<union{}>", ids.join(","))
    }

    /// Reads of the synthetic union-result table.
    pub fn fake_select_tracker(&self) -> &AccessTracker {
        &self.fake_select_tracker
    }

    /// Executor hook for [`Self::fake_select_tracker`].
    pub fn fake_select_tracker_mut(&mut self) -> &mut AccessTracker {
        &mut self.fake_select_tracker
    }

    /// Reads from the union's temporary table.
    pub fn tmptable_read_tracker(&self) -> &AccessTracker {
        &self.tmptable_read_tracker
    }

    /// Executor hook for [`Self::tmptable_read_tracker`].
    pub fn tmptable_read_tracker_mut(&mut self) -> &mut AccessTracker {
        &mut self.tmptable_read_tracker
    }
}

/// Single-table UPDATE plan. Also the body of [`DeletePlan`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdatePlan {
    /// Usually `SIMPLE`.
    pub select_type: String,
    /// Target table.
    pub table_name: String,
    /// Partitions touched, when partitioned.
    pub used_partitions: Option<String>,
    /// Nothing can match.
    pub impossible_where: bool,
    /// Partition pruning removed every partition.
    pub no_partitions: bool,
    /// Access method.
    pub access_type: AccessType,
    /// Candidate indexes.
    pub possible_keys: Vec<String>,
    /// Index used for a full index scan.
    pub key: IndexUseDescriptor,
    /// Range or index-merge access.
    pub quick_info: Option<QuickSelectDescriptor>,
    /// Multi-range read description.
    pub mrr_type: String,
    /// A WHERE condition is checked per row.
    pub using_where: bool,
    /// Snapshot of the WHERE condition.
    pub where_cond: Option<ConditionText>,
    /// Estimated rows.
    pub rows: Option<u64>,
    /// Rows are sorted before modification.
    pub using_filesort: bool,
    /// Row ids are buffered before modification.
    pub using_io_buffer: bool,
    /// Rows read.
    pub tracker: AccessTracker,
    /// Time spent in the statement.
    pub time_tracker: TimeTracker,
}

impl UpdatePlan {
    /// Plan that reads `table_name` with `access_type`.
    pub fn new(table_name: impl Into<String>, access_type: AccessType) -> Self {
        Self {
            select_type: "SIMPLE".to_string(),
            table_name: table_name.into(),
            used_partitions: None,
            impossible_where: false,
            no_partitions: false,
            access_type,
            possible_keys: Vec::new(),
            key: IndexUseDescriptor::none(),
            quick_info: None,
            mrr_type: String::new(),
            using_where: false,
            where_cond: None,
            rows: None,
            using_filesort: false,
            using_io_buffer: false,
            tracker: AccessTracker::new(),
            time_tracker: TimeTracker::new(),
        }
    }
}

/// Single-table DELETE plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletePlan {
    /// Shared single-table DML description.
    pub update: UpdatePlan,
    /// Table is emptied without reading rows.
    pub deleting_all_rows: bool,
}

impl DeletePlan {
    /// Plan that reads `table_name` with `access_type`.
    pub fn new(table_name: impl Into<String>, access_type: AccessType) -> Self {
        Self {
            update: UpdatePlan::new(table_name, access_type),
            deleting_all_rows: false,
        }
    }
}

/// INSERT plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InsertPlan {
    /// Target table.
    pub table_name: String,
}

impl InsertPlan {
    /// Plan inserting into `table_name`.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }
}

/// Kind-specific part of a [`PlanNode`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePayload {
    /// UNION.
    Union(UnionPlan),
    /// SELECT.
    Select(SelectPlan),
    /// Bare join.
    BasicJoin(BasicJoin),
    /// UPDATE.
    Update(UpdatePlan),
    /// DELETE.
    Delete(DeletePlan),
    /// INSERT.
    Insert(InsertPlan),
}

/// One node of the plan tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanNode {
    /// How the block hangs off its parent.
    pub connection_type: ConnectionType,
    children: Vec<u32>,
    payload: NodePayload,
}

impl PlanNode {
    /// Wraps `payload` with no children.
    pub fn new(payload: NodePayload) -> Self {
        Self {
            connection_type: ConnectionType::Other,
            children: Vec::new(),
            payload,
        }
    }

    /// SELECT node.
    pub fn select(plan: SelectPlan) -> Self {
        Self::new(NodePayload::Select(plan))
    }

    /// UNION node.
    pub fn union(plan: UnionPlan) -> Self {
        Self::new(NodePayload::Union(plan))
    }

    /// Bare join node.
    pub fn basic_join(join: BasicJoin) -> Self {
        Self::new(NodePayload::BasicJoin(join))
    }

    /// UPDATE node.
    pub fn update(plan: UpdatePlan) -> Self {
        Self::new(NodePayload::Update(plan))
    }

    /// DELETE node.
    pub fn delete(plan: DeletePlan) -> Self {
        Self::new(NodePayload::Delete(plan))
    }

    /// INSERT node.
    pub fn insert(plan: InsertPlan) -> Self {
        Self::new(NodePayload::Insert(plan))
    }

    /// Builder form for [`Self::connection_type`].
    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    /// Builder form of [`Self::add_child`].
    pub fn with_child(mut self, select_id: u32) -> Self {
        self.add_child(select_id);
        self
    }

    /// Node kind.
    pub fn kind(&self) -> NodeKind {
        match &self.payload {
            NodePayload::Union(_) => NodeKind::Union,
            NodePayload::Select(_) => NodeKind::Select,
            NodePayload::BasicJoin(_) => NodeKind::BasicJoin,
            NodePayload::Update(_) => NodeKind::Update,
            NodePayload::Delete(_) => NodeKind::Delete,
            NodePayload::Insert(_) => NodeKind::Insert,
        }
    }

    /// Select id; DML plans are always the root (1).
    pub fn select_id(&self) -> u32 {
        match &self.payload {
            NodePayload::Union(plan) => plan.select_id(),
            NodePayload::Select(plan) => plan.select_id,
            NodePayload::BasicJoin(join) => join.select_id,
            NodePayload::Update(_) | NodePayload::Delete(_) | NodePayload::Insert(_) => 1,
        }
    }

    /// Records a subquery referenced from this block outside its FROM clause.
    pub fn add_child(&mut self, select_id: u32) {
        self.children.push(select_id);
    }

    /// Child select ids in insertion order.
    pub fn children(&self) -> &[u32] {
        &self.children
    }

    /// Kind-specific data.
    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    /// Mutable kind-specific data.
    pub fn payload_mut(&mut self) -> &mut NodePayload {
        &mut self.payload
    }

    /// SELECT payload, if this is a select.
    pub fn as_select(&self) -> Option<&SelectPlan> {
        match &self.payload {
            NodePayload::Select(plan) => Some(plan),
            _ => None,
        }
    }

    /// Mutable SELECT payload.
    pub fn as_select_mut(&mut self) -> Option<&mut SelectPlan> {
        match &mut self.payload {
            NodePayload::Select(plan) => Some(plan),
            _ => None,
        }
    }

    /// UNION payload, if this is a union.
    pub fn as_union(&self) -> Option<&UnionPlan> {
        match &self.payload {
            NodePayload::Union(plan) => Some(plan),
            _ => None,
        }
    }

    /// Mutable UNION payload.
    pub fn as_union_mut(&mut self) -> Option<&mut UnionPlan> {
        match &mut self.payload {
            NodePayload::Union(plan) => Some(plan),
            _ => None,
        }
    }

    /// UPDATE body of an UPDATE or DELETE node.
    pub fn as_update(&self) -> Option<&UpdatePlan> {
        match &self.payload {
            NodePayload::Update(plan) => Some(plan),
            NodePayload::Delete(plan) => Some(&plan.update),
            _ => None,
        }
    }

    /// Mutable UPDATE body of an UPDATE or DELETE node.
    pub fn as_update_mut(&mut self) -> Option<&mut UpdatePlan> {
        match &mut self.payload {
            NodePayload::Update(plan) => Some(plan),
            NodePayload::Delete(plan) => Some(&mut plan.update),
            _ => None,
        }
    }
}

/// Runtime counters of a registered node.
///
/// This is what a sealed [`QueryPlan`](crate::explain::QueryPlan) hands to
/// the executor: counters can move, ids and children cannot.
pub struct NodeTrackers<'a> {
    node: &'a mut PlanNode,
}

impl<'a> NodeTrackers<'a> {
    pub(crate) fn new(node: &'a mut PlanNode) -> Self {
        Self { node }
    }

    /// Kind of the underlying node.
    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    /// Table `index`, in join order, of a select or bare join.
    pub fn table(&mut self, index: usize) -> Option<TableTrackers<'_>> {
        let tables = match &mut self.node.payload {
            NodePayload::Select(select) => select.tables_mut(),
            NodePayload::BasicJoin(join) => &mut join.tables[..],
            _ => return None,
        };
        tables.get_mut(index).map(TableAccessNode::trackers_mut)
    }

    /// Execution time of a select or single-table UPDATE/DELETE.
    pub fn time_tracker(&mut self) -> Option<&mut TimeTracker> {
        match &mut self.node.payload {
            NodePayload::Select(select) => Some(&mut select.time_tracker),
            NodePayload::Update(update) => Some(&mut update.time_tracker),
            NodePayload::Delete(delete) => Some(&mut delete.update.time_tracker),
            _ => None,
        }
    }

    /// Rows read by a single-table UPDATE/DELETE.
    pub fn dml_tracker(&mut self) -> Option<&mut AccessTracker> {
        self.node.as_update_mut().map(|update| &mut update.tracker)
    }

    /// Reads from a select's temporary table.
    pub fn temp_table_tracker(&mut self) -> Option<&mut AccessTracker> {
        self.node
            .as_select_mut()
            .map(SelectPlan::temp_table_tracker_mut)
    }

    /// Reads of a union's result table.
    pub fn fake_select_tracker(&mut self) -> Option<&mut AccessTracker> {
        self.node
            .as_union_mut()
            .map(UnionPlan::fake_select_tracker_mut)
    }

    /// Reads from a union's temporary table.
    pub fn tmptable_read_tracker(&mut self) -> Option<&mut AccessTracker> {
        self.node
            .as_union_mut()
            .map(UnionPlan::tmptable_read_tracker_mut)
    }
}
