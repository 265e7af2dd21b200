#![forbid(unsafe_code)]

//! Query-plan reporting (EXPLAIN / ANALYZE).
//!
//! The optimizer registers one node per planned block in a [`QueryPlan`];
//! the executor bumps the trackers embedded in those nodes; the statement
//! layer renders the finished plan as tabular rows or JSON.

/// Boundary to the expression layer and owned condition snapshots.
pub mod expr;

/// Index usage descriptors and the schema accessor used to build them.
pub mod index_use;

/// JSON rendering.
pub mod json;

/// Cross-thread live EXPLAIN.
///
/// Request/response rendezvous between an observer and the executing thread.
pub mod live;

/// Plan node variants.
pub mod node;

/// Per-statement plan container.
pub mod query_plan;

/// Range and index-merge descriptors.
pub mod quick_select;

/// Per-row-group access method statistics.
pub mod range_checked;

/// Per-table EXPLAIN records.
pub mod table_access;

/// Fixed-column rendering and result sinks.
pub mod tabular;

/// Hot-path counters for ANALYZE.
pub mod tracker;

pub use expr::{ConditionText, DisplayRenderer, ExprRenderer, RenderMode};
pub use index_use::{InMemoryCatalog, IndexCatalog, IndexInfo, IndexUseDescriptor, KeyPart};
pub use live::{ExplainRequest, Requester, StatementRegistry, StatementSlot};
pub use node::{
    BasicJoin, ConnectionType, DeletePlan, InsertPlan, NodeKind, NodePayload, NodeTrackers,
    PlanNode, SelectDetail, SelectPlan, UnionPlan, UpdatePlan,
};
pub use query_plan::QueryPlan;
pub use quick_select::{QuickSelectDescriptor, QuickSelectKind};
pub use range_checked::{KeyMap, RangeCheckChoice, RangeCheckedDescriptor};
pub use table_access::{AccessType, ExtraTag, JoinBufferInfo, TableAccessNode, TableTrackers};
pub use tabular::{ExplainColumns, ExplainRow, ResultSet, RowSink, TextSink};
pub use tracker::{AccessTracker, TimeTracker};
