use std::io;

use thiserror::Error;

use crate::explain::NodeKind;

/// Result alias used throughout the plan-reporting layer.
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Errors surfaced while building, rendering, or observing a query plan.
#[derive(Debug, Error)]
pub enum ExplainError {
    /// A node with the same select id was already registered.
    #[error("select #{select_id} already registered as {kind}")]
    DuplicateSelectId {
        /// Conflicting select id.
        select_id: u32,
        /// Kind of the node being added.
        kind: NodeKind,
    },
    /// A statement may carry at most one UPDATE/DELETE and one INSERT plan.
    #[error("{0} plan already set for this statement")]
    DmlPlanAlreadySet(NodeKind),
    /// Structural mutation attempted after the plan was marked ready.
    #[error("query plan is sealed; its structure can no longer change")]
    PlanSealed,
    /// Node kind cannot be registered through this entry point.
    #[error("{0} nodes cannot be added with add_node")]
    UnsupportedNode(NodeKind),
    /// A UNION needs at least one member select.
    #[error("union requires at least one member select")]
    EmptyUnion,
    /// Statement has nothing that can be explained.
    #[error("no query plan available")]
    NoQueryPlan,
    /// A node references a select id that was never registered.
    #[error("select #{select_id} referenced by select #{parent} is missing from the plan")]
    MissingNode {
        /// Id that failed to resolve.
        select_id: u32,
        /// Id of the node holding the reference.
        parent: u32,
    },
    /// Expression renderer failed while capturing a condition.
    #[error("failed to render expression: {0}")]
    ExprRender(String),
    /// Quick-select descriptor was built with an inconsistent shape.
    #[error("invalid quick select: {0}")]
    InvalidQuickSelect(&'static str),
    /// Sink or writer failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Live EXPLAIN target is not executing a statement.
    #[error("target connection {0} is not running an explainable statement")]
    NotRunning(u64),
    /// Live EXPLAIN target did not reach a safe point in time.
    #[error("timed out after {waited_ms}ms waiting for connection {connection}")]
    Timeout {
        /// Target connection id.
        connection: u64,
        /// Time spent waiting.
        waited_ms: u64,
    },
    /// Requester may not observe the target connection.
    #[error("user '{user}' may not explain connection {connection}")]
    PermissionDenied {
        /// Requesting user.
        user: String,
        /// Target connection id.
        connection: u64,
    },
}

impl ExplainError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ExplainError::DuplicateSelectId { .. } => "DuplicateSelectId",
            ExplainError::DmlPlanAlreadySet(_) => "DmlPlanAlreadySet",
            ExplainError::PlanSealed => "PlanSealed",
            ExplainError::UnsupportedNode(_) => "UnsupportedNode",
            ExplainError::EmptyUnion => "EmptyUnion",
            ExplainError::NoQueryPlan => "NoQueryPlan",
            ExplainError::MissingNode { .. } => "MissingNode",
            ExplainError::ExprRender(_) => "ExprRender",
            ExplainError::InvalidQuickSelect(_) => "InvalidQuickSelect",
            ExplainError::Io(_) => "Io",
            ExplainError::Json(_) => "Json",
            ExplainError::NotRunning(_) => "NotRunning",
            ExplainError::Timeout { .. } => "Timeout",
            ExplainError::PermissionDenied { .. } => "PermissionDenied",
        }
    }

    /// True for failures that indicate an incompletely built plan.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ExplainError::MissingNode { .. }
                | ExplainError::DuplicateSelectId { .. }
                | ExplainError::DmlPlanAlreadySet(_)
        )
    }
}
