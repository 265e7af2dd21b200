//! Query-plan reporting for a relational engine.
//!
//! Builds a self-contained EXPLAIN tree that outlives the optimizer and
//! executor objects that produced it, collects ANALYZE counters while the
//! statement runs, and renders the result as tabular rows or JSON.

#![warn(missing_docs)]

/// Rendering options and their TOML configuration file.
pub mod config;

/// Error type shared by the crate.
pub mod error;

/// Plan data structures, trackers, and renderers.
pub mod explain;

pub use config::{ConfigError, ExplainConfig, ExplainFlags, ExplainFormat};
pub use error::{ExplainError, Result};
pub use explain::{
    AccessTracker, AccessType, ExplainRow, ExtraTag, PlanNode, QueryPlan, TableAccessNode,
    TimeTracker,
};
