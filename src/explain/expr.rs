//! Boundary to the expression layer.
//!
//! Plan nodes never hold references into expression trees. Conditions are
//! rendered to owned text when the node is built, so a finished plan stays
//! printable after the statement's expressions are freed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

/// Output flavor requested from the expression renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Text for tabular EXPLAIN.
    Explain,
    /// Text embedded in JSON output.
    Json,
}

/// Renders an expression of the host engine to display text.
pub trait ExprRenderer {
    /// Expression type understood by this renderer.
    type Expr: ?Sized;

    /// Renders `expr`; failure aborts whatever plan construction needed it.
    fn render(&self, expr: &Self::Expr, mode: RenderMode) -> Result<String>;
}

/// Owned snapshot of a rendered condition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionText(String);

impl ConditionText {
    /// Wraps already-rendered text.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Renders `expr` through `renderer` and keeps the result.
    pub fn capture<R: ExprRenderer>(renderer: &R, expr: &R::Expr) -> Result<Self> {
        renderer.render(expr, RenderMode::Json).map(Self)
    }

    /// Same as [`Self::capture`] for optional expressions.
    pub fn capture_opt<R: ExprRenderer>(
        renderer: &R,
        expr: Option<&R::Expr>,
    ) -> Result<Option<Self>> {
        expr.map(|e| Self::capture(renderer, e)).transpose()
    }

    /// Snapshot text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConditionText {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConditionText {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Renderer for engines whose expressions already implement `Display`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisplayRenderer;

impl ExprRenderer for DisplayRenderer {
    type Expr = dyn fmt::Display;

    fn render(&self, expr: &Self::Expr, _mode: RenderMode) -> Result<String> {
        let text = expr.to_string();
        if text.is_empty() {
            return Err(ExplainError::ExprRender("expression rendered empty".into()));
        }
        Ok(text)
    }
}
