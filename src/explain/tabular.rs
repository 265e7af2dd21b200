//! Fixed-column EXPLAIN output.
//!
//! Nodes first append typed [`ExplainRow`]s to a buffer. The buffer is only
//! handed to a [`RowSink`] once the whole tree rendered without error, so a
//! failed render never leaves partial output behind.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::config::ExplainFlags;
use crate::error::{ExplainError, Result};
use crate::explain::node::{NodePayload, PlanNode, SelectPlan, UnionPlan, UpdatePlan};
use crate::explain::query_plan::QueryPlan;
use crate::explain::table_access::{AccessType, TableAccessNode};

/// Message rows for degenerate DML plans.
pub const IMPOSSIBLE_WHERE: &str = "Impossible WHERE";
/// Partition pruning left nothing to read.
pub const NO_ROWS_AFTER_PRUNING: &str = "No matching rows after partition pruning";
/// DELETE without WHERE that truncates the table.
pub const DELETING_ALL_ROWS: &str = "Deleting all rows";

/// Which optional columns are emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExplainColumns {
    /// `partitions` column.
    pub partitions: bool,
    /// `filtered` column.
    pub filtered: bool,
    /// `r_rows` and `r_filtered` columns.
    pub analyze: bool,
}

impl ExplainColumns {
    /// Columns for the given flags and mode.
    pub fn new(flags: ExplainFlags, is_analyze: bool) -> Self {
        Self {
            partitions: flags.partitions,
            filtered: flags.extended || is_analyze,
            analyze: is_analyze,
        }
    }

    /// Column names in output order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = vec!["id", "select_type", "table"];
        if self.partitions {
            names.push("partitions");
        }
        names.extend(["type", "possible_keys", "key", "key_len", "ref", "rows"]);
        if self.analyze {
            names.push("r_rows");
        }
        if self.filtered {
            names.push("filtered");
        }
        if self.analyze {
            names.push("r_filtered");
        }
        names.push("Extra");
        names
    }
}

/// One output row with every column populated; [`ExplainColumns`] decides
/// which cells are sent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplainRow {
    /// Select id; NULL for the union result row.
    pub id: Option<u32>,
    /// Select type.
    pub select_type: String,
    /// Table name.
    pub table: Option<String>,
    /// Partitions read.
    pub partitions: Option<String>,
    /// Access type name.
    pub access_type: Option<String>,
    /// Comma-joined candidate keys.
    pub possible_keys: Option<String>,
    /// Chosen key.
    pub key: Option<String>,
    /// Used key length.
    pub key_len: Option<String>,
    /// Comma-joined ref list.
    pub ref_list: Option<String>,
    /// Estimated rows.
    pub rows: Option<u64>,
    /// Observed rows per scan.
    pub r_rows: Option<f64>,
    /// Estimated percentage kept by the condition.
    pub filtered: Option<f64>,
    /// Observed percentage kept by the condition.
    pub r_filtered: Option<f64>,
    /// Extra annotations.
    pub extra: Option<String>,
}

impl ExplainRow {
    /// Row that reports only `message`.
    pub fn message(
        id: u32,
        select_type: impl Into<String>,
        rows: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id),
            select_type: select_type.into(),
            rows,
            extra: Some(message.into()),
            ..Self::default()
        }
    }

    /// Cells in column order; `None` is NULL.
    pub fn cells(&self, columns: ExplainColumns) -> Vec<Option<String>> {
        let mut cells = Vec::with_capacity(14);
        cells.push(self.id.map(|id| id.to_string()));
        cells.push(Some(self.select_type.clone()));
        cells.push(self.table.clone());
        if columns.partitions {
            cells.push(self.partitions.clone());
        }
        cells.push(self.access_type.clone());
        cells.push(self.possible_keys.clone());
        cells.push(self.key.clone());
        cells.push(self.key_len.clone());
        cells.push(self.ref_list.clone());
        cells.push(self.rows.map(|rows| rows.to_string()));
        if columns.analyze {
            cells.push(self.r_rows.map(fmt_float));
        }
        if columns.filtered {
            cells.push(self.filtered.map(fmt_float));
        }
        if columns.analyze {
            cells.push(self.r_filtered.map(fmt_float));
        }
        cells.push(self.extra.clone());
        cells
    }
}

fn fmt_float(value: f64) -> String {
    format!("{value:.2}")
}

fn join_or_null(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(","))
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Destination for rendered rows.
pub trait RowSink {
    /// Receives the column names before any row.
    fn send_header(&mut self, columns: &[&'static str]) -> Result<()>;
    /// Receives one row; `None` cells are NULL.
    fn send_row(&mut self, cells: Vec<Option<String>>) -> Result<()>;
}

/// Sink that keeps everything in memory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    /// Column names.
    pub columns: Vec<&'static str>,
    /// Rows in arrival order.
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    /// Empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell `column` of row `row`, if present and not NULL.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|name| *name == column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }
}

impl RowSink for ResultSet {
    fn send_header(&mut self, columns: &[&'static str]) -> Result<()> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn send_row(&mut self, cells: Vec<Option<String>>) -> Result<()> {
        self.rows.push(cells);
        Ok(())
    }
}

/// Writes tab-separated lines, `NULL` for absent cells.
pub struct TextSink<W: Write> {
    out: W,
}

impl<W: Write> TextSink<W> {
    /// Wraps `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RowSink for TextSink<W> {
    fn send_header(&mut self, columns: &[&'static str]) -> Result<()> {
        writeln!(self.out, "{}", columns.join("\t"))?;
        Ok(())
    }

    fn send_row(&mut self, cells: Vec<Option<String>>) -> Result<()> {
        let line: Vec<&str> = cells
            .iter()
            .map(|cell| cell.as_deref().unwrap_or("NULL"))
            .collect();
        writeln!(self.out, "{}", line.join("\t"))?;
        Ok(())
    }
}

/// Sends `rows` with a header to `sink`.
pub fn flush_rows(
    sink: &mut dyn RowSink,
    columns: ExplainColumns,
    rows: &[ExplainRow],
) -> Result<()> {
    sink.send_header(&columns.names())?;
    for row in rows {
        sink.send_row(row.cells(columns))?;
    }
    Ok(())
}

/// Renders `rows` as tab-separated text.
pub fn rows_to_string(columns: ExplainColumns, rows: &[ExplainRow]) -> Result<String> {
    let mut sink = TextSink::new(Vec::new());
    flush_rows(&mut sink, columns, rows)?;
    String::from_utf8(sink.into_inner())
        .map_err(|err| ExplainError::Io(io::Error::new(io::ErrorKind::InvalidData, err)))
}

impl TableAccessNode {
    /// Tabular row for this table inside block `select_id`.
    pub fn explain_row(
        &self,
        select_id: u32,
        select_type: &str,
        using_temporary: bool,
        using_filesort: bool,
    ) -> ExplainRow {
        let has_scans = self.tracker.has_scans();
        ExplainRow {
            id: Some(select_id),
            select_type: select_type.to_string(),
            table: Some(self.table_name.clone()),
            partitions: self.used_partitions.clone(),
            access_type: Some(self.access_type.name().to_string()),
            possible_keys: join_or_null(&self.possible_keys),
            key: non_empty(self.key_text(false)),
            key_len: non_empty(self.key_len_text()),
            ref_list: join_or_null(&self.ref_list),
            rows: self.rows,
            r_rows: has_scans.then(|| self.tracker.avg_rows()),
            filtered: self.filtered,
            r_filtered: has_scans.then(|| self.r_filtered() * 100.0),
            extra: Some(self.extra_text(using_temporary, using_filesort)),
        }
    }
}

impl PlanNode {
    /// Appends this node's rows, then its children's, to `out`.
    pub fn render_tabular(&self, plan: &QueryPlan, out: &mut Vec<ExplainRow>) -> Result<()> {
        match self.payload() {
            NodePayload::Select(select) => render_select(select, out),
            NodePayload::Union(union) => render_union(plan, union, out)?,
            NodePayload::BasicJoin(join) => {
                for tab in join.tables.iter() {
                    out.push(tab.explain_row(join.select_id, "MATERIALIZED", false, false));
                }
            }
            NodePayload::Update(update) => render_update(update, out),
            NodePayload::Delete(delete) => {
                if delete.deleting_all_rows {
                    let update = &delete.update;
                    out.push(ExplainRow::message(
                        1,
                        update.select_type.as_str(),
                        update.rows,
                        DELETING_ALL_ROWS,
                    ));
                } else {
                    render_update(&delete.update, out);
                }
            }
            NodePayload::Insert(insert) => out.push(ExplainRow {
                id: Some(1),
                select_type: "INSERT".to_string(),
                table: Some(insert.table_name.clone()),
                access_type: Some(AccessType::All.name().to_string()),
                filtered: Some(100.0),
                ..ExplainRow::default()
            }),
        }
        self.render_children_tabular(plan, out)
    }

    fn render_children_tabular(&self, plan: &QueryPlan, out: &mut Vec<ExplainRow>) -> Result<()> {
        for &child in self.children() {
            plan.resolve_child(child, self.select_id())?
                .render_tabular(plan, out)?;
        }
        Ok(())
    }
}

fn render_select(select: &SelectPlan, out: &mut Vec<ExplainRow>) {
    if let Some(message) = select.message() {
        out.push(ExplainRow::message(
            select.select_id,
            select.select_type.as_str(),
            None,
            message,
        ));
        return;
    }
    let tables = select.tables();
    for (idx, tab) in tables.iter().enumerate() {
        let first = idx == 0;
        out.push(tab.explain_row(
            select.select_id,
            &select.select_type,
            first && select.using_temporary,
            first && select.using_filesort,
        ));
    }
    for nest in tables.iter().filter_map(|tab| tab.sjm_nest.as_deref()) {
        for tab in nest.tables.iter() {
            out.push(tab.explain_row(nest.select_id, "MATERIALIZED", false, false));
        }
    }
}

fn render_union(plan: &QueryPlan, union: &UnionPlan, out: &mut Vec<ExplainRow>) -> Result<()> {
    for &member in union.members() {
        let node = plan
            .get_select_node(member)
            .ok_or(ExplainError::MissingNode {
                select_id: member,
                parent: union.select_id(),
            })?;
        node.render_tabular(plan, out)?;
    }
    if union.using_tmp {
        let tracker = union.fake_select_tracker();
        out.push(ExplainRow {
            id: None,
            select_type: union.fake_select_type.clone(),
            table: Some(union.table_name()),
            access_type: Some(AccessType::All.name().to_string()),
            r_rows: tracker.has_scans().then(|| tracker.avg_rows()),
            extra: Some(if union.using_filesort {
                "Using filesort".to_string()
            } else {
                String::new()
            }),
            ..ExplainRow::default()
        });
    }
    Ok(())
}

fn render_update(update: &UpdatePlan, out: &mut Vec<ExplainRow>) {
    if update.impossible_where || update.no_partitions {
        let message = if update.impossible_where {
            IMPOSSIBLE_WHERE
        } else {
            NO_ROWS_AFTER_PRUNING
        };
        out.push(ExplainRow::message(
            1,
            update.select_type.as_str(),
            update.rows,
            message,
        ));
        return;
    }

    let mut extra: Vec<String> = Vec::new();
    let (key, key_len) = match &update.quick_info {
        Some(quick) => {
            let quick_extra = quick.extra_text();
            if !quick_extra.is_empty() {
                extra.push(format!("Using {quick_extra}"));
            }
            (quick.key_text(), quick.key_len_text())
        }
        None => (
            update.key.key_name().unwrap_or_default().to_string(),
            update
                .key
                .key_len()
                .map(|len| len.to_string())
                .unwrap_or_default(),
        ),
    };
    if update.using_where {
        extra.push("Using where".to_string());
    }
    if !update.mrr_type.is_empty() {
        extra.push(update.mrr_type.clone());
    }
    if update.using_filesort {
        extra.push("Using filesort".to_string());
    }
    if update.using_io_buffer {
        extra.push("Using buffer".to_string());
    }

    let has_scans = update.tracker.has_scans();
    out.push(ExplainRow {
        id: Some(1),
        select_type: update.select_type.clone(),
        table: Some(update.table_name.clone()),
        partitions: update.used_partitions.clone(),
        access_type: Some(update.access_type.name().to_string()),
        possible_keys: join_or_null(&update.possible_keys),
        key: non_empty(key),
        key_len: non_empty(key_len),
        ref_list: None,
        rows: update.rows,
        r_rows: has_scans.then(|| update.tracker.avg_rows()),
        filtered: Some(100.0),
        r_filtered: Some(update.tracker.filtered_fraction() * 100.0),
        extra: Some(extra.join("; ")),
    });
}
