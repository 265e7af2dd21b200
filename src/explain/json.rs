//! Structured (FORMAT=JSON) plan output.
//!
//! Objects are built as `serde_json::Value`s with insertion-ordered maps, so
//! member order follows the order members are added here.

use std::io::Write;

use serde_json::{json, Map, Value};

use crate::error::{ExplainError, Result};
use crate::explain::node::{NodePayload, PlanNode, SelectPlan, UnionPlan, UpdatePlan};
use crate::explain::query_plan::QueryPlan;
use crate::explain::table_access::{ExtraTag, TableAccessNode};
use crate::explain::tabular::{DELETING_ALL_ROWS, IMPOSSIBLE_WHERE, NO_ROWS_AFTER_PRUNING};
use crate::explain::tracker::AccessTracker;

fn observed_rows(tracker: &AccessTracker) -> Value {
    if tracker.has_scans() {
        json!(tracker.avg_rows())
    } else {
        Value::Null
    }
}

fn observed_filtered(tracker: &AccessTracker, fraction: f64) -> Value {
    if tracker.has_scans() {
        json!(fraction * 100.0)
    } else {
        Value::Null
    }
}

fn wrap(key: &str, value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert(key.to_string(), value);
    Value::Object(obj)
}

fn partitions_list(partitions: &str) -> Value {
    json!(partitions.split(',').map(str::trim).collect::<Vec<_>>())
}

impl TableAccessNode {
    /// Element of a `nested_loop` array for this table of block `select_id`.
    pub fn to_json(&self, plan: &QueryPlan, select_id: u32, is_analyze: bool) -> Result<Value> {
        let mut table = Map::new();
        table.insert("table_name".into(), json!(self.table_name));
        if let Some(parts) = &self.used_partitions {
            table.insert("partitions".into(), partitions_list(parts));
        }
        table.insert("access_type".into(), json!(self.access_type.name()));
        if !self.possible_keys.is_empty() {
            table.insert("possible_keys".into(), json!(self.possible_keys));
        }
        let key = self.key_text(true);
        if !key.is_empty() {
            table.insert("key".into(), json!(key));
        }
        let key_len = self.key_len_text();
        if !key_len.is_empty() {
            table.insert("key_length".into(), json!(key_len));
        }
        let used_parts = self.used_key_parts();
        if !used_parts.is_empty() {
            table.insert("used_key_parts".into(), json!(used_parts));
        }
        if let Some(quick) = self.quick_info.as_ref().filter(|q| !q.is_basic()) {
            table.insert("index_merge".into(), quick.to_json());
        }
        if !self.ref_list.is_empty() {
            table.insert("ref".into(), json!(self.ref_list));
        }
        if is_analyze {
            table.insert("r_loops".into(), json!(self.tracker.loops()));
        }
        if let Some(rows) = self.rows {
            table.insert("rows".into(), json!(rows));
        }
        if is_analyze {
            table.insert("r_rows".into(), observed_rows(&self.tracker));
            if self.op_tracker.loops() > 0 {
                table.insert("r_total_time_ms".into(), json!(self.op_tracker.time_ms()));
            }
        }
        if let Some(filtered) = self.filtered {
            table.insert("filtered".into(), json!(filtered));
        }
        if is_analyze {
            table.insert(
                "r_filtered".into(),
                observed_filtered(&self.tracker, self.r_filtered()),
            );
        }
        for tag in self.extra_tags() {
            self.tag_to_json(*tag, &mut table);
        }
        self.materialized_json(plan, select_id, is_analyze, &mut table)?;

        let mut value = wrap("table", Value::Object(table));
        if self.full_scan_on_null_key {
            value = wrap("full-scan-on-null_key", value);
        }
        if let Some(checked) = &self.range_checked {
            let mut obj = match checked.to_json(is_analyze) {
                Value::Object(obj) => obj,
                _ => Map::new(),
            };
            if let Value::Object(inner) = value {
                obj.extend(inner);
            }
            value = wrap("range-checked-for-each-record", Value::Object(obj));
        }
        if self.join_buffer.is_using_jbuf() {
            let jbuf = &self.join_buffer;
            let mut obj = match value {
                Value::Object(obj) => obj,
                _ => Map::new(),
            };
            obj.insert("buffer_type".into(), json!(jbuf.buffer_type()));
            obj.insert("join_type".into(), json!(jbuf.join_alg));
            if !jbuf.mrr_type.is_empty() {
                obj.insert("mrr_type".into(), json!(jbuf.mrr_type));
            }
            if let Some(cond) = &self.where_cond {
                obj.insert("attached_condition".into(), json!(cond.as_str()));
            }
            if is_analyze {
                obj.insert(
                    "r_filtered".into(),
                    observed_filtered(&self.jbuf_tracker, self.jbuf_tracker.filtered_fraction()),
                );
            }
            value = wrap("block-nl-join", Value::Object(obj));
        }
        Ok(value)
    }

    fn tag_to_json(&self, tag: ExtraTag, obj: &mut Map<String, Value>) {
        let (key, value) = match tag {
            ExtraTag::OpenFullTable => ("open_full_table", json!(true)),
            ExtraTag::Scanned0Databases => ("scanned_databases", json!(0)),
            ExtraTag::Scanned1Database => ("scanned_databases", json!(1)),
            ExtraTag::ScannedAllDatabases => ("scanned_databases", json!("all")),
            ExtraTag::SkipOpenTable => ("skip_open_table", json!(true)),
            ExtraTag::OpenFrmOnly => ("open_frm_only", json!(true)),
            ExtraTag::UsingIndexCondition => match &self.pushed_index_cond {
                Some(cond) => ("index_condition", json!(cond.as_str())),
                None => return,
            },
            ExtraTag::UsingIndexConditionBka => match &self.pushed_index_cond {
                Some(cond) => ("index_condition_bka", json!(cond.as_str())),
                None => return,
            },
            ExtraTag::UsingWhere => {
                let cond = if self.join_buffer.is_using_jbuf() {
                    &self.cache_cond
                } else {
                    &self.where_cond
                };
                match cond {
                    Some(cond) => ("attached_condition", json!(cond.as_str())),
                    None => return,
                }
            }
            ExtraTag::UsingIndex => ("using_index", json!(true)),
            ExtraTag::UsingMrr => ("mrr_type", json!(self.mrr_type)),
            ExtraTag::UsingWhereWithPushedCondition => ("pushed_condition", json!(true)),
            ExtraTag::NotExists => ("not_exists", json!(true)),
            ExtraTag::Distinct => ("distinct", json!(true)),
            ExtraTag::LooseScan => ("loose_scan", json!(true)),
            ExtraTag::FirstMatch => ("first_match", json!(self.firstmatch_table_name)),
            ExtraTag::UsingIndexForGroupBy => {
                let value = if self.loose_scan_is_scanning {
                    json!("scanning")
                } else {
                    json!(true)
                };
                ("using_index_for_group_by", value)
            }
            ExtraTag::ConstRowNotFound => ("const_row_not_found", json!(true)),
            ExtraTag::UniqueRowNotFound => ("unique_row_not_found", json!(true)),
            ExtraTag::ImpossibleOnCondition => ("impossible_on_condition", json!(true)),
            // Printed as wrappers, under index_merge, or as duplicates_removal.
            ExtraTag::Using
            | ExtraTag::RangeCheckedForEachRecord
            | ExtraTag::UsingJoinBuffer
            | ExtraTag::FullScanOnNullKey
            | ExtraTag::StartTemporary
            | ExtraTag::EndTemporary => return,
        };
        obj.insert(key.to_string(), value);
    }

    fn materialized_json(
        &self,
        plan: &QueryPlan,
        select_id: u32,
        is_analyze: bool,
        table: &mut Map<String, Value>,
    ) -> Result<()> {
        if let Some(id) = self.derived_select_number {
            let node = plan.resolve_child(id, select_id)?;
            table.insert("materialized".into(), node.to_json(plan, is_analyze)?);
        } else if let Some(id) = self.non_merged_sjm_number {
            let node = plan.resolve_child(id, select_id)?;
            let mut obj = Map::new();
            obj.insert("unique".into(), json!(1));
            if let Value::Object(inner) = node.to_json(plan, is_analyze)? {
                obj.extend(inner);
            }
            table.insert("materialized".into(), Value::Object(obj));
        }
        if let Some(nest) = &self.sjm_nest {
            let mut block = Map::new();
            block.insert("select_id".into(), json!(nest.select_id));
            block.insert(
                "nested_loop".into(),
                nested_loop(plan, nest.select_id, &nest.tables, is_analyze)?,
            );
            let mut obj = Map::new();
            obj.insert("unique".into(), json!(1));
            obj.insert("query_block".into(), Value::Object(block));
            table.insert("materialized".into(), Value::Object(obj));
        }
        Ok(())
    }
}

/// `nested_loop` array for `tables`, grouping duplicate-weedout ranges.
fn nested_loop(
    plan: &QueryPlan,
    select_id: u32,
    tables: &[TableAccessNode],
    is_analyze: bool,
) -> Result<Value> {
    let mut stack: Vec<Vec<Value>> = vec![Vec::new()];
    for tab in tables {
        if tab.start_dups_weedout {
            stack.push(Vec::new());
        }
        let value = tab.to_json(plan, select_id, is_analyze)?;
        if let Some(top) = stack.last_mut() {
            top.push(value);
        }
        if tab.end_dups_weedout && stack.len() > 1 {
            close_weedout(&mut stack);
        }
    }
    while stack.len() > 1 {
        close_weedout(&mut stack);
    }
    Ok(Value::Array(stack.pop().unwrap_or_default()))
}

fn close_weedout(stack: &mut Vec<Vec<Value>>) {
    if let Some(group) = stack.pop() {
        let value = wrap(
            "duplicates_removal",
            wrap("nested_loop", Value::Array(group)),
        );
        if let Some(top) = stack.last_mut() {
            top.push(value);
        }
    }
}

impl PlanNode {
    /// `{"query_block": {...}}` for this node and its subqueries.
    pub fn to_json(&self, plan: &QueryPlan, is_analyze: bool) -> Result<Value> {
        let block = match self.payload() {
            NodePayload::Select(select) => select_block(plan, self, select, is_analyze)?,
            NodePayload::Union(union) => union_block(plan, self, union, is_analyze)?,
            NodePayload::BasicJoin(join) => {
                let mut block = Map::new();
                block.insert("select_id".into(), json!(join.select_id));
                block.insert(
                    "nested_loop".into(),
                    nested_loop(plan, join.select_id, &join.tables, is_analyze)?,
                );
                self.children_json(plan, is_analyze, &mut block)?;
                block
            }
            NodePayload::Update(update) => update_block(plan, self, update, "update", is_analyze)?,
            NodePayload::Delete(delete) => {
                if delete.deleting_all_rows {
                    message_block(1, DELETING_ALL_ROWS)
                } else {
                    update_block(plan, self, &delete.update, "delete", is_analyze)?
                }
            }
            NodePayload::Insert(insert) => {
                let mut block = Map::new();
                block.insert("select_id".into(), json!(1));
                block.insert(
                    "table".into(),
                    json!({ "insert": 1, "table_name": insert.table_name }),
                );
                self.children_json(plan, is_analyze, &mut block)?;
                block
            }
        };
        Ok(wrap("query_block", Value::Object(block)))
    }

    /// Writes this node's pretty-printed document to `writer`.
    pub fn render_json(
        &self,
        plan: &QueryPlan,
        writer: &mut dyn Write,
        is_analyze: bool,
    ) -> Result<()> {
        let value = self.to_json(plan, is_analyze)?;
        serde_json::to_writer_pretty(&mut *writer, &value)?;
        writeln!(writer)?;
        Ok(())
    }

    /// Adds `subqueries` for children not reached through a table.
    fn children_json(
        &self,
        plan: &QueryPlan,
        is_analyze: bool,
        block: &mut Map<String, Value>,
    ) -> Result<()> {
        let mut subqueries = Vec::new();
        for &child in self.children() {
            let node = plan.resolve_child(child, self.select_id())?;
            if node.connection_type.is_materialized() {
                continue;
            }
            subqueries.push(node.to_json(plan, is_analyze)?);
        }
        if !subqueries.is_empty() {
            block.insert("subqueries".into(), Value::Array(subqueries));
        }
        Ok(())
    }
}

fn message_block(select_id: u32, message: &str) -> Map<String, Value> {
    let mut block = Map::new();
    block.insert("select_id".into(), json!(select_id));
    block.insert("table".into(), json!({ "message": message }));
    block
}

fn select_block(
    plan: &QueryPlan,
    node: &PlanNode,
    select: &SelectPlan,
    is_analyze: bool,
) -> Result<Map<String, Value>> {
    let mut block = Map::new();
    block.insert("select_id".into(), json!(select.select_id));
    if is_analyze && select.time_tracker.loops() > 0 {
        block.insert("r_loops".into(), json!(select.time_tracker.loops()));
        block.insert(
            "r_total_time_ms".into(),
            json!(select.time_tracker.time_ms()),
        );
    }
    if let Some(message) = select.message() {
        block.insert("table".into(), json!({ "message": message }));
    } else {
        if let Some(cond) = &select.exec_const_cond {
            block.insert("const_condition".into(), json!(cond.as_str()));
        }
        block.insert(
            "nested_loop".into(),
            nested_loop(plan, select.select_id, select.tables(), is_analyze)?,
        );
        if select.using_temporary {
            block.insert("using_temporary_table".into(), json!(true));
            let tmp = select.temp_table_tracker();
            if is_analyze && tmp.has_scans() {
                block.insert("r_temporary_table_rows".into(), json!(tmp.avg_rows()));
            }
        }
        if select.using_filesort {
            block.insert("using_filesort".into(), json!(true));
        }
    }
    node.children_json(plan, is_analyze, &mut block)?;
    Ok(block)
}

fn union_block(
    plan: &QueryPlan,
    node: &PlanNode,
    union: &UnionPlan,
    is_analyze: bool,
) -> Result<Map<String, Value>> {
    let mut specs = Vec::with_capacity(union.members().len());
    for &member in union.members() {
        let member_node = plan
            .get_select_node(member)
            .ok_or(ExplainError::MissingNode {
                select_id: member,
                parent: union.select_id(),
            })?;
        specs.push(member_node.to_json(plan, is_analyze)?);
    }

    // Without a temporary table there is no union-result object; the member
    // blocks sit directly in the query block.
    if !union.using_tmp {
        let mut block = Map::new();
        block.insert("query_specifications".into(), Value::Array(specs));
        node.children_json(plan, is_analyze, &mut block)?;
        return Ok(block);
    }

    let mut result = Map::new();
    result.insert("table_name".into(), json!(union.table_name()));
    result.insert("access_type".into(), json!("ALL"));
    if is_analyze {
        let tracker = union.fake_select_tracker();
        result.insert("r_loops".into(), json!(tracker.loops()));
        result.insert("r_rows".into(), observed_rows(tracker));
    }
    result.insert("query_specifications".into(), Value::Array(specs));
    if union.using_filesort {
        result.insert("using_filesort".into(), json!(true));
    }
    node.children_json(plan, is_analyze, &mut result)?;

    let mut block = Map::new();
    block.insert("union_result".into(), Value::Object(result));
    Ok(block)
}

fn update_block(
    plan: &QueryPlan,
    node: &PlanNode,
    update: &UpdatePlan,
    command: &str,
    is_analyze: bool,
) -> Result<Map<String, Value>> {
    if update.impossible_where || update.no_partitions {
        let message = if update.impossible_where {
            IMPOSSIBLE_WHERE
        } else {
            NO_ROWS_AFTER_PRUNING
        };
        return Ok(message_block(1, message));
    }

    let mut block = Map::new();
    block.insert("select_id".into(), json!(1));
    if is_analyze && update.time_tracker.loops() > 0 {
        block.insert(
            "r_total_time_ms".into(),
            json!(update.time_tracker.time_ms()),
        );
    }

    let mut table = Map::new();
    table.insert(command.to_string(), json!(1));
    table.insert("table_name".into(), json!(update.table_name));
    if let Some(parts) = &update.used_partitions {
        table.insert("partitions".into(), partitions_list(parts));
    }
    table.insert("access_type".into(), json!(update.access_type.name()));
    if !update.possible_keys.is_empty() {
        table.insert("possible_keys".into(), json!(update.possible_keys));
    }
    match &update.quick_info {
        Some(quick) => {
            table.insert("key".into(), json!(quick.recursive_text()));
            table.insert("key_length".into(), json!(quick.key_len_text()));
            if let Some(range) = quick.range_index() {
                if !range.key_parts().is_empty() {
                    table.insert("used_key_parts".into(), json!(range.key_parts()));
                }
            } else {
                table.insert("index_merge".into(), quick.to_json());
            }
        }
        None => {
            if let Some(name) = update.key.key_name() {
                table.insert("key".into(), json!(name));
                if let Some(len) = update.key.key_len() {
                    table.insert("key_length".into(), json!(len.to_string()));
                }
                if !update.key.key_parts().is_empty() {
                    table.insert("used_key_parts".into(), json!(update.key.key_parts()));
                }
            }
        }
    }
    if let Some(rows) = update.rows {
        table.insert("rows".into(), json!(rows));
    }
    if is_analyze {
        table.insert("r_rows".into(), observed_rows(&update.tracker));
        table.insert(
            "r_filtered".into(),
            json!(update.tracker.filtered_fraction() * 100.0),
        );
    }
    if !update.mrr_type.is_empty() {
        table.insert("mrr_type".into(), json!(update.mrr_type));
    }
    if update.using_filesort {
        table.insert("using_filesort".into(), json!(true));
    }
    if update.using_io_buffer {
        table.insert("using_io_buffer".into(), json!(true));
    }
    if update.using_where {
        if let Some(cond) = &update.where_cond {
            table.insert("attached_condition".into(), json!(cond.as_str()));
        }
    }
    block.insert("table".into(), Value::Object(table));
    node.children_json(plan, is_analyze, &mut block)?;
    Ok(block)
}
