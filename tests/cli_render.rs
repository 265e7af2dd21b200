#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use qplan::explain::{
    AccessType, ExtraTag, IndexUseDescriptor, PlanNode, QueryPlan, SelectPlan, TableAccessNode,
    UnionPlan,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn sample_plan() -> QueryPlan {
    let mut scan = TableAccessNode::new("t1", AccessType::All).with_extra(ExtraTag::UsingWhere);
    scan.rows = Some(100);
    scan.tracker.on_scan_init();
    for _ in 0..4 {
        scan.tracker.on_record_read();
    }
    let mut lookup = TableAccessNode::new("t2", AccessType::EqRef);
    lookup.rows = Some(1);
    lookup.key = IndexUseDescriptor::pseudo_key("PRIMARY").with_key_len(4);
    lookup.ref_list = vec!["test.t1.a".into()];

    let mut plan = QueryPlan::new();
    plan.add_node(PlanNode::select(SelectPlan::new(
        1,
        "SIMPLE",
        vec![scan, lookup],
    )))
    .expect("add select");
    plan.mark_ready();
    plan
}

fn setup_snapshot(name: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let snapshot = dir.path().join(format!("{name}.json"));
    let text = serde_json::to_string(&sample_plan()).expect("serialize plan");
    fs::write(&snapshot, text).expect("write snapshot");
    // Keeps a user's real config out of the run.
    let config = dir.path().join("absent.toml");
    (dir, snapshot, config)
}

#[test]
fn render_prints_tabular_rows() {
    let (_dir, snapshot, config) = setup_snapshot("tabular");
    let output = cargo_bin_cmd!("qplan")
        .env_remove("QPLAN_CONFIG")
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&snapshot)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "id\tselect_type\ttable\ttype\tpossible_keys\tkey\tkey_len\tref\trows\tExtra"
    );
    assert!(lines[1].starts_with("1\tSIMPLE\tt1\tALL\t"));
    assert!(lines[1].ends_with("\tUsing where"));
    assert!(lines[2].contains("\tPRIMARY\t4\ttest.t1.a\t1\t"));
}

#[test]
fn render_json_analyze_includes_counters() {
    let (_dir, snapshot, config) = setup_snapshot("json");
    let output = cargo_bin_cmd!("qplan")
        .env_remove("QPLAN_CONFIG")
        .arg("--config")
        .arg(&config)
        .args(["render", "--format", "json", "--analyze"])
        .arg(&snapshot)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let first = &json["query_block"]["nested_loop"][0]["table"];
    assert_eq!(first["table_name"], "t1");
    assert_eq!(first["r_loops"], 1);
    assert_eq!(first["r_rows"], 4.0);
    assert_eq!(first["attached_condition"], Value::Null);
}

#[test]
fn digest_is_stable_hex() {
    let (_dir, snapshot, config) = setup_snapshot("digest");
    let output = cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .arg("digest")
        .arg(&snapshot)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let digest = text.trim();
    assert_eq!(digest.len(), 16);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(
        digest,
        format!("{:016x}", sample_plan().plan_digest().expect("digest"))
    );
}

#[test]
fn missing_snapshot_fails() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("nope.json");
    cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("render")
        .arg(&missing)
        .assert()
        .failure();
}

#[test]
fn empty_plan_snapshot_fails() {
    let (dir, _snapshot, config) = setup_snapshot("empty");
    let empty = dir.path().join("empty-plan.json");
    fs::write(&empty, serde_json::to_string(&QueryPlan::new()).expect("serialize"))
        .expect("write");
    cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&empty)
        .assert()
        .failure();
}

#[test]
fn snapshot_with_empty_union_fails() {
    let (dir, _snapshot, config) = setup_snapshot("empty-union");
    let mut plan = QueryPlan::new();
    plan.add_node(PlanNode::union(UnionPlan::new(vec![1, 2]).expect("members")))
        .expect("add union");
    for id in [1, 2] {
        plan.add_node(PlanNode::select(SelectPlan::new(
            id,
            "UNION",
            vec![TableAccessNode::new("t1", AccessType::All)],
        )))
        .expect("add select");
    }
    let mut value = serde_json::to_value(&plan).expect("serialize");
    value["unions"]["1"]["payload"]["union"]["union_members"] = json!([]);
    let broken = dir.path().join("empty-union-plan.json");
    fs::write(&broken, value.to_string()).expect("write");
    cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&broken)
        .assert()
        .failure();
}

#[test]
fn config_file_selects_json_format() {
    let (dir, snapshot, _config) = setup_snapshot("config");
    let config = dir.path().join("qplan.toml");
    fs::write(&config, "format = \"json\"\njson_pretty = false\n").expect("write config");
    let output = cargo_bin_cmd!("qplan")
        .env("QPLAN_CONFIG", &config)
        .arg("render")
        .arg(&snapshot)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert_eq!(text.lines().count(), 1);
    let json: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(json["query_block"]["select_id"], 1);
}

#[test]
fn invalid_config_is_reported() {
    let (dir, snapshot, _config) = setup_snapshot("bad-config");
    let config = dir.path().join("bad.toml");
    fs::write(&config, "format = \"yaml\"\n").expect("write config");
    cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&snapshot)
        .assert()
        .failure();
}
