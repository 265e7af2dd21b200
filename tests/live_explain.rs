#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use qplan::explain::{
    AccessType, ExplainRequest, ExtraTag, PlanNode, QueryPlan, Requester, SelectPlan,
    StatementRegistry, TableAccessNode,
};
use qplan::{ExplainFlags, ExplainFormat};
use serde_json::Value;

fn running_plan() -> QueryPlan {
    let mut plan = QueryPlan::new();
    plan.add_node(PlanNode::select(SelectPlan::new(
        1,
        "SIMPLE",
        vec![TableAccessNode::new("orders", AccessType::All).with_extra(ExtraTag::UsingWhere)],
    )))
    .expect("add select");
    plan.mark_ready();
    plan
}

#[test]
fn observer_receives_snapshot_from_running_statement() {
    let registry = StatementRegistry::new();
    let stop = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = mpsc::channel();

    let worker = {
        let registry = registry.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut plan = running_plan();
            let slot = registry.register(42, "alice");
            ready_tx.send(()).expect("signal ready");
            while !stop.load(Ordering::Acquire) {
                if let Some(mut block) = plan.trackers_mut(1) {
                    if let Some(mut tab) = block.table(0) {
                        let tracker = tab.tracker();
                        tracker.on_scan_init();
                        tracker.on_record_read();
                        tracker.on_record_after_filter();
                    }
                }
                slot.service_requests(&plan);
                thread::sleep(Duration::from_millis(1));
            }
        })
    };
    ready_rx.recv().expect("worker registered");

    let text = registry
        .request_explain(
            42,
            &Requester::user("alice"),
            ExplainRequest {
                format: ExplainFormat::Tabular,
                flags: ExplainFlags::NONE,
                is_analyze: true,
            },
            Duration::from_secs(5),
        )
        .expect("tabular snapshot");
    let mut lines = text.lines();
    assert!(lines.next().expect("header").contains("r_rows"));
    assert!(lines.next().expect("row").contains("orders"));

    let json = registry
        .request_explain(
            42,
            &Requester::admin("root"),
            ExplainRequest {
                format: ExplainFormat::Json,
                flags: ExplainFlags::NONE,
                is_analyze: true,
            },
            Duration::from_secs(5),
        )
        .expect("json snapshot");
    let doc: Value = serde_json::from_str(&json).expect("valid json");
    let table = &doc["query_block"]["nested_loop"][0]["table"];
    assert_eq!(table["table_name"], "orders");
    assert!(table["r_loops"].as_u64().expect("loops") >= 1);

    stop.store(true, Ordering::Release);
    worker.join().expect("worker exits");
    assert!(!registry.is_running(42));
}

#[test]
fn statement_finishing_before_service_is_not_running() {
    let registry = StatementRegistry::new();
    let (ready_tx, ready_rx) = mpsc::channel();
    let (finish_tx, finish_rx) = mpsc::channel::<()>();

    let worker = {
        let registry = registry.clone();
        thread::spawn(move || {
            let slot = registry.register(7, "bob");
            ready_tx.send(()).expect("signal ready");
            // Finish without ever reaching a safe point.
            let _ = finish_rx.recv_timeout(Duration::from_millis(50));
            drop(slot);
        })
    };
    ready_rx.recv().expect("worker registered");

    let err = registry
        .request_explain(
            7,
            &Requester::user("bob"),
            ExplainRequest::default(),
            Duration::from_secs(5),
        )
        .unwrap_err();
    assert_eq!(err.code(), "NotRunning");
    drop(finish_tx);
    worker.join().expect("worker exits");
}

#[test]
fn target_keeps_running_after_denied_request() {
    let registry = StatementRegistry::new();
    let slot = registry.register(3, "carol");
    let err = registry
        .request_explain(
            3,
            &Requester::user("mallory"),
            ExplainRequest::default(),
            Duration::from_millis(10),
        )
        .unwrap_err();
    assert_eq!(err.code(), "PermissionDenied");
    assert!(registry.is_running(3));
    assert_eq!(slot.service_requests(&running_plan()), 0);
}
