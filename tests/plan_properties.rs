#![allow(missing_docs)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use qplan::explain::{
    AccessTracker, AccessType, IndexUseDescriptor, PlanNode, QueryPlan, QuickSelectDescriptor,
    QuickSelectKind, SelectPlan, TableAccessNode,
};

fn select(id: u32) -> PlanNode {
    PlanNode::select(SelectPlan::new(
        id,
        "SIMPLE",
        vec![TableAccessNode::new(format!("t{id}"), AccessType::All)],
    ))
}

fn arb_kind() -> impl Strategy<Value = QuickSelectKind> {
    prop_oneof![
        Just(QuickSelectKind::Range),
        Just(QuickSelectKind::RangeDesc),
        Just(QuickSelectKind::GroupMinMax),
        Just(QuickSelectKind::IndexMergeSortUnion),
        Just(QuickSelectKind::IndexMergeUnion),
        Just(QuickSelectKind::IndexMergeIntersection),
        Just(QuickSelectKind::IndexMergeSortIntersection),
    ]
}

proptest! {
    #[test]
    fn prop_registered_ids_round_trip(
        ids in prop::collection::btree_set(1u32..500, 1..40),
        absent_id in 1u32..1000,
    ) {
        let mut plan = QueryPlan::new();
        for &id in &ids {
            plan.add_node(select(id)).unwrap();
        }
        for &id in &ids {
            let node = plan.get_node(id).unwrap();
            prop_assert_eq!(node.select_id(), id);
            prop_assert_eq!(plan.get_select(id).map(|s| s.select_id), Some(id));
        }
        if !ids.contains(&absent_id) {
            prop_assert!(plan.get_node(absent_id).is_none());
        }
        prop_assert_eq!(plan.operations() as usize, ids.len());
    }

    #[test]
    fn prop_duplicates_always_rejected(ids in prop::collection::vec(1u32..20, 1..60)) {
        let mut plan = QueryPlan::new();
        let mut seen = BTreeSet::new();
        for id in ids {
            let result = plan.add_node(select(id));
            if seen.insert(id) {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result.unwrap_err().code(), "DuplicateSelectId");
            }
        }
        prop_assert_eq!(plan.operations() as usize, seen.len());
    }

    #[test]
    fn prop_avg_rows_matches_counts(scans in 0u64..50, reads in 0u64..500) {
        let mut tracker = AccessTracker::new();
        for _ in 0..scans {
            tracker.on_scan_init();
        }
        for _ in 0..reads {
            tracker.on_record_read();
        }
        if scans == 0 {
            prop_assert_eq!(tracker.avg_rows(), 0.0);
        } else {
            prop_assert_eq!(tracker.avg_rows(), reads as f64 / scans as f64);
        }
    }

    #[test]
    fn prop_filtered_fraction_without_reads_is_one(kept in 0u64..100) {
        let mut tracker = AccessTracker::new();
        for _ in 0..kept {
            tracker.on_record_after_filter();
        }
        prop_assert_eq!(tracker.filtered_fraction(), 1.0);
    }

    #[test]
    fn prop_composite_lists_children_in_order(
        kind in arb_kind(),
        names in prop::collection::vec("[a-z]{1,6}", 1..6),
    ) {
        let built = QuickSelectDescriptor::composite(kind);
        if kind.is_basic() {
            prop_assert!(built.is_err());
        } else {
            let mut quick = built.unwrap();
            for name in &names {
                quick
                    .push_child(QuickSelectDescriptor::range(IndexUseDescriptor::pseudo_key(name.as_str())))
                    .unwrap();
            }
            prop_assert_eq!(quick.key_text(), names.join(","));
            prop_assert_eq!(
                quick.recursive_text(),
                format!("{}({})", kind.name(), names.join(","))
            );
        }
    }

    #[test]
    fn prop_snapshot_renders_identically(ids in prop::collection::btree_set(2u32..50, 0..10)) {
        let mut root = select(1);
        for &id in &ids {
            root.add_child(id);
        }
        let mut plan = QueryPlan::new();
        plan.add_node(root).unwrap();
        for &id in &ids {
            plan.add_node(select(id)).unwrap();
        }
        let json = serde_json::to_string(&plan).unwrap();
        let restored: QueryPlan = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(restored.explain_rows().unwrap(), plan.explain_rows().unwrap());
        prop_assert_eq!(restored.plan_digest().unwrap(), plan.plan_digest().unwrap());
    }
}
