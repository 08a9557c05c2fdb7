use proptest::prelude::*;
use std::collections::HashSet;
use trellis_core::board::EditContext;
use trellis_core::id::{CombinedId, Id};
use trellis_core::log::OperationLog;
use trellis_core::merge::{merge, merge_operation_sets};
use trellis_core::order::causal_order;
use trellis_core::operation::Operation;
use trellis_core::snapshot::{Participant, replay};

// Since generators.rs is a sibling file in tests/, we use #[path] to include it as a module.
#[path = "generators.rs"]
mod generators;
use generators::*;

fn snapshot_bytes(log: &OperationLog, board: Id) -> Vec<u8> {
    let snapshot = replay(board, log.ordered().unwrap(), &identities());
    serde_json::to_vec(&snapshot).unwrap()
}

fn ordered_ids(log: &OperationLog) -> Vec<Id> {
    log.ordered().unwrap().iter().map(|op| op.id()).collect()
}

proptest! {
    // Replaying every script is comparatively expensive; keep local runs fast.
    #![proptest_config(proptest::test_runner::Config::with_cases(128))]

    #[test]
    fn ordering_ignores_discovery_order(shuffled in arb_shuffled_history()) {
        let mut sorted = shuffled.clone();
        sorted.sort_by_key(Operation::id);

        let a = OperationLog::from_operations(shuffled).unwrap();
        let b = OperationLog::from_operations(sorted).unwrap();
        let board = a.root().unwrap();

        prop_assert_eq!(ordered_ids(&a), ordered_ids(&b));
        prop_assert_eq!(snapshot_bytes(&a, board), snapshot_bytes(&b, board));
    }

    #[test]
    fn causal_order_respects_parents(shuffled in arb_shuffled_history()) {
        let log = OperationLog::from_operations(shuffled).unwrap();
        let mut emitted = HashSet::new();
        for op in log.ordered().unwrap() {
            for parent in op.parents() {
                prop_assert!(emitted.contains(parent));
            }
            emitted.insert(op.id());
        }
        prop_assert_eq!(emitted.len(), log.len());
    }

    #[test]
    fn branching_dag_orders_the_same_in_any_permutation((first, second) in arb_dag_permutations()) {
        let ids = |ops: &[Operation]| -> Vec<Id> {
            causal_order(ops).unwrap().iter().map(|op| op.id()).collect()
        };
        let order = ids(&first);
        prop_assert_eq!(&order, &ids(&second));

        let mut emitted = HashSet::new();
        for op in causal_order(&first).unwrap() {
            for parent in op.parents() {
                prop_assert!(emitted.contains(parent));
            }
            emitted.insert(op.id());
        }
        prop_assert_eq!(emitted.len(), first.len());

        let board = order[0];
        let replayed = |ops: &[Operation]| -> Vec<u8> {
            let snapshot = replay(board, causal_order(ops).unwrap(), &identities());
            serde_json::to_vec(&snapshot).unwrap()
        };
        prop_assert_eq!(replayed(&first), replayed(&second));
    }

    #[test]
    fn merge_commutes(script in arb_script()) {
        let boards = run_script(&script);
        let (a, b) = (operations(&boards[0]), operations(&boards[1]));

        let ab = merge_operation_sets(&a, &b).unwrap();
        let ba = merge_operation_sets(&b, &a).unwrap();
        let board = boards[0].id();

        prop_assert_eq!(ab.fingerprint(), ba.fingerprint());
        prop_assert_eq!(snapshot_bytes(&ab, board), snapshot_bytes(&ba, board));
    }

    #[test]
    fn merge_associates(script in arb_script()) {
        let boards = run_script(&script);
        let (a, b, c) = (
            operations(&boards[0]),
            operations(&boards[1]),
            operations(&boards[2]),
        );

        let mut left = merge_operation_sets(&a, &b).unwrap();
        merge(&mut left, &c).unwrap();

        let bc = merge_operation_sets(&b, &c).unwrap();
        let bc_ops: Vec<Operation> = bc.all_operations().cloned().collect();
        let right = merge_operation_sets(&a, &bc_ops).unwrap();

        prop_assert_eq!(left.fingerprint(), right.fingerprint());
    }

    #[test]
    fn merge_is_idempotent(script in arb_script()) {
        let boards = run_script(&script);
        let a = operations(&boards[0]);

        let mut log = OperationLog::from_operations(a.clone()).unwrap();
        let before = log.fingerprint();
        let result = merge(&mut log, &a).unwrap();

        prop_assert_eq!(result.new_operations, 0);
        prop_assert_eq!(result.duplicates_skipped, a.len());
        prop_assert_eq!(log.fingerprint(), before);
    }

    #[test]
    fn append_cites_all_leaves(script in arb_script(), replica in 0..REPLICAS) {
        let mut boards = run_script(&script);
        let board = &mut boards[replica];
        let leaves_before = board.log().leaves().clone();
        let max_clock = board.log().max_clock();

        let ctx = EditContext::new(author(replica).id(), ts(10_000));
        let op = board.set_description(&ctx, "after").unwrap();

        let parents: std::collections::BTreeSet<Id> = op.parents().iter().copied().collect();
        prop_assert_eq!(parents, leaves_before);
        prop_assert!(op.clock() > max_clock);
        prop_assert_eq!(board.log().leaves().len(), 1);
        prop_assert!(board.log().leaves().contains(&op.id()));
    }

    #[test]
    fn participants_are_unique_in_first_seen_order(shuffled in arb_shuffled_history()) {
        let log = OperationLog::from_operations(shuffled).unwrap();
        let board = log.root().unwrap();
        let ordered = log.ordered().unwrap();

        let mut expected: Vec<Id> = Vec::new();
        for op in &ordered {
            if !expected.contains(&op.author()) {
                expected.push(op.author());
            }
        }

        let snapshot = replay(board, ordered, &identities());
        let actual: Vec<Id> = snapshot.participants.iter().map(Participant::id).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn combined_id_round_trips(entity in arb_id(), local in arb_id()) {
        let combined = CombinedId::combine(entity, local);
        let text = combined.to_string();

        prop_assert_eq!(text.len(), 128);
        prop_assert_eq!(CombinedId::resolve(&text).unwrap(), (entity, local));
        prop_assert_eq!(text.parse::<CombinedId>().unwrap(), combined);
        prop_assert_eq!(combined.entity(), entity);
        prop_assert_eq!(combined.local(), local);
    }

    #[test]
    fn replicas_converge_after_full_sync(script in arb_script()) {
        let mut boards = run_script(&script);
        let everything = union(&boards);
        for board in &mut boards {
            board.merge(&everything).unwrap();
        }

        let identities = identities();
        let first = serde_json::to_vec(boards[0].snapshot(&identities).unwrap()).unwrap();
        for board in &mut boards[1..] {
            let other = serde_json::to_vec(board.snapshot(&identities).unwrap()).unwrap();
            prop_assert_eq!(&first, &other);
        }
    }
}
