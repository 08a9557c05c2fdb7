#![allow(dead_code)]

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use trellis_core::board::{Board, EditContext};
use trellis_core::id::Id;
use trellis_core::identity::{Identity, IdentityCache};
use trellis_core::log::OperationLog;
use trellis_core::operation::{ItemStatus, Operation, Payload};

pub const REPLICAS: usize = 3;

/// One step a replica can take.
#[derive(Debug, Clone)]
pub enum Action {
    SetTitle(String),
    SetDescription(String),
    AddColumn(String),
    RenameColumn { column: usize, name: String },
    RemoveColumn(usize),
    AddDraft { column: usize, title: String },
    AddLinked { column: usize, entity: u8 },
    MoveItem { item: usize, column: usize, position: Option<usize> },
    CloseItem(usize),
    RemoveItem(usize),
    Sync { from: usize },
}

fn arb_name() -> impl Strategy<Value = String> + Clone {
    "[A-Za-z][a-z ]{0,11}"
}

pub fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        1 => arb_name().prop_map(Action::SetTitle),
        1 => arb_name().prop_map(Action::SetDescription),
        1 => arb_name().prop_map(Action::AddColumn),
        1 => (0..8usize, arb_name()).prop_map(|(column, name)| Action::RenameColumn { column, name }),
        1 => (0..8usize).prop_map(Action::RemoveColumn),
        3 => (0..8usize, arb_name()).prop_map(|(column, title)| Action::AddDraft { column, title }),
        1 => (0..8usize, any::<u8>()).prop_map(|(column, entity)| Action::AddLinked { column, entity }),
        2 => (0..16usize, 0..8usize, proptest::option::of(0..6usize)).prop_map(
            |(item, column, position)| Action::MoveItem { item, column, position }
        ),
        1 => (0..16usize).prop_map(Action::CloseItem),
        1 => (0..16usize).prop_map(Action::RemoveItem),
        2 => (0..REPLICAS).prop_map(|from| Action::Sync { from }),
    ]
}

/// A sequence of `(replica, action)` steps.
pub fn arb_script() -> impl Strategy<Value = Vec<(usize, Action)>> {
    prop::collection::vec((0..REPLICAS, arb_action()), 0..24)
}

pub fn author(replica: usize) -> Identity {
    Identity::new(format!("replica-{replica}"), format!("r{replica}@example.com"), None)
        .unwrap()
}

pub fn identities() -> IdentityCache {
    (0..REPLICAS).map(author).collect()
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

pub fn seed_board() -> Board {
    let ctx = EditContext::new(author(0).id(), ts(0));
    Board::create(&ctx, "Board", "", &["Todo", "Doing", "Done"]).unwrap()
}

fn pick<T: Copy>(items: &[T], index: usize) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[index % items.len()])
    }
}

/// Run `script` against `REPLICAS` copies of one seed board. Steps whose
/// target does not exist on that replica are skipped.
pub fn run_script(script: &[(usize, Action)]) -> Vec<Board> {
    let identities = identities();
    let mut boards: Vec<Board> = (0..REPLICAS).map(|_| seed_board()).collect();

    for (step, (replica, action)) in script.iter().enumerate() {
        let ctx = EditContext::new(author(*replica).id(), ts(i64::try_from(step).unwrap() + 1));
        if let Action::Sync { from } = action {
            let ops: Vec<Operation> = boards[*from].log().all_operations().cloned().collect();
            boards[*replica].merge(&ops).unwrap();
            continue;
        }

        let board = &mut boards[*replica];
        let snapshot = board.snapshot(&identities).unwrap();
        let columns: Vec<_> = snapshot.columns.iter().map(|c| c.combined_id).collect();
        let items: Vec<_> = snapshot
            .columns
            .iter()
            .flat_map(|c| c.items.iter().map(trellis_core::Item::combined_id))
            .collect();

        // Rejections (missing targets, drafts without status) are fine here.
        let _ = match action {
            Action::SetTitle(title) => board.set_title(&ctx, title).map(drop),
            Action::SetDescription(d) => board.set_description(&ctx, d).map(drop),
            Action::AddColumn(name) => board.add_column(&ctx, name).map(drop),
            Action::RenameColumn { column, name } => match pick(&columns, *column) {
                Some(c) => board.rename_column(&ctx, &c, name).map(drop),
                None => Ok(()),
            },
            Action::RemoveColumn(column) => match pick(&columns, *column) {
                Some(c) => board.remove_column(&ctx, &c).map(drop),
                None => Ok(()),
            },
            Action::AddDraft { column, title } => board
                .add_item_draft(&ctx, pick(&columns, *column).as_ref(), title, "", &[])
                .map(drop),
            Action::AddLinked { column, entity } => board
                .add_item_entity(
                    &ctx,
                    pick(&columns, *column).as_ref(),
                    Id::of(&[*entity]),
                    ItemStatus::Open,
                )
                .map(drop),
            Action::MoveItem {
                item,
                column,
                position,
            } => match (pick(&items, *item), pick(&columns, *column)) {
                (Some(i), Some(c)) => board.move_item(&ctx, &i, &c, *position).map(drop),
                _ => Ok(()),
            },
            Action::CloseItem(item) => match pick(&items, *item) {
                Some(i) => board.set_item_status(&ctx, &i, ItemStatus::Closed).map(drop),
                None => Ok(()),
            },
            Action::RemoveItem(item) => match pick(&items, *item) {
                Some(i) => board.remove_item(&ctx, &i).map(drop),
                None => Ok(()),
            },
            Action::Sync { .. } => Ok(()),
        };
    }
    boards
}

/// Every operation of `board`.
pub fn operations(board: &Board) -> Vec<Operation> {
    board.log().all_operations().cloned().collect()
}

/// Union of the operations of all `boards`, deduplicated by id.
pub fn union(boards: &[Board]) -> Vec<Operation> {
    let mut by_id: HashMap<Id, Operation> = HashMap::new();
    for board in boards {
        for op in board.log().all_operations() {
            by_id.entry(op.id()).or_insert_with(|| op.clone());
        }
    }
    let mut ops: Vec<Operation> = by_id.into_values().collect();
    ops.sort_by_key(Operation::id);
    ops
}

/// A script's full operation set in a random order.
pub fn arb_shuffled_history() -> impl Strategy<Value = Vec<Operation>> {
    arb_script().prop_flat_map(|script| Just(union(&run_script(&script))).prop_shuffle())
}

/// One appended operation: parent picks (indices into the operations so
/// far), author replica, clock skew and payload.
type DagStep = (Vec<usize>, usize, u64, u8, String);

fn arb_dag_step() -> impl Strategy<Value = DagStep> {
    (
        prop::collection::vec(any::<usize>(), 1..3),
        0..REPLICAS,
        0..3u64,
        0..3u8,
        arb_name(),
    )
}

/// Build a branching history with `OperationLog::append` alone: every step
/// cites one or two arbitrary earlier operations, so concurrent branches and
/// merge points both occur.
pub fn build_dag(steps: &[DagStep]) -> OperationLog {
    let mut log = OperationLog::new();
    let root = log
        .append(
            [],
            author(0).id(),
            1,
            ts(0),
            Payload::Create {
                title: "dag".into(),
                description: String::new(),
                columns: vec!["Todo".into()],
            },
        )
        .unwrap();
    let mut appended = vec![root];

    for (i, (picks, replica, skew, kind, name)) in steps.iter().enumerate() {
        let parents: BTreeSet<Id> = picks
            .iter()
            .map(|pick| appended[pick % appended.len()].id())
            .collect();
        let clock = parents
            .iter()
            .filter_map(|p| log.get(p))
            .map(Operation::clock)
            .max()
            .unwrap_or(0)
            + 1
            + skew;
        let payload = match kind {
            0 => Payload::SetTitle { title: name.clone() },
            1 => Payload::SetDescription { description: name.clone() },
            _ => Payload::AddColumn { name: name.clone() },
        };
        let secs = i64::try_from(i).unwrap() + 1;
        let op = log
            .append(parents, author(*replica).id(), clock, ts(secs), payload)
            .unwrap();
        appended.push(op);
    }
    log
}

/// A branching history's operations in two independent random orders.
pub fn arb_dag_permutations() -> impl Strategy<Value = (Vec<Operation>, Vec<Operation>)> {
    prop::collection::vec(arb_dag_step(), 0..24).prop_flat_map(|steps| {
        let ops: Vec<Operation> = build_dag(&steps).all_operations().cloned().collect();
        (Just(ops.clone()).prop_shuffle(), Just(ops).prop_shuffle())
    })
}

pub fn arb_id() -> impl Strategy<Value = Id> {
    any::<[u8; 32]>().prop_map(Id::from_bytes)
}
