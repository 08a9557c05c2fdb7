//! Deterministic causal ordering of an operation set.
//!
//! Replay and merge both need to walk a (possibly multi-headed) DAG as a
//! single sequence. [`causal_order`] produces a topological order with a
//! fixed tie-break so that every replica holding the same operations walks
//! them in exactly the same order:
//!
//! 1. an operation always comes after all of its parents;
//! 2. among operations whose parents have all been emitted, the smallest
//!    `(clock, id)` goes first, with ids compared as unsigned bytes.
//!
//! The order depends only on the set of operations, never on the order in
//! which they were discovered or inserted.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::ErrorCode;
use crate::id::Id;
use crate::operation::Operation;

/// Errors from causal ordering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// An operation cites a parent that is not part of the set.
    #[error("operation {op} references missing parent {parent}")]
    DanglingParent {
        /// The operation with the unresolved reference.
        op: Id,
        /// The missing parent.
        parent: Id,
    },

    /// Some operations could never become ready. Content addressing makes
    /// cycles impossible for honestly hashed operations.
    #[error("{remaining} operations are part of a parent cycle")]
    Cycle {
        /// Number of operations left unordered.
        remaining: usize,
    },
}

impl OrderError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DanglingParent { .. } => ErrorCode::DanglingParent,
            Self::Cycle { .. } => ErrorCode::InternalUnexpected,
        }
    }
}

/// The tie-break key for concurrent operations.
#[must_use]
pub const fn order_key(op: &Operation) -> (u64, Id) {
    (op.clock(), op.id())
}

/// Order `ops` causally with the `(clock, id)` tie-break.
///
/// Duplicate operations (same id) are emitted once.
///
/// # Errors
///
/// Returns [`OrderError::DanglingParent`] if an operation's parent is not in
/// `ops`.
pub fn causal_order<'a, I>(ops: I) -> Result<Vec<&'a Operation>, OrderError>
where
    I: IntoIterator<Item = &'a Operation>,
{
    causal_order_onto(ops, |_| false)
}

/// Order `ops` causally on top of history that is already in place.
///
/// A parent for which `known` returns `true` counts as emitted before any of
/// `ops`, so a batch of new operations can be ordered without the history it
/// extends. The tie-break is the same as for [`causal_order`].
///
/// # Errors
///
/// Returns [`OrderError::DanglingParent`] if a parent is neither in `ops`
/// nor `known`.
pub fn causal_order_onto<'a, I, F>(ops: I, known: F) -> Result<Vec<&'a Operation>, OrderError>
where
    I: IntoIterator<Item = &'a Operation>,
    F: Fn(&Id) -> bool,
{
    let mut by_id: HashMap<Id, &'a Operation> = HashMap::new();
    for op in ops {
        by_id.entry(op.id()).or_insert(op);
    }

    let mut pending: HashMap<Id, usize> = HashMap::with_capacity(by_id.len());
    let mut children: HashMap<Id, Vec<Id>> = HashMap::with_capacity(by_id.len());
    for op in by_id.values() {
        let mut waiting = 0;
        for parent in op.parents() {
            if by_id.contains_key(parent) {
                children.entry(*parent).or_default().push(op.id());
                waiting += 1;
            } else if !known(parent) {
                return Err(OrderError::DanglingParent {
                    op: op.id(),
                    parent: *parent,
                });
            }
        }
        pending.insert(op.id(), waiting);
    }

    let mut ready: BinaryHeap<Reverse<(u64, Id)>> = by_id
        .values()
        .filter(|op| pending.get(&op.id()) == Some(&0))
        .map(|op| Reverse(order_key(op)))
        .collect();

    let mut ordered = Vec::with_capacity(by_id.len());
    while let Some(Reverse((_, id))) = ready.pop() {
        let Some(op) = by_id.get(&id) else {
            continue;
        };
        ordered.push(*op);

        for child in children.get(&id).map(Vec::as_slice).unwrap_or_default() {
            let Some(count) = pending.get_mut(child) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                if let Some(child_op) = by_id.get(child) {
                    ready.push(Reverse(order_key(child_op)));
                }
            }
        }
    }

    if ordered.len() != by_id.len() {
        return Err(OrderError::Cycle {
            remaining: by_id.len() - ordered.len(),
        });
    }

    Ok(ordered)
}
