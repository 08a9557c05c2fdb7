//! Union-merge of fetched operations into a local operation log.
//!
//! A board's history is an append-only set of content-addressed operations,
//! so merging is always a set union: take every incoming operation whose id
//! is not already present, insert it, and let the log recompute its leaves.
//! No operation is ever lost and none appears twice.
//!
//! # Validation
//!
//! The incoming batch is checked as a whole before the log is touched:
//!
//! - every parent must be in the local log or in the batch;
//! - a parentless operation must be the local root. A different root is
//!   history of another board and is refused;
//! - only the root may carry a `create` payload.
//!
//! A failed merge therefore leaves the local log exactly as it was.
//!
//! Because the result only depends on the union of operation sets, merge is
//! commutative, associative and idempotent.

use std::collections::HashMap;

use crate::error::ErrorCode;
use crate::id::Id;
use crate::log::{LogError, OperationLog};
use crate::operation::Operation;
use crate::order::causal_order_onto;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors from merging fetched history.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// An incoming operation cites a parent that neither side has.
    #[error("operation {op} references {parent}, which is neither local nor fetched")]
    UnresolvableHistory {
        /// The operation with the unresolved reference.
        op: Id,
        /// The missing parent.
        parent: Id,
    },

    /// An incoming parentless operation is not this board's root.
    #[error("operation {op} is the root of a different board")]
    ForeignRoot {
        /// The foreign root.
        op: Id,
    },

    /// Inserting into the log failed.
    #[error(transparent)]
    Log(#[from] LogError),
}

impl MergeError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnresolvableHistory { .. } => ErrorCode::UnresolvableHistory,
            Self::ForeignRoot { .. } => ErrorCode::MultipleRoots,
            Self::Log(e) => e.code(),
        }
    }
}

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Operations that were not in the local log before.
    pub new_operations: usize,
    /// Incoming operations skipped because the log already had them.
    pub duplicates_skipped: usize,
    /// Leaf count after the merge.
    pub leaves: usize,
}

impl MergeResult {
    /// Whether the merge added anything.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.new_operations > 0
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Merge `incoming` into `log` using set-union semantics.
///
/// # Errors
///
/// - [`MergeError::UnresolvableHistory`] if an incoming parent is missing
///   from both sides.
/// - [`MergeError::ForeignRoot`] if an incoming root is not the local root.
///
/// On error `log` is unchanged.
pub fn merge(log: &mut OperationLog, incoming: &[Operation]) -> Result<MergeResult, MergeError> {
    let mut fresh: HashMap<Id, &Operation> = HashMap::with_capacity(incoming.len());
    for op in incoming {
        if !log.contains(&op.id()) {
            fresh.entry(op.id()).or_insert(op);
        }
    }
    let duplicates_skipped = incoming.len() - fresh.len();

    validate(log, &fresh)?;

    let ordered =
        causal_order_onto(fresh.values().copied(), |id| log.contains(id)).map_err(LogError::from)?;
    let mut new_operations = 0;
    for op in ordered {
        if log.insert(op.clone())? {
            new_operations += 1;
        }
    }

    let result = MergeResult {
        new_operations,
        duplicates_skipped,
        leaves: log.leaves().len(),
    };
    tracing::debug!(
        new = result.new_operations,
        duplicates = result.duplicates_skipped,
        leaves = result.leaves,
        "merged operations"
    );
    Ok(result)
}

/// Merge two operation sets without a log, returning their union.
///
/// Used to check the algebraic properties of merge and by sync paths that
/// only shuffle operations between stores.
///
/// # Errors
///
/// Same as [`merge`], plus [`LogError`] if `local` is not a valid log.
pub fn merge_operation_sets(
    local: &[Operation],
    remote: &[Operation],
) -> Result<OperationLog, MergeError> {
    let mut log = OperationLog::from_operations(local.iter().cloned())?;
    merge(&mut log, remote)?;
    Ok(log)
}

fn validate(log: &OperationLog, fresh: &HashMap<Id, &Operation>) -> Result<(), MergeError> {
    let mut batch_root: Option<Id> = None;
    // Iterate in id order so the reported offender is stable.
    let mut batch: Vec<&Operation> = fresh.values().copied().collect();
    batch.sort_unstable_by_key(|op| op.id());

    for op in batch {
        let id = &op.id();
        if op.is_root() {
            match (log.root(), batch_root) {
                (None, None) => batch_root = Some(*id),
                _ => return Err(MergeError::ForeignRoot { op: *id }),
            }
        } else if op.payload().is_create() {
            return Err(LogError::MisplacedCreate { op: *id }.into());
        }
        if let Some(parent) = op
            .parents()
            .iter()
            .find(|p| !log.contains(p) && !fresh.contains_key(*p))
        {
            return Err(MergeError::UnresolvableHistory {
                op: *id,
                parent: *parent,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
