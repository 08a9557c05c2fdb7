//! The per-board operation log: an in-memory Merkle DAG.
//!
//! [`OperationLog`] indexes operations by id and tracks the current leaf set
//! (operations nothing else cites as a parent yet). It only ever grows:
//! operations are never rewritten or removed.
//!
//! # Invariants
//!
//! - every parent of every operation is present (no dangling references);
//! - there is at most one parentless operation, the root;
//! - `leaves` is exactly the set of operations without children.
//!
//! Operations enter the log either through [`OperationLog::append`] (local
//! edits) or [`OperationLog::insert`] (loading and merging), and both check
//! the invariants before touching the log.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::ErrorCode;
use crate::id::Id;
use crate::operation::{Operation, OperationError, Payload};
use crate::order::{OrderError, causal_order};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from growing an operation log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// A cited parent is not in the log.
    #[error("operation {op} references missing parent {parent}")]
    DanglingParent {
        /// The operation being added.
        op: Id,
        /// The parent that is not present.
        parent: Id,
    },

    /// A second parentless operation was offered.
    #[error("log already has root {existing}; refusing second root {rejected}")]
    MultipleRoots {
        /// The log's root.
        existing: Id,
        /// The parentless operation that was refused.
        rejected: Id,
    },

    /// A `create` payload on an operation that has parents.
    #[error("operation {op} creates a board but is not a root")]
    MisplacedCreate {
        /// The offending operation.
        op: Id,
    },

    /// The operation could not be built.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// The operations could not be ordered.
    #[error(transparent)]
    Order(#[from] OrderError),
}

impl LogError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DanglingParent { .. } => ErrorCode::DanglingParent,
            Self::MultipleRoots { .. } | Self::MisplacedCreate { .. } => ErrorCode::MultipleRoots,
            Self::Operation(e) => e.code(),
            Self::Order(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// OperationLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LogNode {
    op: Operation,
    children: Vec<Id>,
}

/// Identifies a log state for snapshot caching: a cached snapshot stays
/// valid exactly as long as the fingerprint is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogFingerprint {
    leaves: Vec<Id>,
    len: usize,
}

/// The append-only operation DAG of one board.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    nodes: HashMap<Id, LogNode>,
    leaves: BTreeSet<Id>,
    root: Option<Id>,
}

impl OperationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from operations in any order.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Order`] if an operation's parent is missing from
    /// `ops`, or [`LogError::MultipleRoots`] if more than one operation has
    /// no parent.
    pub fn from_operations<I>(ops: I) -> Result<Self, LogError>
    where
        I: IntoIterator<Item = Operation>,
    {
        let ops: Vec<Operation> = ops.into_iter().collect();
        let ordered: Vec<Operation> = causal_order(&ops)?.into_iter().cloned().collect();
        let mut log = Self::new();
        for op in ordered {
            log.insert(op)?;
        }
        Ok(log)
    }

    /// Create a new operation on top of `parents` and add it as a leaf.
    ///
    /// Afterwards the leaf set is `leaves - parents + {new}`; when `parents`
    /// is the full prior leaf set the new operation is the only leaf.
    ///
    /// # Errors
    ///
    /// - [`LogError::DanglingParent`] if a parent is not in the log.
    /// - [`LogError::MultipleRoots`] if `parents` is empty on a non-empty log.
    /// - [`LogError::MisplacedCreate`] if `payload` is a `create` and
    ///   `parents` is not empty.
    /// - [`LogError::Operation`] if the payload cannot be encoded.
    pub fn append(
        &mut self,
        parents: impl IntoIterator<Item = Id>,
        author: Id,
        clock: u64,
        time: DateTime<Utc>,
        payload: Payload,
    ) -> Result<Operation, LogError> {
        let op = Operation::new(author, clock, time, parents, payload)?;
        self.insert(op.clone())?;
        tracing::debug!(
            op = %op.id().human(),
            kind = op.payload().kind(),
            clock,
            leaves = self.leaves.len(),
            "appended operation"
        );
        Ok(op)
    }

    /// Add an existing operation whose parents are already in the log.
    ///
    /// Returns `false` if the operation was already present (same id).
    ///
    /// # Errors
    ///
    /// Same structural errors as [`OperationLog::append`].
    pub fn insert(&mut self, op: Operation) -> Result<bool, LogError> {
        let id = op.id();
        if self.nodes.contains_key(&id) {
            return Ok(false);
        }

        if op.is_root() {
            if let Some(existing) = self.root {
                return Err(LogError::MultipleRoots {
                    existing,
                    rejected: id,
                });
            }
        } else if op.payload().is_create() {
            return Err(LogError::MisplacedCreate { op: id });
        }
        if let Some(parent) = op.parents().iter().find(|p| !self.nodes.contains_key(*p)) {
            return Err(LogError::DanglingParent {
                op: id,
                parent: *parent,
            });
        }

        for parent in op.parents() {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.children.push(id);
            }
            self.leaves.remove(parent);
        }
        if op.is_root() {
            self.root = Some(id);
        }
        self.leaves.insert(id);
        self.nodes.insert(
            id,
            LogNode {
                op,
                children: Vec::new(),
            },
        );
        Ok(true)
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The parentless first operation, once the log has one.
    #[must_use]
    pub const fn root(&self) -> Option<Id> {
        self.root
    }

    /// Operations with no children, sorted by id.
    #[must_use]
    pub const fn leaves(&self) -> &BTreeSet<Id> {
        &self.leaves
    }

    /// Whether concurrent edits left more than one leaf.
    #[must_use]
    pub fn is_multi_head(&self) -> bool {
        self.leaves.len() > 1
    }

    #[must_use]
    pub fn contains(&self, id: &Id) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &Id) -> Option<&Operation> {
        self.nodes.get(id).map(|n| &n.op)
    }

    /// Ids of the operations that cite `id` as a parent.
    #[must_use]
    pub fn children(&self, id: &Id) -> &[Id] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    /// Every operation, in no particular order.
    pub fn all_operations(&self) -> impl Iterator<Item = &Operation> {
        self.nodes.values().map(|n| &n.op)
    }

    /// Highest clock in the log (0 when empty).
    #[must_use]
    pub fn max_clock(&self) -> u64 {
        self.all_operations().map(Operation::clock).max().unwrap_or(0)
    }

    /// Operations in deterministic causal order.
    ///
    /// # Errors
    ///
    /// Only fails if the log invariants were broken, which the insertion
    /// paths prevent.
    pub fn ordered(&self) -> Result<Vec<&Operation>, OrderError> {
        causal_order(self.all_operations())
    }

    /// Cache key for snapshots built from this log.
    #[must_use]
    pub fn fingerprint(&self) -> LogFingerprint {
        LogFingerprint {
            leaves: self.leaves.iter().copied().collect(),
            len: self.nodes.len(),
        }
    }

    /// All transitive parents of `id`, excluding `id` itself.
    #[must_use]
    pub fn ancestors(&self, id: &Id) -> HashSet<Id> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Id> = self
            .get(id)
            .map(|op| op.parents().to_vec())
            .unwrap_or_default()
            .into();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(op) = self.get(&current) {
                queue.extend(op.parents().iter().copied());
            }
        }
        visited
    }

    /// Whether `a` happened before `b`.
    #[must_use]
    pub fn is_ancestor(&self, a: &Id, b: &Id) -> bool {
        a != b && self.ancestors(b).contains(a)
    }

    /// Whether neither operation happened before the other.
    #[must_use]
    pub fn are_concurrent(&self, a: &Id, b: &Id) -> bool {
        a != b && !self.is_ancestor(a, b) && !self.is_ancestor(b, a)
    }
}
