//! The board entity: an operation log plus its persistence state.
//!
//! A [`Board`] is edited locally by appending operations, each citing every
//! current leaf as a parent, and published with [`Board::commit`]. Remote
//! history comes in through [`Board::fetch`] / [`Board::merge`].
//!
//! Every mutating call takes an explicit [`EditContext`] (author and time);
//! there is no process-wide "current user".
//!
//! # Commit protocol
//!
//! 1. write every unsaved operation object (idempotent, invisible);
//! 2. compare-and-swap the ref from the leaves this board was based on to
//!    the current leaves;
//! 3. on conflict, read the ref's new history, merge it, rebase onto the
//!    new ref value and try again, up to `max_attempts` times.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};

use crate::config::CommitConfig;
use crate::error::ErrorCode;
use crate::id::{CombinedId, Id};
use crate::identity::{Identity, IdentityError, IdentityResolver};
use crate::log::{LogError, LogFingerprint, OperationLog};
use crate::merge::{MergeError, MergeResult, merge};
use crate::operation::{ItemStatus, Operation, Payload};
use crate::order::OrderError;
use crate::snapshot::{Item, LookupError, Snapshot, replay};
use crate::store::{ObjectStore, RefUpdate, StoreError, read_history};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from editing, loading or committing a board.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// Titles must not be empty.
    #[error("title must not be empty")]
    EmptyTitle,

    /// An item was added without naming a column, and none is live.
    #[error("board {0} has no columns")]
    NoColumns(Id),

    /// Status only applies to items linked to another entity.
    #[error("item {0} is a draft and has no status")]
    DraftHasNoStatus(CombinedId),

    /// The store has no ref for this board.
    #[error("board {0} not found")]
    NotFound(Id),

    /// Every commit attempt lost the ref race.
    #[error("commit of board {board} lost the ref race {attempts} times")]
    CommitConflict {
        /// The board being committed.
        board: Id,
        /// Attempts made.
        attempts: u32,
    },

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BoardError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EmptyTitle => ErrorCode::EmptyTitle,
            Self::NoColumns(_) => ErrorCode::ColumnNotFound,
            Self::DraftHasNoStatus(_) => ErrorCode::ItemNotFound,
            Self::NotFound(_) => ErrorCode::ObjectNotFound,
            Self::CommitConflict { .. } => ErrorCode::CommitConflict,
            Self::Lookup(e) => e.code(),
            Self::Log(e) => e.code(),
            Self::Order(e) => e.code(),
            Self::Merge(e) => e.code(),
            Self::Store(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Edit context
// ---------------------------------------------------------------------------

/// Who is editing, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditContext {
    pub author: Id,
    pub time: DateTime<Utc>,
}

impl EditContext {
    #[must_use]
    pub const fn new(author: Id, time: DateTime<Utc>) -> Self {
        Self { author, time }
    }

    /// Edit as `author` at the current wall-clock time.
    #[must_use]
    pub fn now(author: &Identity) -> Self {
        Self::new(author.id(), Utc::now())
    }
}

/// What a successful commit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitOutcome {
    /// Operation objects written.
    pub written: usize,
    /// Ref updates tried; 0 if there was nothing to commit.
    pub attempts: u32,
}

/// Resolves nothing; used for structural checks that never look at
/// participants.
struct NoIdentities;

impl IdentityResolver for NoIdentities {
    fn resolve(&self, id: &Id) -> Result<Identity, IdentityError> {
        Err(IdentityError::Unknown(*id))
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// A board and its history.
#[derive(Debug, Clone)]
pub struct Board {
    id: Id,
    log: OperationLog,
    /// Operations the commit target may not have yet.
    unsaved: Vec<Operation>,
    /// Ref value the next commit expects to replace.
    base: BTreeSet<Id>,
    cache: Option<(LogFingerprint, Snapshot)>,
}

impl Board {
    /// Create a new board. Its id is the id of the creating operation.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::EmptyTitle`] for an empty title.
    pub fn create(
        ctx: &EditContext,
        title: &str,
        description: &str,
        columns: &[&str],
    ) -> Result<Self, BoardError> {
        if title.trim().is_empty() {
            return Err(BoardError::EmptyTitle);
        }
        let mut log = OperationLog::new();
        let root = log.append(
            [],
            ctx.author,
            1,
            ctx.time,
            Payload::Create {
                title: title.to_string(),
                description: description.to_string(),
                columns: columns.iter().map(|c| (*c).to_string()).collect(),
            },
        )?;
        tracing::info!(board = %root.id().human(), columns = columns.len(), "created board");
        Ok(Self {
            id: root.id(),
            log,
            unsaved: vec![root],
            base: BTreeSet::new(),
            cache: None,
        })
    }

    /// A board known only by id, with no history yet. [`Board::fetch`]
    /// fills it in; committing it publishes the fetched history.
    #[must_use]
    pub fn unloaded(id: Id) -> Self {
        Self {
            id,
            log: OperationLog::new(),
            unsaved: Vec::new(),
            base: BTreeSet::new(),
            cache: None,
        }
    }

    /// Load board `id` from the history reachable from its ref.
    ///
    /// # Errors
    ///
    /// - [`BoardError::NotFound`] if the store has no ref for `id`.
    /// - [`StoreError`] if an object is missing or corrupt.
    /// - [`MergeError::ForeignRoot`] if the history is rooted elsewhere.
    pub fn load(store: &dyn ObjectStore, id: Id) -> Result<Self, BoardError> {
        let leaves = store.read_ref(&id)?;
        if leaves.is_empty() {
            return Err(BoardError::NotFound(id));
        }
        let history = read_history(store, &leaves, |_| false)?;
        let log = OperationLog::from_operations(history)?;
        if let Some(root) = log.root().filter(|root| *root != id) {
            return Err(MergeError::ForeignRoot { op: root }.into());
        }
        tracing::debug!(
            board = %id.human(),
            operations = log.len(),
            leaves = leaves.len(),
            "loaded board"
        );
        Ok(Self {
            id,
            log,
            unsaved: Vec::new(),
            base: leaves,
            cache: None,
        })
    }

    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    #[must_use]
    pub const fn log(&self) -> &OperationLog {
        &self.log
    }

    /// Operations not yet committed.
    #[must_use]
    pub fn unsaved(&self) -> &[Operation] {
        &self.unsaved
    }

    /// Whether a commit would change anything.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.unsaved.is_empty() || self.base != *self.log.leaves()
    }

    // -- Remote history ----------------------------------------------------

    /// Pull everything reachable from `store`'s ref for this board and merge
    /// it. Fetched operations are written on the next commit, so `store` may
    /// be another repository.
    ///
    /// # Errors
    ///
    /// Fails if the history cannot be read or does not connect to this log.
    pub fn fetch(&mut self, store: &dyn ObjectStore) -> Result<MergeResult, BoardError> {
        let leaves = store.read_ref(&self.id)?;
        let ops = read_history(store, &leaves, |id| self.log.contains(id))?;
        self.absorb(&ops, true)
    }

    /// Fetch from the store this board commits to, and base the next commit
    /// on the ref value just read.
    ///
    /// # Errors
    ///
    /// Same as [`Board::fetch`].
    pub fn refresh(&mut self, store: &dyn ObjectStore) -> Result<MergeResult, BoardError> {
        let leaves = store.read_ref(&self.id)?;
        let result = self.rebase(store, leaves)?;
        Ok(result)
    }

    /// Merge operations obtained elsewhere.
    ///
    /// # Errors
    ///
    /// - [`MergeError::UnresolvableHistory`] if a parent is missing.
    /// - [`MergeError::ForeignRoot`] if an operation belongs to another board.
    ///
    /// The board is unchanged on error.
    pub fn merge(&mut self, incoming: &[Operation]) -> Result<MergeResult, BoardError> {
        self.absorb(incoming, true)
    }

    fn absorb(&mut self, incoming: &[Operation], track: bool) -> Result<MergeResult, BoardError> {
        if let Some(op) = incoming.iter().find(|op| op.is_root() && op.id() != self.id) {
            return Err(MergeError::ForeignRoot { op: op.id() }.into());
        }

        let mut seen = HashSet::new();
        let fresh: Vec<Operation> = incoming
            .iter()
            .filter(|op| !self.log.contains(&op.id()) && seen.insert(op.id()))
            .cloned()
            .collect();

        let result = merge(&mut self.log, incoming)?;
        if track {
            self.unsaved.extend(fresh);
        }
        tracing::debug!(
            board = %self.id.human(),
            new = result.new_operations,
            leaves = result.leaves,
            "merged into board"
        );
        Ok(result)
    }

    fn rebase(
        &mut self,
        store: &dyn ObjectStore,
        leaves: BTreeSet<Id>,
    ) -> Result<MergeResult, BoardError> {
        let ops = read_history(store, &leaves, |id| self.log.contains(id))?;
        let result = self.absorb(&ops, false)?;
        self.base = leaves;
        Ok(result)
    }

    // -- Commit ------------------------------------------------------------

    /// Commit with the default retry budget.
    ///
    /// # Errors
    ///
    /// See [`Board::commit_with`].
    pub fn commit(&mut self, store: &dyn ObjectStore) -> Result<CommitOutcome, BoardError> {
        self.commit_with(store, &CommitConfig::default())
    }

    /// Persist unsaved operations and advance the ref.
    ///
    /// # Errors
    ///
    /// - [`BoardError::CommitConflict`] if the ref kept moving for
    ///   `max_attempts` tries.
    /// - [`StoreError`] on storage failures.
    pub fn commit_with(
        &mut self,
        store: &dyn ObjectStore,
        config: &CommitConfig,
    ) -> Result<CommitOutcome, BoardError> {
        if !self.is_dirty() {
            return Ok(CommitOutcome::default());
        }

        let max_attempts = config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            for op in &self.unsaved {
                store.write_object(op.bytes())?;
            }

            let leaves = self.log.leaves().clone();
            match store.update_ref(&self.id, &self.base, &leaves)? {
                RefUpdate::Updated => {
                    let written = self.unsaved.len();
                    self.unsaved.clear();
                    self.base = leaves;
                    tracing::info!(
                        board = %self.id.human(),
                        written,
                        leaves = self.base.len(),
                        attempt,
                        "committed board"
                    );
                    return Ok(CommitOutcome {
                        written,
                        attempts: attempt,
                    });
                }
                RefUpdate::Conflict { current } => {
                    tracing::warn!(
                        board = %self.id.human(),
                        attempt,
                        max_attempts,
                        "ref moved during commit"
                    );
                    if attempt < max_attempts {
                        self.rebase(store, current)?;
                    }
                }
            }
        }

        Err(BoardError::CommitConflict {
            board: self.id,
            attempts: max_attempts,
        })
    }

    // -- Snapshot ----------------------------------------------------------

    /// The current state, resolving participants through `identities`.
    ///
    /// The snapshot is cached until the log changes.
    ///
    /// # Errors
    ///
    /// Only fails if the log invariants were broken.
    pub fn snapshot(&mut self, identities: &dyn IdentityResolver) -> Result<&Snapshot, BoardError> {
        let id = self.id;
        let snapshot = self.view(identities)?;
        let pending = snapshot.pending_participants().count();
        if pending > 0 {
            tracing::warn!(board = %id.human(), pending, "participants with unknown identities");
        }
        Ok(snapshot)
    }

    fn view(&mut self, identities: &dyn IdentityResolver) -> Result<&Snapshot, BoardError> {
        let fingerprint = self.log.fingerprint();
        let snapshot = match self.cache.take() {
            Some((cached, mut snapshot)) if cached == fingerprint => {
                snapshot.resolve_pending(identities);
                snapshot
            }
            _ => replay(self.id, self.log.ordered()?, identities),
        };
        let (_, snapshot) = self.cache.insert((fingerprint, snapshot));
        Ok(snapshot)
    }

    fn structure(&mut self) -> Result<&Snapshot, BoardError> {
        self.view(&NoIdentities)
    }

    // -- Edits -------------------------------------------------------------

    fn append(&mut self, ctx: &EditContext, payload: Payload) -> Result<Operation, BoardError> {
        let parents: Vec<Id> = self.log.leaves().iter().copied().collect();
        let clock = self.log.max_clock() + 1;
        let op = self
            .log
            .append(parents, ctx.author, clock, ctx.time, payload)?;
        self.unsaved.push(op.clone());
        Ok(op)
    }

    fn live_column(&mut self, column: Option<&CombinedId>) -> Result<Id, BoardError> {
        let board = self.id;
        let view = self.structure()?;
        match column {
            Some(column) => Ok(view.search_column(column)?.id),
            None => view
                .columns
                .first()
                .map(|c| c.id)
                .ok_or(BoardError::NoColumns(board)),
        }
    }

    fn live_item(&mut self, item: &CombinedId) -> Result<&Item, BoardError> {
        Ok(self.structure()?.search_item(item)?)
    }

    /// # Errors
    ///
    /// Returns [`BoardError::EmptyTitle`] for an empty title.
    pub fn set_title(&mut self, ctx: &EditContext, title: &str) -> Result<Operation, BoardError> {
        if title.trim().is_empty() {
            return Err(BoardError::EmptyTitle);
        }
        self.append(
            ctx,
            Payload::SetTitle {
                title: title.to_string(),
            },
        )
    }

    /// # Errors
    ///
    /// Only fails if the operation cannot be encoded.
    pub fn set_description(
        &mut self,
        ctx: &EditContext,
        description: &str,
    ) -> Result<Operation, BoardError> {
        self.append(
            ctx,
            Payload::SetDescription {
                description: description.to_string(),
            },
        )
    }

    /// Append a column at the end.
    ///
    /// # Errors
    ///
    /// Only fails if the operation cannot be encoded.
    pub fn add_column(
        &mut self,
        ctx: &EditContext,
        name: &str,
    ) -> Result<(CombinedId, Operation), BoardError> {
        let op = self.append(
            ctx,
            Payload::AddColumn {
                name: name.to_string(),
            },
        )?;
        Ok((CombinedId::combine(self.id, op.local_id(0)), op))
    }

    /// # Errors
    ///
    /// Returns [`LookupError::ColumnNotFound`] unless `column` is live.
    pub fn rename_column(
        &mut self,
        ctx: &EditContext,
        column: &CombinedId,
        name: &str,
    ) -> Result<Operation, BoardError> {
        let column = self.live_column(Some(column))?;
        self.append(
            ctx,
            Payload::RenameColumn {
                column,
                name: name.to_string(),
            },
        )
    }

    /// Remove a column along with its items.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::ColumnNotFound`] unless `column` is live.
    pub fn remove_column(
        &mut self,
        ctx: &EditContext,
        column: &CombinedId,
    ) -> Result<Operation, BoardError> {
        let column = self.live_column(Some(column))?;
        self.append(ctx, Payload::RemoveColumn { column })
    }

    /// Add a draft item to `column`, or to the first live column when
    /// `column` is `None`.
    ///
    /// # Errors
    ///
    /// - [`BoardError::EmptyTitle`] for an empty title.
    /// - [`LookupError::ColumnNotFound`] if `column` is unknown, removed or
    ///   belongs to another board.
    /// - [`BoardError::NoColumns`] if `column` is `None` and no column is live.
    pub fn add_item_draft(
        &mut self,
        ctx: &EditContext,
        column: Option<&CombinedId>,
        title: &str,
        message: &str,
        attachments: &[Id],
    ) -> Result<(CombinedId, Operation), BoardError> {
        if title.trim().is_empty() {
            return Err(BoardError::EmptyTitle);
        }
        let column = self.live_column(column)?;
        let op = self.append(
            ctx,
            Payload::AddItemDraft {
                column,
                title: title.to_string(),
                message: message.to_string(),
                attachments: attachments.to_vec(),
            },
        )?;
        Ok((CombinedId::combine(self.id, op.local_id(0)), op))
    }

    /// Add an item linking to another entity.
    ///
    /// # Errors
    ///
    /// Same column errors as [`Board::add_item_draft`].
    pub fn add_item_entity(
        &mut self,
        ctx: &EditContext,
        column: Option<&CombinedId>,
        entity: Id,
        status: ItemStatus,
    ) -> Result<(CombinedId, Operation), BoardError> {
        let column = self.live_column(column)?;
        let op = self.append(
            ctx,
            Payload::AddItemEntity {
                column,
                entity,
                status,
            },
        )?;
        Ok((CombinedId::combine(self.id, op.local_id(0)), op))
    }

    /// Move an item to `column` at `position` (clamped), or to the end.
    ///
    /// # Errors
    ///
    /// Lookup errors unless both `item` and `column` are live.
    pub fn move_item(
        &mut self,
        ctx: &EditContext,
        item: &CombinedId,
        column: &CombinedId,
        position: Option<usize>,
    ) -> Result<Operation, BoardError> {
        let item = self.live_item(item)?.local_id();
        let column = self.live_column(Some(column))?;
        self.append(
            ctx,
            Payload::MoveItem {
                item,
                column,
                position,
            },
        )
    }

    /// # Errors
    ///
    /// - [`LookupError::ItemNotFound`] unless `item` is live.
    /// - [`BoardError::DraftHasNoStatus`] for draft items.
    pub fn set_item_status(
        &mut self,
        ctx: &EditContext,
        item: &CombinedId,
        status: ItemStatus,
    ) -> Result<Operation, BoardError> {
        let local = match self.live_item(item)? {
            Item::Entity(linked) => linked.combined_id.local(),
            Item::Draft(_) => return Err(BoardError::DraftHasNoStatus(*item)),
        };
        self.append(ctx, Payload::SetItemStatus { item: local, status })
    }

    /// # Errors
    ///
    /// Returns [`LookupError::ItemNotFound`] unless `item` is live.
    pub fn remove_item(
        &mut self,
        ctx: &EditContext,
        item: &CombinedId,
    ) -> Result<Operation, BoardError> {
        let item = self.live_item(item)?.local_id();
        self.append(ctx, Payload::RemoveItem { item })
    }
}
