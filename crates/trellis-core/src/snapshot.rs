//! Materialized board state built by replaying the operation log.
//!
//! [`replay`] folds causally ordered operations into a [`Snapshot`]:
//!
//! - structural payloads edit `columns` and their items positionally;
//! - `set_title` / `set_description` overwrite, so the last write in causal
//!   order wins;
//! - every author is added to `participants` once, in first-seen order.
//!
//! A payload that targets a column or item that no longer exists (for
//! example because another replica removed it concurrently) has no
//! structural effect. The operation is still kept in `operations` and its
//! author still counts as a participant, so history is never dropped.
//!
//! Replay has no side effects and can be re-run from scratch at any time.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorCode;
use crate::id::{CombinedId, Id};
use crate::identity::{Identity, IdentityError, IdentityResolver};
use crate::operation::{ItemStatus, Operation, Payload};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from looking up live sub-objects in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// No live column carries this id.
    #[error("column {0} not found")]
    ColumnNotFound(CombinedId),

    /// No live item carries this id.
    #[error("item {0} not found")]
    ItemNotFound(CombinedId),

    /// No live column id starts with the prefix.
    #[error("no column matches '{0}'")]
    NoColumnMatches(String),

    /// Several live column ids start with the prefix.
    #[error("column prefix '{prefix}' matches {count} columns")]
    AmbiguousColumn {
        /// The prefix given.
        prefix: String,
        /// Number of matching columns.
        count: usize,
    },
}

impl LookupError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ColumnNotFound(_) | Self::NoColumnMatches(_) => ErrorCode::ColumnNotFound,
            Self::ItemNotFound(_) => ErrorCode::ItemNotFound,
            Self::AmbiguousColumn { .. } => ErrorCode::AmbiguousId,
        }
    }
}

// ---------------------------------------------------------------------------
// Items and columns
// ---------------------------------------------------------------------------

/// A free-standing card that only lives on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftItem {
    pub combined_id: CombinedId,
    pub author: Id,
    pub title: String,
    pub message: String,
    pub attachments: Vec<Id>,
    pub created_at: DateTime<Utc>,
}

/// A card that points at another entity (e.g. a bug).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityItem {
    pub combined_id: CombinedId,
    pub author: Id,
    pub entity: Id,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

/// An item placed in a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
    Draft(DraftItem),
    Entity(EntityItem),
}

impl Item {
    /// Global address of the item.
    #[must_use]
    pub const fn combined_id(&self) -> CombinedId {
        match self {
            Self::Draft(d) => d.combined_id,
            Self::Entity(e) => e.combined_id,
        }
    }

    /// Id local to the board.
    #[must_use]
    pub const fn local_id(&self) -> Id {
        self.combined_id().local()
    }

    #[must_use]
    pub const fn author(&self) -> Id {
        match self {
            Self::Draft(d) => d.author,
            Self::Entity(e) => e.author,
        }
    }

    /// Status, for variants that carry one.
    #[must_use]
    pub const fn status(&self) -> Option<ItemStatus> {
        match self {
            Self::Draft(_) => None,
            Self::Entity(e) => Some(e.status),
        }
    }

    /// The referenced entity, for linked items.
    #[must_use]
    pub const fn linked_entity(&self) -> Option<Id> {
        match self {
            Self::Draft(_) => None,
            Self::Entity(e) => Some(e.entity),
        }
    }

    /// One-line label for listings.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Draft(d) => d.title.clone(),
            Self::Entity(e) => format!("{} [{}]", e.entity.human(), e.status),
        }
    }
}

/// A named bucket of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    /// Id local to the board; assigned by the creating operation.
    pub id: Id,
    pub combined_id: CombinedId,
    pub name: String,
    pub items: Vec<Item>,
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// An author of at least one replayed operation.
///
/// Authors whose identity record has not been synchronized yet stay
/// `Pending` until [`Snapshot::resolve_pending`] finds them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Participant {
    Resolved(Identity),
    Pending { id: Id },
}

impl Participant {
    #[must_use]
    pub const fn id(&self) -> Id {
        match self {
            Self::Resolved(identity) => identity.id(),
            Self::Pending { id } => *id,
        }
    }

    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Resolved(identity) => Some(identity),
            Self::Pending { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The current state of a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    id: Id,
    pub title: String,
    pub description: String,
    pub columns: Vec<Column>,
    pub participants: Vec<Participant>,
    /// Time of the first replayed operation.
    pub create_time: DateTime<Utc>,
    /// Every replayed operation, in causal order.
    pub operations: Vec<Operation>,
}

/// Replay causally ordered operations into a snapshot of board `id`.
///
/// `ordered` must already be in causal order (see
/// [`crate::order::causal_order`]); replay does not reorder.
pub fn replay<'a, I>(id: Id, ordered: I, identities: &dyn IdentityResolver) -> Snapshot
where
    I: IntoIterator<Item = &'a Operation>,
{
    let mut snapshot = Snapshot::new(id);
    for op in ordered {
        snapshot.apply(op, identities);
    }
    tracing::debug!(
        board = %id.human(),
        operations = snapshot.operations.len(),
        columns = snapshot.columns.len(),
        items = snapshot.item_count(),
        "replayed snapshot"
    );
    snapshot
}

impl Snapshot {
    /// An empty snapshot of board `id`.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            title: String::new(),
            description: String::new(),
            columns: Vec::new(),
            participants: Vec::new(),
            create_time: DateTime::<Utc>::default(),
            operations: Vec::new(),
        }
    }

    /// The board identifier.
    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    /// Every replayed operation, in causal order.
    #[must_use]
    pub fn all_operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Time of the causally last operation, or the Unix epoch if nothing was
    /// replayed.
    #[must_use]
    pub fn edit_time(&self) -> DateTime<Utc> {
        self.operations
            .last()
            .map(Operation::time)
            .unwrap_or_default()
    }

    /// Number of items across all columns.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.columns.iter().map(|c| c.items.len()).sum()
    }

    #[must_use]
    pub fn has_participant(&self, id: &Id) -> bool {
        self.participants.iter().any(|p| p.id() == *id)
    }

    #[must_use]
    pub fn has_any_participant(&self, ids: &[Id]) -> bool {
        ids.iter().any(|id| self.has_participant(id))
    }

    /// Participants whose identity has not been resolved yet.
    pub fn pending_participants(&self) -> impl Iterator<Item = Id> + '_ {
        self.participants.iter().filter_map(|p| match p {
            Participant::Pending { id } => Some(*id),
            Participant::Resolved(_) => None,
        })
    }

    /// Retry identity resolution for pending participants. Returns how many
    /// were resolved.
    pub fn resolve_pending(&mut self, identities: &dyn IdentityResolver) -> usize {
        let mut resolved = 0;
        for participant in &mut self.participants {
            if let Participant::Pending { id } = participant {
                if let Ok(identity) = identities.resolve(id) {
                    *participant = Participant::Resolved(identity);
                    resolved += 1;
                }
            }
        }
        resolved
    }

    /// Find the live column with this combined id.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::ColumnNotFound`] if no live column carries it,
    /// including columns that have since been removed.
    pub fn search_column(&self, id: &CombinedId) -> Result<&Column, LookupError> {
        self.columns
            .iter()
            .find(|c| c.combined_id == *id)
            .ok_or(LookupError::ColumnNotFound(*id))
    }

    /// Find the live item with this combined id.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::ItemNotFound`] if no live item carries it.
    pub fn search_item(&self, id: &CombinedId) -> Result<&Item, LookupError> {
        self.columns
            .iter()
            .flat_map(|c| c.items.iter())
            .find(|item| item.combined_id() == *id)
            .ok_or(LookupError::ItemNotFound(*id))
    }

    /// Find the column currently holding the item.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::ItemNotFound`] if no live item carries it.
    pub fn column_of_item(&self, id: &CombinedId) -> Result<&Column, LookupError> {
        self.columns
            .iter()
            .find(|c| c.items.iter().any(|item| item.combined_id() == *id))
            .ok_or(LookupError::ItemNotFound(*id))
    }

    /// Find the one live column whose local id (or combined id) starts with
    /// `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NoColumnMatches`] or
    /// [`LookupError::AmbiguousColumn`].
    pub fn column_by_prefix(&self, prefix: &str) -> Result<&Column, LookupError> {
        let lowered = prefix.to_ascii_lowercase();
        let matches: Vec<&Column> = self
            .columns
            .iter()
            .filter(|c| c.id.has_prefix(&lowered) || c.combined_id.to_string().starts_with(&lowered))
            .collect();
        match matches.as_slice() {
            [] => Err(LookupError::NoColumnMatches(prefix.to_string())),
            [column] => Ok(column),
            many => Err(LookupError::AmbiguousColumn {
                prefix: prefix.to_string(),
                count: many.len(),
            }),
        }
    }

    fn column_index(&self, local: &Id) -> Option<usize> {
        self.columns.iter().position(|c| c.id == *local)
    }

    fn item_position(&self, local: &Id) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(ci, c)| {
            c.items
                .iter()
                .position(|item| item.local_id() == *local)
                .map(|ii| (ci, ii))
        })
    }

    fn combine(&self, local: Id) -> CombinedId {
        CombinedId::combine(self.id, local)
    }

    fn add_participant(&mut self, author: Id, identities: &dyn IdentityResolver) {
        if self.has_participant(&author) {
            return;
        }
        let participant = match identities.resolve(&author) {
            Ok(identity) => Participant::Resolved(identity),
            Err(IdentityError::Unknown(_)) => {
                tracing::debug!(
                    board = %self.id.human(),
                    author = %author.human(),
                    "identity not available yet; participant pending"
                );
                Participant::Pending { id: author }
            }
            Err(e) => {
                tracing::warn!(
                    board = %self.id.human(),
                    author = %author.human(),
                    error = %e,
                    "deferring participant resolution"
                );
                Participant::Pending { id: author }
            }
        };
        self.participants.push(participant);
    }

    fn push_column(&mut self, local: Id, name: &str) {
        if self.column_index(&local).is_some() {
            return;
        }
        self.columns.push(Column {
            id: local,
            combined_id: self.combine(local),
            name: name.to_string(),
            items: Vec::new(),
        });
    }

    fn push_item(&mut self, column: &Id, item: Item) -> bool {
        if self.item_position(&item.local_id()).is_some() {
            return false;
        }
        let Some(ci) = self.column_index(column) else {
            return false;
        };
        self.columns[ci].items.push(item);
        true
    }

    /// Apply one operation's effect.
    fn apply(&mut self, op: &Operation, identities: &dyn IdentityResolver) {
        if self.operations.is_empty() {
            self.create_time = op.time();
        }
        self.add_participant(op.author(), identities);

        let applied = match op.payload() {
            Payload::Create {
                title,
                description,
                columns,
            } if op.is_root() => {
                self.title.clone_from(title);
                self.description.clone_from(description);
                for (index, name) in (0u32..).zip(columns) {
                    self.push_column(op.local_id(index), name);
                }
                true
            }
            Payload::Create { .. } => false,
            Payload::SetTitle { title } => {
                self.title.clone_from(title);
                true
            }
            Payload::SetDescription { description } => {
                self.description.clone_from(description);
                true
            }
            Payload::AddColumn { name } => {
                self.push_column(op.local_id(0), name);
                true
            }
            Payload::RenameColumn { column, name } => match self.column_index(column) {
                Some(ci) => {
                    self.columns[ci].name.clone_from(name);
                    true
                }
                None => false,
            },
            Payload::RemoveColumn { column } => match self.column_index(column) {
                Some(ci) => {
                    self.columns.remove(ci);
                    true
                }
                None => false,
            },
            Payload::AddItemDraft {
                column,
                title,
                message,
                attachments,
            } => {
                let item = Item::Draft(DraftItem {
                    combined_id: self.combine(op.local_id(0)),
                    author: op.author(),
                    title: title.clone(),
                    message: message.clone(),
                    attachments: attachments.clone(),
                    created_at: op.time(),
                });
                self.push_item(column, item)
            }
            Payload::AddItemEntity {
                column,
                entity,
                status,
            } => {
                let item = Item::Entity(EntityItem {
                    combined_id: self.combine(op.local_id(0)),
                    author: op.author(),
                    entity: *entity,
                    status: *status,
                    created_at: op.time(),
                });
                self.push_item(column, item)
            }
            Payload::MoveItem {
                item,
                column,
                position,
            } => self.move_item(item, column, *position),
            Payload::SetItemStatus { item, status } => match self.item_position(item) {
                Some((ci, ii)) => match &mut self.columns[ci].items[ii] {
                    Item::Entity(e) => {
                        e.status = *status;
                        true
                    }
                    Item::Draft(_) => false,
                },
                None => false,
            },
            Payload::RemoveItem { item } => match self.item_position(item) {
                Some((ci, ii)) => {
                    self.columns[ci].items.remove(ii);
                    true
                }
                None => false,
            },
        };

        if !applied {
            tracing::debug!(
                board = %self.id.human(),
                op = %op.id().human(),
                kind = op.payload().kind(),
                "operation has no effect on this snapshot"
            );
        }
        self.operations.push(op.clone());
    }

    fn move_item(&mut self, item: &Id, column: &Id, position: Option<usize>) -> bool {
        let Some(target) = self.column_index(column) else {
            return false;
        };
        let Some((ci, ii)) = self.item_position(item) else {
            return false;
        };
        let moved = self.columns[ci].items.remove(ii);
        let items = &mut self.columns[target].items;
        let at = position.map_or(items.len(), |p| p.min(items.len()));
        items.insert(at, moved);
        true
    }
}
