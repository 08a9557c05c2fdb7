//! Immutable, content-addressed operations.
//!
//! An [`Operation`] is one change to a board: who made it, its logical clock,
//! its wall-clock time, the operations it causally follows, and a typed
//! [`Payload`]. The operation's [`Id`] is the BLAKE3 hash of its canonical
//! encoding, which covers the parent ids. Changing anything about an
//! operation (or any of its ancestors) therefore changes its id.
//!
//! # Encoding
//!
//! ```text
//! {"author":"<hex>","clock":3,"parents":["<hex>",...],"payload":{"type":"set_title",...},"time":1708012200,"version":1}
//! ```
//!
//! Keys are sorted (see [`crate::canonical`]) and `parents` is sorted and
//! deduplicated before hashing.
//!
//! The fields of [`Operation`] are private and the only constructors compute
//! the id from the content, so an operation value is immutable and can never
//! disagree with its own id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::to_canonical_vec;
use crate::error::ErrorCode;
use crate::id::Id;

/// Encoding version written into every operation.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from encoding or decoding operations.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The operation could not be encoded.
    #[error("failed to encode operation: {0}")]
    Encode(serde_json::Error),

    /// The stored bytes are not a valid operation.
    #[error("object {id} is not a valid operation: {source}")]
    Decode {
        /// Address of the object.
        id: Id,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The stored bytes do not hash to the address they were read from.
    #[error("object stored as {expected} hashes to {actual}")]
    HashMismatch {
        /// Address the object was read from.
        expected: Id,
        /// Hash of the bytes.
        actual: Id,
    },

    /// The operation was written by a newer format.
    #[error("operation {id} uses unsupported format version {version}")]
    UnsupportedVersion {
        /// Address of the object.
        id: Id,
        /// Version found in the object.
        version: u32,
    },
}

impl OperationError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Encode(_) => ErrorCode::InternalUnexpected,
            Self::Decode { .. } | Self::HashMismatch { .. } => ErrorCode::HashMismatch,
            Self::UnsupportedVersion { .. } => ErrorCode::UnsupportedVersion,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Status carried by items that link to another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Open,
    Closed,
}

impl ItemStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The change an operation makes. The `type` tag selects the variant.
///
/// Column and item references are ids local to the board; see
/// [`Operation::local_id`] for how they are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Root operation of a board. Creates one column per name, in order.
    Create {
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        columns: Vec<String>,
    },
    SetTitle {
        title: String,
    },
    SetDescription {
        description: String,
    },
    AddColumn {
        name: String,
    },
    RenameColumn {
        column: Id,
        name: String,
    },
    /// Removes the column together with the items it holds.
    RemoveColumn {
        column: Id,
    },
    AddItemDraft {
        column: Id,
        title: String,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Id>,
    },
    /// Places a reference to another entity (e.g. a bug) on the board.
    AddItemEntity {
        column: Id,
        entity: Id,
        #[serde(default)]
        status: ItemStatus,
    },
    /// Moves an item to `column`, at `position` if given, else at the end.
    MoveItem {
        item: Id,
        column: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    SetItemStatus {
        item: Id,
        status: ItemStatus,
    },
    RemoveItem {
        item: Id,
    },
}

impl Payload {
    /// Stable name of the payload variant (its `type` tag).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::SetTitle { .. } => "set_title",
            Self::SetDescription { .. } => "set_description",
            Self::AddColumn { .. } => "add_column",
            Self::RenameColumn { .. } => "rename_column",
            Self::RemoveColumn { .. } => "remove_column",
            Self::AddItemDraft { .. } => "add_item_draft",
            Self::AddItemEntity { .. } => "add_item_entity",
            Self::MoveItem { .. } => "move_item",
            Self::SetItemStatus { .. } => "set_item_status",
            Self::RemoveItem { .. } => "remove_item",
        }
    }

    #[must_use]
    pub const fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. })
    }

    /// Whether the payload changes columns or items rather than a scalar
    /// field.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        !matches!(
            self,
            Self::SetTitle { .. } | Self::SetDescription { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// The hashed content of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Body {
    version: u32,
    author: Id,
    clock: u64,
    time: i64,
    parents: Vec<Id>,
    payload: Payload,
}

/// An immutable, content-addressed change to a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    id: Id,
    body: Body,
    bytes: Vec<u8>,
}

impl Operation {
    /// Build an operation and compute its id.
    ///
    /// `parents` is sorted and deduplicated; pass an empty set only for the
    /// root operation of a board.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Encode`] if the payload cannot be encoded.
    pub fn new(
        author: Id,
        clock: u64,
        time: DateTime<Utc>,
        parents: impl IntoIterator<Item = Id>,
        payload: Payload,
    ) -> Result<Self, OperationError> {
        let mut parents: Vec<Id> = parents.into_iter().collect();
        parents.sort_unstable();
        parents.dedup();

        let body = Body {
            version: FORMAT_VERSION,
            author,
            clock,
            time: time.timestamp(),
            parents,
            payload,
        };
        let bytes = to_canonical_vec(&body).map_err(OperationError::Encode)?;
        Ok(Self {
            id: Id::of(&bytes),
            body,
            bytes,
        })
    }

    /// Decode an object read from storage under the address `expected`.
    ///
    /// # Errors
    ///
    /// - [`OperationError::HashMismatch`] if `bytes` do not hash to `expected`.
    /// - [`OperationError::Decode`] if `bytes` are not an operation.
    /// - [`OperationError::UnsupportedVersion`] for unknown format versions.
    pub fn decode(expected: Id, bytes: &[u8]) -> Result<Self, OperationError> {
        let actual = Id::of(bytes);
        if actual != expected {
            return Err(OperationError::HashMismatch { expected, actual });
        }
        Self::parse(bytes)
    }

    /// Decode an object, taking its id from the hash of `bytes`.
    ///
    /// # Errors
    ///
    /// Same as [`Operation::decode`], minus the address check.
    pub fn parse(bytes: &[u8]) -> Result<Self, OperationError> {
        let id = Id::of(bytes);
        let body: Body =
            serde_json::from_slice(bytes).map_err(|source| OperationError::Decode { id, source })?;
        if body.version != FORMAT_VERSION {
            return Err(OperationError::UnsupportedVersion {
                id,
                version: body.version,
            });
        }
        Ok(Self {
            id,
            body,
            bytes: bytes.to_vec(),
        })
    }

    /// Content hash of the encoded operation.
    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    /// Identity reference of the author.
    #[must_use]
    pub const fn author(&self) -> Id {
        self.body.author
    }

    /// Lamport clock value within the board.
    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.body.clock
    }

    /// Wall-clock time in seconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.body.time
    }

    /// Wall-clock time the operation was authored.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.body.time, 0).unwrap_or_default()
    }

    /// Parent operation ids, sorted.
    #[must_use]
    pub fn parents(&self) -> &[Id] {
        &self.body.parents
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.body.parents.is_empty()
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.body.payload
    }

    /// Canonical encoded bytes; `Id::of(bytes()) == id()`.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Id of the `index`-th sub-object created by this operation.
    #[must_use]
    pub fn local_id(&self, index: u32) -> Id {
        Id::derive(&self.id, index)
    }
}

/// Serialized view used for history output and snapshot dumps.
#[derive(Serialize)]
struct OperationView<'a> {
    id: Id,
    author: Id,
    clock: u64,
    time: i64,
    parents: &'a [Id],
    payload: &'a Payload,
}

impl Serialize for Operation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        OperationView {
            id: self.id,
            author: self.body.author,
            clock: self.body.clock,
            time: self.body.time,
            parents: &self.body.parents,
            payload: &self.body.payload,
        }
        .serialize(serializer)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.id.human(),
            self.body.clock,
            self.body.author.human(),
            self.body.payload.kind()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn author() -> Id {
        Id::of(b"alice")
    }

    fn root() -> Operation {
        Operation::new(
            author(),
            1,
            ts(1_700_000_000),
            [],
            Payload::Create {
                title: "Roadmap".into(),
                description: String::new(),
                columns: vec!["Backlog".into(), "Done".into()],
            },
        )
        .unwrap()
    }

    #[test]
    fn id_is_hash_of_bytes() {
        let op = root();
        assert_eq!(op.id(), Id::of(op.bytes()));
        assert!(op.is_root());
    }

    #[test]
    fn identical_content_gives_identical_id() {
        assert_eq!(root().id(), root().id());
    }

    #[test]
    fn parents_are_sorted_and_deduplicated() {
        let a = Id::of(b"a");
        let b = Id::of(b"b");
        let op1 = Operation::new(author(), 2, ts(1), [b, a, b], Payload::SetTitle {
            title: "x".into(),
        })
        .unwrap();
        let op2 = Operation::new(author(), 2, ts(1), [a, b], Payload::SetTitle {
            title: "x".into(),
        })
        .unwrap();
        assert_eq!(op1.parents().len(), 2);
        assert!(op1.parents()[0] < op1.parents()[1]);
        assert_eq!(op1.id(), op2.id());
    }

    #[test]
    fn parent_change_changes_id() {
        let r = root();
        let child_a = Operation::new(author(), 2, ts(2), [r.id()], Payload::SetTitle {
            title: "x".into(),
        })
        .unwrap();
        let child_b = Operation::new(author(), 2, ts(2), [Id::of(b"forged")], Payload::SetTitle {
            title: "x".into(),
        })
        .unwrap();
        assert_ne!(child_a.id(), child_b.id());
    }

    #[test]
    fn decode_round_trip_preserves_everything() {
        let op = root();
        let decoded = Operation::decode(op.id(), op.bytes()).unwrap();
        assert_eq!(decoded, op);
        assert_eq!(decoded.time(), ts(1_700_000_000));
    }

    #[test]
    fn decode_rejects_wrong_address() {
        let op = root();
        let err = Operation::decode(Id::of(b"other"), op.bytes()).unwrap_err();
        assert!(matches!(err, OperationError::HashMismatch { .. }));
        assert_eq!(err.code(), ErrorCode::HashMismatch);
    }

    #[test]
    fn decode_rejects_future_versions() {
        let raw = br#"{"author":"0000000000000000000000000000000000000000000000000000000000000000","clock":1,"parents":[],"payload":{"type":"set_title","title":"x"},"time":0,"version":99}"#;
        let err = Operation::parse(raw).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedVersion);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Operation::parse(b"not json").unwrap_err();
        assert!(matches!(err, OperationError::Decode { .. }));
    }

    #[test]
    fn payload_tag_is_snake_case() {
        let op = root();
        let text = std::str::from_utf8(op.bytes()).unwrap();
        assert!(text.contains(r#""type":"create""#));
        assert!(!text.contains('\n'));
        assert_eq!(op.payload().kind(), "create");
    }

    #[test]
    fn local_ids_follow_creating_operation() {
        let op = root();
        assert_eq!(op.local_id(0), Id::derive(&op.id(), 0));
        assert_ne!(op.local_id(0), op.local_id(1));
    }

    #[test]
    fn structural_classification() {
        assert!(!Payload::SetTitle { title: "t".into() }.is_structural());
        assert!(Payload::RemoveItem { item: author() }.is_structural());
    }
}
