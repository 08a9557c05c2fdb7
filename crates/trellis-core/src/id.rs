//! Content-derived identifiers.
//!
//! Every entity, operation and sub-object is addressed by an [`Id`]: a 32-byte
//! BLAKE3 digest rendered as 64 lowercase hex characters. Ordering on [`Id`]
//! is unsigned lexicographic over the raw bytes, which is also the order of
//! the hex strings.
//!
//! Sub-objects (columns, items) only have a local id that is unique inside
//! their owning entity. [`CombinedId`] pairs the owning entity id with the
//! local id so a sub-object can be addressed from anywhere. Because both
//! halves are derived from content hashes, two replicas that replayed the same
//! operation agree on the combined id without coordination.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ErrorCode;

/// Number of raw bytes in an [`Id`].
pub const ID_BYTES: usize = 32;

/// Number of hex characters in the textual form of an [`Id`].
pub const ID_HEX_LEN: usize = ID_BYTES * 2;

/// Length of the abbreviated form returned by [`Id::human`].
pub const HUMAN_ID_LEN: usize = 7;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not 64 lowercase hex characters.
    #[error("malformed id '{raw}': expected {ID_HEX_LEN} hex characters")]
    Malformed {
        /// The rejected input.
        raw: String,
    },

    /// The input cannot be split into an entity id and a local id.
    #[error("malformed combined id '{raw}': expected {} hex characters", ID_HEX_LEN * 2)]
    MalformedCombined {
        /// The rejected input.
        raw: String,
    },
}

impl IdError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed { .. } => ErrorCode::MalformedId,
            Self::MalformedCombined { .. } => ErrorCode::MalformedCombinedId,
        }
    }
}

// ---------------------------------------------------------------------------
// Id
// ---------------------------------------------------------------------------

/// A BLAKE3 content hash used as an identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; ID_BYTES]);

impl Id {
    /// Hash `bytes` into an id.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Derive the id of the `index`-th sub-object created by the operation
    /// (or entity) `parent`.
    ///
    /// The derivation only depends on its inputs, so every replica computes
    /// the same local id for the same creating operation.
    #[must_use]
    pub fn derive(parent: &Self, index: u32) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(parent.to_hex().as_bytes());
        hasher.update(b":");
        hasher.update(index.to_string().as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Full lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Abbreviated form for terminal output.
    #[must_use]
    pub fn human(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(HUMAN_ID_LEN);
        hex
    }

    /// Whether the hex form starts with `prefix` (case-insensitive).
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.to_hex().starts_with(&prefix.to_ascii_lowercase())
    }

    fn parse_hex(raw: &str) -> Option<Self> {
        // Ids are canonical lowercase; `from_hex` alone would accept either case.
        if raw.bytes().any(|b| b.is_ascii_uppercase()) {
            return None;
        }
        blake3::Hash::from_hex(raw)
            .ok()
            .map(|hash| Self(*hash.as_bytes()))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.human())
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s).ok_or_else(|| IdError::Malformed { raw: s.to_string() })
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// CombinedId
// ---------------------------------------------------------------------------

/// Global address of a sub-object: owning entity id plus local id.
///
/// The textual form is the two hex ids concatenated (128 characters).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CombinedId {
    entity: Id,
    local: Id,
}

impl CombinedId {
    /// Combine an entity id and a local sub-object id.
    #[must_use]
    pub const fn combine(entity: Id, local: Id) -> Self {
        Self { entity, local }
    }

    /// Decode a combined token back into `(entity, local)`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::MalformedCombined`] if the token is not two
    /// concatenated hex ids.
    pub fn resolve(token: &str) -> Result<(Id, Id), IdError> {
        let combined: Self = token.parse()?;
        Ok((combined.entity, combined.local))
    }

    /// The owning entity.
    #[must_use]
    pub const fn entity(&self) -> Id {
        self.entity
    }

    /// The id local to the owning entity.
    #[must_use]
    pub const fn local(&self) -> Id {
        self.local
    }

    /// Short form for display inside the owning entity's context.
    #[must_use]
    pub fn human(&self) -> String {
        self.local.human()
    }
}

impl fmt::Display for CombinedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.entity, self.local)
    }
}

impl fmt::Debug for CombinedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CombinedId({}/{})", self.entity.human(), self.local.human())
    }
}

impl FromStr for CombinedId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || IdError::MalformedCombined { raw: s.to_string() };
        if s.len() != ID_HEX_LEN * 2 || !s.is_ascii() {
            return Err(malformed());
        }
        let (entity, local) = s.split_at(ID_HEX_LEN);
        Ok(Self {
            entity: Id::parse_hex(entity).ok_or_else(malformed)?,
            local: Id::parse_hex(local).ok_or_else(malformed)?,
        })
    }
}

impl Serialize for CombinedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CombinedId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
