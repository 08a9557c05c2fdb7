//! Author identities and their resolution.
//!
//! Operations only embed an identity *reference* (the identity's [`Id`]). The
//! full record lives in an identity store that is synchronized separately, so
//! fetched history may reference an identity this replica has not seen yet.
//! Resolution failures are therefore soft: callers keep the reference and
//! retry later.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::canonical::to_canonical_vec;
use crate::error::ErrorCode;
use crate::id::Id;

/// Errors from identity resolution and decoding.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No identity with this id is known locally.
    #[error("unknown identity {0}")]
    Unknown(Id),

    /// A stored identity record does not hash to the id it was stored under.
    #[error("identity record stored as {expected} hashes to {actual}")]
    Mismatch {
        /// Address the record was requested under.
        expected: Id,
        /// Id recomputed from the record's content.
        actual: Id,
    },

    /// The record could not be encoded or decoded.
    #[error("invalid identity record: {0}")]
    Json(#[from] serde_json::Error),

    /// The backing store failed.
    #[error("identity store I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl IdentityError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unknown(_) => ErrorCode::UnknownIdentity,
            Self::Mismatch { .. } => ErrorCode::HashMismatch,
            Self::Json(_) => ErrorCode::InternalUnexpected,
            Self::Io(_) => ErrorCode::StorageIo,
        }
    }
}

/// The hashed part of an identity record.
#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    name: String,
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
}

/// A known author.
///
/// The id is the hash of the record, so it cannot be set independently of
/// the name, email and key it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    id: Id,
    name: String,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
}

impl Identity {
    /// Build an identity and compute its id.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Json`] if the record cannot be encoded.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        public_key: Option<String>,
    ) -> Result<Self, IdentityError> {
        let record = IdentityRecord {
            name: name.into(),
            email: email.into(),
            public_key,
        };
        let id = Id::of(&to_canonical_vec(&record)?);
        Ok(Self {
            id,
            name: record.name,
            email: record.email,
            public_key: record.public_key,
        })
    }

    /// Decode a stored record, checking that it hashes to `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Json`] for malformed bytes and
    /// [`IdentityError::Mismatch`] if the content does not match the address.
    pub fn decode(expected: Id, bytes: &[u8]) -> Result<Self, IdentityError> {
        let record: IdentityRecord = serde_json::from_slice(bytes)?;
        let identity = Self::new(record.name, record.email, record.public_key)?;
        if identity.id != expected {
            return Err(IdentityError::Mismatch {
                expected,
                actual: identity.id,
            });
        }
        Ok(identity)
    }

    /// Canonical bytes of the hashed record.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Json`] if the record cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>, IdentityError> {
        Ok(to_canonical_vec(&IdentityRecord {
            name: self.name.clone(),
            email: self.email.clone(),
            public_key: self.public_key.clone(),
        })?)
    }

    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// `Name <email>` display form.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.email.is_empty() {
            self.name.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

/// Maps identity references to full identity records.
pub trait IdentityResolver {
    /// Look up the identity with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Unknown`] if the identity is not available
    /// locally, or a store-specific error if the lookup itself failed.
    fn resolve(&self, id: &Id) -> Result<Identity, IdentityError>;
}

/// In-memory identity store, deduplicated by id.
#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    identities: HashMap<Id, Identity>,
}

impl IdentityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity. Returns `false` if it was already known.
    pub fn insert(&mut self, identity: Identity) -> bool {
        if self.identities.contains_key(&identity.id) {
            return false;
        }
        self.identities.insert(identity.id, identity);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl FromIterator<Identity> for IdentityCache {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        let mut cache = Self::new();
        for identity in iter {
            cache.insert(identity);
        }
        cache
    }
}

impl IdentityResolver for IdentityCache {
    fn resolve(&self, id: &Id) -> Result<Identity, IdentityError> {
        self.identities
            .get(id)
            .cloned()
            .ok_or(IdentityError::Unknown(*id))
    }
}
