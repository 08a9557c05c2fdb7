//! trellis-core library.
//!
//! Boards are kept as a content-addressed operation DAG. Replicas exchange
//! operations, merge them by set union, and replay them in a deterministic
//! causal order, so every replica holding the same operations sees the same
//! board.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums per module, each exposing a stable
//!   [`ErrorCode`] via `code()`. `anyhow::Result` only for configuration.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`) with
//!   structured fields.

pub mod board;
pub mod canonical;
pub mod config;
pub mod error;
pub mod id;
pub mod identity;
pub mod lock;
pub mod log;
pub mod merge;
pub mod operation;
pub mod order;
pub mod snapshot;
pub mod store;

pub use board::{Board, BoardError, CommitOutcome, EditContext};
pub use error::ErrorCode;
pub use id::{CombinedId, Id};
pub use identity::{Identity, IdentityCache, IdentityResolver};
pub use operation::{ItemStatus, Operation, Payload};
pub use snapshot::{Column, Item, Participant, Snapshot};
pub use store::{FsStore, MemoryStore, ObjectStore};
