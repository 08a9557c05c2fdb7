pub mod board;
pub mod init;
pub mod sync;
pub mod user;

use anyhow::{Result, bail};
use std::path::{Path, PathBuf};
use trellis_core::board::BoardError;
use trellis_core::config::{RepoConfig, load_repo_config};
use trellis_core::error::ErrorCode;
use trellis_core::id::Id;
use trellis_core::identity::{Identity, IdentityError, IdentityResolver};
use trellis_core::snapshot::LookupError;
use trellis_core::store::{FsStore, ObjectStore, StoreError};

/// Core errors that carry a machine-readable code.
pub trait Coded {
    fn error_code(&self) -> ErrorCode;
}

impl Coded for BoardError {
    fn error_code(&self) -> ErrorCode {
        self.code()
    }
}

impl Coded for StoreError {
    fn error_code(&self) -> ErrorCode {
        self.code()
    }
}

impl Coded for IdentityError {
    fn error_code(&self) -> ErrorCode {
        self.code()
    }
}

impl Coded for LookupError {
    fn error_code(&self) -> ErrorCode {
        self.code()
    }
}

/// Attach the `E####` code and remediation hint to a core error.
pub trait CodedExt<T> {
    fn coded(self) -> Result<T>;
}

impl<T, E> CodedExt<T> for std::result::Result<T, E>
where
    E: Coded + std::error::Error + Send + Sync + 'static,
{
    fn coded(self) -> Result<T> {
        self.map_err(|err| {
            let code = err.error_code();
            let summary = describe(code);
            anyhow::Error::new(err).context(summary)
        })
    }
}

/// `E####: message`, plus the hint on a second line when one exists.
pub fn describe(code: ErrorCode) -> String {
    code.hint().map_or_else(
        || format!("{code}: {}", code.message()),
        |hint| format!("{code}: {}\n  hint: {hint}", code.message()),
    )
}

/// Build an error for a condition the CLI detects itself.
pub fn coded_error(code: ErrorCode, detail: String) -> anyhow::Error {
    anyhow::Error::msg(detail).context(describe(code))
}

/// An opened repository: its store and config.
pub struct Repo {
    pub root: PathBuf,
    pub store: FsStore,
    pub config: RepoConfig,
}

impl Repo {
    /// Open the store under `root`, applying the configured lock timeout.
    pub fn open(root: &Path) -> Result<Self> {
        let config = load_repo_config(root)?;
        let store = FsStore::open(root)
            .coded()?
            .with_lock_timeout(config.lock.timeout());
        Ok(Self {
            root: root.to_path_buf(),
            store,
            config,
        })
    }

    /// The identity configured as the author of new operations.
    pub fn current_identity(&self) -> Result<Identity> {
        let Some(id) = self.config.user.identity_id()? else {
            bail!("No identity configured. Run `trellis user create --name NAME --email EMAIL`.");
        };
        self.store.resolve(&id).coded()
    }

    /// Resolve a board id from a unique prefix, or the only board when
    /// `prefix` is omitted.
    pub fn resolve_board(&self, prefix: Option<&str>) -> Result<Id> {
        let boards = self.store.list_refs().coded()?;
        pick_board(&boards, prefix)
    }
}

fn pick_board(boards: &[Id], prefix: Option<&str>) -> Result<Id> {
    let matches: Vec<Id> = match prefix {
        Some(prefix) => boards
            .iter()
            .copied()
            .filter(|id| id.has_prefix(prefix))
            .collect(),
        None => boards.to_vec(),
    };

    match (matches.as_slice(), prefix) {
        ([id], _) => Ok(*id),
        ([], Some(prefix)) => Err(coded_error(
            ErrorCode::ObjectNotFound,
            format!("no board matches '{prefix}'"),
        )),
        ([], None) => bail!("No boards yet. Create one with `trellis board new --title TITLE`."),
        (many, Some(prefix)) => Err(coded_error(
            ErrorCode::AmbiguousId,
            format!("'{prefix}' matches {} boards", many.len()),
        )),
        (many, None) => Err(coded_error(
            ErrorCode::AmbiguousId,
            format!("{} boards exist; name one by id prefix", many.len()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<Id> {
        vec![Id::of(b"one"), Id::of(b"two")]
    }

    #[test]
    fn single_board_needs_no_prefix() {
        let only = vec![Id::of(b"one")];
        assert_eq!(pick_board(&only, None).unwrap(), only[0]);
    }

    #[test]
    fn full_id_always_resolves() {
        let boards = ids();
        let hex = boards[1].to_hex();
        assert_eq!(pick_board(&boards, Some(&hex)).unwrap(), boards[1]);
    }

    #[test]
    fn omitted_prefix_with_many_boards_is_ambiguous() {
        let err = pick_board(&ids(), None).unwrap_err();
        assert!(format!("{err:#}").contains(ErrorCode::AmbiguousId.code()));
    }

    #[test]
    fn unknown_prefix_reports_not_found() {
        // `zz` is not hex, so it prefixes nothing.
        let err = pick_board(&ids(), Some("zz")).unwrap_err();
        assert!(format!("{err:#}").contains(ErrorCode::ObjectNotFound.code()));
    }

    #[test]
    fn describe_includes_hint() {
        let text = describe(ErrorCode::NotInitialized);
        assert!(text.starts_with("E1001: Repository not initialized"));
        assert!(text.contains("trellis init"));
    }
}
