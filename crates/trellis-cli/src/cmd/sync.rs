use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use trellis_core::board::{Board, BoardError};
use trellis_core::identity::IdentityResolver;
use trellis_core::store::{FsStore, ObjectStore};

use super::{CodedExt, Repo};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Root of the repository to pull boards and identities from.
    #[arg(long)]
    pub from: PathBuf,
}

#[derive(Debug, Default, Serialize)]
struct SyncReport {
    identities_copied: usize,
    boards: Vec<BoardSync>,
}

#[derive(Debug, Serialize)]
struct BoardSync {
    id: String,
    new_operations: usize,
    created: bool,
}

/// Execute `trellis sync --from OTHER`.
///
/// Identities missing locally are copied first so the merged boards can
/// resolve their participants. Then, for every board the other repository
/// has, its history is fetched, merged into the local board (or becomes a
/// new local board) and committed.
///
/// # Errors
///
/// Returns an error if either store cannot be opened, fetched history is
/// incomplete or rooted elsewhere, or the commit keeps losing the ref race.
pub fn run_sync(args: &SyncArgs, output: OutputMode, root: &Path) -> Result<()> {
    let repo = Repo::open(root)?;
    let remote = FsStore::open(&args.from).coded()?;

    let mut report = SyncReport {
        identities_copied: copy_identities(&remote, &repo.store)?,
        ..SyncReport::default()
    };

    for id in remote.list_refs().coded()? {
        let (mut board, created) = match Board::load(&repo.store, id) {
            Ok(board) => (board, false),
            Err(BoardError::NotFound(_)) => (Board::unloaded(id), true),
            Err(e) => return Err(e).coded(),
        };
        let merged = board.fetch(&remote).coded()?;
        board.commit_with(&repo.store, &repo.config.commit).coded()?;

        if merged.changed() {
            tracing::info!(board = %id.human(), new = merged.new_operations, "synced board");
        }
        report.boards.push(BoardSync {
            id: id.to_hex(),
            new_operations: merged.new_operations,
            created,
        });
    }

    render_mode(
        output,
        &report,
        |r, w| {
            for b in &r.boards {
                writeln!(w, "{}\t{}", b.id, b.new_operations)?;
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, "Sync")?;
            pretty_kv(w, "identities", r.identities_copied.to_string())?;
            for b in &r.boards {
                let note = if b.created { " (new)" } else { "" };
                writeln!(w, "  {:.12}  +{} operations{note}", b.id, b.new_operations)?;
            }
            Ok(())
        },
    )
}

fn copy_identities(from: &FsStore, to: &FsStore) -> Result<usize> {
    let mut copied = 0;
    for id in from.list_identities().coded()? {
        if to.resolve(&id).is_ok() {
            continue;
        }
        let identity = from.resolve(&id).coded()?;
        to.store_identity(&identity).coded()?;
        copied += 1;
    }
    Ok(copied)
}
