use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Subcommand};
use serde::Serialize;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use trellis_core::board::{Board, EditContext};
use trellis_core::error::ErrorCode;
use trellis_core::id::CombinedId;
use trellis_core::operation::ItemStatus;
use trellis_core::snapshot::{Column, Item, Snapshot};
use trellis_core::store::ObjectStore;

use super::{CodedExt, Repo, coded_error};

#[derive(Subcommand, Debug)]
pub enum BoardCommand {
    /// Create a board.
    New(NewArgs),

    /// Add a draft item to a column.
    AddDraft(AddDraftArgs),

    /// Show a board's columns, items and participants.
    Show(ShowArgs),

    /// List boards.
    Ls,
}

#[derive(Args, Debug)]
pub struct NewArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Column name; repeat for more columns, in order.
    #[arg(long)]
    pub column: Vec<String>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["title", "file"])))]
pub struct AddDraftArgs {
    /// Board id or unique prefix. May be omitted when only one board exists.
    pub board: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, requires = "title")]
    pub message: Option<String>,

    /// Read the draft from a file (`-` for stdin): first line is the title,
    /// the rest is the message.
    #[arg(long, conflicts_with_all = ["title", "message"])]
    pub file: Option<PathBuf>,

    /// Column position (starting at 1) or a unique prefix of its id.
    /// Defaults to the first column.
    #[arg(long)]
    pub column: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Board id or unique prefix. May be omitted when only one board exists.
    pub board: Option<String>,
}

pub fn run_board(command: &BoardCommand, output: OutputMode, root: &Path) -> Result<()> {
    match command {
        BoardCommand::New(args) => run_new(args, output, root),
        BoardCommand::AddDraft(args) => run_add_draft(args, output, root),
        BoardCommand::Show(args) => run_show(args, output, root),
        BoardCommand::Ls => run_ls(output, root),
    }
}

// ---------------------------------------------------------------------------
// new
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Created {
    id: String,
    title: String,
    columns: Vec<String>,
}

fn run_new(args: &NewArgs, output: OutputMode, root: &Path) -> Result<()> {
    let repo = Repo::open(root)?;
    let author = repo.current_identity()?;
    let columns: Vec<&str> = args.column.iter().map(String::as_str).collect();

    let mut board =
        Board::create(&EditContext::now(&author), &args.title, &args.description, &columns)
            .coded()?;
    board.commit_with(&repo.store, &repo.config.commit).coded()?;

    let created = Created {
        id: board.id().to_hex(),
        title: args.title.clone(),
        columns: args.column.clone(),
    };
    render_mode(
        output,
        &created,
        |c, w| writeln!(w, "{}", c.id),
        |c, w| {
            writeln!(w, "Created board {}", c.id)?;
            pretty_kv(w, "title", &c.title)?;
            pretty_kv(w, "columns", c.columns.join(", "))
        },
    )
}

// ---------------------------------------------------------------------------
// add-draft
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Added {
    item: String,
    column: String,
    title: String,
}

fn run_add_draft(args: &AddDraftArgs, output: OutputMode, root: &Path) -> Result<()> {
    let repo = Repo::open(root)?;
    let author = repo.current_identity()?;
    let board_id = repo.resolve_board(args.board.as_deref())?;

    let (title, message) = match &args.file {
        Some(path) => read_draft(path)?,
        None => (
            args.title.clone().unwrap_or_default(),
            args.message.clone().unwrap_or_default(),
        ),
    };

    let mut board = Board::load(&repo.store, board_id).coded()?;
    let snapshot = board.snapshot(&repo.store).coded()?;
    let column = args
        .column
        .as_deref()
        .map(|arg| pick_column(snapshot, arg))
        .transpose()?;
    let column_name = column
        .or_else(|| snapshot.columns.first())
        .map(|c| c.name.clone())
        .unwrap_or_default();
    let column_id = column.map(|c| c.combined_id);

    let (item, _) = board
        .add_item_draft(
            &EditContext::now(&author),
            column_id.as_ref(),
            &title,
            &message,
            &[],
        )
        .coded()?;
    board.commit_with(&repo.store, &repo.config.commit).coded()?;

    let added = Added {
        item: item.to_string(),
        column: column_name,
        title,
    };
    render_mode(
        output,
        &added,
        |a, w| writeln!(w, "{}", a.item),
        |a, w| {
            writeln!(w, "Added draft to {}", a.column)?;
            pretty_kv(w, "title", &a.title)?;
            pretty_kv(w, "item", &a.item)
        },
    )
}

/// Split draft text into a title (first line) and a message (the rest).
fn split_draft(text: &str) -> (String, String) {
    let text = text.trim_start_matches(['\n', '\r']);
    let (title, rest) = text.split_once('\n').unwrap_or((text, ""));
    (
        title.trim().to_string(),
        rest.trim_matches(['\n', '\r']).to_string(),
    )
}

fn read_draft(path: &Path) -> Result<(String, String)> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read draft from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    Ok(split_draft(&text))
}

/// A decimal argument is a 1-based position; anything else is an id prefix.
fn pick_column<'a>(snapshot: &'a Snapshot, arg: &str) -> Result<&'a Column> {
    if !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit()) {
        let position: usize = arg
            .parse()
            .with_context(|| format!("Invalid column position '{arg}'"))?;
        return position
            .checked_sub(1)
            .and_then(|index| snapshot.columns.get(index))
            .ok_or_else(|| {
                coded_error(
                    ErrorCode::ColumnNotFound,
                    format!(
                        "no column at position {position}; the board has {}",
                        snapshot.columns.len()
                    ),
                )
            });
    }
    snapshot.column_by_prefix(arg).coded()
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BoardView {
    id: String,
    title: String,
    description: String,
    created: DateTime<Utc>,
    edited: DateTime<Utc>,
    operations: usize,
    columns: Vec<ColumnView>,
    participants: Vec<ParticipantView>,
}

#[derive(Debug, Serialize)]
struct ColumnView {
    id: CombinedId,
    name: String,
    items: Vec<ItemView>,
}

#[derive(Debug, Serialize)]
struct ItemView {
    id: CombinedId,
    kind: &'static str,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ParticipantView {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl BoardView {
    fn new(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id().to_hex(),
            title: snapshot.title.clone(),
            description: snapshot.description.clone(),
            created: snapshot.create_time,
            edited: snapshot.edit_time(),
            operations: snapshot.all_operations().len(),
            columns: snapshot
                .columns
                .iter()
                .map(|c| ColumnView {
                    id: c.combined_id,
                    name: c.name.clone(),
                    items: c.items.iter().map(ItemView::new).collect(),
                })
                .collect(),
            participants: snapshot
                .participants
                .iter()
                .map(|p| ParticipantView {
                    id: p.id().to_hex(),
                    name: p.identity().map(trellis_core::Identity::display_name),
                })
                .collect(),
        }
    }
}

impl ItemView {
    fn new(item: &Item) -> Self {
        Self {
            id: item.combined_id(),
            kind: match item {
                Item::Draft(_) => "draft",
                Item::Entity(_) => "entity",
            },
            label: item.label(),
            status: item.status().map(ItemStatus::as_str),
        }
    }
}

fn run_show(args: &ShowArgs, output: OutputMode, root: &Path) -> Result<()> {
    let repo = Repo::open(root)?;
    let board_id = repo.resolve_board(args.board.as_deref())?;
    let mut board = Board::load(&repo.store, board_id).coded()?;
    let view = BoardView::new(board.snapshot(&repo.store).coded()?);

    render_mode(
        output,
        &view,
        |v, w| {
            for (index, column) in v.columns.iter().enumerate() {
                for item in &column.items {
                    writeln!(w, "{}\t{}\t{}\t{}", index + 1, column.name, item.id, item.label)?;
                }
            }
            Ok(())
        },
        |v, w| {
            writeln!(w, "{}", v.title)?;
            if !v.description.is_empty() {
                writeln!(w, "{}", v.description)?;
            }
            writeln!(w)?;
            pretty_kv(w, "id", &v.id)?;
            pretty_kv(w, "created", v.created.to_rfc3339())?;
            pretty_kv(w, "edited", v.edited.to_rfc3339())?;
            pretty_kv(w, "operations", v.operations.to_string())?;
            for (index, column) in v.columns.iter().enumerate() {
                writeln!(w)?;
                pretty_section(
                    w,
                    &format!("{}. {} ({})", index + 1, column.name, column.items.len()),
                )?;
                for item in &column.items {
                    writeln!(w, "  {}  {}", item.id.human(), item.label)?;
                }
            }
            writeln!(w)?;
            pretty_section(w, "Participants")?;
            for p in &v.participants {
                writeln!(w, "  {}", p.name.as_deref().unwrap_or(&p.id))?;
            }
            Ok(())
        },
    )
}

// ---------------------------------------------------------------------------
// ls
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BoardRow {
    id: String,
    title: String,
    columns: usize,
    items: usize,
    edited: DateTime<Utc>,
}

fn run_ls(output: OutputMode, root: &Path) -> Result<()> {
    let repo = Repo::open(root)?;
    let mut rows = Vec::new();
    for id in repo.store.list_refs().coded()? {
        let mut board = Board::load(&repo.store, id).coded()?;
        let snapshot = board.snapshot(&repo.store).coded()?;
        rows.push(BoardRow {
            id: id.to_hex(),
            title: snapshot.title.clone(),
            columns: snapshot.columns.len(),
            items: snapshot.item_count(),
            edited: snapshot.edit_time(),
        });
    }

    render_mode(
        output,
        &rows,
        |rows, w| {
            for r in rows {
                writeln!(w, "{}\t{}", r.id, r.title)?;
            }
            Ok(())
        },
        |rows, w| {
            pretty_section(w, "Boards")?;
            for r in rows {
                writeln!(
                    w,
                    "{:.12}  {:<32} {} columns, {} items",
                    r.id, r.title, r.columns, r.items
                )?;
            }
            Ok(())
        },
    )
}
