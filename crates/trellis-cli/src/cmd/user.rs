use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use std::path::Path;
use trellis_core::config::save_repo_config;
use trellis_core::identity::{Identity, IdentityResolver};

use super::{CodedExt, Repo};

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Store a new identity and make it the current author.
    Create {
        /// Display name.
        #[arg(long)]
        name: String,

        /// Contact email.
        #[arg(long)]
        email: String,
    },

    /// List stored identities.
    Ls,
}

#[derive(Debug, Serialize)]
struct UserRow {
    id: String,
    #[serde(skip)]
    short: String,
    name: String,
    email: String,
    current: bool,
}

impl UserRow {
    fn new(identity: &Identity, current: bool) -> Self {
        Self {
            id: identity.id().to_hex(),
            short: identity.id().human(),
            name: identity.name().to_string(),
            email: identity.email().to_string(),
            current,
        }
    }
}

pub fn run_user(command: &UserCommand, output: OutputMode, root: &Path) -> Result<()> {
    match command {
        UserCommand::Create { name, email } => run_create(name, email, output, root),
        UserCommand::Ls => run_ls(output, root),
    }
}

fn run_create(name: &str, email: &str, output: OutputMode, root: &Path) -> Result<()> {
    let mut repo = Repo::open(root)?;
    let identity = Identity::new(name, email, None).coded()?;
    repo.store.store_identity(&identity).coded()?;

    repo.config.user.identity = Some(identity.id().to_hex());
    save_repo_config(&repo.root, &repo.config)?;
    tracing::info!(identity = %identity.id().human(), "set current identity");

    let row = UserRow::new(&identity, true);
    render_mode(
        output,
        &row,
        |r, w| writeln!(w, "{}", r.id),
        |r, w| {
            writeln!(w, "Created identity {}", r.short)?;
            pretty_kv(w, "name", &r.name)?;
            pretty_kv(w, "email", &r.email)
        },
    )
}

fn run_ls(output: OutputMode, root: &Path) -> Result<()> {
    let repo = Repo::open(root)?;
    let current = repo.config.user.identity_id()?;

    let rows = repo
        .store
        .list_identities()
        .coded()?
        .into_iter()
        .map(|id| {
            let identity = repo.store.resolve(&id).coded()?;
            Ok(UserRow::new(&identity, current == Some(id)))
        })
        .collect::<Result<Vec<_>>>()?;

    render_mode(
        output,
        &rows,
        |rows, w| {
            for r in rows {
                writeln!(w, "{}\t{}\t{}", r.id, r.name, r.email)?;
            }
            Ok(())
        },
        |rows, w| {
            pretty_section(w, "Identities")?;
            for r in rows {
                let marker = if r.current { "*" } else { " " };
                writeln!(w, "{marker} {}  {} <{}>", r.short, r.name, r.email)?;
            }
            Ok(())
        },
    )
}
