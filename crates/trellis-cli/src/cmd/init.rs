use crate::output::{OutputMode, pretty_kv, render_mode};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::Path;
use trellis_core::config::{RepoConfig, repo_config_path, save_repo_config};
use trellis_core::store::FsStore;

use super::CodedExt;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `config.toml` with defaults.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct InitReport {
    store: String,
    config: String,
    config_written: bool,
}

/// Execute `trellis init`. Creates the store skeleton:
///
/// ```text
/// .trellis/
///   objects/
///   refs/boards/
///   identities/
///   config.toml
/// ```
///
/// Existing objects and refs are left alone, so running it twice is safe.
///
/// # Errors
///
/// Returns an error if a directory or the config file cannot be written.
pub fn run_init(args: &InitArgs, output: OutputMode, root: &Path) -> Result<()> {
    let store = FsStore::init(root).coded()?;
    let config_path = repo_config_path(root);

    let config_written = args.force || !config_path.exists();
    if config_written {
        save_repo_config(root, &RepoConfig::default())?;
    }

    let report = InitReport {
        store: store.dir().display().to_string(),
        config: config_path.display().to_string(),
        config_written,
    };

    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "{}", r.store),
        |r, w| {
            writeln!(w, "Initialized trellis store")?;
            pretty_kv(w, "store", &r.store)?;
            pretty_kv(
                w,
                "config",
                if r.config_written {
                    r.config.clone()
                } else {
                    format!("{} (kept)", r.config)
                },
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::config::load_repo_config;

    #[test]
    fn init_creates_layout_and_config() {
        let dir = tempfile::tempdir().unwrap();
        run_init(&InitArgs { force: false }, OutputMode::Text, dir.path()).unwrap();

        let store = dir.path().join(".trellis");
        assert!(store.join("objects").is_dir());
        assert!(store.join("refs/boards").is_dir());
        assert!(store.join("identities").is_dir());
        assert!(store.join("config.toml").is_file());
    }

    #[test]
    fn init_keeps_existing_config_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        run_init(&InitArgs { force: false }, OutputMode::Text, dir.path()).unwrap();

        let mut custom = RepoConfig::default();
        custom.commit.max_attempts = 9;
        save_repo_config(dir.path(), &custom).unwrap();

        run_init(&InitArgs { force: false }, OutputMode::Text, dir.path()).unwrap();
        assert_eq!(load_repo_config(dir.path()).unwrap().commit.max_attempts, 9);

        run_init(&InitArgs { force: true }, OutputMode::Text, dir.path()).unwrap();
        assert_eq!(load_repo_config(dir.path()).unwrap().commit.max_attempts, 3);
    }
}
