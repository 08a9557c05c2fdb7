use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::id::Id;
use crate::store::STORE_DIR;

/// Settings read from `.trellis/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub user: UserConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Ref updates tried before a commit gives up with a conflict.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl LockConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Hex id of the identity used to author operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

impl UserConfig {
    /// The configured identity id, if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured value is not a valid id.
    pub fn identity_id(&self) -> Result<Option<Id>> {
        self.identity
            .as_deref()
            .map(|raw| {
                raw.parse::<Id>()
                    .with_context(|| format!("Invalid [user] identity '{raw}'"))
            })
            .transpose()
    }
}

/// Path of the repository config file.
#[must_use]
pub fn repo_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(STORE_DIR).join("config.toml")
}

/// Path of the per-user fallback config, if the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("trellis/config.toml"))
}

/// Load `.trellis/config.toml`; a missing file yields defaults.
///
/// When the repository sets no `[user] identity`, the per-user config file is
/// consulted for one.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be read or parsed.
pub fn load_repo_config(repo_root: &Path) -> Result<RepoConfig> {
    let mut config = read_config(&repo_config_path(repo_root))?.unwrap_or_default();
    if config.user.identity.is_none() {
        if let Some(path) = user_config_path() {
            if let Some(user) = read_config(&path)? {
                config.user = user.user;
            }
        }
    }
    Ok(config)
}

/// Write `config` to `.trellis/config.toml`.
///
/// # Errors
///
/// Returns an error if the config cannot be serialized or written.
pub fn save_repo_config(repo_root: &Path, config: &RepoConfig) -> Result<()> {
    let path = repo_config_path(repo_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn read_config(path: &Path) -> Result<Option<RepoConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<RepoConfig>(&content)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_timeout_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_uses_defaults() {
        let root = tempfile::tempdir().expect("temp dir");
        let cfg = read_config(&repo_config_path(root.path())).expect("load should succeed");
        assert!(cfg.is_none());

        let defaults = RepoConfig::default();
        assert_eq!(defaults.commit.max_attempts, 3);
        assert_eq!(defaults.lock.timeout(), Duration::from_millis(5000));
        assert_eq!(defaults.user.identity, None);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: RepoConfig = toml::from_str("[commit]\nmax_attempts = 7\n").expect("parse");
        assert_eq!(cfg.commit.max_attempts, 7);
        assert_eq!(cfg.lock.timeout_ms, 5000);
    }

    #[test]
    fn save_then_load_round_trips() {
        let root = tempfile::tempdir().expect("temp dir");
        let mut cfg = RepoConfig::default();
        cfg.commit.max_attempts = 5;
        cfg.user.identity = Some(Id::of(b"alice").to_hex());
        save_repo_config(root.path(), &cfg).expect("save");

        let loaded = load_repo_config(root.path()).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(
            loaded.user.identity_id().expect("valid id"),
            Some(Id::of(b"alice"))
        );
    }

    #[test]
    fn malformed_config_reports_path() {
        let root = tempfile::tempdir().expect("temp dir");
        let path = repo_config_path(root.path());
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "[commit\nmax_attempts = ").expect("write");

        let err = load_repo_config(root.path()).expect_err("should fail");
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn invalid_identity_is_rejected() {
        let user = UserConfig {
            identity: Some("not-hex".into()),
        };
        assert!(user.identity_id().is_err());
    }
}
