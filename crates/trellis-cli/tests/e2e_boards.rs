//! E2E CLI tests covering:
//! - Repository setup (`trellis init`, `trellis user create`)
//! - Board lifecycle (`board new`, `board add-draft`, `board show`, `board ls`)
//! - Column selection by position and id prefix, draft input from a file
//! - Exchanging boards between repositories (`trellis sync`)
//!
//! Each test runs the `trellis` binary as a subprocess in an isolated temp
//! directory.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

/// Build a Command targeting the trellis binary, rooted in `dir`.
fn trellis(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("trellis"));
    cmd.current_dir(dir);
    cmd.env("TRELLIS_LOG", "error");
    // Keep the per-user config out of the picture.
    cmd.env("XDG_CONFIG_HOME", dir.join(".xdg"));
    cmd.env("HOME", dir);
    cmd
}

fn json(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").output().expect("command should not crash");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

/// Initialize a repository in `dir` with a current identity.
fn setup(dir: &Path, name: &str) -> String {
    trellis(dir).arg("init").assert().success();
    let email = format!("{}@example.com", name.to_lowercase());
    let user = json(trellis(dir).args([
        "user",
        "create",
        "--name",
        name,
        "--email",
        email.as_str(),
    ]));
    user["id"].as_str().expect("id field").to_string()
}

fn new_board(dir: &Path, title: &str, columns: &[&str]) -> String {
    let mut cmd = trellis(dir);
    cmd.args(["board", "new", "--title", title]);
    for column in columns {
        cmd.args(["--column", *column]);
    }
    json(&mut cmd)["id"].as_str().expect("id field").to_string()
}

fn show(dir: &Path, board: &str) -> Value {
    json(trellis(dir).args(["board", "show", board]))
}

fn item_titles(view: &Value, column: usize) -> Vec<String> {
    view["columns"][column]["items"]
        .as_array()
        .expect("items array")
        .iter()
        .map(|item| item["label"].as_str().expect("label").to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn commands_before_init_report_not_initialized() {
    let dir = TempDir::new().unwrap();
    trellis(dir.path())
        .args(["board", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1001"))
        .stderr(predicate::str::contains("trellis init"));
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    trellis(dir.path()).arg("init").assert().success();
    trellis(dir.path()).arg("init").assert().success();
    assert!(dir.path().join(".trellis/objects").is_dir());
    assert!(dir.path().join(".trellis/config.toml").is_file());
}

#[test]
fn board_new_requires_identity() {
    let dir = TempDir::new().unwrap();
    trellis(dir.path()).arg("init").assert().success();
    trellis(dir.path())
        .args(["board", "new", "--title", "Sprint"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("user create"));
}

#[test]
fn board_lifecycle() {
    let dir = TempDir::new().unwrap();
    let alice = setup(dir.path(), "Alice");
    let board = new_board(dir.path(), "Sprint", &["Todo", "Doing", "Done"]);

    let added = json(trellis(dir.path()).args([
        "board",
        "add-draft",
        "--title",
        "Fix crash",
        "--message",
        "stack trace",
    ]));
    let item = added["item"].as_str().expect("item field");
    assert_eq!(item.len(), 128);
    assert!(item.starts_with(&board));
    assert_eq!(added["column"], "Todo");

    trellis(dir.path())
        .args(["board", "add-draft", "--title", "Ship it", "--column", "3"])
        .assert()
        .success();

    let view = show(dir.path(), &board[..8]);
    assert_eq!(view["title"], "Sprint");
    assert_eq!(item_titles(&view, 0), ["Fix crash"]);
    assert!(item_titles(&view, 1).is_empty());
    assert_eq!(item_titles(&view, 2), ["Ship it"]);
    assert_eq!(view["columns"][0]["items"][0]["id"], item);
    assert_eq!(view["operations"], 3);
    assert_eq!(view["participants"][0]["id"], alice.as_str());
    assert_eq!(view["participants"][0]["name"], "Alice <alice@example.com>");

    let boards = json(trellis(dir.path()).args(["board", "ls"]));
    assert_eq!(boards.as_array().map(Vec::len), Some(1));
    assert_eq!(boards[0]["items"], 2);
}

#[test]
fn add_draft_reads_title_and_message_from_file() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), "Alice");
    let board = new_board(dir.path(), "Sprint", &["Todo", "Done"]);

    let view = show(dir.path(), &board);
    let done = view["columns"][1]["id"].as_str().expect("column id");
    // Board half plus the start of the column's local half.
    let done_prefix = &done[..76];

    let draft = dir.path().join("draft.md");
    std::fs::write(&draft, "Write release notes\n\nCover the sync command.\n").unwrap();
    trellis(dir.path())
        .args(["board", "add-draft", board.as_str(), "--column", done_prefix, "--file"])
        .arg(&draft)
        .assert()
        .success();

    trellis(dir.path())
        .args(["board", "add-draft", board.as_str(), "--column", "2", "--file", "-"])
        .write_stdin("From stdin\nbody\n")
        .assert()
        .success();

    let view = show(dir.path(), &board);
    assert_eq!(
        item_titles(&view, 1),
        ["Write release notes", "From stdin"]
    );
}

#[test]
fn add_draft_rejects_bad_columns_and_titles() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), "Alice");
    new_board(dir.path(), "Sprint", &["Todo"]);

    trellis(dir.path())
        .args(["board", "add-draft", "--title", "x", "--column", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2003"));

    trellis(dir.path())
        .args(["board", "add-draft", "--title", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2005"));
}

#[test]
fn board_id_is_required_when_several_exist() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), "Alice");
    new_board(dir.path(), "One", &["Todo"]);
    new_board(dir.path(), "Two", &["Todo"]);

    trellis(dir.path())
        .args(["board", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2007"));
}

#[test]
fn sync_merges_concurrent_edits_both_ways() {
    let origin = TempDir::new().unwrap();
    let mirror = TempDir::new().unwrap();
    setup(origin.path(), "Alice");
    setup(mirror.path(), "Bob");

    let board = new_board(origin.path(), "Shared", &["Todo"]);
    let first = json(trellis(mirror.path()).args(["sync", "--from"]).arg(origin.path()));
    assert_eq!(first["boards"][0]["created"], true);
    assert_eq!(first["identities_copied"], 1);

    trellis(origin.path())
        .args(["board", "add-draft", "--title", "from origin"])
        .assert()
        .success();
    trellis(mirror.path())
        .args(["board", "add-draft", "--title", "from mirror"])
        .assert()
        .success();

    trellis(origin.path())
        .args(["sync", "--from"])
        .arg(mirror.path())
        .assert()
        .success();
    trellis(mirror.path())
        .args(["sync", "--from"])
        .arg(origin.path())
        .assert()
        .success();

    let a = show(origin.path(), &board);
    let b = show(mirror.path(), &board);
    assert_eq!(a, b);
    assert_eq!(a["columns"][0]["items"].as_array().map(Vec::len), Some(2));
    assert_eq!(a["participants"].as_array().map(Vec::len), Some(2));
    assert!(a["participants"][1]["name"].is_string());
}
