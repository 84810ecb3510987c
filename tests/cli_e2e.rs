//! End-to-end tests running the fv binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write a config pointing every path into the temp directory.
fn write_config(dir: &TempDir) -> PathBuf {
    let root = dir.path();
    let config_path = root.join("config.toml");
    let contents = format!(
        r#"
[paths]
db = "{base}/feedvault.db"
fav_db = "{base}/favorites.db"

[paths.roots]
x = "{base}/x"
bsky = "{base}/bsky"
reddit = "{base}/reddit"
fa = "{base}/fa"
"#,
        base = root.display()
    );
    fs::write(&config_path, contents).unwrap();
    config_path
}

fn write_x_post(dir: &Path, id: &str, content: &str) {
    fs::write(
        dir.join(format!("{id}_1.json")),
        serde_json::json!({
            "tweet_id": id,
            "content": content,
            "author": {"name": "alice", "nick": "Alice", "profile_image": ""},
            "date": "2024-05-01 10:00:00",
            "favorite_count": 1,
            "retweet_count": 0,
            "reply_count": 0
        })
        .to_string(),
    )
    .unwrap();
}

fn fv() -> Command {
    Command::cargo_bin("fv").unwrap()
}

#[test]
fn help_lists_commands() {
    fv().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("flag"));
}

#[test]
fn scan_then_search_finds_ingested_posts() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir);
    let alice = dir.path().join("x/alice");
    fs::create_dir_all(&alice).unwrap();
    write_x_post(&alice, "1846740334567001", "integration smoke content");

    fv().args(["--config"])
        .arg(&config_path)
        .args(["--quiet", "scan", "--source", "x"])
        .assert()
        .success();

    fv().args(["--config"])
        .arg(&config_path)
        .args(["--quiet", "search", "smoke"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 matching posts"))
        .stdout(predicate::str::contains("alice@x"));

    fv().args(["--config"])
        .arg(&config_path)
        .args(["--quiet", "search", "absent-term"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 matching posts"));
}

#[test]
fn flag_marks_an_account() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir);
    let alice = dir.path().join("x/alice");
    fs::create_dir_all(&alice).unwrap();
    write_x_post(&alice, "1846740334567002", "flag me");

    fv().args(["--config"])
        .arg(&config_path)
        .args(["--quiet", "scan", "--source", "x"])
        .assert()
        .success();

    fv().args(["--config"])
        .arg(&config_path)
        .args(["--quiet", "flag", "alice@x"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Flagged alice@x"));

    fv().args(["--config"])
        .arg(&config_path)
        .args(["--quiet", "flag", "not-a-uid"])
        .assert()
        .failure();
}
