//! CLI integration tests for roost-dispatch.
//!
//! Each test points the binary at its own scratch database through
//! ROOST_DB_PATH and seeds rows through the library.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use libroost::types::{new_id, Account, AccountStatus, Content, ContentStatus};
use libroost::Database;

fn cmd(db_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("roost-dispatch").unwrap();
    cmd.env("ROOST_DB_PATH", db_path);
    cmd
}

fn account(username: &str) -> Account {
    Account {
        id: new_id(),
        x_user_id: new_id(),
        username: username.into(),
        display_name: username.into(),
        language: Some("en".into()),
        purpose: None,
        access_token_enc: "sealed".into(),
        refresh_token_enc: None,
        token_expires_at: None,
        status: AccountStatus::Active,
        health_message: None,
        min_interval_minutes: 30,
        daily_post_limit: 10,
        monthly_post_limit: 100,
        last_posted_at: None,
        proxy_enabled: false,
        proxy_protocol: None,
        proxy_host: None,
        proxy_port: None,
        proxy_username: None,
        proxy_password_enc: None,
    }
}

async fn seed(db_path: &str) -> (Account, Content) {
    let db = Database::new(db_path).await.unwrap();
    let a = account("cli-account");
    let c = Content {
        id: new_id(),
        title: "release".into(),
        body: "Release notes are out.".into(),
        topic: None,
        language: Some("en".into()),
        status: ContentStatus::Approved,
    };
    db.insert_account(&a).await.unwrap();
    db.insert_content(&c).await.unwrap();
    (a, c)
}

#[tokio::test]
async fn queue_on_empty_database() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("cli.db").to_string_lossy().into_owned();
    // create the schema first so the binary sees a valid store
    let _ = Database::new(&db_path).await.unwrap();

    cmd(&db_path)
        .args(["queue"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queue is empty."));
}

#[tokio::test]
async fn dispatch_then_queue_shows_the_schedule() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("cli.db").to_string_lossy().into_owned();
    let (a, c) = seed(&db_path).await;

    cmd(&db_path)
        .args([
            "dispatch",
            &c.id,
            "--mode",
            "manual",
            "--accounts",
            &a.id,
            "--at",
            "2030-01-01T09:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 schedule(s) created"));

    cmd(&db_path)
        .args(["queue", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PENDING"))
        .stdout(predicate::str::contains(&a.id));
}

#[tokio::test]
async fn re_dispatch_is_reported_as_skipped() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("cli.db").to_string_lossy().into_owned();
    let (a, c) = seed(&db_path).await;

    let args = [
        "dispatch",
        c.id.as_str(),
        "--mode",
        "manual",
        "--accounts",
        a.id.as_str(),
        "--at",
        "2030-01-01T09:00:00Z",
    ];
    cmd(&db_path).args(args).assert().success();
    cmd(&db_path)
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 schedule(s) created"))
        .stdout(predicate::str::contains("1 skipped"));
}

#[tokio::test]
async fn unknown_content_exits_with_invalid_input_code() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("cli.db").to_string_lossy().into_owned();
    let _ = Database::new(&db_path).await.unwrap();

    cmd(&db_path)
        .args(["dispatch", "no-such-content"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("unknown content"));
}

#[tokio::test]
async fn bad_time_format_is_rejected() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("cli.db").to_string_lossy().into_owned();
    let (a, c) = seed(&db_path).await;

    cmd(&db_path)
        .args([
            "dispatch",
            &c.id,
            "--mode",
            "manual",
            "--accounts",
            &a.id,
            "--at",
            "tomorrow 3pm",
        ])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("invalid --at time"));
}
