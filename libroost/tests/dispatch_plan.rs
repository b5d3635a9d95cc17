//! Dispatch planner integration tests: selection, variants, stagger,
//! idempotent re-dispatch.

use tempfile::TempDir;

use libroost::db::Database;
use libroost::dispatch::{self, DispatchRequest, SelectionMode};
use libroost::types::{
    new_id, now_ts, Account, AccountStatus, Content, ContentStatus, ScheduleStatus,
};
use libroost::RoostError;

async fn setup_db() -> (TempDir, Database) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("plan.db");
    let db = Database::new(&path.to_string_lossy()).await.unwrap();
    (temp, db)
}

fn account(username: &str, language: Option<&str>) -> Account {
    Account {
        id: new_id(),
        x_user_id: new_id(),
        username: username.into(),
        display_name: username.into(),
        language: language.map(str::to_owned),
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

fn content(topic: Option<&str>, language: Option<&str>) -> Content {
    Content {
        id: new_id(),
        title: "release".into(),
        body: "The release notes are up.".into(),
        topic: topic.map(str::to_owned),
        language: language.map(str::to_owned),
        status: ContentStatus::Approved,
    }
}

fn manual_request(content_id: &str, accounts: &[&Account], at: i64) -> DispatchRequest {
    DispatchRequest {
        content_id: content_id.to_string(),
        mode: SelectionMode::Manual,
        account_ids: accounts.iter().map(|a| a.id.clone()).collect(),
        schedule_at: Some(at),
        stagger_minutes: 15,
        priority: 10,
        max_attempts: 3,
    }
}

#[tokio::test]
async fn manual_dispatch_creates_staggered_schedules() {
    let (_t, db) = setup_db().await;
    let a = account("one", None);
    let b = account("two", None);
    let c = content(None, None);
    db.insert_account(&a).await.unwrap();
    db.insert_account(&b).await.unwrap();
    db.insert_content(&c).await.unwrap();

    let at = now_ts() + 3600;
    let summary = dispatch::plan(&db, manual_request(&c.id, &[&a, &b], at))
        .await
        .unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.account_ids, vec![a.id.clone(), b.id.clone()]);

    let mut schedules = db.pending_schedules(10).await.unwrap();
    schedules.sort_by_key(|s| s.planned_at);
    assert_eq!(schedules.len(), 2);
    assert_eq!(schedules[0].planned_at, at);
    assert_eq!(schedules[1].planned_at, at + 15 * 60);
    assert!(schedules.iter().all(|s| s.priority == 10));
    assert!(schedules.iter().all(|s| s.status == ScheduleStatus::Pending));

    // variants were materialized per account with distinct bodies
    let va = db.find_variant(&c.id, &a.id).await.unwrap().unwrap();
    let vb = db.find_variant(&c.id, &b.id).await.unwrap().unwrap();
    assert_ne!(va.body, vb.body);
    assert!(vb.body.contains("(@two edition)"));
    assert_eq!(va.similarity_key.len(), 24);
}

#[tokio::test]
async fn re_dispatch_with_same_parameters_is_a_no_op() {
    let (_t, db) = setup_db().await;
    let a = account("solo", None);
    let c = content(None, None);
    db.insert_account(&a).await.unwrap();
    db.insert_content(&c).await.unwrap();

    let at = now_ts() + 600;
    let first = dispatch::plan(&db, manual_request(&c.id, &[&a], at))
        .await
        .unwrap();
    assert_eq!((first.created, first.skipped), (1, 0));

    let second = dispatch::plan(&db, manual_request(&c.id, &[&a], at))
        .await
        .unwrap();
    assert_eq!((second.created, second.skipped), (0, 1));

    assert_eq!(db.pending_schedules(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn re_dispatch_at_a_new_time_reuses_the_variant() {
    let (_t, db) = setup_db().await;
    let a = account("again", None);
    let c = content(None, None);
    db.insert_account(&a).await.unwrap();
    db.insert_content(&c).await.unwrap();

    let at = now_ts() + 600;
    dispatch::plan(&db, manual_request(&c.id, &[&a], at))
        .await
        .unwrap();
    let variant_before = db.find_variant(&c.id, &a.id).await.unwrap().unwrap();

    dispatch::plan(&db, manual_request(&c.id, &[&a], at + 7200))
        .await
        .unwrap();
    let variant_after = db.find_variant(&c.id, &a.id).await.unwrap().unwrap();

    assert_eq!(variant_before.id, variant_after.id);
    assert_eq!(db.pending_schedules(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_account_ids_are_deduplicated() {
    let (_t, db) = setup_db().await;
    let a = account("dup", None);
    let c = content(None, None);
    db.insert_account(&a).await.unwrap();
    db.insert_content(&c).await.unwrap();

    let summary = dispatch::plan(&db, manual_request(&c.id, &[&a, &a, &a], now_ts()))
        .await
        .unwrap();
    assert_eq!(summary.created, 1);
}

#[tokio::test]
async fn rule_mode_selects_by_tag_or_language() {
    let (_t, db) = setup_db().await;
    let tagged = account("tagged", Some("de"));
    let english = account("english", Some("en"));
    let neither = account("neither", Some("fr"));
    for a in [&tagged, &english, &neither] {
        db.insert_account(a).await.unwrap();
    }
    db.set_account_tags(&tagged.id, &["Rust", "oss"]).await.unwrap();

    let c = content(Some("rust"), Some("EN"));
    db.insert_content(&c).await.unwrap();

    let summary = dispatch::plan(
        &db,
        DispatchRequest {
            content_id: c.id.clone(),
            schedule_at: Some(now_ts() + 60),
            ..DispatchRequest::new(c.id.clone())
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.created, 2);
    assert!(summary.account_ids.contains(&tagged.id));
    assert!(summary.account_ids.contains(&english.id));
    assert!(!summary.account_ids.contains(&neither.id));
}

#[tokio::test]
async fn rule_mode_with_no_match_is_an_error() {
    let (_t, db) = setup_db().await;
    let a = account("lonely", Some("fr"));
    db.insert_account(&a).await.unwrap();
    let c = content(Some("space"), Some("en"));
    db.insert_content(&c).await.unwrap();

    let err = dispatch::plan(&db, DispatchRequest::new(c.id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, RoostError::InvalidInput(_)));
}

#[tokio::test]
async fn manual_mode_requires_accounts() {
    let (_t, db) = setup_db().await;
    let c = content(None, None);
    db.insert_content(&c).await.unwrap();

    let err = dispatch::plan(
        &db,
        DispatchRequest {
            mode: SelectionMode::Manual,
            ..DispatchRequest::new(c.id.clone())
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RoostError::InvalidInput(_)));
}

#[tokio::test]
async fn unknown_content_is_an_error() {
    let (_t, db) = setup_db().await;
    let err = dispatch::plan(&db, DispatchRequest::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, RoostError::InvalidInput(_)));
}
