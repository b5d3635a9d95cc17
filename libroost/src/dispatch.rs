//! Dispatch planner: content × accounts → schedules
//!
//! Routes one content to a set of accounts, materializes per-account
//! variants, and inserts staggered schedules under deterministic
//! idempotency keys, so re-running a dispatch with the same parameters is
//! a no-op.

use serde::Serialize;
use tracing::info;

use crate::db::{ActivityEntry, Database};
use crate::error::{Result, RoostError};
use crate::similarity::fingerprint;
use crate::types::{
    new_id, now_ts, Account, Content, ContentVariant, LogLevel, Schedule, ScheduleStatus,
};

pub const MAX_STAGGER_MINUTES: i64 = 120;
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// Rotating closers appended per account index so fleet posts of the same
/// content do not share exact bytes.
const SUFFIX_BANK: &[&str] = &[
    "",
    "Worth a read.",
    "Thoughts?",
    "Bookmark this one.",
    "More on this soon.",
];

const ZH_CALL_TO_ACTION: &str = "欢迎关注，获取更多内容。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Rule,
    Manual,
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub content_id: String,
    pub mode: SelectionMode,
    /// Target accounts for `manual` mode; ignored for `rule`.
    pub account_ids: Vec<String>,
    /// First planned time; defaults to now.
    pub schedule_at: Option<i64>,
    pub stagger_minutes: i64,
    pub priority: i64,
    pub max_attempts: i64,
}

impl DispatchRequest {
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            mode: SelectionMode::Rule,
            account_ids: Vec::new(),
            schedule_at: None,
            stagger_minutes: 0,
            priority: 100,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub content_id: String,
    pub created: usize,
    pub skipped: usize,
    pub account_ids: Vec<String>,
}

/// Plan and persist schedules for one content.
pub async fn plan(db: &Database, req: DispatchRequest) -> Result<DispatchSummary> {
    validate(&req)?;

    let content = db
        .get_content(&req.content_id)
        .await?
        .ok_or_else(|| RoostError::InvalidInput(format!("unknown content: {}", req.content_id)))?;

    let targets = select_targets(db, &req, &content).await?;
    let schedule_at = req.schedule_at.unwrap_or_else(now_ts);

    let mut new_variants = Vec::new();
    let mut schedules = Vec::with_capacity(targets.len());

    for (index, account) in targets.iter().enumerate() {
        let variant = match db.find_variant(&content.id, &account.id).await? {
            Some(existing) => existing,
            None => {
                let body = variant_body(&content, account, index);
                let variant = ContentVariant {
                    id: new_id(),
                    content_id: content.id.clone(),
                    account_id: Some(account.id.clone()),
                    body: body.clone(),
                    similarity_key: fingerprint(&body),
                };
                new_variants.push(variant.clone());
                variant
            }
        };

        let planned_at = schedule_at + index as i64 * req.stagger_minutes * 60;
        schedules.push(Schedule {
            id: new_id(),
            account_id: account.id.clone(),
            content_id: content.id.clone(),
            content_variant_id: variant.id,
            planned_at,
            status: ScheduleStatus::Pending,
            idempotency_key: Schedule::idempotency_key_for(&content.id, &account.id, planned_at),
            priority: req.priority,
            attempt_count: 0,
            max_attempts: req.max_attempts,
            next_attempt_at: None,
            posted_at: None,
            external_post_id: None,
            last_error: None,
        });
    }

    let log = ActivityEntry::new(
        LogLevel::Info,
        "content_dispatched",
        format!("dispatched to {} account(s)", targets.len()),
    )
    .with_meta(serde_json::json!({
        "mode": req.mode,
        "staggerMinutes": req.stagger_minutes,
        "priority": req.priority,
    }));

    let (created, skipped) = db.insert_dispatch(&new_variants, &schedules, log).await?;
    info!(
        content_id = %content.id,
        created, skipped,
        "dispatch planned"
    );

    Ok(DispatchSummary {
        content_id: content.id,
        created,
        skipped,
        account_ids: targets.into_iter().map(|a| a.id).collect(),
    })
}

fn validate(req: &DispatchRequest) -> Result<()> {
    if !(0..=MAX_STAGGER_MINUTES).contains(&req.stagger_minutes) {
        return Err(RoostError::InvalidInput(format!(
            "stagger must be within 0..={MAX_STAGGER_MINUTES} minutes"
        )));
    }
    if !(1..=1000).contains(&req.priority) {
        return Err(RoostError::InvalidInput(
            "priority must be within 1..=1000".to_string(),
        ));
    }
    if !(1..=8).contains(&req.max_attempts) {
        return Err(RoostError::InvalidInput(
            "max attempts must be within 1..=8".to_string(),
        ));
    }
    Ok(())
}

async fn select_targets(
    db: &Database,
    req: &DispatchRequest,
    content: &Content,
) -> Result<Vec<Account>> {
    match req.mode {
        SelectionMode::Manual => {
            let mut seen = std::collections::HashSet::new();
            let mut targets = Vec::new();
            for id in &req.account_ids {
                if !seen.insert(id.as_str()) {
                    continue;
                }
                let account = db.get_account(id).await?.ok_or_else(|| {
                    RoostError::InvalidInput(format!("unknown account: {id}"))
                })?;
                targets.push(account);
            }
            if targets.is_empty() {
                return Err(RoostError::InvalidInput(
                    "manual dispatch requires at least one account".to_string(),
                ));
            }
            Ok(targets)
        }
        SelectionMode::Rule => {
            let accounts = db.accounts_with_tags().await?;
            let targets: Vec<Account> = accounts
                .into_iter()
                .filter(|(account, tags)| rule_matches(content, account, tags))
                .map(|(account, _)| account)
                .collect();
            if targets.is_empty() {
                return Err(RoostError::InvalidInput(
                    "no account matches the content's topic or language".to_string(),
                ));
            }
            Ok(targets)
        }
    }
}

/// Rule selection: a tag equal to the content topic, or a matching account
/// language. Both comparisons are trimmed and case-insensitive.
fn rule_matches(content: &Content, account: &Account, tags: &[String]) -> bool {
    let norm = |s: &str| s.trim().to_lowercase();

    if let Some(topic) = content.topic.as_deref().map(norm).filter(|t| !t.is_empty()) {
        if tags.iter().any(|tag| norm(tag) == topic) {
            return true;
        }
    }
    if let (Some(cl), Some(al)) = (content.language.as_deref(), account.language.as_deref()) {
        if norm(cl) == norm(al) && !norm(cl).is_empty() {
            return true;
        }
    }
    false
}

/// Build the per-account variant text for a fresh (content, account) pair.
fn variant_body(content: &Content, account: &Account, index: usize) -> String {
    let mut body = content.body.trim().to_string();

    let suffix = SUFFIX_BANK[index % SUFFIX_BANK.len()];
    if !suffix.is_empty() {
        body.push(' ');
        body.push_str(suffix);
    }

    if index % 2 == 1 {
        body.push_str(&format!(" (@{} edition)", account.username));
    }

    let is_zh = account
        .language
        .as_deref()
        .map(|l| l.trim().to_lowercase().starts_with("zh"))
        .unwrap_or(false);
    if is_zh {
        body.push('\n');
        body.push_str(ZH_CALL_TO_ACTION);
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountStatus;

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
            title: "t".into(),
            body: "Release day.".into(),
            topic: topic.map(str::to_owned),
            language: language.map(str::to_owned),
            status: crate::types::ContentStatus::Approved,
        }
    }

    #[test]
    fn rule_matches_topic_tag_case_insensitively() {
        let c = content(Some("Rust"), None);
        let a = account("dev", None);
        assert!(rule_matches(&c, &a, &["rust".into(), "oss".into()]));
        assert!(!rule_matches(&c, &a, &["golang".into()]));
    }

    #[test]
    fn rule_matches_language() {
        let c = content(None, Some("EN"));
        assert!(rule_matches(&c, &account("dev", Some("en")), &[]));
        assert!(!rule_matches(&c, &account("dev", Some("de")), &[]));
        assert!(!rule_matches(&c, &account("dev", None), &[]));
    }

    #[test]
    fn variant_bodies_rotate_and_tag_odd_indices() {
        let c = content(None, None);
        let a0 = account("alpha", None);
        let a1 = account("beta", None);

        let b0 = variant_body(&c, &a0, 0);
        let b1 = variant_body(&c, &a1, 1);
        assert_eq!(b0, "Release day.");
        assert!(b1.contains("Worth a read."));
        assert!(b1.ends_with("(@beta edition)"));
    }

    #[test]
    fn chinese_accounts_get_the_call_to_action() {
        let c = content(None, None);
        let a = account("cn", Some("zh-CN"));
        let body = variant_body(&c, &a, 0);
        assert!(body.ends_with(ZH_CALL_TO_ACTION));
    }

    #[test]
    fn validation_bounds() {
        let mut req = DispatchRequest::new("c1");
        req.stagger_minutes = 121;
        assert!(validate(&req).is_err());
        req.stagger_minutes = 120;
        assert!(validate(&req).is_ok());
        req.priority = 0;
        assert!(validate(&req).is_err());
        req.priority = 1000;
        assert!(validate(&req).is_ok());
        req.max_attempts = 9;
        assert!(validate(&req).is_err());
    }
}
