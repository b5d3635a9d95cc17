//! Core types for roost
//!
//! Statuses are stored as upper-case TEXT in SQLite; the `as_str`/`parse`
//! pairs are the single source of truth for that mapping.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DbError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    TokenExpired,
    RateLimited,
    Suspended,
    Disconnected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Suspended => "SUSPENDED",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "TOKEN_EXPIRED" => Ok(Self::TokenExpired),
            "RATE_LIMITED" => Ok(Self::RateLimited),
            "SUSPENDED" => Ok(Self::Suspended),
            "DISCONNECTED" => Ok(Self::Disconnected),
            other => Err(DbError::Corrupt(format!("unknown account status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleStatus {
    Pending,
    Processing,
    Posted,
    Failed,
    Blocked,
    Canceled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Posted => "POSTED",
            Self::Failed => "FAILED",
            Self::Blocked => "BLOCKED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "POSTED" => Ok(Self::Posted),
            "FAILED" => Ok(Self::Failed),
            "BLOCKED" => Ok(Self::Blocked),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(DbError::Corrupt(format!("unknown schedule status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContentStatus {
    Draft,
    Approved,
    Archived,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Approved => "APPROVED",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "APPROVED" => Ok(Self::Approved),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(DbError::Corrupt(format!("unknown content status: {other}"))),
        }
    }
}

/// Outcome of a single publish attempt, audited per row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttemptStatus {
    Success,
    Fail,
    Blocked,
    RetryScheduled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
            Self::Blocked => "BLOCKED",
            Self::RetryScheduled => "RETRY_SCHEDULED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAIL" => Ok(Self::Fail),
            "BLOCKED" => Ok(Self::Blocked),
            "RETRY_SCHEDULED" => Ok(Self::RetryScheduled),
            other => Err(DbError::Corrupt(format!("unknown attempt status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProxyProtocol {
    Http,
    Https,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s.to_uppercase().as_str() {
            "HTTP" => Ok(Self::Http),
            "HTTPS" => Ok(Self::Https),
            other => Err(DbError::Corrupt(format!("unknown proxy protocol: {other}"))),
        }
    }
}

/// One operated account on the platform, with its posting policy and
/// sealed credentials.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub x_user_id: String,
    pub username: String,
    pub display_name: String,
    pub language: Option<String>,
    pub purpose: Option<String>,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub token_expires_at: Option<i64>,
    pub status: AccountStatus,
    pub health_message: Option<String>,
    pub min_interval_minutes: i64,
    pub daily_post_limit: i64,
    pub monthly_post_limit: i64,
    pub last_posted_at: Option<i64>,
    pub proxy_enabled: bool,
    pub proxy_protocol: Option<ProxyProtocol>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<i64>,
    pub proxy_username: Option<String>,
    pub proxy_password_enc: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Content {
    pub id: String,
    pub title: String,
    pub body: String,
    pub topic: Option<String>,
    pub language: Option<String>,
    pub status: ContentStatus,
}

/// Materialized per-(content, account) text; the exact bytes published.
#[derive(Debug, Clone)]
pub struct ContentVariant {
    pub id: String,
    pub content_id: String,
    pub account_id: Option<String>,
    pub body: String,
    pub similarity_key: String,
}

/// One planned post for one account; the unit of work.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub id: String,
    pub account_id: String,
    pub content_id: String,
    pub content_variant_id: String,
    pub planned_at: i64,
    pub status: ScheduleStatus,
    pub idempotency_key: String,
    pub priority: i64,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub next_attempt_at: Option<i64>,
    pub posted_at: Option<i64>,
    pub external_post_id: Option<String>,
    pub last_error: Option<String>,
}

impl Schedule {
    /// Deterministic dedup key for planner inserts.
    pub fn idempotency_key_for(content_id: &str, account_id: &str, planned_at: i64) -> String {
        let ts = chrono::DateTime::from_timestamp(planned_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| planned_at.to_string());
        format!("{content_id}:{account_id}:{ts}")
    }
}

/// Rate-limit metadata from platform response headers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub reset_at: Option<i64>,
}

/// Append-only audit record of one publish attempt.
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    pub id: Option<i64>,
    pub schedule_id: String,
    pub account_id: String,
    pub attempt_no: i64,
    pub status: AttemptStatus,
    pub requested_at: i64,
    pub finished_at: Option<i64>,
    pub http_status: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub rate_limit: RateLimitInfo,
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for s in [
            AccountStatus::Active,
            AccountStatus::TokenExpired,
            AccountStatus::RateLimited,
            AccountStatus::Suspended,
            AccountStatus::Disconnected,
        ] {
            assert_eq!(AccountStatus::parse(s.as_str()).unwrap(), s);
        }
        for s in [
            ScheduleStatus::Pending,
            ScheduleStatus::Processing,
            ScheduleStatus::Posted,
            ScheduleStatus::Failed,
            ScheduleStatus::Blocked,
            ScheduleStatus::Canceled,
        ] {
            assert_eq!(ScheduleStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(ScheduleStatus::parse("RETIRED").is_err());
    }

    #[test]
    fn idempotency_key_is_deterministic() {
        let a = Schedule::idempotency_key_for("c1", "a1", 1_700_000_000);
        let b = Schedule::idempotency_key_for("c1", "a1", 1_700_000_000);
        assert_eq!(a, b);
        assert!(a.starts_with("c1:a1:"));
        assert_ne!(a, Schedule::idempotency_key_for("c1", "a1", 1_700_000_060));
    }
}
