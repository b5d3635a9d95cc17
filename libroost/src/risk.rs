//! Risk envelope: pacing, quotas, similarity
//!
//! Runs after credentials are resolved and before the network call. The
//! check order is fixed — pacing first (cheapest, recoverable), then the
//! quota counters, then the similarity scan over the cycle corpus.

use chrono::{Datelike, Local, NaiveDate, TimeZone, Utc};

use crate::config::QuotaTimezone;
use crate::db::Database;
use crate::error::Result;
use crate::similarity::{too_similar, SIMILARITY_THRESHOLD};
use crate::types::Account;

/// Sliding similarity corpus: newest bodies within this window.
pub const CORPUS_WINDOW_SECS: i64 = 72 * 3600;
/// At most this many recent bodies are compared against.
pub const CORPUS_CAP: usize = 250;

#[derive(Debug, Clone, PartialEq)]
pub enum RiskVerdict {
    Proceed,
    /// Not an error: the schedule goes back to PENDING at `planned_at`.
    Reschedule { planned_at: i64, reason: String },
    Block { reason: String },
}

/// Start of the current day and month in the configured quota timezone.
pub fn quota_windows(now: i64, tz: QuotaTimezone) -> (i64, i64) {
    let starts = match tz {
        QuotaTimezone::Local => window_starts_in(&Local, now),
        QuotaTimezone::Utc => window_starts_in(&Utc, now),
    };
    // A clock this helper cannot resolve (DST gap on an exotic zone) would
    // only shrink the window to zero, never widen it.
    starts.unwrap_or((now, now))
}

fn window_starts_in<Tz: TimeZone>(tz: &Tz, now: i64) -> Option<(i64, i64)> {
    let dt = tz.timestamp_opt(now, 0).single()?;
    let date = dt.date_naive();

    let day = tz
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()?
        .timestamp();
    let month = tz
        .from_local_datetime(&NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0)?)
        .earliest()?
        .timestamp();
    Some((day, month))
}

/// Evaluate one schedule's variant body against the account's envelope.
pub async fn evaluate(
    db: &Database,
    account: &Account,
    body: &str,
    corpus: &[String],
    now: i64,
    tz: QuotaTimezone,
) -> Result<RiskVerdict> {
    if let Some(last_posted_at) = account.last_posted_at {
        let next_allowed = last_posted_at + account.min_interval_minutes * 60;
        if next_allowed > now {
            return Ok(RiskVerdict::Reschedule {
                planned_at: next_allowed,
                reason: format!(
                    "Minimum interval of {}m not reached; deferred to next window.",
                    account.min_interval_minutes
                ),
            });
        }
    }

    let (day_start, month_start) = quota_windows(now, tz);

    let daily = db.count_posted_since(&account.id, day_start).await?;
    if daily >= account.daily_post_limit {
        return Ok(RiskVerdict::Block {
            reason: format!("Daily quota reached ({daily})."),
        });
    }

    let monthly = db.count_posted_since(&account.id, month_start).await?;
    if monthly >= account.monthly_post_limit {
        return Ok(RiskVerdict::Block {
            reason: format!("Monthly quota reached ({monthly})."),
        });
    }

    if too_similar(body, corpus, SIMILARITY_THRESHOLD) {
        return Ok(RiskVerdict::Block {
            reason: "Content too similar to recent published posts.".to_string(),
        });
    }

    Ok(RiskVerdict::Proceed)
}
