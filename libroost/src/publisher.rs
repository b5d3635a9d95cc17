//! Publisher cycle: drain due schedules against the platform
//!
//! One `run_cycle` call selects due work, enforces the risk envelope,
//! refreshes tokens where needed, publishes, and settles every outcome
//! atomically. Failures never escalate past the schedule that caused
//! them; the cycle always comes back with a counting summary.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{Config, QuotaTimezone};
use crate::crypto::SecretBox;
use crate::db::{
    ActivityEntry, Database, DueItem, FailureSettlement, PostedSettlement,
};
use crate::error::Result;
use crate::platform::x::{XClient, POST_ENDPOINT};
use crate::platform::{PlatformGateway, ProxyConfig, PublishResponse};
use crate::risk::{self, RiskVerdict, CORPUS_CAP, CORPUS_WINDOW_SECS};
use crate::types::{
    now_ts, Account, AccountStatus, AttemptStatus, LogLevel, PublishAttempt, RateLimitInfo,
    ScheduleStatus,
};

pub const DEFAULT_CYCLE_LIMIT: i64 = 30;
pub const MAX_CYCLE_LIMIT: i64 = 200;

/// Retry floor per attempt number; the platform's advertised reset wins
/// when it is later.
const BACKOFF_SECS: [i64; 3] = [2 * 60, 10 * 60, 30 * 60];

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CycleSummary {
    pub scanned: usize,
    pub attempted: usize,
    pub posted: usize,
    pub failed: usize,
    pub blocked: usize,
    pub rescheduled: usize,
}

enum Outcome {
    Posted,
    Failed,
    Blocked,
    Rescheduled,
}

pub struct Publisher {
    db: Database,
    gateway: Arc<dyn PlatformGateway>,
    secrets: SecretBox,
    quota_timezone: QuotaTimezone,
}

impl Publisher {
    pub fn new(
        db: Database,
        gateway: Arc<dyn PlatformGateway>,
        secrets: SecretBox,
        quota_timezone: QuotaTimezone,
    ) -> Self {
        Self {
            db,
            gateway,
            secrets,
            quota_timezone,
        }
    }

    /// Wire up the real platform client from configuration.
    pub fn from_config(config: &Config, db: Database) -> Result<Self> {
        let secrets = SecretBox::new(&config.encryption_key)?;
        let gateway = Arc::new(XClient::new(config)?);
        Ok(Self::new(db, gateway, secrets, config.quota_timezone))
    }

    /// Drain up to `limit` due schedules (clamped to `[1, 200]`),
    /// sequentially, at most one per account.
    pub async fn run_cycle(&self, limit: i64) -> Result<CycleSummary> {
        let limit = limit.clamp(1, MAX_CYCLE_LIMIT);
        let now = now_ts();

        let due = self.db.due_schedules(now, limit).await?;
        let mut corpus = self
            .db
            .recent_posted_bodies(now - CORPUS_WINDOW_SECS, CORPUS_CAP as i64)
            .await?;

        let mut summary = CycleSummary {
            scanned: due.len(),
            ..Default::default()
        };
        let mut seen_accounts: HashSet<String> = HashSet::new();

        for item in due {
            // Fairness: one schedule per account per cycle, so a backlog
            // on one account cannot starve the rest.
            if !seen_accounts.insert(item.schedule.account_id.clone()) {
                continue;
            }
            summary.attempted += 1;

            match self.process(&item, &mut corpus).await {
                Ok(Outcome::Posted) => summary.posted += 1,
                Ok(Outcome::Failed) => summary.failed += 1,
                Ok(Outcome::Blocked) => summary.blocked += 1,
                Ok(Outcome::Rescheduled) => summary.rescheduled += 1,
                Err(e) => {
                    // Contained: the schedule keeps its current state and
                    // will be picked up again by a later cycle.
                    error!(schedule_id = %item.schedule.id, "cycle step failed: {e}");
                }
            }
        }

        info!(
            scanned = summary.scanned,
            attempted = summary.attempted,
            posted = summary.posted,
            failed = summary.failed,
            blocked = summary.blocked,
            rescheduled = summary.rescheduled,
            "publish cycle finished"
        );
        Ok(summary)
    }

    async fn process(&self, item: &DueItem, corpus: &mut Vec<String>) -> Result<Outcome> {
        let schedule = &item.schedule;
        let account = &item.account;
        let now = now_ts();
        let attempt_no = schedule.attempt_count + 1;

        let proxy = match self.resolve_proxy(account) {
            Ok(proxy) => proxy,
            Err(reason) => {
                self.block_before_publish(item, attempt_no, reason, None)
                    .await?;
                return Ok(Outcome::Blocked);
            }
        };

        let access_token = match self.usable_access_token(account, proxy.as_ref(), now).await? {
            Ok(token) => token,
            Err((reason, demote)) => {
                self.block_before_publish(item, attempt_no, reason, demote)
                    .await?;
                return Ok(Outcome::Blocked);
            }
        };

        match risk::evaluate(
            &self.db,
            account,
            &item.variant_body,
            corpus,
            now,
            self.quota_timezone,
        )
        .await?
        {
            RiskVerdict::Proceed => {}
            RiskVerdict::Reschedule { planned_at, reason } => {
                self.db
                    .settle_reschedule(&schedule.id, &account.id, planned_at, &reason)
                    .await?;
                info!(schedule_id = %schedule.id, planned_at, "schedule paced back");
                return Ok(Outcome::Rescheduled);
            }
            RiskVerdict::Block { reason } => {
                self.block_before_publish(item, attempt_no, reason, None)
                    .await?;
                return Ok(Outcome::Blocked);
            }
        }

        let requested_at = now_ts();
        let response = match self
            .gateway
            .publish(&access_token, &item.variant_body, proxy.as_ref())
            .await
        {
            Ok(response) => response,
            Err(e) => PublishResponse {
                status: 0,
                error_message: Some(e.to_string()),
                ..Default::default()
            },
        };

        if response.is_success() {
            let posted_at = now_ts();
            self.db
                .settle_posted(PostedSettlement {
                    schedule_id: schedule.id.clone(),
                    account_id: account.id.clone(),
                    posted_at,
                    external_post_id: response.post_id.clone(),
                    attempt_count: attempt_no,
                    requested_at,
                    http_status: response.status as i64,
                    rate_limit: response.rate_limit,
                    endpoint: POST_ENDPOINT.to_string(),
                })
                .await?;

            // Later schedules in this same cycle must see this body.
            corpus.insert(0, item.variant_body.clone());
            corpus.truncate(CORPUS_CAP);

            info!(
                schedule_id = %schedule.id,
                account = %account.username,
                post_id = response.post_id.as_deref().unwrap_or("-"),
                "schedule posted"
            );
            return Ok(Outcome::Posted);
        }

        self.settle_publish_failure(item, attempt_no, requested_at, response)
            .await
    }

    /// Map a non-2xx publish outcome onto schedule/account state.
    async fn settle_publish_failure(
        &self,
        item: &DueItem,
        attempt_no: i64,
        requested_at: i64,
        response: PublishResponse,
    ) -> Result<Outcome> {
        let schedule = &item.schedule;
        let account = &item.account;
        let now = now_ts();
        let status = response.status;

        let force_block = status == 401 || status == 403;
        let can_retry = !force_block && attempt_no < schedule.max_attempts;

        let account_status = match status {
            429 => Some(AccountStatus::RateLimited),
            401 => Some(AccountStatus::TokenExpired),
            403 => Some(AccountStatus::Suspended),
            _ => None,
        };

        let message = response
            .error_message
            .unwrap_or_else(|| format!("x_publish_failed_{status}"));
        let next_attempt_at =
            can_retry.then(|| retry_at(now, attempt_no, response.rate_limit.reset_at));

        let (schedule_status, log_level, log_event) = if can_retry {
            warn!(
                schedule_id = %schedule.id,
                status, attempt_no, "publish failed, retry scheduled: {message}"
            );
            (
                ScheduleStatus::Failed,
                LogLevel::Warn,
                "schedule_retry_scheduled",
            )
        } else {
            error!(
                schedule_id = %schedule.id,
                status, attempt_no, "publish failed terminally: {message}"
            );
            (ScheduleStatus::Blocked, LogLevel::Error, "schedule_blocked")
        };

        self.db
            .settle_failure(FailureSettlement {
                schedule_id: schedule.id.clone(),
                account_id: account.id.clone(),
                schedule_status,
                attempt_count: attempt_no,
                next_attempt_at,
                last_error: message.clone(),
                account_status,
                health_message: account_status.map(|_| message.clone()),
                attempt: PublishAttempt {
                    id: None,
                    schedule_id: schedule.id.clone(),
                    account_id: account.id.clone(),
                    attempt_no,
                    status: AttemptStatus::Fail,
                    requested_at,
                    finished_at: Some(now),
                    http_status: Some(status as i64),
                    error_code: response.error_code,
                    error_message: Some(message.clone()),
                    rate_limit: response.rate_limit,
                },
                snapshot_endpoint: Some(POST_ENDPOINT.to_string()),
                log: ActivityEntry::new(log_level, log_event, message)
                    .for_schedule(&account.id, &schedule.id),
            })
            .await?;

        Ok(if can_retry {
            Outcome::Failed
        } else {
            Outcome::Blocked
        })
    }

    /// Block a schedule before any network call was made: bad proxy
    /// config, credential failures, or a risk-engine hit.
    async fn block_before_publish(
        &self,
        item: &DueItem,
        attempt_no: i64,
        reason: String,
        demote: Option<AccountStatus>,
    ) -> Result<()> {
        let schedule = &item.schedule;
        let account = &item.account;
        let now = now_ts();

        error!(schedule_id = %schedule.id, "schedule blocked: {reason}");
        self.db
            .settle_failure(FailureSettlement {
                schedule_id: schedule.id.clone(),
                account_id: account.id.clone(),
                schedule_status: ScheduleStatus::Blocked,
                attempt_count: attempt_no,
                next_attempt_at: None,
                last_error: reason.clone(),
                account_status: demote,
                health_message: demote.map(|_| reason.clone()),
                attempt: PublishAttempt {
                    id: None,
                    schedule_id: schedule.id.clone(),
                    account_id: account.id.clone(),
                    attempt_no,
                    status: AttemptStatus::Blocked,
                    requested_at: now,
                    finished_at: Some(now),
                    http_status: None,
                    error_code: None,
                    error_message: Some(reason.clone()),
                    rate_limit: RateLimitInfo::default(),
                },
                snapshot_endpoint: None,
                log: ActivityEntry::new(LogLevel::Error, "schedule_blocked", reason)
                    .for_schedule(&account.id, &schedule.id),
            })
            .await
    }

    /// Build the account's proxy, or explain why the schedule must block.
    fn resolve_proxy(
        &self,
        account: &Account,
    ) -> std::result::Result<Option<ProxyConfig>, String> {
        if !account.proxy_enabled {
            return Ok(None);
        }

        let (Some(protocol), Some(host), Some(port)) = (
            account.proxy_protocol,
            account.proxy_host.clone(),
            account.proxy_port,
        ) else {
            return Err("Proxy is enabled but protocol, host or port is missing.".to_string());
        };
        if !(1..=65535).contains(&port) {
            return Err(format!("Proxy port {port} is out of range."));
        }

        let password = match &account.proxy_password_enc {
            Some(sealed) => Some(self.secrets.open(sealed).map_err(|e| {
                format!("Failed to decrypt proxy password (operator action required): {e}")
            })?),
            None => None,
        };

        Ok(Some(ProxyConfig {
            protocol,
            host,
            port: port as u16,
            username: account.proxy_username.clone(),
            password,
        }))
    }

    /// Produce a usable plaintext access token, refreshing through the
    /// account's proxy when the stored one has expired. The inner `Err`
    /// carries the block reason and the account demotion, if any.
    async fn usable_access_token(
        &self,
        account: &Account,
        proxy: Option<&ProxyConfig>,
        now: i64,
    ) -> Result<std::result::Result<String, (String, Option<AccountStatus>)>> {
        let expired = account.token_expires_at.map(|t| t <= now).unwrap_or(false);

        if !expired {
            return Ok(match self.secrets.open(&account.access_token_enc) {
                Ok(token) => Ok(token),
                Err(e) => Err((
                    format!("Failed to decrypt access token (operator action required): {e}"),
                    None,
                )),
            });
        }

        let Some(refresh_enc) = &account.refresh_token_enc else {
            return Ok(Err((
                "Access token expired and no refresh token is stored.".to_string(),
                Some(AccountStatus::TokenExpired),
            )));
        };

        let refresh_token = match self.secrets.open(refresh_enc) {
            Ok(token) => token,
            Err(e) => {
                return Ok(Err((
                    format!("Failed to decrypt refresh token (operator action required): {e}"),
                    Some(AccountStatus::TokenExpired),
                )))
            }
        };

        let refreshed = match self.gateway.refresh_token(&refresh_token, proxy).await {
            Ok(response) => response,
            Err(e) => {
                return Ok(Err((
                    format!("Token refresh failed: {e}"),
                    Some(AccountStatus::TokenExpired),
                )))
            }
        };

        if !refreshed.is_success() {
            let detail = refreshed
                .error_message
                .unwrap_or_else(|| format!("status {}", refreshed.status));
            return Ok(Err((
                format!("Token refresh failed: {detail}"),
                Some(AccountStatus::TokenExpired),
            )));
        }

        // is_success guarantees the token is present
        let Some(access_token) = refreshed.access_token else {
            return Ok(Err((
                "Token refresh returned no access token.".to_string(),
                Some(AccountStatus::TokenExpired),
            )));
        };

        let sealed_access = self.secrets.seal(&access_token)?;
        let sealed_refresh = refreshed
            .refresh_token
            .as_deref()
            .map(|r| self.secrets.seal(r))
            .transpose()?;
        self.db
            .update_account_tokens(
                &account.id,
                &sealed_access,
                sealed_refresh.as_deref(),
                refreshed.expires_at,
            )
            .await?;

        info!(account = %account.username, "access token refreshed");
        Ok(Ok(access_token))
    }
}

/// Next retry time: the back-off floor for this attempt, or the platform's
/// advertised reset when that is later.
pub fn retry_at(now: i64, attempt_no: i64, reset_at: Option<i64>) -> i64 {
    let idx = (attempt_no - 1).clamp(0, BACKOFF_SECS.len() as i64 - 1) as usize;
    let floor = now + BACKOFF_SECS[idx];
    match reset_at {
        Some(reset) if reset > floor => reset,
        _ => floor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_floors_grow_then_plateau() {
        let now = 1_000_000;
        assert_eq!(retry_at(now, 1, None), now + 120);
        assert_eq!(retry_at(now, 2, None), now + 600);
        assert_eq!(retry_at(now, 3, None), now + 1800);
        assert_eq!(retry_at(now, 7, None), now + 1800);
    }

    #[test]
    fn platform_reset_wins_when_later() {
        let now = 1_000_000;
        assert_eq!(retry_at(now, 1, Some(now + 300)), now + 300);
        assert_eq!(retry_at(now, 1, Some(now + 60)), now + 120);
        assert_eq!(retry_at(now, 3, Some(now + 60)), now + 1800);
    }
}
