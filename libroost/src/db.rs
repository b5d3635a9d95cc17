//! Database operations for roost
//!
//! One `Database` over a SQLite pool. Queries are runtime-bound with
//! manual row mapping; every settlement of a schedule commits as a single
//! transaction so an interrupted cycle can never leave a half-settled row.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    now_ts, Account, AccountStatus, AttemptStatus, Content, ContentStatus, ContentVariant,
    LogLevel, ProxyProtocol, PublishAttempt, RateLimitInfo, Schedule, ScheduleStatus,
};

/// A due schedule joined with everything the cycle needs to process it.
#[derive(Debug, Clone)]
pub struct DueItem {
    pub schedule: Schedule,
    pub account: Account,
    pub content_title: String,
    pub variant_body: String,
}

/// One persistent audit event.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub level: LogLevel,
    pub event: String,
    pub message: String,
    pub meta: Option<serde_json::Value>,
    pub account_id: Option<String>,
    pub schedule_id: Option<String>,
}

impl ActivityEntry {
    pub fn new(level: LogLevel, event: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            event: event.to_string(),
            message: message.into(),
            meta: None,
            account_id: None,
            schedule_id: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn for_schedule(mut self, account_id: &str, schedule_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self.schedule_id = Some(schedule_id.to_string());
        self
    }
}

/// Everything written when a schedule publishes successfully.
#[derive(Debug)]
pub struct PostedSettlement {
    pub schedule_id: String,
    pub account_id: String,
    pub posted_at: i64,
    pub external_post_id: Option<String>,
    pub attempt_count: i64,
    pub requested_at: i64,
    pub http_status: i64,
    pub rate_limit: RateLimitInfo,
    pub endpoint: String,
}

/// Everything written when a schedule fails, is blocked, or retries.
#[derive(Debug)]
pub struct FailureSettlement {
    pub schedule_id: String,
    pub account_id: String,
    pub schedule_status: ScheduleStatus,
    pub attempt_count: i64,
    pub next_attempt_at: Option<i64>,
    pub last_error: String,
    pub account_status: Option<AccountStatus>,
    pub health_message: Option<String>,
    pub attempt: PublishAttempt,
    /// Snapshot endpoint when the attempt carried rate-limit headers.
    pub snapshot_endpoint: Option<String>,
    pub log: ActivityEntry,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();

        let url = if expanded_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            let path = Path::new(&expanded_path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(DbError::Io)?;
            }
            format!("sqlite:{}?mode=rwc", expanded_path)
        };

        let pool = SqlitePool::connect(&url).await.map_err(DbError::Sqlx)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::Migration)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    pub async fn insert_account(&self, account: &Account) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, x_user_id, username, display_name, language, purpose,
                access_token_enc, refresh_token_enc, token_expires_at,
                status, health_message,
                min_interval_minutes, daily_post_limit, monthly_post_limit,
                last_posted_at,
                proxy_enabled, proxy_protocol, proxy_host, proxy_port,
                proxy_username, proxy_password_enc,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.x_user_id)
        .bind(&account.username)
        .bind(&account.display_name)
        .bind(&account.language)
        .bind(&account.purpose)
        .bind(&account.access_token_enc)
        .bind(&account.refresh_token_enc)
        .bind(account.token_expires_at)
        .bind(account.status.as_str())
        .bind(&account.health_message)
        .bind(account.min_interval_minutes)
        .bind(account.daily_post_limit)
        .bind(account.monthly_post_limit)
        .bind(account.last_posted_at)
        .bind(account.proxy_enabled as i64)
        .bind(account.proxy_protocol.map(|p| p.as_str().to_uppercase()))
        .bind(&account.proxy_host)
        .bind(account.proxy_port)
        .bind(&account.proxy_username)
        .bind(&account.proxy_password_enc)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;
        Ok(())
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(r#"SELECT * FROM accounts WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        row.map(|r| account_from_row(&r)).transpose()
    }

    /// All accounts with their tags, for rule-based dispatch selection.
    pub async fn accounts_with_tags(&self) -> Result<Vec<(Account, Vec<String>)>> {
        let rows = sqlx::query(r#"SELECT * FROM accounts ORDER BY username"#)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in &rows {
            accounts.push(account_from_row(row)?);
        }

        let tag_rows = sqlx::query(r#"SELECT account_id, tag FROM account_tags"#)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        let mut result: Vec<(Account, Vec<String>)> =
            accounts.into_iter().map(|a| (a, Vec::new())).collect();
        for row in tag_rows {
            let account_id: String = row.get("account_id");
            let tag: String = row.get("tag");
            if let Some((_, tags)) = result.iter_mut().find(|(a, _)| a.id == account_id) {
                tags.push(tag);
            }
        }
        Ok(result)
    }

    pub async fn set_account_tags(&self, account_id: &str, tags: &[&str]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;
        sqlx::query(r#"DELETE FROM account_tags WHERE account_id = ?"#)
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
        for tag in tags {
            sqlx::query(r#"INSERT INTO account_tags (account_id, tag) VALUES (?, ?)"#)
                .bind(account_id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(DbError::Sqlx)?;
        }
        tx.commit().await.map_err(DbError::Sqlx)?;
        Ok(())
    }

    /// Swap in freshly refreshed tokens and reactivate the account.
    pub async fn update_account_tokens(
        &self,
        account_id: &str,
        access_token_enc: &str,
        refresh_token_enc: Option<&str>,
        token_expires_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET access_token_enc = ?,
                refresh_token_enc = COALESCE(?, refresh_token_enc),
                token_expires_at = ?,
                status = 'ACTIVE',
                health_message = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(access_token_enc)
        .bind(refresh_token_enc)
        .bind(token_expires_at)
        .bind(now_ts())
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Contents and variants
    // ------------------------------------------------------------------

    pub async fn insert_content(&self, content: &Content) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO contents (id, title, body, topic, language, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content.id)
        .bind(&content.title)
        .bind(&content.body)
        .bind(&content.topic)
        .bind(&content.language)
        .bind(content.status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;
        Ok(())
    }

    pub async fn get_content(&self, id: &str) -> Result<Option<Content>> {
        let row = sqlx::query(r#"SELECT * FROM contents WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        row.map(|r| {
            Ok(Content {
                id: r.get("id"),
                title: r.get("title"),
                body: r.get("body"),
                topic: r.get("topic"),
                language: r.get("language"),
                status: ContentStatus::parse(&r.get::<String, _>("status"))?,
            })
        })
        .transpose()
    }

    pub async fn find_variant(
        &self,
        content_id: &str,
        account_id: &str,
    ) -> Result<Option<ContentVariant>> {
        let row = sqlx::query(
            r#"SELECT * FROM content_variants WHERE content_id = ? AND account_id = ?"#,
        )
        .bind(content_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;
        Ok(row.map(|r| variant_from_row(&r)))
    }

    // ------------------------------------------------------------------
    // Dispatch (planner writes)
    // ------------------------------------------------------------------

    /// Insert new variants and schedules plus the dispatch audit entry in
    /// one transaction. Idempotency-key conflicts are skipped silently;
    /// returns `(created, skipped)`.
    pub async fn insert_dispatch(
        &self,
        variants: &[ContentVariant],
        schedules: &[Schedule],
        log: ActivityEntry,
    ) -> Result<(usize, usize)> {
        let now = now_ts();
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;

        for v in variants {
            sqlx::query(
                r#"
                INSERT INTO content_variants (id, content_id, account_id, body, similarity_key, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&v.id)
            .bind(&v.content_id)
            .bind(&v.account_id)
            .bind(&v.body)
            .bind(&v.similarity_key)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
        }

        let mut created = 0usize;
        for s in schedules {
            let result = sqlx::query(
                r#"
                INSERT INTO schedules (
                    id, account_id, content_id, content_variant_id,
                    planned_at, status, idempotency_key, priority,
                    attempt_count, max_attempts, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(idempotency_key) DO NOTHING
                "#,
            )
            .bind(&s.id)
            .bind(&s.account_id)
            .bind(&s.content_id)
            .bind(&s.content_variant_id)
            .bind(s.planned_at)
            .bind(s.status.as_str())
            .bind(&s.idempotency_key)
            .bind(s.priority)
            .bind(s.attempt_count)
            .bind(s.max_attempts)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
            created += result.rows_affected() as usize;
        }

        insert_activity(&mut tx, &log).await?;
        tx.commit().await.map_err(DbError::Sqlx)?;

        Ok((created, schedules.len() - created))
    }

    // ------------------------------------------------------------------
    // Cycle reads
    // ------------------------------------------------------------------

    pub async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let row = sqlx::query(r#"SELECT * FROM schedules WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        row.map(|r| schedule_from_row(&r)).transpose()
    }

    /// Schedules ready to run: pending and due, or failed and past their
    /// retry time. Ordered by priority then planned time.
    pub async fn due_schedules(&self, now: i64, limit: i64) -> Result<Vec<DueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT s.*,
                   c.title AS content_title,
                   v.body AS variant_body,
                   a.id AS a_id, a.x_user_id, a.username, a.display_name,
                   a.language AS a_language, a.purpose,
                   a.access_token_enc, a.refresh_token_enc, a.token_expires_at,
                   a.status AS a_status, a.health_message,
                   a.min_interval_minutes, a.daily_post_limit, a.monthly_post_limit,
                   a.last_posted_at,
                   a.proxy_enabled, a.proxy_protocol, a.proxy_host, a.proxy_port,
                   a.proxy_username, a.proxy_password_enc
            FROM schedules s
            JOIN accounts a ON a.id = s.account_id
            JOIN contents c ON c.id = s.content_id
            JOIN content_variants v ON v.id = s.content_variant_id
            WHERE (s.status = 'PENDING' AND s.planned_at <= ?)
               OR (s.status = 'FAILED' AND s.next_attempt_at IS NOT NULL AND s.next_attempt_at <= ?)
            ORDER BY s.priority ASC, s.planned_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(DueItem {
                schedule: schedule_from_row(row)?,
                account: account_from_joined_row(row)?,
                content_title: row.get("content_title"),
                variant_body: row.get("variant_body"),
            });
        }
        Ok(items)
    }

    /// Upcoming work, for the operator queue listing.
    pub async fn pending_schedules(&self, limit: i64) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM schedules
            WHERE status IN ('PENDING', 'FAILED')
            ORDER BY planned_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;
        rows.iter().map(schedule_from_row).collect()
    }

    /// Bodies of the most recently published variants inside the window,
    /// newest first — the similarity corpus for one cycle.
    pub async fn recent_posted_bodies(&self, since: i64, cap: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT v.body
            FROM schedules s
            JOIN content_variants v ON v.id = s.content_variant_id
            WHERE s.status = 'POSTED' AND s.posted_at >= ?
            ORDER BY s.posted_at DESC
            LIMIT ?
            "#,
        )
        .bind(since)
        .bind(cap)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;
        Ok(rows.iter().map(|r| r.get("body")).collect())
    }

    /// Published posts for one account since a window boundary.
    pub async fn count_posted_since(&self, account_id: &str, since: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM schedules
            WHERE account_id = ? AND status = 'POSTED' AND posted_at >= ?
            "#,
        )
        .bind(account_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;
        Ok(row.get("n"))
    }

    // ------------------------------------------------------------------
    // Settlements
    // ------------------------------------------------------------------

    /// Commit a successful publish: schedule, account, attempt row,
    /// rate-limit snapshot, zeroed metric, audit entry — atomically.
    pub async fn settle_posted(&self, s: PostedSettlement) -> Result<()> {
        let now = now_ts();
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;

        sqlx::query(
            r#"
            UPDATE schedules
            SET status = 'POSTED', posted_at = ?, external_post_id = ?,
                attempt_count = ?, last_error = NULL, next_attempt_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(s.posted_at)
        .bind(&s.external_post_id)
        .bind(s.attempt_count)
        .bind(now)
        .bind(&s.schedule_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        sqlx::query(
            r#"
            UPDATE accounts
            SET status = 'ACTIVE', health_message = NULL, last_posted_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(s.posted_at)
        .bind(now)
        .bind(&s.account_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO publish_attempts (
                schedule_id, account_id, attempt_no, status,
                requested_at, finished_at, http_status,
                limit_total, limit_left, limit_reset
            )
            VALUES (?, ?, ?, 'SUCCESS', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&s.schedule_id)
        .bind(&s.account_id)
        .bind(s.attempt_count)
        .bind(s.requested_at)
        .bind(now)
        .bind(s.http_status)
        .bind(s.rate_limit.limit)
        .bind(s.rate_limit.remaining)
        .bind(s.rate_limit.reset_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO rate_limit_snapshots (account_id, endpoint, limit_total, limit_left, limit_reset, observed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&s.account_id)
        .bind(&s.endpoint)
        .bind(s.rate_limit.limit)
        .bind(s.rate_limit.remaining)
        .bind(s.rate_limit.reset_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        sqlx::query(
            r#"INSERT INTO post_metrics (schedule_id, account_id) VALUES (?, ?)"#,
        )
        .bind(&s.schedule_id)
        .bind(&s.account_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        let log = ActivityEntry::new(LogLevel::Info, "schedule_posted", "published")
            .with_meta(serde_json::json!({
                "externalPostId": s.external_post_id,
                "httpStatus": s.http_status,
            }))
            .for_schedule(&s.account_id, &s.schedule_id);
        insert_activity(&mut tx, &log).await?;

        tx.commit().await.map_err(DbError::Sqlx)?;
        Ok(())
    }

    /// Commit a failed or blocked outcome, with the attempt row, optional
    /// account demotion, optional rate-limit snapshot and the audit entry.
    pub async fn settle_failure(&self, s: FailureSettlement) -> Result<()> {
        let now = now_ts();
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;

        sqlx::query(
            r#"
            UPDATE schedules
            SET status = ?, attempt_count = ?, next_attempt_at = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(s.schedule_status.as_str())
        .bind(s.attempt_count)
        .bind(s.next_attempt_at)
        .bind(&s.last_error)
        .bind(now)
        .bind(&s.schedule_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        if let Some(status) = s.account_status {
            sqlx::query(
                r#"UPDATE accounts SET status = ?, health_message = ?, updated_at = ? WHERE id = ?"#,
            )
            .bind(status.as_str())
            .bind(&s.health_message)
            .bind(now)
            .bind(&s.account_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
        }

        let a = &s.attempt;
        sqlx::query(
            r#"
            INSERT INTO publish_attempts (
                schedule_id, account_id, attempt_no, status,
                requested_at, finished_at, http_status, error_code, error_message,
                limit_total, limit_left, limit_reset
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&a.schedule_id)
        .bind(&a.account_id)
        .bind(a.attempt_no)
        .bind(a.status.as_str())
        .bind(a.requested_at)
        .bind(a.finished_at)
        .bind(a.http_status)
        .bind(&a.error_code)
        .bind(&a.error_message)
        .bind(a.rate_limit.limit)
        .bind(a.rate_limit.remaining)
        .bind(a.rate_limit.reset_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        if let Some(endpoint) = &s.snapshot_endpoint {
            sqlx::query(
                r#"
                INSERT INTO rate_limit_snapshots (account_id, endpoint, limit_total, limit_left, limit_reset, observed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&s.account_id)
            .bind(endpoint)
            .bind(a.rate_limit.limit)
            .bind(a.rate_limit.remaining)
            .bind(a.rate_limit.reset_at)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
        }

        insert_activity(&mut tx, &s.log).await?;
        tx.commit().await.map_err(DbError::Sqlx)?;
        Ok(())
    }

    /// Push a schedule back to PENDING at a later time (pacing). No attempt
    /// row; the attempt budget is untouched.
    pub async fn settle_reschedule(
        &self,
        schedule_id: &str,
        account_id: &str,
        planned_at: i64,
        reason: &str,
    ) -> Result<()> {
        let now = now_ts();
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;

        sqlx::query(
            r#"
            UPDATE schedules
            SET status = 'PENDING', planned_at = ?, next_attempt_at = NULL, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(planned_at)
        .bind(reason)
        .bind(now)
        .bind(schedule_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        let log = ActivityEntry::new(LogLevel::Info, "schedule_rescheduled", reason)
            .with_meta(serde_json::json!({ "plannedAt": planned_at }))
            .for_schedule(account_id, schedule_id);
        insert_activity(&mut tx, &log).await?;

        tx.commit().await.map_err(DbError::Sqlx)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit reads
    // ------------------------------------------------------------------

    pub async fn attempts_for(&self, schedule_id: &str) -> Result<Vec<PublishAttempt>> {
        let rows = sqlx::query(
            r#"SELECT * FROM publish_attempts WHERE schedule_id = ? ORDER BY id ASC"#,
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        rows.iter()
            .map(|r| {
                Ok(PublishAttempt {
                    id: Some(r.get("id")),
                    schedule_id: r.get("schedule_id"),
                    account_id: r.get("account_id"),
                    attempt_no: r.get("attempt_no"),
                    status: AttemptStatus::parse(&r.get::<String, _>("status"))?,
                    requested_at: r.get("requested_at"),
                    finished_at: r.get("finished_at"),
                    http_status: r.get("http_status"),
                    error_code: r.get("error_code"),
                    error_message: r.get("error_message"),
                    rate_limit: RateLimitInfo {
                        limit: r.get("limit_total"),
                        remaining: r.get("limit_left"),
                        reset_at: r.get("limit_reset"),
                    },
                })
            })
            .collect()
    }

    pub async fn metric_count(&self, schedule_id: &str) -> Result<i64> {
        let row = sqlx::query(r#"SELECT COUNT(*) AS n FROM post_metrics WHERE schedule_id = ?"#)
            .bind(schedule_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(row.get("n"))
    }

    pub async fn snapshot_count(&self, account_id: &str) -> Result<i64> {
        let row =
            sqlx::query(r#"SELECT COUNT(*) AS n FROM rate_limit_snapshots WHERE account_id = ?"#)
                .bind(account_id)
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::Sqlx)?;
        Ok(row.get("n"))
    }
}

async fn insert_activity(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entry: &ActivityEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO activity_log (level, event, message, meta, account_id, schedule_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.level.as_str())
    .bind(&entry.event)
    .bind(&entry.message)
    .bind(entry.meta.as_ref().map(|m| m.to_string()))
    .bind(&entry.account_id)
    .bind(&entry.schedule_id)
    .bind(now_ts())
    .execute(&mut **tx)
    .await
    .map_err(DbError::Sqlx)?;
    Ok(())
}

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule> {
    Ok(Schedule {
        id: row.get("id"),
        account_id: row.get("account_id"),
        content_id: row.get("content_id"),
        content_variant_id: row.get("content_variant_id"),
        planned_at: row.get("planned_at"),
        status: ScheduleStatus::parse(&row.get::<String, _>("status"))?,
        idempotency_key: row.get("idempotency_key"),
        priority: row.get("priority"),
        attempt_count: row.get("attempt_count"),
        max_attempts: row.get("max_attempts"),
        next_attempt_at: row.get("next_attempt_at"),
        posted_at: row.get("posted_at"),
        external_post_id: row.get("external_post_id"),
        last_error: row.get("last_error"),
    })
}

fn variant_from_row(row: &SqliteRow) -> ContentVariant {
    ContentVariant {
        id: row.get("id"),
        content_id: row.get("content_id"),
        account_id: row.get("account_id"),
        body: row.get("body"),
        similarity_key: row.get("similarity_key"),
    }
}

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    account_fields(row, "id", "language", "status")
}

/// Account columns from the due-schedules join, where names that collide
/// with schedule columns are aliased with an `a_` prefix.
fn account_from_joined_row(row: &SqliteRow) -> Result<Account> {
    account_fields(row, "a_id", "a_language", "a_status")
}

fn account_fields(row: &SqliteRow, id: &str, language: &str, status: &str) -> Result<Account> {
    let proxy_protocol = row
        .get::<Option<String>, _>("proxy_protocol")
        .map(|p| ProxyProtocol::parse(&p))
        .transpose()?;
    Ok(Account {
        id: row.get(id),
        x_user_id: row.get("x_user_id"),
        username: row.get("username"),
        display_name: row.get("display_name"),
        language: row.get(language),
        purpose: row.get("purpose"),
        access_token_enc: row.get("access_token_enc"),
        refresh_token_enc: row.get("refresh_token_enc"),
        token_expires_at: row.get("token_expires_at"),
        status: AccountStatus::parse(&row.get::<String, _>(status))?,
        health_message: row.get("health_message"),
        min_interval_minutes: row.get("min_interval_minutes"),
        daily_post_limit: row.get("daily_post_limit"),
        monthly_post_limit: row.get("monthly_post_limit"),
        last_posted_at: row.get("last_posted_at"),
        proxy_enabled: row.get::<i64, _>("proxy_enabled") != 0,
        proxy_protocol,
        proxy_host: row.get("proxy_host"),
        proxy_port: row.get("proxy_port"),
        proxy_username: row.get("proxy_username"),
        proxy_password_enc: row.get("proxy_password_enc"),
    })
}
