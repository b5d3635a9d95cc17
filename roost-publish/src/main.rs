//! roost-publish - publisher trigger for roost
//!
//! Serves `POST /cron/publish` for cron-driven draining of the schedule
//! queue, or runs a single cycle with `--once` (useful for crontab
//! entries and smoke tests).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tracing::{error, info};

use libroost::publisher::{DEFAULT_CYCLE_LIMIT, MAX_CYCLE_LIMIT};
use libroost::{Config, Database, Publisher, Result, RoostError};

#[derive(Parser, Debug)]
#[command(name = "roost-publish")]
#[command(version)]
#[command(about = "Drain due schedules against the platform")]
#[command(long_about = "\
roost-publish - publisher trigger for roost

DESCRIPTION:
    Runs the publisher cycle that selects due schedules, enforces the
    per-account risk envelope, refreshes OAuth tokens, calls the platform
    and settles every outcome.

    Without flags it serves POST /cron/publish and waits for cron ticks.
    With --once it runs a single cycle and prints the summary as JSON.

USAGE:
    # Serve the cron endpoint (address from ROOST_BIND_ADDR)
    roost-publish

    # One cycle, at most 50 schedules, then exit
    roost-publish --once --limit 50

CONFIGURATION (environment):
    TOKEN_ENCRYPTION_KEY   required; 64 hex chars, 32-byte base64, or any string
    AUTH_TWITTER_ID        OAuth2 client id (required for token refresh)
    AUTH_TWITTER_SECRET    OAuth2 client secret
    CRON_SECRET            shared secret for the endpoint; open when unset
    MOCK_X_API=1           synthetic platform successes (testing)
    ROOST_DB_PATH          SQLite path (default ~/.local/share/roost/roost.db)
    ROOST_BIND_ADDR        listen address (default 127.0.0.1:8787)
    ROOST_TIMEZONE         quota windows: local (default) or utc

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or database error
    2 - Configuration error
")]
struct Cli {
    /// Run one cycle and exit instead of serving
    #[arg(long)]
    once: bool,

    /// Schedule limit for --once (default 30, clamped to 1..=200)
    #[arg(long, value_name = "N")]
    limit: Option<i64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

struct AppState {
    publisher: Publisher,
    cron_secret: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    libroost::logging::init_default(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env()?;
    let db = Database::new(&config.db_path).await?;
    let publisher = Publisher::from_config(&config, db)?;

    if cli.once {
        let summary = publisher
            .run_cycle(cli.limit.unwrap_or(DEFAULT_CYCLE_LIMIT))
            .await?;
        let rendered = serde_json::to_string_pretty(&summary)
            .map_err(|e| RoostError::InvalidInput(e.to_string()))?;
        println!("{rendered}");
        return Ok(());
    }

    let state = Arc::new(AppState {
        publisher,
        cron_secret: config.cron_secret.clone(),
    });
    let app = Router::new()
        .route("/cron/publish", post(cron_publish))
        .with_state(state);

    info!("roost-publish listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| RoostError::InvalidInput(format!("cannot bind {}: {e}", config.bind_addr)))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RoostError::InvalidInput(format!("server error: {e}")))?;

    info!("roost-publish stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

async fn cron_publish(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Some(secret) = &state.cron_secret {
        if !secret_matches(&headers, secret) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response();
        }
    }

    let limit = match parse_limit(&body) {
        Ok(limit) => limit,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
        }
    };

    match state.publisher.run_cycle(limit).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            error!("cycle failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

/// The trigger accepts an empty body or `{"limit": N}`. A body that is
/// not a JSON object, or a `limit` that is not a number, is a 400.
fn parse_limit(body: &str) -> std::result::Result<i64, &'static str> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_CYCLE_LIMIT);
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|_| "malformed JSON body")?;
    if !value.is_object() {
        return Err("body must be a JSON object");
    }
    match value.get("limit") {
        None | Some(Value::Null) => Ok(DEFAULT_CYCLE_LIMIT),
        Some(limit) => limit
            .as_i64()
            .map(|l| l.clamp(1, MAX_CYCLE_LIMIT))
            .ok_or("limit must be a number"),
    }
}

/// The shared secret may arrive as `X-Cron-Secret` or as a bearer token.
fn secret_matches(headers: &HeaderMap, secret: &str) -> bool {
    if headers
        .get("x-cron-secret")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == secret)
        .unwrap_or(false)
    {
        return true;
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == secret)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(parse_limit(""), Ok(DEFAULT_CYCLE_LIMIT));
        assert_eq!(parse_limit("{}"), Ok(DEFAULT_CYCLE_LIMIT));
        assert_eq!(parse_limit(r#"{"limit": 50}"#), Ok(50));
        assert_eq!(parse_limit(r#"{"limit": 0}"#), Ok(1));
        assert_eq!(parse_limit(r#"{"limit": 9999}"#), Ok(MAX_CYCLE_LIMIT));
        assert_eq!(parse_limit(r#"{"limit": null}"#), Ok(DEFAULT_CYCLE_LIMIT));
    }

    #[test]
    fn malformed_limits_are_rejected() {
        assert!(parse_limit("{").is_err());
        assert!(parse_limit(r#"{"limit": "ten"}"#).is_err());
        assert!(parse_limit(r#"[1, 2]"#).is_err());
    }

    #[test]
    fn secret_accepted_from_either_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-cron-secret", HeaderValue::from_static("s3cret"));
        assert!(secret_matches(&headers, "s3cret"));
        assert!(!secret_matches(&headers, "other"));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer s3cret"),
        );
        assert!(secret_matches(&headers, "s3cret"));

        assert!(!secret_matches(&HeaderMap::new(), "s3cret"));
    }
}
