//! roost-dispatch - route content onto the schedule queue
//!
//! Operator-side companion to roost-publish: takes one content row,
//! selects target accounts, and inserts staggered schedules that a later
//! publish cycle will drain.

use clap::{Parser, Subcommand};
use libroost::dispatch::{self, DispatchRequest, SelectionMode, DEFAULT_MAX_ATTEMPTS};
use libroost::types::ScheduleStatus;
use libroost::{config, Database, Result, RoostError};

#[derive(Parser, Debug)]
#[command(name = "roost-dispatch")]
#[command(version)]
#[command(about = "Plan schedules from content and accounts")]
#[command(long_about = "\
roost-dispatch - route content onto the schedule queue

DESCRIPTION:
    Creates one schedule per target account for a content row, with an
    optional stagger between accounts. Re-running a dispatch with the same
    parameters inserts nothing new: schedules are deduplicated by an
    idempotency key derived from content, account and planned time.

USAGE EXAMPLES:
    # Rule-based routing (tag matches topic, or language matches)
    roost-dispatch dispatch CONTENT_ID

    # Explicit accounts, 15 minutes apart, starting at a fixed time
    roost-dispatch dispatch CONTENT_ID --mode manual \\
        --accounts acc1,acc2 --stagger-minutes 15 --at 2026-08-02T09:00:00Z

    # Inspect upcoming work
    roost-dispatch queue --format json

CONFIGURATION:
    ROOST_DB_PATH - SQLite path (default ~/.local/share/roost/roost.db)

EXIT CODES:
    0 - Success
    1 - Operation or database error
    2 - Configuration error
    3 - Invalid input (unknown content, bad time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create schedules for one content
    Dispatch {
        /// Content ID to dispatch
        content_id: String,

        /// Account selection: rule (topic/language match) or manual
        #[arg(long, default_value = "rule")]
        mode: String,

        /// Comma-separated account IDs (manual mode)
        #[arg(long, value_delimiter = ',')]
        accounts: Vec<String>,

        /// First planned time, RFC 3339 (default: now)
        #[arg(long, value_name = "WHEN")]
        at: Option<String>,

        /// Minutes between consecutive accounts (0..=120)
        #[arg(long, default_value_t = 0)]
        stagger_minutes: i64,

        /// Schedule priority, smaller runs sooner (1..=1000)
        #[arg(long, default_value_t = 100)]
        priority: i64,

        /// Attempt budget per schedule (1..=8)
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: i64,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List upcoming schedules
    Queue {
        /// Maximum rows to show
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    libroost::logging::init_default(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let db = Database::new(&config::resolve_db_path()?).await?;

    match cli.command {
        Commands::Dispatch {
            content_id,
            mode,
            accounts,
            at,
            stagger_minutes,
            priority,
            max_attempts,
            format,
        } => {
            let mode = parse_mode(&mode)?;
            let schedule_at = at.as_deref().map(parse_rfc3339).transpose()?;

            let request = DispatchRequest {
                content_id,
                mode,
                account_ids: accounts,
                schedule_at,
                stagger_minutes,
                priority,
                max_attempts,
            };
            let summary = dispatch::plan(&db, request).await?;

            if format == "json" {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary)
                        .map_err(|e| RoostError::InvalidInput(e.to_string()))?
                );
            } else {
                println!(
                    "Dispatched {}: {} schedule(s) created, {} skipped (already queued)",
                    summary.content_id, summary.created, summary.skipped
                );
            }
            Ok(())
        }

        Commands::Queue { limit, format } => {
            let schedules = db.pending_schedules(limit).await?;

            if format == "json" {
                let rows: Vec<serde_json::Value> = schedules
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "id": s.id,
                            "accountId": s.account_id,
                            "contentId": s.content_id,
                            "plannedAt": s.planned_at,
                            "status": s.status.as_str(),
                            "priority": s.priority,
                            "attemptCount": s.attempt_count,
                            "nextAttemptAt": s.next_attempt_at,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&rows)
                        .map_err(|e| RoostError::InvalidInput(e.to_string()))?
                );
            } else if schedules.is_empty() {
                println!("Queue is empty.");
            } else {
                for s in &schedules {
                    let when = chrono::DateTime::from_timestamp(s.planned_at, 0)
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| s.planned_at.to_string());
                    let extra = match s.status {
                        ScheduleStatus::Failed => format!(
                            " (attempt {}/{}, retry pending)",
                            s.attempt_count, s.max_attempts
                        ),
                        _ => String::new(),
                    };
                    println!(
                        "{}  {}  prio {}  {}{}",
                        s.id,
                        when,
                        s.priority,
                        s.status.as_str(),
                        extra
                    );
                }
            }
            Ok(())
        }
    }
}

fn parse_mode(raw: &str) -> Result<SelectionMode> {
    match raw.trim().to_lowercase().as_str() {
        "rule" => Ok(SelectionMode::Rule),
        "manual" => Ok(SelectionMode::Manual),
        other => Err(RoostError::InvalidInput(format!(
            "invalid mode '{other}': expected rule or manual"
        ))),
    }
}

fn parse_rfc3339(raw: &str) -> Result<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| RoostError::InvalidInput(format!("invalid --at time '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(parse_mode("rule").unwrap(), SelectionMode::Rule);
        assert_eq!(parse_mode(" Manual ").unwrap(), SelectionMode::Manual);
        assert!(parse_mode("broadcast").is_err());
    }

    #[test]
    fn rfc3339_parsing() {
        assert_eq!(parse_rfc3339("1970-01-01T00:00:00Z").unwrap(), 0);
        assert!(parse_rfc3339("tomorrow 3pm").is_err());
    }
}
