//! Configuration management for roost
//!
//! All runtime configuration comes from the environment. The database path
//! follows the XDG base directory convention with `~` expansion, the same
//! way the rest of the toolchain resolves its data files.

use crate::error::{ConfigError, Result};

/// Environment variable holding the process-wide encryption secret.
pub const ENV_ENCRYPTION_KEY: &str = "TOKEN_ENCRYPTION_KEY";
/// OAuth2 client credentials used for token refresh.
pub const ENV_OAUTH_CLIENT_ID: &str = "AUTH_TWITTER_ID";
pub const ENV_OAUTH_CLIENT_SECRET: &str = "AUTH_TWITTER_SECRET";
/// Shared secret protecting the cron trigger endpoint.
pub const ENV_CRON_SECRET: &str = "CRON_SECRET";
/// When set to `1`, the platform client returns synthetic successes.
pub const ENV_MOCK_PLATFORM: &str = "MOCK_X_API";

const ENV_DB_PATH: &str = "ROOST_DB_PATH";
const ENV_BIND_ADDR: &str = "ROOST_BIND_ADDR";
const ENV_TIMEZONE: &str = "ROOST_TIMEZONE";

/// Which wall clock defines the daily/monthly quota windows.
///
/// "Daily" is a deployment decision: a fleet operated from one office wants
/// that office's midnight, a distributed one usually wants UTC. The choice
/// is named here so reads and writes can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaTimezone {
    Local,
    Utc,
}

impl std::str::FromStr for QuotaTimezone {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(QuotaTimezone::Local),
            "utc" => Ok(QuotaTimezone::Utc),
            other => Err(format!(
                "Invalid timezone: '{}'. Valid options: local, utc",
                other
            )),
        }
    }
}

/// OAuth2 client credentials for the refresh grant.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

/// Main configuration structure for roost
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub db_path: String,
    /// Raw encryption secret; key derivation happens in the credential store
    pub encryption_key: String,
    /// OAuth client credentials, when both halves are configured
    pub oauth: Option<OAuthClient>,
    /// Shared secret for the cron endpoint; `None` leaves it open
    pub cron_secret: Option<String>,
    /// Synthetic platform responses instead of real HTTP calls
    pub mock_platform: bool,
    /// Listen address for the trigger server
    pub bind_addr: String,
    /// Wall clock for quota windows
    pub quota_timezone: QuotaTimezone,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `TOKEN_ENCRYPTION_KEY` is required; everything else has a default or
    /// is optional. OAuth credentials are only used when an account needs a
    /// token refresh, so a missing pair is not an error here.
    pub fn from_env() -> Result<Self> {
        let encryption_key = std::env::var(ENV_ENCRYPTION_KEY)
            .map_err(|_| ConfigError::MissingEnv(ENV_ENCRYPTION_KEY.to_string()))?;
        if encryption_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: ENV_ENCRYPTION_KEY.to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        let oauth = match (
            std::env::var(ENV_OAUTH_CLIENT_ID).ok(),
            std::env::var(ENV_OAUTH_CLIENT_SECRET).ok(),
        ) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(OAuthClient {
                    client_id: id,
                    client_secret: secret,
                })
            }
            _ => None,
        };

        let cron_secret = std::env::var(ENV_CRON_SECRET)
            .ok()
            .filter(|s| !s.is_empty());

        let mock_platform = std::env::var(ENV_MOCK_PLATFORM)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let quota_timezone = match std::env::var(ENV_TIMEZONE) {
            Ok(raw) => raw
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    name: ENV_TIMEZONE.to_string(),
                    reason,
                })?,
            Err(_) => QuotaTimezone::Local,
        };

        Ok(Self {
            db_path: resolve_db_path()?,
            encryption_key,
            oauth,
            cron_secret,
            mock_platform,
            bind_addr: std::env::var(ENV_BIND_ADDR)
                .unwrap_or_else(|_| "127.0.0.1:8787".to_string()),
            quota_timezone,
        })
    }
}

/// Resolve the database path with environment variable override support
///
/// Priority order:
/// 1. ROOST_DB_PATH environment variable (with ~ expansion)
/// 2. XDG data directory default (~/.local/share/roost/roost.db)
pub fn resolve_db_path() -> Result<String> {
    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        let expanded = shellexpand::full(&path)
            .map_err(|e| ConfigError::Path(format!("Failed to expand DB path: {}", e)))?;
        return Ok(expanded.into_owned());
    }

    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::Path("XDG data directory not found".to_string()))?;
    Ok(data_dir
        .join("roost")
        .join("roost.db")
        .to_string_lossy()
        .into_owned())
}
