//! HTTP client for the X API v2 write path
//!
//! Two endpoints: create-post and OAuth2 token refresh. Error bodies are
//! parsed tolerantly — the platform's failure shapes vary by subsystem and
//! a malformed body must never take down a cycle.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::debug;

use crate::config::{Config, OAuthClient};
use crate::error::{PlatformError, Result};
use crate::platform::{PlatformGateway, ProxyConfig, PublishResponse, TokenRefreshResponse};
use crate::types::{now_ts, RateLimitInfo};

const POST_URL: &str = "https://api.x.com/2/tweets";
const TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint label stored on rate-limit snapshots.
pub const POST_ENDPOINT: &str = "POST /2/tweets";

pub struct XClient {
    oauth: Option<OAuthClient>,
    mock: bool,
    direct: reqwest::Client,
    /// One client per distinct proxy URL, kept for the process lifetime.
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl XClient {
    pub fn new(config: &Config) -> Result<Self> {
        let direct = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            oauth: config.oauth.clone(),
            mock: config.mock_platform,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&ProxyConfig>) -> Result<reqwest::Client> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let url = proxy.url();
        let mut cache = self.proxied.lock().expect("proxy client cache poisoned");
        if let Some(client) = cache.get(&url) {
            return Ok(client.clone());
        }

        let tunnel = reqwest::Proxy::all(&url)
            .map_err(|e| PlatformError::Proxy(format!("{}:{}: {e}", proxy.host, proxy.port)))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .proxy(tunnel)
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build proxy client: {e}")))?;
        cache.insert(url, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl PlatformGateway for XClient {
    async fn publish(
        &self,
        access_token: &str,
        text: &str,
        proxy: Option<&ProxyConfig>,
    ) -> Result<PublishResponse> {
        if self.mock {
            return Ok(PublishResponse {
                status: 200,
                post_id: Some(format!("mock-{}", crate::types::new_id())),
                ..Default::default()
            });
        }

        let client = self.client_for(proxy)?;
        let sent = client
            .post(POST_URL)
            .bearer_auth(access_token)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                debug!("publish transport error: {e}");
                return Ok(PublishResponse {
                    status: 0,
                    error_message: Some(format!("network error: {e}")),
                    ..Default::default()
                });
            }
        };

        let status = response.status().as_u16();
        let rate_limit = parse_rate_limit(response.headers());
        let body: Option<Value> = response.json().await.ok();

        if (200..300).contains(&status) {
            let post_id = body
                .as_ref()
                .and_then(|v| v.get("data"))
                .and_then(|d| d.get("id"))
                .and_then(|id| id.as_str())
                .map(str::to_owned);
            return Ok(PublishResponse {
                status,
                post_id,
                rate_limit,
                ..Default::default()
            });
        }

        let (error_code, error_message) = extract_error(status, body.as_ref());
        Ok(PublishResponse {
            status,
            post_id: None,
            error_code,
            error_message: Some(error_message),
            rate_limit,
        })
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        proxy: Option<&ProxyConfig>,
    ) -> Result<TokenRefreshResponse> {
        if self.mock {
            return Ok(TokenRefreshResponse {
                status: 200,
                access_token: Some(format!("mock-access-{}", crate::types::new_id())),
                refresh_token: None,
                expires_at: Some(now_ts() + 3600),
                ..Default::default()
            });
        }

        let Some(oauth) = &self.oauth else {
            return Ok(TokenRefreshResponse {
                status: 500,
                error_message: Some("OAuth client credentials are missing".to_string()),
                ..Default::default()
            });
        };

        let client = self.client_for(proxy)?;
        let sent = client
            .post(TOKEN_URL)
            .basic_auth(&oauth.client_id, Some(&oauth.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", oauth.client_id.as_str()),
            ])
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                debug!("token refresh transport error: {e}");
                return Ok(TokenRefreshResponse {
                    status: 0,
                    error_message: Some(format!("network error: {e}")),
                    ..Default::default()
                });
            }
        };

        let status = response.status().as_u16();
        let rate_limit = parse_rate_limit(response.headers());
        let body: Option<Value> = response.json().await.ok();

        if !(200..300).contains(&status) {
            let (_, error_message) = extract_error(status, body.as_ref());
            return Ok(TokenRefreshResponse {
                status,
                error_message: Some(error_message),
                rate_limit,
                ..Default::default()
            });
        }

        let access_token = body
            .as_ref()
            .and_then(|v| v.get("access_token"))
            .and_then(|t| t.as_str())
            .map(str::to_owned);
        let new_refresh = body
            .as_ref()
            .and_then(|v| v.get("refresh_token"))
            .and_then(|t| t.as_str())
            .map(str::to_owned);
        let expires_at = body
            .as_ref()
            .and_then(|v| v.get("expires_in"))
            .and_then(|e| e.as_f64())
            .map(|secs| now_ts() + (secs.floor() as i64).max(1));

        if access_token.is_none() {
            return Ok(TokenRefreshResponse {
                status,
                error_message: Some("token endpoint returned no access_token".to_string()),
                rate_limit,
                ..Default::default()
            });
        }

        Ok(TokenRefreshResponse {
            status,
            access_token,
            refresh_token: new_refresh,
            expires_at,
            error_message: None,
            rate_limit,
        })
    }
}

/// Parse `x-rate-limit-{limit,remaining,reset}` headers; reset is epoch
/// seconds. Absent or unparsable headers simply yield `None`s.
fn parse_rate_limit(headers: &HeaderMap) -> RateLimitInfo {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
    };
    RateLimitInfo {
        limit: get("x-rate-limit-limit"),
        remaining: get("x-rate-limit-remaining"),
        reset_at: get("x-rate-limit-reset"),
    }
}

/// Pull a human-readable error out of whatever shape the platform sent:
/// `message`, then `detail`, then `title`, then the first `errors[].message`.
/// The `error` field, when present, becomes the machine code.
fn extract_error(status: u16, body: Option<&Value>) -> (Option<String>, String) {
    let fallback = format!("x_publish_failed_{status}");
    let Some(body) = body else {
        return (None, fallback);
    };

    let code = body
        .get("error")
        .and_then(|e| e.as_str())
        .map(str::to_owned);

    let message = ["message", "detail", "title"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|v| v.as_str()))
        .map(str::to_owned)
        .or_else(|| {
            body.get("errors")
                .and_then(|e| e.as_array())
                .and_then(|arr| arr.first())
                .and_then(|first| first.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_owned)
        })
        .unwrap_or(fallback);

    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in entries {
            map.insert(
                k.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn rate_limit_headers_parse() {
        let parsed = parse_rate_limit(&headers(&[
            ("x-rate-limit-limit", "300"),
            ("x-rate-limit-remaining", "298"),
            ("x-rate-limit-reset", "1750000900"),
        ]));
        assert_eq!(parsed.limit, Some(300));
        assert_eq!(parsed.remaining, Some(298));
        assert_eq!(parsed.reset_at, Some(1_750_000_900));
    }

    #[test]
    fn rate_limit_headers_tolerate_absence_and_garbage() {
        let parsed = parse_rate_limit(&headers(&[("x-rate-limit-limit", "not-a-number")]));
        assert_eq!(parsed, RateLimitInfo::default());
    }

    #[test]
    fn extract_error_prefers_message_over_detail() {
        let body = serde_json::json!({
            "error": "forbidden",
            "message": "top-level message",
            "detail": "secondary detail"
        });
        let (code, msg) = extract_error(403, Some(&body));
        assert_eq!(code.as_deref(), Some("forbidden"));
        assert_eq!(msg, "top-level message");
    }

    #[test]
    fn extract_error_walks_the_fallback_chain() {
        let detail = serde_json::json!({"detail": "account suspended"});
        assert_eq!(extract_error(403, Some(&detail)).1, "account suspended");

        let title = serde_json::json!({"title": "Too Many Requests"});
        assert_eq!(extract_error(429, Some(&title)).1, "Too Many Requests");

        let errors = serde_json::json!({"errors": [{"message": "duplicate content"}]});
        assert_eq!(extract_error(400, Some(&errors)).1, "duplicate content");
    }

    #[test]
    fn extract_error_survives_malformed_bodies() {
        assert_eq!(extract_error(502, None).1, "x_publish_failed_502");

        let odd = serde_json::json!({"errors": "not an array", "message": 42});
        assert_eq!(extract_error(500, Some(&odd)).1, "x_publish_failed_500");
    }
}
