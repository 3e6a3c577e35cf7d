//! Input document and runtime settings.
//!
//! `HarvestInput` is what callers send (JSON file or API body), loosely typed.
//! `HarvestConfig::from_input` validates and clamps it once; nothing downstream looks at
//! the raw input again. `RuntimeSettings` comes from the environment (`.env` supported).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use utoipa::ToSchema;

use crate::cookies::{self, NormalizedCookie};
use crate::error::HarvestError;
use crate::session::{self, ProxyEndpoint};

pub const DEFAULT_MAX_RESULTS: usize = 100;
pub const MAX_RESULTS_LIMIT: usize = 5000;
pub const DEFAULT_POOL_SIZE: usize = 20;
pub const POOL_SIZE_LIMIT: usize = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SessionInput {
    #[serde(rename = "maxPoolSize")]
    pub max_pool_size: Option<i64>,
    #[serde(rename = "persistState")]
    pub persist_state: Option<bool>,
    #[serde(rename = "retireOnBlocked")]
    pub retire_on_blocked: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HarvestInput {
    /// Search term. Required.
    pub query: Option<String>,
    /// Clamped to 1..=5000, default 100.
    #[serde(rename = "maxResults", alias = "max_results")]
    #[schema(value_type = Option<i64>)]
    pub max_results: Option<Value>,
    pub recent_posts: Option<bool>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Cookie array, JSON string, or `name=value; ...` header string.
    #[schema(value_type = Option<Object>)]
    pub cookies: Option<Value>,
    pub cookies_json: Option<String>,
    /// Passed through to the identity pool (`proxyUrls`).
    #[schema(value_type = Option<Object>)]
    pub proxy: Option<Value>,
    pub session: Option<SessionInput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_pool_size: usize,
    pub persist_state: bool,
    pub retire_on_blocked: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_POOL_SIZE,
            persist_state: true,
            retire_on_blocked: true,
        }
    }
}

/// Validated input for one run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub query: String,
    pub max_results: usize,
    pub recent_only: bool,
    /// As supplied, echoed in the run summary.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub start_epoch: Option<i64>,
    pub end_epoch: Option<i64>,
    pub cookies: Vec<NormalizedCookie>,
    pub proxies: Vec<ProxyEndpoint>,
    pub session: SessionOptions,
}

impl HarvestConfig {
    pub fn from_input(input: HarvestInput) -> Result<Self, HarvestError> {
        let query = input.query.as_deref().map(str::trim).unwrap_or_default();
        if query.is_empty() {
            return Err(HarvestError::MissingQuery);
        }

        let max_results = clamp_count(
            input.max_results.as_ref(),
            DEFAULT_MAX_RESULTS,
            MAX_RESULTS_LIMIT,
            "maxResults",
        );

        let session_input = input.session.clone().unwrap_or_default();
        let session = SessionOptions {
            max_pool_size: clamp_count(
                session_input.max_pool_size.map(Value::from).as_ref(),
                DEFAULT_POOL_SIZE,
                POOL_SIZE_LIMIT,
                "session.maxPoolSize",
            ),
            persist_state: session_input.persist_state.unwrap_or(true),
            retire_on_blocked: session_input.retire_on_blocked.unwrap_or(true),
        };

        let start_epoch = date_field(input.start_date.as_deref(), "start_date");
        let end_epoch = date_field(input.end_date.as_deref(), "end_date");

        Ok(Self {
            query: query.to_string(),
            max_results,
            recent_only: input.recent_posts.unwrap_or(false),
            cookies: cookies_from_input(&input),
            proxies: session::proxies_from_input(input.proxy.as_ref()),
            start_date: input.start_date,
            end_date: input.end_date,
            start_epoch,
            end_epoch,
            session,
        })
    }

    pub fn authenticated(&self) -> bool {
        !self.cookies.is_empty()
    }
}

/// `cookies` (array or string) wins over `cookies_json`; an empty result from one source
/// falls through to the next.
fn cookies_from_input(input: &HarvestInput) -> Vec<NormalizedCookie> {
    let from_cookies = input
        .cookies
        .as_ref()
        .map(cookies::normalize_cookies)
        .unwrap_or_default();
    if !from_cookies.is_empty() {
        return from_cookies;
    }

    match input.cookies_json.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let parsed = cookies::parse_cookie_string(raw);
            if parsed.is_empty() {
                warn!("Failed to read any cookies from cookies_json; continuing unauthenticated");
            }
            parsed
        }
        _ => Vec::new(),
    }
}

fn clamp_count(raw: Option<&Value>, default: usize, max: usize, field: &str) -> usize {
    let parsed = match raw {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(n) if n.is_finite() => (n.trunc().max(1.0) as usize).min(max),
        Some(_) | None => {
            if raw.map_or(false, |v| !v.is_null()) {
                warn!(field, "Not a number; using default {}", default);
            }
            default
        }
    }
}

fn date_field(raw: Option<&str>, field: &str) -> Option<i64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = parse_date_epoch(raw);
    if parsed.is_none() {
        warn!(field, value = raw, "Unrecognised date; ignoring it");
    }
    parsed
}

/// `YYYY-MM-DD` (UTC midnight), RFC 3339, or integer epoch seconds.
pub fn parse_date_epoch(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(epoch) = raw.parse::<i64>() {
        return Some(epoch);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.timestamp())
}

/// Settle intervals between page actions: `base + rand(0..jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub initial_settle: Duration,
    pub scroll_base: Duration,
    pub scroll_jitter: Duration,
    pub load_more_base: Duration,
    pub load_more_jitter: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            initial_settle: Duration::from_millis(1500),
            scroll_base: Duration::from_millis(900),
            scroll_jitter: Duration::from_millis(600),
            load_more_base: Duration::from_millis(1200),
            load_more_jitter: Duration::from_millis(800),
        }
    }
}

impl Pacing {
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            initial_settle: Duration::ZERO,
            scroll_base: Duration::ZERO,
            scroll_jitter: Duration::ZERO,
            load_more_base: Duration::ZERO,
            load_more_jitter: Duration::ZERO,
        }
    }
}

/// Knobs for the attempt loop that aren't part of the input document.
#[derive(Debug, Clone)]
pub struct HarvestTuning {
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
    pub max_idle_rounds: u32,
    /// Pause before retrying a failed attempt.
    pub retry_delay: Duration,
    pub pacing: Pacing,
}

impl Default for HarvestTuning {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(1200),
            max_attempts: 3,
            max_idle_rounds: 10,
            retry_delay: Duration::from_secs(5),
            pacing: Pacing::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub port: u16,
    pub database_url: Option<String>,
    pub dataset_dir: PathBuf,
    pub session_state_dir: PathBuf,
    pub headless: bool,
    pub tuning: HarvestTuning,
}

impl RuntimeSettings {
    pub fn from_env() -> Self {
        let defaults = HarvestTuning::default();
        let tuning = HarvestTuning {
            attempt_timeout: env_parse("HARVEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.attempt_timeout),
            max_attempts: env_parse("HARVEST_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts)
                .max(1),
            max_idle_rounds: env_parse("HARVEST_MAX_IDLE_ROUNDS")
                .unwrap_or(defaults.max_idle_rounds)
                .max(1),
            retry_delay: defaults.retry_delay,
            pacing: Pacing::default(),
        };

        Self {
            port: env_parse("PORT").unwrap_or(3000),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            dataset_dir: env::var("DATASET_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("storage/datasets")),
            session_state_dir: env::var("SESSION_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("storage/key_value_stores")),
            headless: env_parse("CHROME_HEADLESS").unwrap_or(true),
            tuning,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::SameSite;
    use serde_json::json;

    fn input(value: Value) -> HarvestInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn missing_or_blank_query_is_fatal() {
        assert!(matches!(
            HarvestConfig::from_input(input(json!({}))),
            Err(HarvestError::MissingQuery)
        ));
        assert!(matches!(
            HarvestConfig::from_input(input(json!({"query": "   "}))),
            Err(HarvestError::MissingQuery)
        ));
    }

    #[test]
    fn defaults_and_clamps() {
        let config = HarvestConfig::from_input(input(json!({"query": " rust "}))).unwrap();
        assert_eq!(config.query, "rust");
        assert_eq!(config.max_results, 100);
        assert!(!config.recent_only);
        assert_eq!(config.session, SessionOptions::default());
        assert!(!config.authenticated());

        let config = HarvestConfig::from_input(input(json!({
            "query": "rust",
            "maxResults": 999999,
            "session": {"maxPoolSize": 0, "persistState": false, "retireOnBlocked": false}
        })))
        .unwrap();
        assert_eq!(config.max_results, 5000);
        assert_eq!(config.session.max_pool_size, 1);
        assert!(!config.session.persist_state);
        assert!(!config.session.retire_on_blocked);

        let config =
            HarvestConfig::from_input(input(json!({"query": "rust", "maxResults": "-4"}))).unwrap();
        assert_eq!(config.max_results, 1);

        let config =
            HarvestConfig::from_input(input(json!({"query": "rust", "maxResults": "lots"}))).unwrap();
        assert_eq!(config.max_results, 100);
    }

    #[test]
    fn dates_become_epochs() {
        assert_eq!(parse_date_epoch("2024-01-02"), Some(1_704_153_600));
        assert_eq!(parse_date_epoch("2024-01-02T00:00:10Z"), Some(1_704_153_610));
        assert_eq!(parse_date_epoch("1704153600"), Some(1_704_153_600));
        assert_eq!(parse_date_epoch("next tuesday"), None);

        let config = HarvestConfig::from_input(input(json!({
            "query": "rust", "start_date": "2024-01-02", "end_date": "garbage"
        })))
        .unwrap();
        assert_eq!(config.start_epoch, Some(1_704_153_600));
        assert_eq!(config.end_epoch, None);
        assert_eq!(config.end_date.as_deref(), Some("garbage"));
    }

    #[test]
    fn cookie_sources_fall_through() {
        let config = HarvestConfig::from_input(input(json!({
            "query": "rust",
            "cookies": [],
            "cookies_json": "[{\"name\":\"c_user\",\"value\":\"1\",\"sameSite\":\"None\",\"secure\":false}]"
        })))
        .unwrap();
        assert!(config.authenticated());
        assert_eq!(config.cookies[0].same_site, SameSite::None);
        assert!(config.cookies[0].secure);

        let config = HarvestConfig::from_input(input(json!({
            "query": "rust",
            "cookies": "c_user=1; xs=abc"
        })))
        .unwrap();
        assert_eq!(config.cookies.len(), 2);

        let config = HarvestConfig::from_input(input(json!({
            "query": "rust",
            "cookies_json": "{not json"
        })))
        .unwrap();
        assert!(!config.authenticated());
    }
}
