//! Console configuration.
//!
//! Built either explicitly (`ConsoleConfig::new` + setters) or from the
//! environment, with a `.env` file loaded first when present.

use std::time::Duration;

use crate::error::ConfigError;
use crate::polling::{RUN_POLL_INTERVAL, TASK_POLL_INTERVAL};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_USER_ID: &str = "default";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConsoleConfig {
    /// Backend origin, without trailing slash
    pub base_url: String,
    pub user_id: String,
    /// Admin token for `/internal/debug/login`
    pub debug_token: Option<String>,
    /// Interval between task-status polls in the chat flow
    pub task_poll_interval: Duration,
    /// Interval between debug-run refreshes
    pub run_poll_interval: Duration,
    /// Give up polling after this long; `None` polls until terminal
    pub max_wait: Option<Duration>,
    pub http_timeout: Duration,
    pub use_online_agent: bool,
}

impl ConsoleConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            debug_token: None,
            task_poll_interval: TASK_POLL_INTERVAL,
            run_poll_interval: RUN_POLL_INTERVAL,
            max_wait: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            use_online_agent: false,
        }
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn debug_token(mut self, token: impl Into<String>) -> Self {
        self.debug_token = Some(token.into());
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn use_online_agent(mut self, enabled: bool) -> Self {
        self.use_online_agent = enabled;
        self
    }

    /// Load `.env` (if any) and read `METAREC_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("METAREC_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let mut config = Self::new(base_url);

        if let Some(user_id) = lookup("METAREC_USER_ID").filter(|v| !v.is_empty()) {
            config.user_id = user_id;
        }
        config.debug_token = lookup("METAREC_DEBUG_TOKEN").filter(|v| !v.is_empty());

        if let Some(ms) = parse_u64(&lookup, "METAREC_TASK_POLL_MS")? {
            config.task_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "METAREC_RUN_POLL_MS")? {
            config.run_poll_interval = Duration::from_millis(ms);
        }
        config.max_wait = parse_u64(&lookup, "METAREC_MAX_WAIT_SECS")?.map(Duration::from_secs);
        if let Some(secs) = parse_u64(&lookup, "METAREC_HTTP_TIMEOUT_SECS")? {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("METAREC_USE_ONLINE_AGENT") {
            config.use_online_agent = parse_flag(&raw);
        }

        Ok(config)
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var,
                value: raw,
                expected: "a non-negative integer",
            }),
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = ConsoleConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.user_id, "default");
        assert!(config.debug_token.is_none());
        assert_eq!(config.task_poll_interval, Duration::from_millis(1000));
        assert_eq!(config.run_poll_interval, Duration::from_millis(1500));
        assert!(config.max_wait.is_none());
        assert!(!config.use_online_agent);
    }

    #[test]
    fn reads_overrides() {
        let config = ConsoleConfig::from_lookup(lookup_from(&[
            ("METAREC_BASE_URL", "https://metarec.example.com/"),
            ("METAREC_USER_ID", "alice"),
            ("METAREC_DEBUG_TOKEN", "s3cret"),
            ("METAREC_TASK_POLL_MS", "250"),
            ("METAREC_MAX_WAIT_SECS", "90"),
            ("METAREC_USE_ONLINE_AGENT", "Yes"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://metarec.example.com");
        assert_eq!(config.user_id, "alice");
        assert_eq!(config.debug_token.as_deref(), Some("s3cret"));
        assert_eq!(config.task_poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_wait, Some(Duration::from_secs(90)));
        assert!(config.use_online_agent);
    }

    #[test]
    fn rejects_non_numeric_interval() {
        let err = ConsoleConfig::from_lookup(lookup_from(&[("METAREC_RUN_POLL_MS", "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains("METAREC_RUN_POLL_MS"));
    }

    #[test]
    fn builder_setters() {
        let config = ConsoleConfig::new("http://127.0.0.1:9000")
            .user_id("bob")
            .debug_token("t")
            .max_wait(Duration::from_secs(5))
            .use_online_agent(true);
        assert_eq!(config.user_id, "bob");
        assert_eq!(config.debug_token.as_deref(), Some("t"));
        assert_eq!(config.max_wait, Some(Duration::from_secs(5)));
        assert!(config.use_online_agent);
    }
}
