use crate::api::http::HttpConfig;
use crate::db::Database;
use crate::upload::PollPolicy;
use std::collections::BTreeMap;
use std::time::Duration;

pub const SETTING_KEYS: &[&str] = &[
    "base_url",
    "api_token",
    "poll_interval_ms",
    "grace_period_ms",
    "max_backoff_ms",
    "max_poll_failures",
    "request_timeout_secs",
];

const NUMERIC_KEYS: &[&str] = &[
    "poll_interval_ms",
    "grace_period_ms",
    "max_backoff_ms",
    "max_poll_failures",
    "request_timeout_secs",
];

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown setting key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
    #[error("Settings store error: {0}")]
    Store(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub poll: PollPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(30),
            poll: PollPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Stored settings over defaults, then `ASSISTANT_BASE_URL` / `ASSISTANT_API_TOKEN` on top.
    pub fn load(db: &Database) -> Result<Self, ConfigError> {
        let base_url = std::env::var("ASSISTANT_BASE_URL").ok();
        let api_token = std::env::var("ASSISTANT_API_TOKEN").ok();
        Self::load_with_overrides(db, base_url, api_token)
    }

    pub fn load_with_overrides(
        db: &Database,
        base_url: Option<String>,
        api_token: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(url) = db.get_setting("base_url")? {
            config.base_url = url;
        }
        config.api_token = db.get_setting("api_token")?;
        if let Some(ms) = number(db, "poll_interval_ms")? {
            config.poll.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = number(db, "grace_period_ms")? {
            config.poll.grace = Duration::from_millis(ms);
        }
        if let Some(ms) = number(db, "max_backoff_ms")? {
            config.poll.max_backoff = Duration::from_millis(ms);
        }
        if let Some(n) = number(db, "max_poll_failures")? {
            config.poll.max_consecutive_failures = n.clamp(1, u32::MAX as u64) as u32;
        }
        if let Some(secs) = number(db, "request_timeout_secs")? {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(url) = base_url.filter(|u| !u.is_empty()) {
            config.base_url = url;
        }
        if let Some(token) = api_token.filter(|t| !t.is_empty()) {
            config.api_token = Some(token);
        }
        Ok(config)
    }

    pub fn http(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.base_url.clone(),
            api_token: self.api_token.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

fn number(db: &Database, key: &str) -> Result<Option<u64>, ConfigError> {
    match db.get_setting(key)? {
        Some(raw) => parse_number(key, &raw).map(Some),
        None => Ok(None),
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

pub fn set_setting(db: &Database, key: &str, value: &str) -> Result<(), ConfigError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(ConfigError::UnknownKey(key.to_string()));
    }
    if NUMERIC_KEYS.contains(&key) {
        parse_number(key, value)?;
    }
    db.set_setting(key, value)?;
    Ok(())
}

pub fn delete_setting(db: &Database, key: &str) -> Result<bool, ConfigError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(ConfigError::UnknownKey(key.to_string()));
    }
    Ok(db.delete_setting(key)?)
}

/// Stored settings for display, with tokens masked.
pub fn masked_settings(db: &Database) -> Result<BTreeMap<String, String>, ConfigError> {
    Ok(db
        .all_settings()?
        .into_iter()
        .filter(|(key, _)| SETTING_KEYS.contains(&key.as_str()))
        .map(|(key, value)| {
            let shown = mask(&key, &value);
            (key, shown)
        })
        .collect())
}

fn mask(key: &str, value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if key.ends_with("_token") && chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_settings() {
        let db = Database::in_memory().unwrap();
        let config = AppConfig::load_with_overrides(&db, None, None).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.api_token.is_none());
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.poll.grace, Duration::from_secs(3));
    }

    #[test]
    fn test_stored_settings_then_overrides() {
        let db = Database::in_memory().unwrap();
        set_setting(&db, "base_url", "http://stored:9000").unwrap();
        set_setting(&db, "poll_interval_ms", "500").unwrap();
        set_setting(&db, "max_poll_failures", "0").unwrap();
        let config = AppConfig::load_with_overrides(&db, None, None).unwrap();
        assert_eq!(config.base_url, "http://stored:9000");
        assert_eq!(config.poll.interval, Duration::from_millis(500));
        assert_eq!(config.poll.max_consecutive_failures, 1);

        let config = AppConfig::load_with_overrides(
            &db,
            Some("http://env:1".into()),
            Some("tok".into()),
        )
        .unwrap();
        assert_eq!(config.base_url, "http://env:1");
        assert_eq!(config.http().api_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_set_setting_validates() {
        let db = Database::in_memory().unwrap();
        assert!(matches!(
            set_setting(&db, "theme", "dark"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            set_setting(&db, "poll_interval_ms", "fast"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(db.get_setting("poll_interval_ms").unwrap().is_none());
    }

    #[test]
    fn test_bad_stored_number_is_an_error() {
        let db = Database::in_memory().unwrap();
        db.set_setting("grace_period_ms", "soon").unwrap();
        assert!(matches!(
            AppConfig::load_with_overrides(&db, None, None),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_tokens_are_masked() {
        let db = Database::in_memory().unwrap();
        set_setting(&db, "api_token", "sk-1234567890abcd").unwrap();
        set_setting(&db, "base_url", "http://localhost:8000").unwrap();
        let shown = masked_settings(&db).unwrap();
        assert_eq!(shown["api_token"], "sk-1...abcd");
        assert_eq!(shown["base_url"], "http://localhost:8000");

        // rows written outside set_setting are not part of the configuration
        db.set_setting("legacy_theme", "dark").unwrap();
        assert!(!masked_settings(&db).unwrap().contains_key("legacy_theme"));
    }
}
