//! Configuration management.
//!
//! Settings load from `config/default.toml` when present, then
//! environment variables override the deployment-specific values:
//! `DATABASE_URL`, `REDIS_URL`, `REDIS_PASSWORD`, `ODDS_API_KEY`,
//! `ODDS_CACHE_TTL` (accepts `s`/`m`/`h` suffixes), and
//! `PAGE_MANAGER_URL`.

use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { url: String::new() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default)]
    pub password: String,
    /// Quote TTL; must exceed the longest poll interval.
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_cache_ttl() -> String {
    "5m".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            password: String::new(),
            ttl: default_cache_ttl(),
        }
    }
}

impl CacheSettings {
    /// Connection URL with the password spliced in when one is
    /// configured separately from the URL.
    pub fn redis_url(&self) -> String {
        if self.password.is_empty() || self.url.contains('@') {
            return self.url.clone();
        }
        match self.url.strip_prefix("redis://") {
            Some(rest) => format!("redis://:{}@{}", self.password, rest),
            None => self.url.clone(),
        }
    }

    pub fn cache_ttl(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.ttl).ok_or_else(|| {
            ConfigError::Message(format!("invalid cache ttl: {}", self.ttl))
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VendorSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_vendor_base_url")]
    pub base_url: String,
}

fn default_vendor_base_url() -> String {
    "https://api.the-odds-api.com".to_string()
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_vendor_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WriterSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
    #[serde(default = "default_warm_window_hours")]
    pub warm_window_hours: i64,
}

fn default_batch_size() -> usize {
    100
}
fn default_flush_interval_seconds() -> u64 {
    5
}
fn default_warm_window_hours() -> i64 {
    72
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
            warm_window_hours: default_warm_window_hours(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleSettings {
    #[serde(default = "default_lifecycle_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_close_books")]
    pub close_books: Vec<String>,
}

fn default_lifecycle_interval_seconds() -> u64 {
    30
}
fn default_close_books() -> Vec<String> {
    vec!["fanduel".to_string(), "draftkings".to_string()]
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_lifecycle_interval_seconds(),
            close_books: default_close_books(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PageManagerSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_close_books")]
    pub books: Vec<String>,
}

impl Default for PageManagerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            books: default_close_books(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub vendor: VendorSettings,
    #[serde(default)]
    pub writer: WriterSettings,
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
    #[serde(default)]
    pub page_manager: PageManagerSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Environment variable overrides for deployment values
        if let Ok(url) = env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                settings.database.url = url;
            }
        }
        if let Ok(url) = env::var("REDIS_URL") {
            if !url.trim().is_empty() {
                settings.cache.url = url;
            }
        }
        if let Ok(password) = env::var("REDIS_PASSWORD") {
            if !password.trim().is_empty() {
                settings.cache.password = password;
            }
        }
        if let Ok(key) = env::var("ODDS_API_KEY") {
            if !key.trim().is_empty() {
                settings.vendor.api_key = key;
            }
        }
        if let Ok(raw) = env::var("ODDS_CACHE_TTL") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                if parse_duration(trimmed).is_none() {
                    return Err(ConfigError::Message(format!(
                        "ODDS_CACHE_TTL is not a valid duration: {trimmed}"
                    )));
                }
                settings.cache.ttl = trimmed.to_string();
            }
        }
        if let Ok(url) = env::var("PAGE_MANAGER_URL") {
            if !url.trim().is_empty() {
                settings.page_manager.base_url = url;
                settings.page_manager.enabled = true;
            }
        }

        Ok(settings)
    }
}

/// Parses `30`, `30s`, `5m`, or `1h` into a [`Duration`]. Bare numbers
/// are seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (value, multiplier) = match raw.chars().last() {
        Some('s') => (&raw[..raw.len() - 1], 1),
        Some('m') => (&raw[..raw.len() - 1], 60),
        Some('h') => (&raw[..raw.len() - 1], 3600),
        Some(c) if c.is_ascii_digit() => (raw, 1),
        _ => return None,
    };
    let value: u64 = value.trim().parse().ok()?;
    Some(Duration::from_secs(value * multiplier))
}
