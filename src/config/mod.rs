/// Process configuration: JSON file + environment overrides

pub mod manager;

pub use manager::ConfigHandle;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Global detection thresholds. Tenants can tighten these per-guild but the
/// engine never emits below them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_margin_min")]
    pub margin_min: i64,
    #[serde(default = "default_dump_drop_pct")]
    pub dump_drop_pct: f64,
    #[serde(default = "default_spike_rise_pct")]
    pub spike_rise_pct: f64,
    #[serde(default = "default_min_volume")]
    pub min_volume: i64,
}

fn default_margin_min() -> i64 {
    100_000
}
fn default_dump_drop_pct() -> f64 {
    5.0
}
fn default_spike_rise_pct() -> f64 {
    5.0
}
fn default_min_volume() -> i64 {
    100
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            margin_min: default_margin_min(),
            dump_drop_pct: default_dump_drop_pct(),
            spike_rise_pct: default_spike_rise_pct(),
            min_volume: default_min_volume(),
        }
    }
}

/// Per-route request quotas (requests per minute per client IP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateQuotas {
    #[serde(default = "default_quota")]
    pub default_per_minute: u32,
    #[serde(default = "default_dumps_quota")]
    pub dumps_per_minute: u32,
    #[serde(default = "default_admin_quota")]
    pub admin_per_minute: u32,
}

fn default_quota() -> u32 {
    100
}
fn default_dumps_quota() -> u32 {
    200
}
fn default_admin_quota() -> u32 {
    30
}

impl Default for RateQuotas {
    fn default() -> Self {
        Self {
            default_per_minute: default_quota(),
            dumps_per_minute: default_dumps_quota(),
            admin_per_minute: default_admin_quota(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_upstream_base")]
    pub upstream_base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Full database URL. Falls back to a local SQLite file at `db_path`.
    #[serde(default)]
    pub db_url: Option<String>,
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_config_root")]
    pub config_root: PathBuf,
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    #[serde(default = "default_api_bind")]
    pub api_bind: String,
    #[serde(default)]
    pub admin_key: Option<String>,
    /// Allow admin routes from non-private addresses. Off unless explicitly
    /// enabled.
    #[serde(default)]
    pub admin_allow_public: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Discord bot token used by the chat egress. Optional: without it the
    /// router runs in dry mode and only logs would-be emissions.
    #[serde(default)]
    pub chat_token: Option<String>,
    /// Operator webhook notified on store failures.
    #[serde(default)]
    pub admin_webhook: Option<String>,

    #[serde(default = "default_ingest_period")]
    pub ingest_period_seconds: u64,
    #[serde(default = "default_catalog_period")]
    pub catalog_period_seconds: u64,
    #[serde(default = "default_prune_period")]
    pub prune_period_seconds: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub rate_quotas: RateQuotas,
}

fn default_upstream_base() -> String {
    "https://prices.runescape.wiki/api/v1/osrs".to_string()
}
fn default_user_agent() -> String {
    "ge-sniper/0.4 (market event detector; contact@example.com)".to_string()
}
fn default_db_path() -> String {
    "data/history.db".to_string()
}
fn default_config_root() -> PathBuf {
    PathBuf::from("server_configs")
}
fn default_cache_root() -> PathBuf {
    PathBuf::from("data/cache")
}
fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_ingest_period() -> u64 {
    60
}
fn default_catalog_period() -> u64 {
    21_600
}
fn default_prune_period() -> u64 {
    3_600
}
fn default_retention_days() -> u32 {
    7
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults always deserialize")
    }
}

impl AppConfig {
    /// Load configuration: optional JSON file pointed at by `CONFIG_PATH`
    /// (or the given path), then environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                serde_json::from_str(&raw)?
            }
            Some(p) => {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            None => AppConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DB_URL") {
            if !url.is_empty() {
                self.db_url = Some(url);
            }
        }
        if let Ok(path) = std::env::var("DB_PATH") {
            if !path.is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(key) = std::env::var("ADMIN_KEY") {
            if !key.is_empty() {
                self.admin_key = Some(key);
            }
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(base) = std::env::var("UPSTREAM_BASE_URL") {
            if !base.is_empty() {
                self.upstream_base_url = base.trim_end_matches('/').to_string();
            }
        }
        if let Ok(v) = std::env::var("INGEST_PERIOD_SECONDS") {
            if let Ok(n) = v.parse() {
                self.ingest_period_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("CATALOG_PERIOD_SECONDS") {
            if let Ok(n) = v.parse() {
                self.catalog_period_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("RETENTION_DAYS") {
            if let Ok(n) = v.parse() {
                self.retention_days = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest_period_seconds == 0 {
            return Err(ConfigError::Invalid(
                "ingest_period_seconds must be positive".into(),
            ));
        }
        if self.catalog_period_seconds < 3_600 {
            return Err(ConfigError::Invalid(
                "catalog_period_seconds must be at least one hour".into(),
            ));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Invalid("retention_days must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.thresholds.dump_drop_pct) {
            return Err(ConfigError::Invalid("dump_drop_pct out of range".into()));
        }
        if self.thresholds.margin_min < 0 || self.thresholds.min_volume < 0 {
            return Err(ConfigError::Invalid("thresholds must be non-negative".into()));
        }
        self.api_bind
            .parse::<std::net::SocketAddr>()
            .map_err(|_| ConfigError::Invalid(format!("invalid api_bind: {}", self.api_bind)))?;
        Ok(())
    }

    /// Database URL with the SQLite file fallback applied.
    pub fn database_url(&self) -> String {
        match &self.db_url {
            Some(url) => url.clone(),
            None => format!("sqlite:{}", self.db_path),
        }
    }

    pub fn retention_seconds(&self) -> i64 {
        self.retention_days as i64 * 86_400
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = AppConfig::default();
        assert_eq!(config.thresholds.margin_min, 100_000);
        assert_eq!(config.thresholds.dump_drop_pct, 5.0);
        assert_eq!(config.thresholds.spike_rise_pct, 5.0);
        assert_eq!(config.thresholds.min_volume, 100);
        assert_eq!(config.ingest_period_seconds, 60);
        assert_eq!(config.retention_days, 7);
    }

    #[test]
    fn database_url_falls_back_to_file() {
        let mut config = AppConfig::default();
        config.db_path = "data/test.db".into();
        assert_eq!(config.database_url(), "sqlite:data/test.db");
        config.db_url = Some("sqlite:elsewhere.db".into());
        assert_eq!(config.database_url(), "sqlite:elsewhere.db");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"thresholds": {"margin_min": 5000}}"#).unwrap();
        assert_eq!(config.thresholds.margin_min, 5_000);
        assert_eq!(config.thresholds.min_volume, 100);
        assert_eq!(config.rate_quotas.dumps_per_minute, 200);
    }

    #[test]
    fn rejects_zero_ingest_period() {
        let mut config = AppConfig::default();
        config.ingest_period_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_sub_hour_catalog_period() {
        let mut config = AppConfig::default();
        config.catalog_period_seconds = 600;
        assert!(config.validate().is_err());
    }
}
