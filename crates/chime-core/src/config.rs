use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (chime.toml + `CHIME_*` env overrides).
///
/// Env overrides use `__` as the section separator so multi-word keys stay
/// addressable: `CHIME_COLLECTOR__INTERVAL_SECS=5` maps to
/// `collector.interval_secs`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChimeConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Collector loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Seconds between due scans. Minute-level granularity is the design
    /// target, so the default is 60.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum schedules fetched per scan page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            page_size: default_page_size(),
        }
    }
}

/// Executor callback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Attempt budget per callback (transport errors and 5xx consume it).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-attempt HTTP timeout. Must stay well below any hosting runtime's
    /// overall execution budget so a wedged endpoint cannot pin a worker.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// When a schedule carries no headers, send
    /// `accept: application/json` and `content-type: application/json;charset=utf-8`.
    #[serde(default = "bool_true")]
    pub default_headers: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            default_headers: true,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.db", home)
}
fn default_interval_secs() -> u64 {
    60
}
fn default_page_size() -> u32 {
    100
}
fn default_max_attempts() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    10_000
}
fn bool_true() -> bool {
    true
}

impl ChimeConfig {
    /// Load config from a TOML file with CHIME_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.chime/chime.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ChimeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHIME_").split("__"))
            .extract()
            .map_err(|e| crate::error::ChimeError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.toml", home)
}
