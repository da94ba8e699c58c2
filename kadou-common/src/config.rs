//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration lives in a single TOML file. Every field has
//! a built-in default, so a missing file only produces a warning.
//!
//! # Settings Sources Priority
//!
//! Config file: `--config` → `KADOU_CONFIG` → `<config_dir>/kadou/kadou.toml`
//! → built-in defaults.
//!
//! Root folder: `--root-folder` → `KADOU_ROOT_FOLDER` → TOML `root_folder`
//! → OS default (`<data_local_dir>/kadou`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::time::SiteClock;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "KADOU_CONFIG";

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "KADOU_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KadouConfig {
    /// Root folder holding the database and held pages
    pub root_folder: Option<PathBuf>,

    /// Database file, relative to the root folder unless absolute
    pub database_file: PathBuf,

    /// Directory of held pages for inspection, relative to the root folder
    pub held_pages_dir: PathBuf,

    /// UTC offset of the observed site, in minutes (540 = JST)
    pub timezone_offset_minutes: i32,

    /// Maximum time a contended write keeps retrying on "database is locked"
    pub db_max_lock_wait_ms: u64,

    pub logging: LoggingConfig,
    pub transport: TransportConfig,
    pub sessions: SessionConfig,
    pub orchestrator: OrchestratorConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for KadouConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_file: PathBuf::from("kadou.db"),
            held_pages_dir: PathBuf::from("held_pages"),
            timezone_offset_minutes: 540,
            db_max_lock_wait_ms: 5000,
            logging: LoggingConfig::default(),
            transport: TransportConfig::default(),
            sessions: SessionConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Log file path (optional, logs to stderr only if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Fetch transport tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_secs: u64,
    /// Attempts per fetch, including the first
    pub max_attempts: u32,
    /// Backoff for rate-limit responses: `base * 2^(attempt-1)` seconds
    pub backoff_base_secs: f64,
    /// Mean inter-request delay, in minutes
    pub base_delay_minutes: f64,
    /// Uniform jitter around the mean, in minutes
    pub delay_variance_minutes: f64,
    /// Skip the inter-request delay (controlled test runs only)
    pub no_delay: bool,
    pub user_agents: Vec<String>,
    pub proxies: Vec<String>,
    pub referers: Vec<String>,
    pub rate_limit_statuses: Vec<u16>,
    pub access_denied_statuses: Vec<u16>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_secs: 5.0,
            base_delay_minutes: 0.02,
            delay_variance_minutes: 0.0125,
            no_delay: false,
            user_agents: default_user_agents(),
            proxies: Vec::new(),
            referers: Vec::new(),
            rate_limit_statuses: vec![429, 503, 504],
            access_denied_statuses: vec![403, 406],
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Session pool tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Age after which a session is rotated on next acquisition
    pub lifetime_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { lifetime_secs: 1800 }
    }
}

impl SessionConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }
}

/// Fetch orchestration tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Venue fetches in flight at once
    pub max_concurrent: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_concurrent: 3 }
    }
}

/// Periodic driver cadence
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub collection_interval_minutes: u64,
    pub collection_misfire_grace_secs: u64,
    /// Daily aggregation trigger, site-local
    pub aggregation_hour: u32,
    pub aggregation_minute: u32,
    pub aggregation_misfire_grace_secs: u64,
    /// Extra margin around operating hours when gating collection
    pub business_hours_buffer_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            collection_interval_minutes: 30,
            collection_misfire_grace_secs: 300,
            aggregation_hour: 12,
            aggregation_minute: 0,
            aggregation_misfire_grace_secs: 3600,
            business_hours_buffer_minutes: 0,
        }
    }
}

impl KadouConfig {
    /// Load configuration, resolving the file per the priority order above
    ///
    /// Returns the configuration and the file it came from, if any.
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let env_path = std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        let path = match (cli_path, env_path) {
            (Some(p), _) => Some(p.to_path_buf()),
            (None, Some(p)) => Some(p),
            (None, None) => default_config_path().filter(|p| p.exists()),
        };

        let config = match &path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                warn!("Config file {} not found, using built-in defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok((config, path.filter(|p| p.exists())))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Reject values the batch cannot run with
    pub fn validate(&self) -> Result<()> {
        let t = &self.transport;
        if t.max_attempts == 0 {
            return Err(Error::Config("transport.max_attempts must be at least 1".into()));
        }
        if t.timeout_secs == 0 {
            return Err(Error::Config("transport.timeout_secs must be positive".into()));
        }
        if t.base_delay_minutes < 0.0 || t.delay_variance_minutes < 0.0 || t.backoff_base_secs < 0.0 {
            return Err(Error::Config("transport delays must not be negative".into()));
        }
        if t.user_agents.is_empty() {
            return Err(Error::Config("transport.user_agents must not be empty".into()));
        }
        if self.sessions.lifetime_secs == 0 {
            return Err(Error::Config("sessions.lifetime_secs must be positive".into()));
        }
        if self.orchestrator.max_concurrent == 0 {
            return Err(Error::Config("orchestrator.max_concurrent must be at least 1".into()));
        }
        let s = &self.scheduler;
        if s.collection_interval_minutes == 0 {
            return Err(Error::Config(
                "scheduler.collection_interval_minutes must be positive".into(),
            ));
        }
        if s.aggregation_hour >= 24 || s.aggregation_minute >= 60 {
            return Err(Error::Config(format!(
                "scheduler aggregation time {}:{:02} is not a valid time of day",
                s.aggregation_hour, s.aggregation_minute
            )));
        }
        if s.business_hours_buffer_minutes < 0 {
            return Err(Error::Config(
                "scheduler.business_hours_buffer_minutes must not be negative".into(),
            ));
        }
        SiteClock::from_offset_minutes(self.timezone_offset_minutes)?;
        Ok(())
    }

    pub fn site_clock(&self) -> Result<SiteClock> {
        SiteClock::from_offset_minutes(self.timezone_offset_minutes)
    }

    /// Database path under `root`
    pub fn database_path(&self, root: &Path) -> PathBuf {
        root.join(&self.database_file)
    }

    /// Held pages directory under `root`
    pub fn held_pages_path(&self, root: &Path) -> PathBuf {
        root.join(&self.held_pages_dir)
    }
}

/// Root folder resolution
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &KadouConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// `<config_dir>/kadou/kadou.toml`
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("kadou").join("kadou.toml"))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kadou"))
        .unwrap_or_else(|| PathBuf::from("./kadou_data"))
}
