use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for repowatch
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub authentication and fetch settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Backing store selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Query defaults
    #[serde(default)]
    pub query: QueryConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// API base URL override (GitHub Enterprise)
    #[serde(default)]
    pub api_url: Option<String>,

    /// Items requested per pull request / issue listing
    #[serde(default = "default_items_per_fetch")]
    pub items_per_fetch: u8,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Maximum sync cycles running at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Interval between scheduled refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String, // "30m"
}

/// Storage backend configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default = "default_storage_backend")]
    pub backend: String, // "sqlite", "memory"

    /// Database path for the sqlite backend
    #[serde(default = "default_storage_path")]
    pub path: String,
}

/// Query defaults
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryConfig {
    /// Page size used when a caller does not pass one
    #[serde(default = "default_per_page")]
    pub default_per_page: usize,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "full"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_items_per_fetch() -> u8 {
    100
}
fn default_true() -> bool {
    true
}
fn default_max_parallel() -> usize {
    4
}
fn default_refresh_interval() -> String {
    "30m".to_string()
}
fn default_storage_backend() -> String {
    "sqlite".to_string()
}
fn default_storage_path() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/repowatch/repowatch.db", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/repowatch/repowatch.db", home)
    } else {
        "/tmp/repowatch.db".to_string()
    }
}
fn default_per_page() -> usize {
    30
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/repowatch.pid", runtime_dir)
    } else {
        "/tmp/repowatch.pid".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            api_url: None,
            items_per_fetch: default_items_per_fetch(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            refresh_interval: default_refresh_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);

            config.apply_env_overrides()?;
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.apply_env_overrides()?;
        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repowatch").join("config.yml"))
    }

    /// Apply `REPOWATCH_*` environment variables on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("REPOWATCH_STORAGE_BACKEND") {
            self.storage.backend = backend;
        }
        if let Ok(path) = std::env::var("REPOWATCH_STORAGE_PATH") {
            self.storage.path = path;
        }
        if let Ok(interval) = std::env::var("REPOWATCH_REFRESH_INTERVAL") {
            parse_duration(&interval).context("Invalid REPOWATCH_REFRESH_INTERVAL")?;
            self.sync.refresh_interval = interval;
        }
        if let Ok(items) = std::env::var("REPOWATCH_ITEMS_PER_FETCH") {
            self.github.items_per_fetch = items
                .trim()
                .parse()
                .context("Invalid REPOWATCH_ITEMS_PER_FETCH")?;
        }
        if let Ok(level) = std::env::var("REPOWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("REPOWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.storage.path = shellexpand::full(&self.storage.path)
            .context("Failed to expand storage path")?
            .into_owned();

        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        Ok(())
    }

    /// Scheduled refresh interval
    pub fn refresh_interval(&self) -> Result<Duration> {
        let secs = parse_duration(&self.sync.refresh_interval)?;
        if secs == 0 {
            bail!("refresh_interval must be greater than zero");
        }
        Ok(Duration::from_secs(secs))
    }
}

/// Parse duration strings like "30m", "1h", "2d" into seconds
pub fn parse_duration(duration_str: &str) -> Result<u64> {
    let duration_str = duration_str.trim().to_lowercase();

    if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")
    } else if let Some(value) = duration_str.strip_suffix('m') {
        scale_duration(value, 60, "minutes")
    } else if let Some(value) = duration_str.strip_suffix('h') {
        scale_duration(value, 3600, "hours")
    } else if let Some(value) = duration_str.strip_suffix('d') {
        scale_duration(value, 86400, "days")
    } else {
        // Try to parse as raw seconds
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '1h', '2d'")
    }
}

fn scale_duration(value: &str, seconds_per_unit: u64, unit: &str) -> Result<u64> {
    let count = value
        .parse::<u64>()
        .with_context(|| format!("Invalid {} value", unit))?;
    count
        .checked_mul(seconds_per_unit)
        .with_context(|| format!("Duration of {} {} is too large", count, unit))
}
