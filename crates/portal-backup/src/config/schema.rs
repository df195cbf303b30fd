use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub core: CoreConfig,
    /// Per-region settings, keyed by region name (`eu`, `us`, ...).
    #[serde(default)]
    pub regions: BTreeMap<String, RegionConfig>,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Base domain of the given region, falling back to the local
    /// `core.base_domain` when the region is unknown or not given.
    pub fn base_domain_for(&self, region: Option<&str>) -> &str {
        region
            .and_then(|r| self.regions.get(r))
            .map(|r| r.base_domain.as_str())
            .unwrap_or(&self.core.base_domain)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            core: CoreConfig::default(),
            regions: BTreeMap::new(),
            backup: BackupConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Single-installation deployment: enables Local storage and skips the
    /// archive integrity lookup on restore.
    #[serde(default)]
    pub standalone: bool,
    #[serde(default = "default_base_domain")]
    pub base_domain: String,
}

fn default_base_domain() -> String {
    "localhost".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            standalone: false,
            base_domain: default_base_domain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub base_domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_temp_folder")]
    pub temp_folder: PathBuf,
    #[serde(default = "default_true")]
    pub compress: bool,
    /// Chunk size used by the legacy multipart MD5 archive hash.
    #[serde(default = "default_legacy_chunk_size")]
    pub legacy_chunk_size: u64,
    #[serde(default = "default_data_store_expiry_hours")]
    pub data_store_expiry_hours: i64,
    /// Directories Local storage may read from and write to. Empty means any.
    #[serde(default)]
    pub local_roots: Vec<PathBuf>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Temp files older than this are removed by the cleaner.
    #[serde(default = "default_temp_max_age_hours")]
    pub temp_max_age_hours: i64,
}

fn default_temp_folder() -> PathBuf {
    std::env::temp_dir().join("backup")
}

fn default_true() -> bool {
    true
}

fn default_legacy_chunk_size() -> u64 {
    5 * 1024 * 1024
}

fn default_data_store_expiry_hours() -> i64 {
    24
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_temp_max_age_hours() -> i64 {
    48
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            temp_folder: default_temp_folder(),
            compress: true,
            legacy_chunk_size: default_legacy_chunk_size(),
            data_store_expiry_hours: default_data_store_expiry_hours(),
            local_roots: Vec::new(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            temp_max_age_hours: default_temp_max_age_hours(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `~/.portal-backup/data/portal-backup.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}
