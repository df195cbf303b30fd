pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config, ConfigFormat};
pub use schema::{
    BackupConfig, Config, CoreConfig, DatabaseConfig, LoggingConfig, RegionConfig,
    SchedulerConfig,
};
