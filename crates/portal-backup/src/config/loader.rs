use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Serialized form of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Some(Self::Json),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Some(Self::Yaml)
            }
            _ => None,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, format)
}

pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let config: Config = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.core.base_domain.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "core.base_domain must not be empty".to_string(),
        });
    }

    for (region, settings) in &config.regions {
        if settings.base_domain.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("regions.{}.base_domain must not be empty", region),
            });
        }
    }

    if config.backup.legacy_chunk_size == 0 {
        return Err(ConfigError::Validation {
            message: "backup.legacy_chunk_size must be greater than zero".to_string(),
        });
    }

    if config.backup.max_concurrent_tasks == 0 {
        return Err(ConfigError::Validation {
            message: "backup.max_concurrent_tasks must be greater than zero".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_json_config() {
        let json = r#"{ "version": "1.0" }"#;
        let config = load_config_from_str(json, ConfigFormat::Json).unwrap();
        assert!(!config.core.standalone);
        assert_eq!(config.core.base_domain, "localhost");
        assert!(config.regions.is_empty());
    }

    #[test]
    fn test_load_yaml_config_with_regions() {
        let yaml = r#"
version: "1.0"
core:
  standalone: true
  base_domain: portal.example
regions:
  eu:
    base_domain: eu.portal.example
backup:
  compress: false
  legacy_chunk_size: 1024
"#;
        let config = load_config_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert!(config.core.standalone);
        assert!(!config.backup.compress);
        assert_eq!(config.backup.legacy_chunk_size, 1024);
        assert_eq!(config.base_domain_for(Some("eu")), "eu.portal.example");
    }

    #[test]
    fn test_invalid_version() {
        let json = r#"{ "version": "2.0" }"#;
        let result = load_config_from_str(json, ConfigFormat::Json);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_empty_region_domain_rejected() {
        let json = r#"{ "version": "1.0", "regions": { "eu": { "base_domain": " " } } }"#;
        let err = load_config_from_str(json, ConfigFormat::Json).unwrap_err();
        assert!(err.to_string().contains("regions.eu.base_domain"));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let json = r#"{ "version": "1.0", "backup": { "legacy_chunk_size": 0 } }"#;
        assert!(load_config_from_str(json, ConfigFormat::Json).is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a/config.JSON")),
            Some(ConfigFormat::Json)
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("config.yml")),
            Some(ConfigFormat::Yaml)
        );
        assert_eq!(ConfigFormat::from_path(Path::new("config.toml")), None);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.yaml");
        std::fs::write(&path, "version: \"1.0\"\ncore:\n  base_domain: a.example\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.core.base_domain, "a.example");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/config.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
