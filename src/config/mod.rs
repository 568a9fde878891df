//! Configuration loading and validation.
//!
//! The configuration is a TOML file with one table per concern. Every field
//! has a default, so an empty file (or none at all) yields a working setup.

mod feed;
mod logging;
mod sync;

pub use feed::FeedConfig;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use sync::SyncConfig;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name written by `propsync init` and looked up by default.
pub const DEFAULT_CONFIG_FILE: &str = "propsync.toml";

/// Aggregate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all sections, collecting every problem before failing.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.sync.chunk_size == 0 {
            errors.push("sync.chunk_size must be at least 1".to_string());
        }
        if self.sync.min_chunk_size == 0 {
            errors.push("sync.min_chunk_size must be at least 1".to_string());
        }
        if self.sync.min_chunk_size > self.sync.chunk_size {
            errors.push(format!(
                "sync.min_chunk_size ({}) must not exceed sync.chunk_size ({})",
                self.sync.min_chunk_size, self.sync.chunk_size
            ));
        }
        if self.sync.memory_ceiling_mb > 0 && self.sync.memory_ceiling_mb < 64 {
            errors.push(format!(
                "sync.memory_ceiling_mb ({}) is below the 64 MB minimum",
                self.sync.memory_ceiling_mb
            ));
        }
        if self.sync.data_dir.as_os_str().is_empty() {
            errors.push("sync.data_dir must not be empty".to_string());
        }

        for region in &self.feed.allowed_regions {
            if region.len() != 3 || !region.chars().all(|c| c.is_ascii_digit()) {
                errors.push(format!(
                    "feed.allowed_regions entry '{}' is not a 3-digit region code",
                    region
                ));
            }
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[sync]\nchunk_size = 20\n\n[feed]\nallowed_regions = [\"022\"]"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sync.chunk_size, 20);
        assert_eq!(config.feed.allowed_regions, vec!["022"]);
        // untouched sections keep defaults
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/propsync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = Config::default();
        config.sync.chunk_size = 0;
        config.sync.memory_ceiling_mb = 10;
        config.feed.allowed_regions = vec!["22".to_string()];

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("sync.chunk_size"));
        assert!(message.contains("memory_ceiling_mb"));
        assert!(message.contains("'22'"));
    }

    #[test]
    fn test_min_chunk_above_chunk_rejected() {
        let mut config = Config::default();
        config.sync.chunk_size = 4;
        config.sync.min_chunk_size = 8;
        assert!(config.validate().is_err());
    }
}
