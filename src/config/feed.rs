use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_max_parse_errors() -> usize {
    25
}

/// Feed input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Default feed file used when the command line does not name one.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Region-code prefixes (3 digits) accepted for import. An empty list
    /// accepts every region.
    #[serde(default)]
    pub allowed_regions: Vec<String>,

    /// Malformed records tolerated before the reader aborts the stream.
    #[serde(default = "default_max_parse_errors")]
    pub max_parse_errors: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            path: None,
            allowed_regions: Vec::new(),
            max_parse_errors: default_max_parse_errors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert!(config.path.is_none());
        assert!(config.allowed_regions.is_empty());
        assert_eq!(config.max_parse_errors, 25);
    }

    #[test]
    fn test_regions_from_toml() {
        let config: FeedConfig =
            toml::from_str("allowed_regions = [\"022\", \"021\"]").unwrap();
        assert_eq!(config.allowed_regions, vec!["022", "021"]);
    }
}
