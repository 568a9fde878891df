use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "propsync")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".propsync"))
}

fn default_chunk_size() -> usize {
    50
}

fn default_min_chunk_size() -> usize {
    5
}

fn default_throttle_ms() -> u64 {
    0
}

fn default_memory_ceiling_mb() -> u64 {
    512
}

fn default_time_budget_secs() -> u64 {
    0
}

fn default_soft_delete_targets() -> bool {
    true
}

fn default_retention_days() -> u32 {
    0
}

/// Orchestration settings for a synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory holding the tracking store, run lock, progress snapshot
    /// and run reports.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Records per chunk. A chunk boundary writes the progress snapshot,
    /// probes memory and checks the stop flag.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Floor for adaptive chunk shrinking under memory pressure.
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Sleep between chunks, in milliseconds. 0 disables throttling.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Resident-memory ceiling in megabytes. Above it the chunk size is
    /// halved down to `min_chunk_size`. 0 disables the check.
    #[serde(default = "default_memory_ceiling_mb")]
    pub memory_ceiling_mb: u64,

    /// Soft wall-clock budget in seconds. Exceeding it logs a warning;
    /// the run is never aborted for time. 0 disables the budget.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,

    /// Soft-delete target entities whose tracking row was reconciled to
    /// deleted (or arrived feed-flagged as deleted).
    #[serde(default = "default_soft_delete_targets")]
    pub soft_delete_targets: bool,

    /// Age in days after which deleted tracking rows are physically purged
    /// at the end of a successful run. 0 keeps them forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_size: default_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            throttle_ms: default_throttle_ms(),
            memory_ceiling_mb: default_memory_ceiling_mb(),
            time_budget_secs: default_time_budget_secs(),
            soft_delete_targets: default_soft_delete_targets(),
            retention_days: default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.min_chunk_size, 5);
        assert_eq!(config.memory_ceiling_mb, 512);
        assert!(config.soft_delete_targets);
        assert_eq!(config.retention_days, 0);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SyncConfig = toml::from_str("chunk_size = 10").unwrap();
        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.min_chunk_size, 5);
    }
}
