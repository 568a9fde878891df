//! Run lifecycle types and on-disk run artifacts.
//!
//! A run moves through a small state machine and leaves two artifacts in the
//! data directory: `progress.json`, rewritten at every chunk boundary while
//! the run is live, and `last_run.json`, the final report of the most recent
//! run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::SyncError;

/// File name of the live per-chunk snapshot.
pub const PROGRESS_FILE: &str = "progress.json";

/// File name of the final run report.
pub const LAST_RUN_FILE: &str = "last_run.json";

/// Error messages kept verbatim in the report.
pub const MAX_ERROR_SAMPLES: usize = 20;

/// Lifecycle of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No run in progress.
    Idle,
    /// Acquiring the run lock and loading stores.
    Initializing,
    /// Streaming records from the feed.
    Streaming,
    /// Feed exhausted; reconciling deletions.
    Reconciling,
    /// Finished cleanly.
    Completed,
    /// Aborted; partial work is committed and consistent.
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Initializing => "initializing",
            RunState::Streaming => "streaming",
            RunState::Reconciling => "reconciling",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Records read from the feed, whatever their outcome
    pub records_processed: usize,
    /// New entities created in the target
    pub records_inserted: usize,
    /// Existing entities rewritten
    pub records_updated: usize,
    /// Unchanged records (fingerprint match, no write)
    pub records_skipped: usize,
    /// Records excluded by the region filter
    pub records_filtered: usize,
    /// Records that failed to parse or persist
    pub records_errored: usize,
    /// Records marked deleted, feed flag and reconciliation combined
    pub records_deleted: usize,
    /// Distinct agencies written this run
    pub agencies_upserted: usize,
    /// Wall-clock time in seconds
    pub elapsed_seconds: f64,
    /// Throughput over the whole run
    pub records_per_second: f64,
    /// High-water resident set size, if the platform exposes it
    pub peak_memory_mb: Option<u64>,
}

impl SyncStats {
    pub fn update_rate(&mut self) {
        if self.elapsed_seconds > 0.0 {
            self.records_per_second = self.records_processed as f64 / self.elapsed_seconds;
        }
    }
}

/// Live snapshot written to `progress.json` at each chunk boundary.
///
/// External monitors poll this file; a crashed run leaves the last snapshot
/// behind, which is enough to see where it died.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: String,
    pub state: RunState,
    pub chunk_index: usize,
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub memory_mb: Option<u64>,
    pub elapsed_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let json = std::fs::read_to_string(path)?;
        let snapshot = serde_json::from_str(&json)?;
        Ok(snapshot)
    }
}

/// Options a run executed with, frozen into its report.
///
/// `chunk_size` is the configured value; adaptive shrinking during the run
/// does not rewrite it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub chunk_size: usize,
    pub min_chunk_size: usize,
    pub throttle_ms: u64,
    pub memory_ceiling_mb: u64,
    pub time_budget_secs: u64,
    pub soft_delete_targets: bool,
    pub retention_days: u32,
    /// Region allow-list in effect; empty allows all
    pub allowed_regions: Vec<String>,
    /// Record cap, when the run was invoked with one
    pub limit: Option<usize>,
}

/// Final report of a run, persisted as `last_run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this run
    pub run_id: String,
    /// Feed the run consumed
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Terminal state, `Completed` or `Failed`
    pub final_state: RunState,
    pub stats: SyncStats,
    /// First few error messages, verbatim
    #[serde(default)]
    pub error_samples: Vec<String>,
    /// What aborted the run, when `final_state` is `Failed`
    #[serde(default)]
    pub failure: Option<String>,
    /// Whether writes went to a throwaway adapter
    #[serde(default)]
    pub dry_run: bool,
    /// Effective options of the run
    #[serde(default)]
    pub options: RunOptions,
}

impl RunReport {
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let json = std::fs::read_to_string(path)?;
        let report = serde_json::from_str(&json)?;
        Ok(report)
    }

    pub fn last_run_path(data_dir: &Path) -> PathBuf {
        data_dir.join(LAST_RUN_FILE)
    }

    pub fn progress_path(data_dir: &Path) -> PathBuf {
        data_dir.join(PROGRESS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_state_serialization() {
        let json = serde_json::to_string(&RunState::Reconciling).unwrap();
        assert_eq!(json, "\"reconciling\"");
        let back: RunState = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, RunState::Failed);
        assert!(back.is_terminal());
        assert!(!RunState::Streaming.is_terminal());
    }

    #[test]
    fn test_stats_rate() {
        let mut stats = SyncStats {
            records_processed: 500,
            elapsed_seconds: 10.0,
            ..Default::default()
        };
        stats.update_rate();
        assert!((stats.records_per_second - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = RunReport::last_run_path(dir.path());

        let report = RunReport {
            run_id: "test-run".to_string(),
            source: "feed.xml".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_seconds: 1.5,
            final_state: RunState::Completed,
            stats: SyncStats {
                records_processed: 3,
                records_inserted: 2,
                records_skipped: 1,
                ..Default::default()
            },
            error_samples: Vec::new(),
            failure: None,
            dry_run: false,
            options: RunOptions {
                chunk_size: 50,
                allowed_regions: vec!["022".to_string()],
                ..Default::default()
            },
        };
        report.save(&path).unwrap();

        let loaded = RunReport::load(&path).unwrap();
        assert_eq!(loaded.run_id, "test-run");
        assert_eq!(loaded.final_state, RunState::Completed);
        assert_eq!(loaded.stats.records_inserted, 2);
        assert_eq!(loaded.options.chunk_size, 50);
        assert_eq!(loaded.options.allowed_regions, vec!["022".to_string()]);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = RunReport::progress_path(dir.path());

        let snapshot = ProgressSnapshot {
            run_id: "test-run".to_string(),
            state: RunState::Streaming,
            chunk_index: 4,
            processed: 200,
            inserted: 120,
            updated: 30,
            skipped: 45,
            errors: 5,
            memory_mb: Some(64),
            elapsed_seconds: 12.0,
            timestamp: Utc::now(),
        };
        snapshot.save(&path).unwrap();

        let loaded = ProgressSnapshot::load(&path).unwrap();
        assert_eq!(loaded.chunk_index, 4);
        assert_eq!(loaded.processed, 200);
        assert_eq!(loaded.state, RunState::Streaming);
    }
}
