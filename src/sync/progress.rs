//! Live progress tracking for sync runs.

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::warn;

use super::report::{ProgressSnapshot, RunState, SyncStats};
use crate::util;

/// Progress tracker for a single sync run.
///
/// Counters are updated per record; the snapshot file is rewritten only at
/// chunk boundaries so a 100MB feed does not turn into a disk benchmark.
pub struct SyncProgress {
    /// Progress bar (None in quiet mode)
    progress_bar: Option<ProgressBar>,
    /// Start time
    start_time: Instant,
    run_id: String,
    processed: AtomicUsize,
    inserted: AtomicUsize,
    updated: AtomicUsize,
    skipped: AtomicUsize,
    filtered: AtomicUsize,
    errored: AtomicUsize,
    deleted: AtomicUsize,
    agencies: AtomicUsize,
    chunk_index: AtomicUsize,
    /// High-water RSS observed at chunk boundaries
    peak_memory_mb: AtomicUsize,
    /// Snapshot path (None disables snapshots)
    snapshot_path: Option<PathBuf>,
}

impl SyncProgress {
    pub fn new(
        run_id: String,
        total_expected: Option<u64>,
        snapshot_path: Option<PathBuf>,
        quiet: bool,
    ) -> Self {
        let progress_bar = if !quiet {
            let pb = if let Some(total) = total_expected {
                ProgressBar::new(total)
            } else {
                ProgressBar::new_spinner()
            };

            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );

            Some(pb)
        } else {
            None
        };

        Self {
            progress_bar,
            start_time: Instant::now(),
            run_id,
            processed: AtomicUsize::new(0),
            inserted: AtomicUsize::new(0),
            updated: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            filtered: AtomicUsize::new(0),
            errored: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            agencies: AtomicUsize::new(0),
            chunk_index: AtomicUsize::new(0),
            peak_memory_mb: AtomicUsize::new(0),
            snapshot_path,
        }
    }

    /// Bump the processed counter and refresh the bar.
    pub fn record_processed(&self, external_id: i64) {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(ref pb) = self.progress_bar {
            pb.set_position(processed as u64);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                processed as f64 / elapsed
            } else {
                0.0
            };
            pb.set_message(format!("{:.1} rec/s | #{}", rate, external_id));
        }
    }

    pub fn record_inserted(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_errored(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_deleted(&self, count: usize) {
        self.deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn agency_upserted(&self) {
        self.agencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errored_count(&self) -> usize {
        self.errored.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Close out a chunk: sample memory, write the snapshot file.
    ///
    /// Returns the sampled RSS in MB so the coordinator can react to
    /// memory pressure.
    pub fn chunk_completed(&self, state: RunState) -> Option<u64> {
        let chunk = self.chunk_index.fetch_add(1, Ordering::Relaxed) + 1;
        let memory_mb = util::current_rss_mb();

        if let Some(mb) = memory_mb {
            self.peak_memory_mb.fetch_max(mb as usize, Ordering::Relaxed);
        }

        if let Some(ref path) = self.snapshot_path {
            let snapshot = ProgressSnapshot {
                run_id: self.run_id.clone(),
                state,
                chunk_index: chunk,
                processed: self.processed.load(Ordering::Relaxed),
                inserted: self.inserted.load(Ordering::Relaxed),
                updated: self.updated.load(Ordering::Relaxed),
                skipped: self.skipped.load(Ordering::Relaxed),
                errors: self.errored.load(Ordering::Relaxed),
                memory_mb,
                elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
                timestamp: Utc::now(),
            };
            if let Err(e) = snapshot.save(path) {
                warn!("Failed to write progress snapshot: {}", e);
            }
        }

        memory_mb
    }

    /// Remove the snapshot file once the run has a final report.
    pub fn clear_snapshot(&self) {
        if let Some(ref path) = self.snapshot_path {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Failed to remove progress snapshot: {}", e);
                }
            }
        }
    }

    /// Collect the counters into a stats block.
    pub fn stats(&self) -> SyncStats {
        let peak = self.peak_memory_mb.load(Ordering::Relaxed);
        let mut stats = SyncStats {
            records_processed: self.processed.load(Ordering::Relaxed),
            records_inserted: self.inserted.load(Ordering::Relaxed),
            records_updated: self.updated.load(Ordering::Relaxed),
            records_skipped: self.skipped.load(Ordering::Relaxed),
            records_filtered: self.filtered.load(Ordering::Relaxed),
            records_errored: self.errored.load(Ordering::Relaxed),
            records_deleted: self.deleted.load(Ordering::Relaxed),
            agencies_upserted: self.agencies.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
            records_per_second: 0.0,
            peak_memory_mb: if peak > 0 { Some(peak as u64) } else { None },
        };
        stats.update_rate();
        stats
    }

    /// Finish the progress bar.
    pub fn finish(&self, state: RunState) {
        if let Some(ref pb) = self.progress_bar {
            let stats = self.stats();
            match state {
                RunState::Completed => pb.finish_with_message(format!(
                    "Done! {} inserted, {} updated, {} skipped, {} errors, {:.1} rec/s",
                    stats.records_inserted,
                    stats.records_updated,
                    stats.records_skipped,
                    stats.records_errored,
                    stats.records_per_second
                )),
                _ => pb.abandon_with_message(format!("{}", state)),
            }
        }
    }

    /// Print summary to console.
    pub fn print_summary(&self) {
        let stats = self.stats();

        println!("\nSync Summary");
        println!("============");
        println!("Records processed: {}", stats.records_processed);
        println!("Records inserted:  {}", stats.records_inserted);
        println!("Records updated:   {}", stats.records_updated);
        println!("Records skipped:   {}", stats.records_skipped);
        println!("Records filtered:  {}", stats.records_filtered);
        println!("Records errored:   {}", stats.records_errored);
        println!("Records deleted:   {}", stats.records_deleted);
        println!("Agencies written:  {}", stats.agencies_upserted);
        if let Some(mb) = stats.peak_memory_mb {
            println!("Peak memory:       {} MB", mb);
        }
        println!("Elapsed time:      {:.1}s", stats.elapsed_seconds);
        println!("Processing rate:   {:.1} rec/s", stats.records_per_second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counter_accumulation() {
        let progress = SyncProgress::new("run-1".to_string(), Some(10), None, true);

        progress.record_processed(100);
        progress.record_inserted();
        progress.record_processed(101);
        progress.record_updated();
        progress.record_processed(102);
        progress.record_skipped();
        progress.record_filtered();
        progress.record_errored();
        progress.records_deleted(2);

        let stats = progress.stats();
        assert_eq!(stats.records_processed, 3);
        assert_eq!(stats.records_inserted, 1);
        assert_eq!(stats.records_updated, 1);
        assert_eq!(stats.records_skipped, 1);
        assert_eq!(stats.records_filtered, 1);
        assert_eq!(stats.records_errored, 1);
        assert_eq!(stats.records_deleted, 2);
    }

    #[test]
    fn test_chunk_snapshot_written_and_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let progress =
            SyncProgress::new("run-2".to_string(), None, Some(path.clone()), true);

        progress.record_processed(1);
        progress.record_inserted();
        progress.chunk_completed(RunState::Streaming);

        let snapshot = ProgressSnapshot::load(&path).unwrap();
        assert_eq!(snapshot.run_id, "run-2");
        assert_eq!(snapshot.chunk_index, 1);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.inserted, 1);

        progress.clear_snapshot();
        assert!(!path.exists());
    }
}
