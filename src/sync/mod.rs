//! Differential synchronization engine.
//!
//! Ties the feed reader, tracker, mapper, agency resolver and persistence
//! adapter together into chunked, resumable runs with a persisted report.

pub mod coordinator;
pub mod progress;
pub mod report;

pub use coordinator::{SyncCoordinator, SyncCoordinatorBuilder, SyncError, LOCK_FILE};
pub use progress::SyncProgress;
pub use report::{
    ProgressSnapshot, RunOptions, RunReport, RunState, SyncStats, LAST_RUN_FILE, PROGRESS_FILE,
};
