//! Sync coordinator that orchestrates a differential import run.
//!
//! The coordinator owns the run lifecycle: lock acquisition, the streaming
//! decide/map/persist/commit loop, chunk boundaries, deletion reconciliation
//! and the final report. Everything it talks to is injected, so tests drive
//! it with an in-memory adapter and synthetic sources.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::progress::SyncProgress;
use super::report::{RunOptions, RunReport, RunState, MAX_ERROR_SAMPLES};
use crate::agency::AgencyResolver;
use crate::config::SyncConfig;
use crate::feed::{FeedError, RecordSource, SourceRecord};
use crate::mapping::{MappedEntity, RecordMapper};
use crate::persist::{EntityKind, PersistError, PersistenceAdapter};
use crate::tracking::{record_fingerprint, SyncDecision, TrackedFields, TrackingStore};
use crate::types::{ExternalId, TargetId};

/// Lock file guarding against overlapping runs.
pub const LOCK_FILE: &str = "run.lock";

/// Errors that abort a run before it can produce a report.
///
/// Failures inside a run (fatal feed errors, operator stop) do not surface
/// here; they end the run in the `Failed` state with a saved report.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("another sync run is already in progress (remove the stale lock if not)")]
    AlreadyRunning,

    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("tracking store error: {0}")]
    Tracking(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cross-process mutual exclusion via a lock file in the data dir.
///
/// Removed on drop. A crashed run leaves the file behind; the operator
/// removes it by hand, which is why the error message mentions it.
struct RunGuard {
    path: PathBuf,
}

impl RunGuard {
    fn acquire(data_dir: &Path) -> Result<Self, SyncError> {
        let path = data_dir.join(LOCK_FILE);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                let _ = write!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SyncError::AlreadyRunning)
            }
            Err(e) => Err(SyncError::Io(e)),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove run lock {}: {}", self.path.display(), e);
        }
    }
}

/// Mutable state threaded through one run.
struct RunContext<'a> {
    progress: &'a SyncProgress,
    resolver: AgencyResolver,
    /// External ids encountered this run; reconciliation input
    seen: HashSet<ExternalId>,
    /// Agencies already counted toward the stats
    agency_seen: HashSet<ExternalId>,
    error_samples: Vec<String>,
}

impl RunContext<'_> {
    fn sample_error(&mut self, message: String) {
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples.push(message);
        }
    }
}

/// Orchestrates one synchronization run end to end.
pub struct SyncCoordinator {
    config: SyncConfig,
    allowed_regions: Vec<String>,
    tracking: Arc<TrackingStore>,
    adapter: Arc<dyn PersistenceAdapter>,
    mapper: RecordMapper,
    stop_flag: Arc<AtomicBool>,
    limit: Option<usize>,
    dry_run: bool,
    quiet: bool,
}

impl SyncCoordinator {
    /// Run a synchronization over `source`.
    ///
    /// Returns the run report for both `Completed` and `Failed` runs; `Err`
    /// means the run could not start or could not persist its own state.
    /// Commits already made are never rolled back.
    pub fn run<S: RecordSource>(&mut self, mut source: S) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let source_name = source.source_name().to_string();

        // Initializing
        std::fs::create_dir_all(&self.config.data_dir)?;
        let _guard = RunGuard::acquire(&self.config.data_dir)?;
        info!("Starting sync run {} from {}", run_id, source_name);
        if self.tracking.is_empty() {
            info!("Tracking store is empty; treating this as a first run");
        }
        if self.dry_run {
            info!("Dry run: writes go to a throwaway adapter");
        }

        let progress = SyncProgress::new(
            run_id.clone(),
            source.record_count_hint(),
            Some(RunReport::progress_path(&self.config.data_dir)),
            self.quiet,
        );
        let mut ctx = RunContext {
            progress: &progress,
            resolver: AgencyResolver::new(Arc::clone(&self.adapter)),
            seen: HashSet::new(),
            agency_seen: HashSet::new(),
            error_samples: Vec::new(),
        };

        let mut chunk_size = self.config.chunk_size.max(1);
        let min_chunk_size = self.config.min_chunk_size.max(1);
        let mut since_chunk = 0usize;
        let mut state = RunState::Streaming;
        let mut failure: Option<String> = None;
        // reconciliation needs a complete pass; any early exit disables it
        let mut feed_exhausted = true;
        let mut budget_warned = false;

        for result in source.iter_records() {
            if let Some(limit) = self.limit {
                if progress.processed_count() >= limit {
                    info!("Reached record limit of {}", limit);
                    feed_exhausted = false;
                    break;
                }
            }

            match result {
                Ok(record) => self.process_record(record, &mut ctx),
                Err(e) if e.is_fatal() => {
                    warn!("Fatal feed error: {}", e);
                    ctx.sample_error(e.to_string());
                    failure = Some(e.to_string());
                    state = RunState::Failed;
                    feed_exhausted = false;
                    break;
                }
                Err(e) => {
                    debug!("Record error: {}", e);
                    progress.record_errored();
                    ctx.sample_error(e.to_string());
                }
            }

            since_chunk += 1;
            if since_chunk < chunk_size {
                continue;
            }
            since_chunk = 0;

            // chunk boundary: snapshot, durability, pressure checks
            let memory_mb = progress.chunk_completed(RunState::Streaming);
            if let Err(e) = self.tracking.save() {
                warn!("Failed to save tracking store at chunk boundary: {}", e);
            }

            if self.config.memory_ceiling_mb > 0 {
                if let Some(mb) = memory_mb {
                    if mb > self.config.memory_ceiling_mb && chunk_size > min_chunk_size {
                        chunk_size = (chunk_size / 2).max(min_chunk_size);
                        warn!(
                            "Memory at {} MB exceeds the {} MB ceiling; chunk size reduced to {}",
                            mb, self.config.memory_ceiling_mb, chunk_size
                        );
                    }
                }
            }

            if self.config.time_budget_secs > 0
                && !budget_warned
                && start.elapsed().as_secs() > self.config.time_budget_secs
            {
                budget_warned = true;
                warn!(
                    "Run exceeded the soft time budget of {}s",
                    self.config.time_budget_secs
                );
            }

            if self.stop_flag.load(Ordering::Relaxed) {
                info!("Stop requested; aborting at chunk boundary");
                failure = Some("stopped by operator".to_string());
                state = RunState::Failed;
                feed_exhausted = false;
                break;
            }

            if self.config.throttle_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.config.throttle_ms));
            }
        }

        // Reconciling. Only a fully consumed feed may flip unseen records;
        // a partial read says nothing about what disappeared.
        if state != RunState::Failed {
            if feed_exhausted {
                state = RunState::Reconciling;
                progress.chunk_completed(state);
                let flipped = self.tracking.reconcile(&ctx.seen);
                progress.records_deleted(flipped.len());
                if self.config.soft_delete_targets {
                    for record in &flipped {
                        if let Some(target_id) = record.target_id {
                            if let Err(e) =
                                self.adapter.delete_entity(EntityKind::Property, target_id)
                            {
                                warn!("Failed to soft-delete target {}: {}", target_id, e);
                            }
                        }
                    }
                }

                if self.config.retention_days > 0 {
                    self.tracking.purge_deleted(self.config.retention_days);
                }
            } else {
                info!("Feed partially consumed; skipping deletion reconciliation");
            }
            state = RunState::Completed;
        }

        self.tracking
            .save()
            .map_err(|e| SyncError::Tracking(e.to_string()))?;

        progress.finish(state);

        let finished_at = Utc::now();
        let report = RunReport {
            run_id,
            source: source_name,
            started_at,
            finished_at,
            duration_seconds: start.elapsed().as_secs_f64(),
            final_state: state,
            stats: progress.stats(),
            error_samples: ctx.error_samples,
            failure,
            dry_run: self.dry_run,
            options: RunOptions {
                chunk_size: self.config.chunk_size,
                min_chunk_size: self.config.min_chunk_size,
                throttle_ms: self.config.throttle_ms,
                memory_ceiling_mb: self.config.memory_ceiling_mb,
                time_budget_secs: self.config.time_budget_secs,
                soft_delete_targets: self.config.soft_delete_targets,
                retention_days: self.config.retention_days,
                allowed_regions: self.allowed_regions.clone(),
                limit: self.limit,
            },
        };
        report.save(&RunReport::last_run_path(&self.config.data_dir))?;
        progress.clear_snapshot();

        if !self.quiet {
            progress.print_summary();
        }
        info!(
            "Sync run {} finished: {} ({} inserted, {} updated, {} skipped, {} errors)",
            report.run_id,
            report.final_state,
            report.stats.records_inserted,
            report.stats.records_updated,
            report.stats.records_skipped,
            report.stats.records_errored
        );

        Ok(report)
    }

    /// One record through the pipeline: filter, decide, map, persist, commit.
    /// Per-record failures are counted and marked; they never abort the run.
    fn process_record(&self, record: SourceRecord, ctx: &mut RunContext<'_>) {
        let external_id = record.external_id;
        ctx.progress.record_processed(external_id);

        // region allow-list; filtered records never enter tracking
        if !self.allowed_regions.is_empty() {
            let allowed = record
                .region_code()
                .map(|code| self.allowed_regions.iter().any(|r| r == code))
                .unwrap_or(false);
            if !allowed {
                debug!(
                    "Filtered record {} (region {:?})",
                    external_id,
                    record.region_code()
                );
                ctx.progress.record_filtered();
                return;
            }
        }

        ctx.seen.insert(external_id);

        if record.deleted {
            if self.tracking.mark_deleted(external_id) {
                debug!("Record {} flagged deleted by the feed", external_id);
                if self.config.soft_delete_targets {
                    let target = self
                        .tracking
                        .get(external_id)
                        .and_then(|row| row.target_id);
                    if let Some(target_id) = target {
                        if let Err(e) =
                            self.adapter.delete_entity(EntityKind::Property, target_id)
                        {
                            warn!("Failed to soft-delete target {}: {}", target_id, e);
                        }
                    }
                }
                ctx.progress.record_deleted();
            }
            return;
        }

        let fingerprint = record_fingerprint(&record);
        let decision = self.tracking.decide(external_id, &fingerprint);

        if let SyncDecision::Skip { target_id } = decision {
            debug!("Record {} unchanged (target {})", external_id, target_id);
            ctx.progress.record_skipped();
            return;
        }

        let entity = self.mapper.map(&record);
        match self.persist_entity(&entity, &record, &decision, ctx) {
            Ok(target_id) => {
                let fields = TrackedFields {
                    region: entity.region_code.clone(),
                    category: entity.category.clone(),
                    price: entity.price,
                };
                self.tracking
                    .commit(external_id, entity.fingerprint, target_id, fields);
                match decision {
                    SyncDecision::Insert => ctx.progress.record_inserted(),
                    _ => ctx.progress.record_updated(),
                }
            }
            Err(e) => {
                warn!("Failed to persist record {}: {}", external_id, e);
                self.tracking.mark_error(external_id);
                ctx.progress.record_errored();
                ctx.sample_error(format!("record {}: {}", external_id, e));
            }
        }
    }

    /// Write one mapped entity through the adapter: entity fields, gallery,
    /// taxonomies, agency relation. Returns the target id to commit.
    fn persist_entity(
        &self,
        entity: &MappedEntity,
        record: &SourceRecord,
        decision: &SyncDecision,
        ctx: &mut RunContext<'_>,
    ) -> Result<TargetId, PersistError> {
        let fields = entity.field_set();
        let target_id = match decision {
            SyncDecision::Insert => {
                // adopt entities orphaned by a lost tracking commit rather
                // than duplicating them
                match self
                    .adapter
                    .find_by_external_id(EntityKind::Property, entity.external_id)?
                {
                    Some(existing) => {
                        self.adapter
                            .update_entity(EntityKind::Property, existing, &fields)?;
                        debug!(
                            "Re-adopted entity {} for record {}",
                            existing, entity.external_id
                        );
                        existing
                    }
                    None => {
                        let created =
                            self.adapter.create_entity(EntityKind::Property, &fields)?;
                        debug!(
                            "Created entity {} for record {}",
                            created, entity.external_id
                        );
                        created
                    }
                }
            }
            SyncDecision::Update { target_id } | SyncDecision::Skip { target_id } => {
                self.adapter
                    .update_entity(EntityKind::Property, *target_id, &fields)?;
                debug!(
                    "Updated entity {} for record {}",
                    target_id, entity.external_id
                );
                *target_id
            }
        };

        for item in &entity.gallery {
            self.adapter
                .attach_media(target_id, &item.url, item.kind, item.featured)?;
        }

        if let Some(category) = &entity.category {
            self.adapter
                .set_taxonomy(target_id, "category", std::slice::from_ref(category))?;
        }
        if !entity.feature_flags.is_empty() {
            self.adapter
                .set_taxonomy(target_id, "features", &entity.feature_flags)?;
        }

        if let Some(agency) = ctx.resolver.resolve(record.agency.as_ref()) {
            let first_encounter = !ctx.agency_seen.contains(&agency.external_id);
            let agency_target = ctx.resolver.upsert(&agency)?;
            if first_encounter {
                ctx.agency_seen.insert(agency.external_id);
                ctx.progress.agency_upserted();
            }
            self.adapter.set_relation(target_id, "agency", agency_target)?;
        }

        Ok(target_id)
    }
}

/// Builder for [`SyncCoordinator`]. Tracking store and adapter are required;
/// everything else has defaults.
pub struct SyncCoordinatorBuilder {
    config: SyncConfig,
    allowed_regions: Vec<String>,
    tracking: Option<Arc<TrackingStore>>,
    adapter: Option<Arc<dyn PersistenceAdapter>>,
    stop_flag: Option<Arc<AtomicBool>>,
    limit: Option<usize>,
    dry_run: bool,
    quiet: bool,
}

impl SyncCoordinatorBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            allowed_regions: Vec::new(),
            tracking: None,
            adapter: None,
            stop_flag: None,
            limit: None,
            dry_run: false,
            quiet: false,
        }
    }

    pub fn with_tracking(mut self, tracking: Arc<TrackingStore>) -> Self {
        self.tracking = Some(tracking);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_allowed_regions(mut self, regions: Vec<String>) -> Self {
        self.allowed_regions = regions;
        self
    }

    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn build(self) -> Result<SyncCoordinator, SyncError> {
        let tracking = self
            .tracking
            .ok_or_else(|| SyncError::Tracking("no tracking store configured".to_string()))?;
        let adapter = self
            .adapter
            .ok_or_else(|| SyncError::Tracking("no persistence adapter configured".to_string()))?;
        Ok(SyncCoordinator {
            config: self.config,
            allowed_regions: self.allowed_regions,
            tracking,
            adapter,
            mapper: RecordMapper::new(),
            stop_flag: self
                .stop_flag
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
            limit: self.limit,
            dry_run: self.dry_run,
            quiet: self.quiet,
        })
    }
}
