use anyhow::Result;
use propsync::{
    config::Config,
    persist::{EntityKind, JsonStoreAdapter},
    sync::{ProgressSnapshot, RunReport},
    tracking::TrackingStore,
};
use tracing::info;

pub async fn show_status(config: Config) -> Result<()> {
    info!("Loading sync status...");

    let data_dir = &config.sync.data_dir;
    if !data_dir.exists() {
        println!("No data directory at {}; run `propsync init` first", data_dir.display());
        return Ok(());
    }

    let tracking = TrackingStore::load(data_dir)?;
    let stats = tracking.stats();

    println!("\nPropsync Status");
    println!("===============");
    println!("Data directory:  {}", data_dir.display());
    println!("Tracked records: {}", stats.total);
    println!("  active:        {}", stats.active);
    println!("  deleted:       {}", stats.deleted);
    println!("  error:         {}", stats.error);

    if let Ok(store) = JsonStoreAdapter::open(data_dir) {
        println!("Entity store:    {} properties, {} agencies",
            store.entity_count(EntityKind::Property),
            store.entity_count(EntityKind::Agency)
        );
    }

    // a live (or crashed) run leaves its last snapshot behind
    let progress_path = RunReport::progress_path(data_dir);
    if progress_path.exists() {
        if let Ok(snapshot) = ProgressSnapshot::load(&progress_path) {
            println!("\nRun in progress (or interrupted):");
            println!("  run id:    {}", snapshot.run_id);
            println!("  state:     {}", snapshot.state);
            println!("  chunk:     {}", snapshot.chunk_index);
            println!("  processed: {}", snapshot.processed);
            println!("  errors:    {}", snapshot.errors);
        }
    }

    let report_path = RunReport::last_run_path(data_dir);
    if !report_path.exists() {
        println!("\nNo completed runs yet");
        return Ok(());
    }

    let report = RunReport::load(&report_path)?;
    println!("\nLast run ({})", report.run_id);
    println!("  source:     {}", report.source);
    println!("  state:      {}", report.final_state);
    println!("  started:    {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  duration:   {:.1}s", report.duration_seconds);
    println!("  processed:  {}", report.stats.records_processed);
    println!("  inserted:   {}", report.stats.records_inserted);
    println!("  updated:    {}", report.stats.records_updated);
    println!("  skipped:    {}", report.stats.records_skipped);
    println!("  filtered:   {}", report.stats.records_filtered);
    println!("  errors:     {}", report.stats.records_errored);
    println!("  deleted:    {}", report.stats.records_deleted);
    println!("  agencies:   {}", report.stats.agencies_upserted);
    println!("  rate:       {:.1} rec/s", report.stats.records_per_second);
    if let Some(mb) = report.stats.peak_memory_mb {
        println!("  peak mem:   {} MB", mb);
    }
    if !report.options.allowed_regions.is_empty() {
        println!("  regions:    {}", report.options.allowed_regions.join(", "));
    }
    if let Some(limit) = report.options.limit {
        println!("  limit:      {}", limit);
    }
    if report.dry_run {
        println!("  dry run:    yes");
    }
    if let Some(failure) = &report.failure {
        println!("  failure:    {}", failure);
    }
    if !report.error_samples.is_empty() {
        println!("\nFirst errors:");
        for sample in report.error_samples.iter().take(5) {
            println!("  - {}", sample);
        }
    }

    Ok(())
}
