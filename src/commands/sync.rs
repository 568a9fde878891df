use anyhow::{Context, Result};
use propsync::{
    config::Config,
    feed::XmlFeedSource,
    persist::{EntityKind, JsonStoreAdapter, MemoryAdapter, PersistenceAdapter},
    sync::{RunState, SyncCoordinatorBuilder},
    tracking::{store::TRACKING_FILE, TrackingStore},
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run_sync(
    config: Config,
    feed: Option<PathBuf>,
    dry_run: bool,
    limit: Option<usize>,
    chunk_size: Option<usize>,
    quiet: bool,
) -> Result<()> {
    let feed_path = feed
        .or_else(|| config.feed.path.clone())
        .context("No feed path given and none configured under [feed]")?;
    if !feed_path.exists() {
        anyhow::bail!("Feed file not found: {}", feed_path.display());
    }

    let mut sync_config = config.sync.clone();
    if let Some(chunk_size) = chunk_size {
        sync_config.chunk_size = chunk_size.max(1);
    }
    std::fs::create_dir_all(&sync_config.data_dir)?;

    // A dry run works against a scratch copy of the tracking state so real
    // state and run artifacts stay untouched; the copy is left behind under
    // dry-run/ for inspection.
    if dry_run {
        let scratch = sync_config.data_dir.join("dry-run");
        if scratch.exists() {
            std::fs::remove_dir_all(&scratch)?;
        }
        std::fs::create_dir_all(&scratch)?;
        let real_tracking = sync_config.data_dir.join(TRACKING_FILE);
        if real_tracking.exists() {
            std::fs::copy(&real_tracking, scratch.join(TRACKING_FILE))?;
        }
        sync_config.data_dir = scratch;
    }

    let source = XmlFeedSource::open(&feed_path)
        .with_context(|| format!("Failed to open feed {}", feed_path.display()))?
        .with_max_errors(config.feed.max_parse_errors);

    let tracking = Arc::new(
        TrackingStore::load(&sync_config.data_dir).context("Failed to load tracking store")?,
    );
    info!(
        "Tracking store: {} records under {}",
        tracking.len(),
        sync_config.data_dir.display()
    );

    let json_store = if dry_run {
        None
    } else {
        Some(Arc::new(
            JsonStoreAdapter::open(&sync_config.data_dir)
                .context("Failed to open entity store")?,
        ))
    };
    let adapter: Arc<dyn PersistenceAdapter> = match &json_store {
        Some(store) => store.clone(),
        None => Arc::new(MemoryAdapter::new()),
    };

    let stop_flag = Arc::new(AtomicBool::new(false));
    let ctrlc_flag = stop_flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; stopping at the next chunk boundary");
            ctrlc_flag.store(true, Ordering::Relaxed);
        }
    });

    let mut coordinator = SyncCoordinatorBuilder::new(sync_config)
        .with_allowed_regions(config.feed.allowed_regions.clone())
        .with_tracking(tracking)
        .with_adapter(adapter)
        .with_stop_flag(stop_flag)
        .with_limit(limit)
        .with_dry_run(dry_run)
        .with_quiet(quiet)
        .build()?;

    // coordinator.run blocks; a worker thread keeps the runtime free for
    // the Ctrl-C handler
    let report = tokio::task::spawn_blocking(move || coordinator.run(source)).await??;

    if let Some(store) = &json_store {
        store.save().context("Failed to save entity store")?;
        if !quiet {
            println!(
                "Entity store: {} properties, {} agencies",
                store.entity_count(EntityKind::Property),
                store.entity_count(EntityKind::Agency)
            );
        }
    }

    if report.final_state == RunState::Failed {
        anyhow::bail!(
            "Sync run failed: {}",
            report.failure.as_deref().unwrap_or("unknown")
        );
    }

    Ok(())
}
