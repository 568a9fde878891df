use anyhow::Result;
use propsync::config::{Config, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;

pub async fn init_config(path: PathBuf) -> Result<()> {
    let config = Config::default();
    let config_path = path.join(DEFAULT_CONFIG_FILE);

    if config_path.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            config_path.display()
        );
    }

    let toml_content = format!(
        r#"# Propsync configuration

[sync]
# Where tracking state, the entity store and run reports live
data_dir = "{}"
# Records per chunk; a chunk boundary snapshots progress and checks memory
chunk_size = {}
# Memory pressure halves the chunk size, never below this floor
min_chunk_size = {}
# Pause between chunks in milliseconds (0 = no throttle)
throttle_ms = {}
# Resident-set ceiling in MB that triggers chunk shrinking (0 = no ceiling)
memory_ceiling_mb = {}
# Soft wall-clock budget in seconds; exceeding it logs a warning (0 = none)
time_budget_secs = {}
# Soft-delete target entities when their feed record disappears
soft_delete_targets = {}
# Purge tracking rows deleted for more than this many days (0 = keep forever)
retention_days = {}

[feed]
# Default feed when the sync command gets no path argument
# path = "listings.xml.gz"
# Allow-list of 3-digit region prefixes; empty means all regions
# allowed_regions = ["022"]
# Malformed records tolerated before the run aborts
max_parse_errors = {}

[logging]
format = "{}"
level = "{}"
"#,
        config.sync.data_dir.display(),
        config.sync.chunk_size,
        config.sync.min_chunk_size,
        config.sync.throttle_ms,
        config.sync.memory_ceiling_mb,
        config.sync.time_budget_secs,
        config.sync.soft_delete_targets,
        config.sync.retention_days,
        config.feed.max_parse_errors,
        config.logging.format.as_str(),
        config.logging.level.as_str(),
    );

    std::fs::write(&config_path, toml_content)?;
    println!("Created configuration file: {}", config_path.display());

    std::fs::create_dir_all(&config.sync.data_dir)?;
    println!("Created data directory: {}", config.sync.data_dir.display());

    Ok(())
}
