//! Propsync: differential synchronization of real-estate XML feeds into a
//! content datastore, featuring:
//! - Constant-memory streaming reads of large (100MB+) XML feeds via quick-xml
//! - Content fingerprinting (SHA-256 over a canonical serialization) so
//!   unchanged records cost one hash comparison and zero writes
//! - A persistent tracking store mapping feed records to target entities
//! - Typed mapping of raw records into entities, taxonomies and galleries
//! - Deduplicated agency resolution with idempotent upserts
//! - Chunked orchestration with progress snapshots, memory-pressure
//!   adaptation, deletion reconciliation and persisted run reports
//! - A pluggable persistence adapter boundary (in-memory and flat-file JSON
//!   reference implementations included)

pub mod agency;
pub mod config;
pub mod feed;
pub mod mapping;
pub mod persist;
pub mod sync;
pub mod tracking;
pub mod types;
pub mod util;

pub use config::Config;
pub use types::*;
