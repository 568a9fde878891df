//! Change detection: canonical fingerprints and the persistent store that
//! remembers what each record looked like when it was last persisted.

pub mod fingerprint;
pub mod store;

pub use fingerprint::{agency_fingerprint, record_fingerprint};
pub use store::{
    SyncDecision, TrackedFields, TrackingRecord, TrackingStats, TrackingStatus, TrackingStore,
};
