use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::{ExternalId, Fingerprint, TargetId};

/// File name of the persisted store inside the data directory.
pub const TRACKING_FILE: &str = "tracking.json";

/// Lifecycle status of a tracked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    Active,
    Deleted,
    Error,
}

/// Persistent row linking a feed record to its target entity.
///
/// The fingerprint always reflects the last successfully persisted version;
/// a failed persist never advances it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub external_id: ExternalId,
    pub fingerprint: Fingerprint,
    pub target_id: Option<TargetId>,
    pub last_seen: DateTime<Utc>,
    pub status: TrackingStatus,
    // denormalized for reporting; decisions never read these
    pub region: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
}

/// What to do with an incoming record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    Insert,
    Update { target_id: TargetId },
    Skip { target_id: TargetId },
}

impl SyncDecision {
    pub fn target_id(&self) -> Option<TargetId> {
        match self {
            SyncDecision::Insert => None,
            SyncDecision::Update { target_id } | SyncDecision::Skip { target_id } => {
                Some(*target_id)
            }
        }
    }
}

/// Denormalized reporting fields written alongside a commit.
#[derive(Debug, Clone, Default)]
pub struct TrackedFields {
    pub region: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
}

/// Counts by status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingStats {
    pub total: usize,
    pub active: usize,
    pub deleted: usize,
    pub error: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedTracking {
    records: HashMap<ExternalId, TrackingRecord>,
    version: u32,
}

/// JSON-persisted tracking store, keyed by external id.
///
/// Internally synchronized so the orchestrator can share it behind an `Arc`.
/// Rows are never physically removed except by [`TrackingStore::purge_deleted`].
pub struct TrackingStore {
    records: RwLock<HashMap<ExternalId, TrackingRecord>>,
    data_dir: PathBuf,
}

impl TrackingStore {
    /// Create an empty store rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).with_context(|| {
            format!("Failed to create data directory {}", data_dir.display())
        })?;
        Ok(Self {
            records: RwLock::new(HashMap::new()),
            data_dir,
        })
    }

    /// Load the persisted store, or start empty when none exists yet.
    pub fn load(data_dir: impl AsRef<Path>) -> Result<Self> {
        let store = Self::new(&data_dir)?;
        let path = store.file_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path).with_context(|| {
                format!("Failed to read tracking store at {}", path.display())
            })?;
            let saved: SavedTracking =
                serde_json::from_str(&content).context("Failed to parse tracking store")?;
            info!("Loaded tracking store with {} records", saved.records.len());
            *store.records.write() = saved.records;
        }
        Ok(store)
    }

    fn file_path(&self) -> PathBuf {
        self.data_dir.join(TRACKING_FILE)
    }

    pub fn save(&self) -> Result<()> {
        let saved = SavedTracking {
            records: self.records.read().clone(),
            version: 1,
        };
        let json =
            serde_json::to_string_pretty(&saved).context("Failed to serialize tracking store")?;
        std::fs::write(self.file_path(), json).with_context(|| {
            format!("Failed to write tracking store at {}", self.file_path().display())
        })?;
        debug!("Saved tracking store with {} records", saved.records.len());
        Ok(())
    }

    /// Tri-state decision for an incoming record with the given fingerprint.
    ///
    /// Unknown ids insert. Known ids with an unchanged fingerprint skip,
    /// unless the row is not Active (deleted rows seen again re-activate,
    /// errored rows retry) or never received a target id, in which case they
    /// update or re-insert.
    pub fn decide(&self, external_id: ExternalId, fingerprint: &Fingerprint) -> SyncDecision {
        let records = self.records.read();
        match records.get(&external_id) {
            None => SyncDecision::Insert,
            Some(record) => match record.target_id {
                None => SyncDecision::Insert,
                Some(target_id) => {
                    if record.status != TrackingStatus::Active
                        || record.fingerprint != *fingerprint
                    {
                        SyncDecision::Update { target_id }
                    } else {
                        SyncDecision::Skip { target_id }
                    }
                }
            },
        }
    }

    /// Record a confirmed persist. The row becomes Active with the new
    /// fingerprint, target id and last-seen timestamp.
    pub fn commit(
        &self,
        external_id: ExternalId,
        fingerprint: Fingerprint,
        target_id: TargetId,
        fields: TrackedFields,
    ) {
        let mut records = self.records.write();
        records.insert(
            external_id,
            TrackingRecord {
                external_id,
                fingerprint,
                target_id: Some(target_id),
                last_seen: Utc::now(),
                status: TrackingStatus::Active,
                region: fields.region,
                category: fields.category,
                price: fields.price,
            },
        );
        debug!("Committed record {} -> target {}", external_id, target_id);
    }

    /// Flip a row to Error after a failed persist. Fingerprint and target id
    /// stay untouched, so the next run retries the record.
    pub fn mark_error(&self, external_id: ExternalId) -> bool {
        let mut records = self.records.write();
        match records.get_mut(&external_id) {
            Some(record) => {
                record.status = TrackingStatus::Error;
                record.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Flip a row to Deleted (feed-flagged removal). Returns whether the
    /// row actually transitioned; an already-Deleted row is left untouched,
    /// so a tombstone the feed carries across runs counts only once.
    pub fn mark_deleted(&self, external_id: ExternalId) -> bool {
        let mut records = self.records.write();
        match records.get_mut(&external_id) {
            Some(record) if record.status != TrackingStatus::Deleted => {
                record.status = TrackingStatus::Deleted;
                record.last_seen = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, external_id: ExternalId) -> Option<TrackingRecord> {
        self.records.read().get(&external_id).cloned()
    }

    /// Flip every Active row absent from `seen` to Deleted and return the
    /// affected rows. Error rows keep their status until seen again, and
    /// last-seen timestamps are left alone: the records were not seen.
    pub fn reconcile(&self, seen: &HashSet<ExternalId>) -> Vec<TrackingRecord> {
        let mut records = self.records.write();
        let mut affected = Vec::new();
        for record in records.values_mut() {
            if record.status == TrackingStatus::Active && !seen.contains(&record.external_id) {
                record.status = TrackingStatus::Deleted;
                affected.push(record.clone());
            }
        }
        if !affected.is_empty() {
            info!("Reconciliation marked {} records as deleted", affected.len());
        }
        affected
    }

    /// Physically remove Deleted rows whose last-seen timestamp is older
    /// than the retention window. Returns how many were purged.
    pub fn purge_deleted(&self, older_than_days: u32) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| {
            !(record.status == TrackingStatus::Deleted && record.last_seen < cutoff)
        });
        let purged = before - records.len();
        if purged > 0 {
            info!("Purged {} deleted records past retention", purged);
        }
        purged
    }

    /// All rows, ordered by external id for stable display.
    pub fn all_records(&self) -> Vec<TrackingRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|record| record.external_id);
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn stats(&self) -> TrackingStats {
        let records = self.records.read();
        let mut stats = TrackingStats {
            total: records.len(),
            active: 0,
            deleted: 0,
            error: 0,
        };
        for record in records.values() {
            match record.status {
                TrackingStatus::Active => stats.active += 1,
                TrackingStatus::Deleted => stats.deleted += 1,
                TrackingStatus::Error => stats.error += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fp(payload: &str) -> Fingerprint {
        Fingerprint::compute(payload)
    }

    #[test]
    fn test_decide_insert_update_skip() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        let hash = fp("v1");
        assert_eq!(store.decide(100, &hash), SyncDecision::Insert);

        store.commit(100, hash.clone(), 501, TrackedFields::default());
        assert_eq!(
            store.decide(100, &hash),
            SyncDecision::Skip { target_id: 501 }
        );

        let changed = fp("v2");
        assert_eq!(
            store.decide(100, &changed),
            SyncDecision::Update { target_id: 501 }
        );
    }

    #[test]
    fn test_commit_stores_reporting_fields() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        store.commit(
            100,
            fp("v1"),
            501,
            TrackedFields {
                region: Some("022".to_string()),
                category: Some("House".to_string()),
                price: Some(200_000.0),
            },
        );

        let record = store.get(100).unwrap();
        assert_eq!(record.region.as_deref(), Some("022"));
        assert_eq!(record.category.as_deref(), Some("House"));
        assert_eq!(record.price, Some(200_000.0));
        assert_eq!(record.status, TrackingStatus::Active);
        assert_eq!(record.target_id, Some(501));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();

        {
            let store = TrackingStore::new(dir.path()).unwrap();
            store.commit(100, fp("v1"), 501, TrackedFields::default());
            store.commit(200, fp("v2"), 502, TrackedFields::default());
            store.save().unwrap();
        }

        {
            let store = TrackingStore::load(dir.path()).unwrap();
            assert_eq!(store.len(), 2);
            assert_eq!(store.get(100).unwrap().target_id, Some(501));
            assert_eq!(
                store.decide(100, &fp("v1")),
                SyncDecision::Skip { target_id: 501 }
            );
        }
    }

    #[test]
    fn test_mark_error_forces_retry() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        let hash = fp("v1");
        store.commit(100, hash.clone(), 501, TrackedFields::default());
        assert!(store.mark_error(100));

        // same fingerprint, but the errored row must be retried
        assert_eq!(
            store.decide(100, &hash),
            SyncDecision::Update { target_id: 501 }
        );
        assert!(!store.mark_error(999));
    }

    #[test]
    fn test_mark_deleted_transitions_once() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        store.commit(100, fp("v1"), 501, TrackedFields::default());
        assert!(store.mark_deleted(100));
        assert_eq!(store.get(100).unwrap().status, TrackingStatus::Deleted);

        // a tombstone repeated by the next feed is not a new transition
        assert!(!store.mark_deleted(100));
        assert!(!store.mark_deleted(999));
    }

    #[test]
    fn test_reconcile_marks_unseen_deleted() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        store.commit(100, fp("a"), 501, TrackedFields::default());
        store.commit(200, fp("b"), 502, TrackedFields::default());

        let seen: HashSet<ExternalId> = [100].into_iter().collect();
        let affected = store.reconcile(&seen);
        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].external_id, 200);
        assert_eq!(store.get(200).unwrap().status, TrackingStatus::Deleted);
        assert_eq!(store.get(100).unwrap().status, TrackingStatus::Active);

        // already-deleted rows are not flipped again
        let affected = store.reconcile(&seen);
        assert!(affected.is_empty());
    }

    #[test]
    fn test_reconcile_leaves_error_rows_alone() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        store.commit(100, fp("a"), 501, TrackedFields::default());
        store.mark_error(100);

        // an errored row absent from the feed keeps waiting for its retry
        let affected = store.reconcile(&HashSet::new());
        assert!(affected.is_empty());
        assert_eq!(store.get(100).unwrap().status, TrackingStatus::Error);
    }

    #[test]
    fn test_reseen_deleted_row_reactivates() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        let hash = fp("v1");
        store.commit(100, hash.clone(), 501, TrackedFields::default());
        store.reconcile(&HashSet::new());
        assert_eq!(store.get(100).unwrap().status, TrackingStatus::Deleted);

        // unchanged content, but the row is deleted: update, not skip
        assert_eq!(
            store.decide(100, &hash),
            SyncDecision::Update { target_id: 501 }
        );

        store.commit(100, hash.clone(), 501, TrackedFields::default());
        assert_eq!(store.get(100).unwrap().status, TrackingStatus::Active);
    }

    #[test]
    fn test_purge_deleted_respects_retention() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        store.commit(100, fp("a"), 501, TrackedFields::default());
        store.commit(200, fp("b"), 502, TrackedFields::default());
        store.mark_deleted(200);

        // a 30-day window keeps the freshly deleted row
        assert_eq!(store.purge_deleted(30), 0);
        assert_eq!(store.len(), 2);

        // a zero-day window purges every deleted row, active rows stay
        assert_eq!(store.purge_deleted(0), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(100).is_some());
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(dir.path()).unwrap();

        store.commit(1, fp("a"), 501, TrackedFields::default());
        store.commit(2, fp("b"), 502, TrackedFields::default());
        store.commit(3, fp("c"), 503, TrackedFields::default());
        store.mark_deleted(2);
        store.mark_error(3);

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.error, 1);
    }
}
