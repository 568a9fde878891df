//! Persistence boundary.
//!
//! The pipeline talks to the target content store only through
//! [`PersistenceAdapter`]. The trait is object-safe and internally
//! synchronized, so the orchestrator holds an `Arc<dyn PersistenceAdapter>`
//! and never learns what is behind it. Two reference adapters ship with the
//! crate: [`MemoryAdapter`] for tests and dry runs, and [`JsonStoreAdapter`],
//! a flat-file document store used by the CLI.

pub mod json;
pub mod memory;

pub use json::JsonStoreAdapter;
pub use memory::MemoryAdapter;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{ExternalId, MediaId, MediaKind, TargetId};

/// Entity families the pipeline persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Property,
    Agency,
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::Property => "property",
            EntityKind::Agency => "agency",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single field value at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Flag(bool),
}

/// Ordered name -> value map handed to adapters. Typed structures flatten
/// into this at the boundary.
pub type FieldSet = BTreeMap<String, FieldValue>;

/// Pull the external id out of a field set, however it was encoded.
pub(crate) fn external_id_of(fields: &FieldSet) -> Option<ExternalId> {
    match fields.get("external_id") {
        Some(FieldValue::Integer(id)) => Some(*id),
        Some(FieldValue::Number(id)) => Some(*id as ExternalId),
        Some(FieldValue::Text(id)) => id.parse().ok(),
        _ => None,
    }
}

/// Errors surfaced by adapters.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("entity not found: {kind} {id}")]
    NotFound { kind: EntityKind, id: TargetId },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write-side interface to the target content store.
pub trait PersistenceAdapter: Send + Sync {
    /// Target id a previous run created for this external id, if any.
    fn find_by_external_id(
        &self,
        kind: EntityKind,
        external_id: ExternalId,
    ) -> Result<Option<TargetId>, PersistError>;

    /// Create an entity and return its new target id. The field set carries
    /// `external_id`; adapters index it for [`Self::find_by_external_id`].
    fn create_entity(&self, kind: EntityKind, fields: &FieldSet) -> Result<TargetId, PersistError>;

    /// Replace the fields of an existing entity. Updating a soft-deleted
    /// entity makes it visible again.
    fn update_entity(
        &self,
        kind: EntityKind,
        id: TargetId,
        fields: &FieldSet,
    ) -> Result<(), PersistError>;

    /// Attach one media item; `featured` marks the lead image. Idempotent
    /// per url: re-attaching an already attached url updates its role
    /// instead of duplicating the attachment.
    fn attach_media(
        &self,
        id: TargetId,
        url: &str,
        kind: MediaKind,
        featured: bool,
    ) -> Result<MediaId, PersistError>;

    /// Replace the values of one taxonomy on an entity.
    fn set_taxonomy(
        &self,
        id: TargetId,
        taxonomy: &str,
        values: &[String],
    ) -> Result<(), PersistError>;

    /// Point a named relation at another entity.
    fn set_relation(
        &self,
        id: TargetId,
        relation: &str,
        target: TargetId,
    ) -> Result<(), PersistError>;

    /// Soft-delete an entity; recoverable in the target store.
    fn delete_entity(&self, kind: EntityKind, id: TargetId) -> Result<(), PersistError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_extraction() {
        let mut fields = FieldSet::new();
        fields.insert("external_id".to_string(), FieldValue::Integer(100));
        assert_eq!(external_id_of(&fields), Some(100));

        fields.insert("external_id".to_string(), FieldValue::Text("200".to_string()));
        assert_eq!(external_id_of(&fields), Some(200));

        fields.remove("external_id");
        assert_eq!(external_id_of(&fields), None);
    }

    #[test]
    fn test_field_value_json_shape() {
        let mut fields = FieldSet::new();
        fields.insert("title".to_string(), FieldValue::Text("Flat".to_string()));
        fields.insert("rooms".to_string(), FieldValue::Integer(3));
        fields.insert("price".to_string(), FieldValue::Number(200_000.5));

        let json = serde_json::to_string(&fields).unwrap();
        let back: FieldSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fields);
    }
}
