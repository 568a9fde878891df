use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::{external_id_of, EntityKind, FieldSet, PersistenceAdapter, PersistError};
use crate::types::{ExternalId, MediaId, MediaKind, TargetId};

/// File name of the store inside the data directory.
pub const STORE_FILE: &str = "store.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonMedia {
    pub id: MediaId,
    pub url: String,
    pub kind: MediaKind,
    pub featured: bool,
}

/// One persisted entity, the document-store shape of a property or agency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonEntity {
    pub id: TargetId,
    pub kind: EntityKind,
    pub external_id: Option<ExternalId>,
    pub fields: FieldSet,
    #[serde(default)]
    pub media: Vec<JsonMedia>,
    #[serde(default)]
    pub taxonomies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub relations: BTreeMap<String, TargetId>,
    #[serde(default)]
    pub deleted: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedStore {
    entities: Vec<JsonEntity>,
    next_id: u64,
    next_media_id: u64,
    version: u32,
}

/// Flat-file document store, the default CLI target. Writes are buffered in
/// memory; [`JsonStoreAdapter::save`] flushes the whole store to one pretty
/// JSON file. A real CMS adapter would make each call durable on its own.
pub struct JsonStoreAdapter {
    entities: RwLock<HashMap<TargetId, JsonEntity>>,
    by_external: RwLock<HashMap<(EntityKind, ExternalId), TargetId>>,
    next_id: AtomicU64,
    next_media_id: AtomicU64,
    path: PathBuf,
}

impl JsonStoreAdapter {
    /// Open the store under `data_dir`, loading an existing file if present.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, PersistError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(STORE_FILE);

        let adapter = Self {
            entities: RwLock::new(HashMap::new()),
            by_external: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_media_id: AtomicU64::new(1),
            path,
        };

        if adapter.path.exists() {
            let content = std::fs::read_to_string(&adapter.path)?;
            let saved: SavedStore = serde_json::from_str(&content)?;
            info!(
                "Loaded entity store with {} entities from {}",
                saved.entities.len(),
                adapter.path.display()
            );
            adapter.next_id.store(saved.next_id, Ordering::SeqCst);
            adapter
                .next_media_id
                .store(saved.next_media_id, Ordering::SeqCst);

            let mut entities = adapter.entities.write();
            let mut by_external = adapter.by_external.write();
            for entity in saved.entities {
                if let Some(external_id) = entity.external_id {
                    by_external.insert((entity.kind, external_id), entity.id);
                }
                entities.insert(entity.id, entity);
            }
        }

        Ok(adapter)
    }

    /// Flush the whole store to disk.
    pub fn save(&self) -> Result<(), PersistError> {
        let mut entities: Vec<JsonEntity> = self.entities.read().values().cloned().collect();
        entities.sort_by_key(|entity| entity.id);

        let saved = SavedStore {
            entities,
            next_id: self.next_id.load(Ordering::SeqCst),
            next_media_id: self.next_media_id.load(Ordering::SeqCst),
            version: 1,
        };
        let json = serde_json::to_string_pretty(&saved)?;
        std::fs::write(&self.path, json)?;
        debug!("Saved entity store to {}", self.path.display());
        Ok(())
    }

    pub fn get(&self, id: TargetId) -> Option<JsonEntity> {
        self.entities.read().get(&id).cloned()
    }

    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.entities
            .read()
            .values()
            .filter(|entity| entity.kind == kind)
            .count()
    }
}

impl PersistenceAdapter for JsonStoreAdapter {
    fn find_by_external_id(
        &self,
        kind: EntityKind,
        external_id: ExternalId,
    ) -> Result<Option<TargetId>, PersistError> {
        Ok(self.by_external.read().get(&(kind, external_id)).copied())
    }

    fn create_entity(&self, kind: EntityKind, fields: &FieldSet) -> Result<TargetId, PersistError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let external_id = external_id_of(fields);
        self.entities.write().insert(
            id,
            JsonEntity {
                id,
                kind,
                external_id,
                fields: fields.clone(),
                media: Vec::new(),
                taxonomies: BTreeMap::new(),
                relations: BTreeMap::new(),
                deleted: false,
                updated_at: Utc::now(),
            },
        );
        if let Some(external_id) = external_id {
            self.by_external.write().insert((kind, external_id), id);
        }
        Ok(id)
    }

    fn update_entity(
        &self,
        kind: EntityKind,
        id: TargetId,
        fields: &FieldSet,
    ) -> Result<(), PersistError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&id)
            .filter(|entity| entity.kind == kind)
            .ok_or(PersistError::NotFound { kind, id })?;
        entity.fields = fields.clone();
        entity.deleted = false;
        entity.updated_at = Utc::now();
        Ok(())
    }

    fn attach_media(
        &self,
        id: TargetId,
        url: &str,
        kind: MediaKind,
        featured: bool,
    ) -> Result<MediaId, PersistError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(PersistError::NotFound {
            kind: EntityKind::Property,
            id,
        })?;

        entity.updated_at = Utc::now();
        if let Some(existing) = entity.media.iter_mut().find(|m| m.url == url) {
            existing.kind = kind;
            existing.featured = featured;
            return Ok(existing.id);
        }

        let media_id = self.next_media_id.fetch_add(1, Ordering::SeqCst);
        entity.media.push(JsonMedia {
            id: media_id,
            url: url.to_string(),
            kind,
            featured,
        });
        Ok(media_id)
    }

    fn set_taxonomy(
        &self,
        id: TargetId,
        taxonomy: &str,
        values: &[String],
    ) -> Result<(), PersistError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(PersistError::NotFound {
            kind: EntityKind::Property,
            id,
        })?;
        entity
            .taxonomies
            .insert(taxonomy.to_string(), values.to_vec());
        entity.updated_at = Utc::now();
        Ok(())
    }

    fn set_relation(
        &self,
        id: TargetId,
        relation: &str,
        target: TargetId,
    ) -> Result<(), PersistError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(&id).ok_or(PersistError::NotFound {
            kind: EntityKind::Property,
            id,
        })?;
        entity.relations.insert(relation.to_string(), target);
        entity.updated_at = Utc::now();
        Ok(())
    }

    fn delete_entity(&self, kind: EntityKind, id: TargetId) -> Result<(), PersistError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&id)
            .filter(|entity| entity.kind == kind)
            .ok_or(PersistError::NotFound { kind, id })?;
        entity.deleted = true;
        entity.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::FieldValue;
    use tempfile::TempDir;

    fn make_fields(external_id: ExternalId, title: &str) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert("external_id".to_string(), FieldValue::Integer(external_id));
        fields.insert("title".to_string(), FieldValue::Text(title.to_string()));
        fields
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();

        let target_id = {
            let adapter = JsonStoreAdapter::open(dir.path()).unwrap();
            let id = adapter
                .create_entity(EntityKind::Property, &make_fields(100, "Flat"))
                .unwrap();
            adapter
                .attach_media(id, "https://x/a.jpg", MediaKind::Image, true)
                .unwrap();
            adapter
                .set_taxonomy(id, "category", &["House".to_string()])
                .unwrap();
            adapter.save().unwrap();
            id
        };

        let adapter = JsonStoreAdapter::open(dir.path()).unwrap();
        assert_eq!(
            adapter.find_by_external_id(EntityKind::Property, 100).unwrap(),
            Some(target_id)
        );
        let entity = adapter.get(target_id).unwrap();
        assert_eq!(entity.media.len(), 1);
        assert!(entity.media[0].featured);
        assert_eq!(entity.taxonomies["category"], vec!["House"]);

        // the id counter survives reopening: new entities never collide
        let next = adapter
            .create_entity(EntityKind::Agency, &make_fields(77, "Dolomiti Case"))
            .unwrap();
        assert!(next > target_id);
    }

    #[test]
    fn test_soft_delete_persists() {
        let dir = TempDir::new().unwrap();

        {
            let adapter = JsonStoreAdapter::open(dir.path()).unwrap();
            let id = adapter
                .create_entity(EntityKind::Property, &make_fields(100, "Flat"))
                .unwrap();
            adapter.delete_entity(EntityKind::Property, id).unwrap();
            adapter.save().unwrap();
        }

        let adapter = JsonStoreAdapter::open(dir.path()).unwrap();
        let id = adapter
            .find_by_external_id(EntityKind::Property, 100)
            .unwrap()
            .unwrap();
        assert!(adapter.get(id).unwrap().deleted);
    }

    #[test]
    fn test_kind_mismatch_is_not_found() {
        let dir = TempDir::new().unwrap();
        let adapter = JsonStoreAdapter::open(dir.path()).unwrap();
        let id = adapter
            .create_entity(EntityKind::Agency, &make_fields(77, "Dolomiti Case"))
            .unwrap();

        let result = adapter.update_entity(EntityKind::Property, id, &make_fields(77, "x"));
        assert!(matches!(result, Err(PersistError::NotFound { .. })));
    }
}
