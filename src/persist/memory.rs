use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{external_id_of, EntityKind, FieldSet, PersistenceAdapter, PersistError};
use crate::types::{ExternalId, MediaId, MediaKind, TargetId};

/// One attached media item.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMedia {
    pub id: MediaId,
    pub url: String,
    pub kind: MediaKind,
    pub featured: bool,
}

/// One stored entity with everything hung off it.
#[derive(Debug, Clone, Default)]
pub struct StoredEntity {
    pub fields: FieldSet,
    pub media: Vec<StoredMedia>,
    pub taxonomies: HashMap<String, Vec<String>>,
    pub relations: HashMap<String, TargetId>,
    pub deleted: bool,
}

/// Adapter call counters, for asserting idempotency in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterCalls {
    pub creates: u64,
    pub updates: u64,
    pub media: u64,
    pub taxonomies: u64,
    pub relations: u64,
    pub deletes: u64,
}

/// In-memory adapter used by tests and `--dry-run`. Nothing survives the
/// process.
#[derive(Default)]
pub struct MemoryAdapter {
    entities: RwLock<HashMap<(EntityKind, TargetId), StoredEntity>>,
    by_external: RwLock<HashMap<(EntityKind, ExternalId), TargetId>>,
    next_id: AtomicU64,
    next_media_id: AtomicU64,
    calls: RwLock<AdapterCalls>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            by_external: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_media_id: AtomicU64::new(1),
            calls: RwLock::new(AdapterCalls::default()),
        }
    }

    pub fn calls(&self) -> AdapterCalls {
        self.calls.read().clone()
    }

    pub fn entity(&self, kind: EntityKind, id: TargetId) -> Option<StoredEntity> {
        self.entities.read().get(&(kind, id)).cloned()
    }

    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.entities
            .read()
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Target ids are unique across kinds (one counter), so media and
    /// taxonomy calls resolve an id by probing both families.
    fn key_for(&self, id: TargetId) -> Result<(EntityKind, TargetId), PersistError> {
        let entities = self.entities.read();
        if entities.contains_key(&(EntityKind::Property, id)) {
            Ok((EntityKind::Property, id))
        } else if entities.contains_key(&(EntityKind::Agency, id)) {
            Ok((EntityKind::Agency, id))
        } else {
            Err(PersistError::NotFound {
                kind: EntityKind::Property,
                id,
            })
        }
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn find_by_external_id(
        &self,
        kind: EntityKind,
        external_id: ExternalId,
    ) -> Result<Option<TargetId>, PersistError> {
        Ok(self.by_external.read().get(&(kind, external_id)).copied())
    }

    fn create_entity(&self, kind: EntityKind, fields: &FieldSet) -> Result<TargetId, PersistError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entities.write().insert(
            (kind, id),
            StoredEntity {
                fields: fields.clone(),
                ..Default::default()
            },
        );
        if let Some(external_id) = external_id_of(fields) {
            self.by_external.write().insert((kind, external_id), id);
        }
        self.calls.write().creates += 1;
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
            .get_mut(&(kind, id))
            .ok_or(PersistError::NotFound { kind, id })?;
        entity.fields = fields.clone();
        entity.deleted = false;
        self.calls.write().updates += 1;
        Ok(())
    }

    fn attach_media(
        &self,
        id: TargetId,
        url: &str,
        kind: MediaKind,
        featured: bool,
    ) -> Result<MediaId, PersistError> {
        let key = self.key_for(id)?;
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&key)
            .ok_or(PersistError::NotFound { kind: key.0, id })?;

        self.calls.write().media += 1;
        if let Some(existing) = entity.media.iter_mut().find(|m| m.url == url) {
            existing.kind = kind;
            existing.featured = featured;
            return Ok(existing.id);
        }

        let media_id = self.next_media_id.fetch_add(1, Ordering::SeqCst);
        entity.media.push(StoredMedia {
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
        let key = self.key_for(id)?;
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&key)
            .ok_or(PersistError::NotFound { kind: key.0, id })?;
        entity
            .taxonomies
            .insert(taxonomy.to_string(), values.to_vec());
        self.calls.write().taxonomies += 1;
        Ok(())
    }

    fn set_relation(
        &self,
        id: TargetId,
        relation: &str,
        target: TargetId,
    ) -> Result<(), PersistError> {
        let key = self.key_for(id)?;
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&key)
            .ok_or(PersistError::NotFound { kind: key.0, id })?;
        entity.relations.insert(relation.to_string(), target);
        self.calls.write().relations += 1;
        Ok(())
    }

    fn delete_entity(&self, kind: EntityKind, id: TargetId) -> Result<(), PersistError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&(kind, id))
            .ok_or(PersistError::NotFound { kind, id })?;
        entity.deleted = true;
        self.calls.write().deletes += 1;
        Ok(())
    }
}
