//! Agency resolution.
//!
//! Many properties reference the same agency; the resolver deduplicates
//! them by external id and upserts each agency at most once per change. The
//! returned target id feeds the property's `agency` relation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::feed::source::AgencyBlock;
use crate::persist::{EntityKind, FieldSet, FieldValue, PersistenceAdapter, PersistError};
use crate::tracking::fingerprint::agency_fingerprint;
use crate::types::{ExternalId, Fingerprint, TargetId};

/// A validated agency ready to upsert. Carries the lightweight contact hash
/// used to skip rewrites of unchanged agencies.
#[derive(Debug, Clone, PartialEq)]
pub struct AgencyRecord {
    pub external_id: ExternalId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub logo_url: Option<String>,
    pub contact_hash: Fingerprint,
}

impl AgencyRecord {
    /// Validate a raw feed block. Id and name are both required; anything
    /// less counts as no agency at all.
    pub fn from_block(block: &AgencyBlock) -> Option<Self> {
        let external_id = block.id?;
        let name = block.name.clone()?;
        Some(Self {
            external_id,
            name,
            email: block.email.clone(),
            phone: block.phone.clone(),
            website: block.website.clone(),
            street: block.street.clone(),
            city: block.city.clone(),
            logo_url: block.logo_url.clone(),
            contact_hash: agency_fingerprint(block),
        })
    }

    pub fn field_set(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert(
            "external_id".to_string(),
            FieldValue::Integer(self.external_id),
        );
        fields.insert("name".to_string(), FieldValue::Text(self.name.clone()));
        if let Some(email) = &self.email {
            fields.insert("email".to_string(), FieldValue::Text(email.clone()));
        }
        if let Some(phone) = &self.phone {
            fields.insert("phone".to_string(), FieldValue::Text(phone.clone()));
        }
        if let Some(website) = &self.website {
            fields.insert("website".to_string(), FieldValue::Text(website.clone()));
        }
        if let Some(street) = &self.street {
            fields.insert("street".to_string(), FieldValue::Text(street.clone()));
        }
        if let Some(city) = &self.city {
            fields.insert("city".to_string(), FieldValue::Text(city.clone()));
        }
        if let Some(logo_url) = &self.logo_url {
            fields.insert("logo_url".to_string(), FieldValue::Text(logo_url.clone()));
        }
        fields
    }
}

#[derive(Debug, Clone)]
struct CachedAgency {
    target_id: TargetId,
    contact_hash: Fingerprint,
}

/// Run-scoped upserter. The cache short-circuits repeats: a feed with
/// hundreds of properties typically carries a handful of agencies.
pub struct AgencyResolver {
    adapter: Arc<dyn PersistenceAdapter>,
    cache: RwLock<HashMap<ExternalId, CachedAgency>>,
}

impl AgencyResolver {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            adapter,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Validate the agency block of a record, if any.
    pub fn resolve(&self, block: Option<&AgencyBlock>) -> Option<AgencyRecord> {
        block.and_then(AgencyRecord::from_block)
    }

    /// Idempotent upsert; returns the target id for the property relation.
    ///
    /// A cache hit with an unchanged contact hash performs no adapter call.
    /// The first encounter per run refreshes an existing entity or creates
    /// a missing one.
    pub fn upsert(&self, agency: &AgencyRecord) -> Result<TargetId, PersistError> {
        if let Some(cached) = self.cache.read().get(&agency.external_id) {
            if cached.contact_hash == agency.contact_hash {
                return Ok(cached.target_id);
            }
        }

        let target_id = match self
            .adapter
            .find_by_external_id(EntityKind::Agency, agency.external_id)?
        {
            Some(existing) => {
                self.adapter
                    .update_entity(EntityKind::Agency, existing, &agency.field_set())?;
                debug!(
                    "Refreshed agency {} -> target {}",
                    agency.external_id, existing
                );
                existing
            }
            None => {
                let created = self
                    .adapter
                    .create_entity(EntityKind::Agency, &agency.field_set())?;
                info!(
                    "Created agency {} ({}) -> target {}",
                    agency.external_id, agency.name, created
                );
                created
            }
        };

        self.cache.write().insert(
            agency.external_id,
            CachedAgency {
                target_id,
                contact_hash: agency.contact_hash.clone(),
            },
        );
        Ok(target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryAdapter;

    fn make_block() -> AgencyBlock {
        AgencyBlock {
            id: Some(77),
            name: Some("Dolomiti Case".to_string()),
            email: Some("info@dolomiticase.example".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_block_validation() {
        assert!(AgencyRecord::from_block(&make_block()).is_some());

        let mut no_id = make_block();
        no_id.id = None;
        assert!(AgencyRecord::from_block(&no_id).is_none());

        let mut no_name = make_block();
        no_name.name = None;
        assert!(AgencyRecord::from_block(&no_name).is_none());
    }

    #[test]
    fn test_upsert_is_idempotent_within_a_run() {
        let adapter = Arc::new(MemoryAdapter::new());
        let resolver = AgencyResolver::new(adapter.clone());
        let agency = AgencyRecord::from_block(&make_block()).unwrap();

        let first = resolver.upsert(&agency).unwrap();
        let second = resolver.upsert(&agency).unwrap();
        assert_eq!(first, second);

        let calls = adapter.calls();
        assert_eq!(calls.creates, 1);
        assert_eq!(calls.updates, 0, "cache hit performs no write");
    }

    #[test]
    fn test_contact_change_updates_in_place() {
        let adapter = Arc::new(MemoryAdapter::new());
        let resolver = AgencyResolver::new(adapter.clone());

        let agency = AgencyRecord::from_block(&make_block()).unwrap();
        let target = resolver.upsert(&agency).unwrap();

        let mut changed_block = make_block();
        changed_block.phone = Some("+39 0461 111111".to_string());
        let changed = AgencyRecord::from_block(&changed_block).unwrap();
        let target_again = resolver.upsert(&changed).unwrap();

        assert_eq!(target, target_again, "target id is stable");
        let calls = adapter.calls();
        assert_eq!(calls.creates, 1);
        assert_eq!(calls.updates, 1);
    }

    #[test]
    fn test_existing_agency_found_across_resolvers() {
        let adapter = Arc::new(MemoryAdapter::new());
        let agency = AgencyRecord::from_block(&make_block()).unwrap();

        let first_run = AgencyResolver::new(adapter.clone());
        let target = first_run.upsert(&agency).unwrap();

        // a later run starts with a cold cache but finds the entity
        let second_run = AgencyResolver::new(adapter.clone());
        let target_again = second_run.upsert(&agency).unwrap();

        assert_eq!(target, target_again);
        assert_eq!(adapter.calls().creates, 1, "never duplicated");
    }
}
