use std::collections::BTreeMap;
use tracing::debug;

use crate::persist::{FieldSet, FieldValue};
use crate::types::{CadastralInfo, ExternalId, Fingerprint, MediaKind};

/// Upper bound on open-ended extension fields per entity. Known fields are
/// typed; the extension map exists only for genuinely custom extras.
pub const MAX_EXTENSION_FIELDS: usize = 32;

/// A gallery attachment ready for the target store.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryItem {
    pub url: String,
    pub kind: MediaKind,
    /// Lead image of the listing. At most one per entity, always the first
    /// image the feed listed.
    pub featured: bool,
}

/// Strongly-typed output of the mapper, ready to persist.
///
/// Ephemeral: built per record and dropped once the adapter confirmed the
/// write. Carries the record fingerprint so the orchestrator commits exactly
/// the hash the decision was made against.
#[derive(Debug, Clone)]
pub struct MappedEntity {
    pub external_id: ExternalId,
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub surface: Option<f64>,
    pub rooms: Option<i64>,
    pub street: Option<String>,
    pub city: Option<String>,
    /// Resolved province name, when the region code is known.
    pub region: Option<String>,
    pub region_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Resolved category name; unknown feed codes are dropped.
    pub category: Option<String>,
    pub energy_class: Option<String>,
    pub feature_flags: Vec<String>,
    pub gallery: Vec<GalleryItem>,
    pub cadastre: CadastralInfo,
    pub extensions: BTreeMap<String, String>,
    pub fingerprint: Fingerprint,
}

impl MappedEntity {
    /// Add an extension field, enforcing the bound.
    pub fn push_extension(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if self.extensions.len() >= MAX_EXTENSION_FIELDS {
            debug!(
                "Dropping extension field beyond the {} limit",
                MAX_EXTENSION_FIELDS
            );
            return;
        }
        self.extensions.insert(key.into(), value.into());
    }

    /// Flatten into the adapter's generic field map. Category and feature
    /// flags are not fields; they travel as taxonomies. The gallery travels
    /// as media attachments.
    pub fn field_set(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert(
            "external_id".to_string(),
            FieldValue::Integer(self.external_id),
        );
        fields.insert("title".to_string(), FieldValue::Text(self.title.clone()));
        fields.insert(
            "description".to_string(),
            FieldValue::Text(self.description.clone()),
        );
        if let Some(price) = self.price {
            fields.insert("price".to_string(), FieldValue::Number(price));
        }
        if let Some(surface) = self.surface {
            fields.insert("surface".to_string(), FieldValue::Number(surface));
        }
        if let Some(rooms) = self.rooms {
            fields.insert("rooms".to_string(), FieldValue::Integer(rooms));
        }
        if let Some(street) = &self.street {
            fields.insert("street".to_string(), FieldValue::Text(street.clone()));
        }
        if let Some(city) = &self.city {
            fields.insert("city".to_string(), FieldValue::Text(city.clone()));
        }
        if let Some(region) = &self.region {
            fields.insert("region".to_string(), FieldValue::Text(region.clone()));
        }
        if let Some(code) = &self.region_code {
            fields.insert("region_code".to_string(), FieldValue::Text(code.clone()));
        }
        if let Some(latitude) = self.latitude {
            fields.insert("latitude".to_string(), FieldValue::Number(latitude));
        }
        if let Some(longitude) = self.longitude {
            fields.insert("longitude".to_string(), FieldValue::Number(longitude));
        }
        if let Some(energy_class) = &self.energy_class {
            fields.insert(
                "energy_class".to_string(),
                FieldValue::Text(energy_class.clone()),
            );
        }

        if let Some(sheet) = &self.cadastre.sheet {
            fields.insert("cadastre_sheet".to_string(), FieldValue::Text(sheet.clone()));
        }
        if let Some(parcel) = &self.cadastre.parcel {
            fields.insert(
                "cadastre_parcel".to_string(),
                FieldValue::Text(parcel.clone()),
            );
        }
        if let Some(subordinate) = &self.cadastre.subordinate {
            fields.insert(
                "cadastre_subordinate".to_string(),
                FieldValue::Text(subordinate.clone()),
            );
        }
        if let Some(category) = &self.cadastre.category {
            fields.insert(
                "cadastre_category".to_string(),
                FieldValue::Text(category.clone()),
            );
        }
        if let Some(income) = self.cadastre.income {
            fields.insert("cadastre_income".to_string(), FieldValue::Number(income));
        }

        for (key, value) in &self.extensions {
            fields.insert(key.clone(), FieldValue::Text(value.clone()));
        }

        fields
    }
}
