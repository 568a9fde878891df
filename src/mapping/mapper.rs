use std::collections::BTreeMap;
use tracing::debug;

use super::entity::{GalleryItem, MappedEntity};
use super::tables;
use crate::feed::source::SourceRecord;
use crate::tracking::fingerprint::record_fingerprint;
use crate::types::MediaKind;

/// Pure transformation from parsed feed records to persistable entities.
///
/// Deterministic and side-effect-free. Every edge case has a defined
/// fallback, so mapping never fails; the fallible part of the pipeline is
/// persistence.
#[derive(Debug, Default, Clone)]
pub struct RecordMapper;

impl RecordMapper {
    pub fn new() -> Self {
        Self
    }

    pub fn map(&self, record: &SourceRecord) -> MappedEntity {
        let region_code = record.region_code().map(str::to_string);
        let region = region_code
            .as_deref()
            .and_then(tables::region_name)
            .map(str::to_string);

        let category = record.category_code.and_then(|code| {
            let name = tables::category_name(code);
            if name.is_none() {
                debug!(
                    "Dropping unknown category code {} on record {}",
                    code, record.external_id
                );
            }
            name.map(str::to_string)
        });

        let rooms = self.room_count(record);
        let title = self.derive_title(record, category.as_deref(), region.as_deref(), rooms);

        let mut entity = MappedEntity {
            external_id: record.external_id,
            title,
            description: record.description.clone().unwrap_or_default(),
            price: record.price,
            surface: self.best_surface(record),
            rooms,
            street: record.street.clone(),
            city: record.city.clone(),
            region,
            region_code,
            latitude: record.latitude,
            longitude: record.longitude,
            category,
            energy_class: record
                .energy_class_code
                .and_then(tables::energy_class)
                .map(str::to_string),
            feature_flags: self.feature_flags(record),
            gallery: self.build_gallery(record),
            cadastre: record.cadastre.clone().unwrap_or_default(),
            extensions: BTreeMap::new(),
            fingerprint: record_fingerprint(record),
        };

        for (id, value) in &record.numeric_fields {
            if let Some(key) = tables::numeric_extra_key(*id) {
                entity.push_extension(key, value.to_string());
            }
        }

        entity
    }

    /// Explicit feed title if present, else category + region (+ rooms),
    /// else a generic fallback.
    fn derive_title(
        &self,
        record: &SourceRecord,
        category: Option<&str>,
        region: Option<&str>,
        rooms: Option<i64>,
    ) -> String {
        if let Some(title) = &record.title {
            return title.clone();
        }

        let base = match (category, region) {
            (Some(category), Some(region)) => format!("{} in {}", category, region),
            (Some(category), None) => category.to_string(),
            (None, Some(region)) => format!("Property in {}", region),
            (None, None) => return "Property listing".to_string(),
        };

        match rooms {
            Some(rooms) if rooms > 1 => format!("{}, {} rooms", base, rooms),
            _ => base,
        }
    }

    /// First positive value along the surface priority list.
    fn best_surface(&self, record: &SourceRecord) -> Option<f64> {
        tables::SURFACE_PRIORITY
            .iter()
            .find_map(|id| record.numeric_fields.get(id).copied().filter(|v| *v > 0.0))
    }

    /// Room count from the dedicated feature id, applying the sentinel
    /// convention: -1 stands for "4 or more".
    fn room_count(&self, record: &SourceRecord) -> Option<i64> {
        record
            .features
            .get(&tables::ROOM_COUNT_FEATURE)
            .map(|&value| {
                if value == tables::ROOM_COUNT_SENTINEL {
                    tables::ROOM_COUNT_MANY
                } else {
                    value
                }
            })
            .filter(|&value| value > 0)
    }

    /// Only feature ids present in the flag table with a positive value
    /// become flags; everything else is ignored.
    fn feature_flags(&self, record: &SourceRecord) -> Vec<String> {
        record
            .features
            .iter()
            .filter_map(|(id, value)| {
                if *value > 0 {
                    tables::feature_slug(*id).map(str::to_string)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Images become gallery entries with the first one featured; floor
    /// plans are kept but tagged; other kinds are dropped.
    fn build_gallery(&self, record: &SourceRecord) -> Vec<GalleryItem> {
        let mut gallery = Vec::new();
        let mut featured_taken = false;
        for item in &record.media {
            match item.kind {
                MediaKind::Image => {
                    gallery.push(GalleryItem {
                        url: item.url.clone(),
                        kind: MediaKind::Image,
                        featured: !featured_taken,
                    });
                    featured_taken = true;
                }
                MediaKind::FloorPlan => gallery.push(GalleryItem {
                    url: item.url.clone(),
                    kind: MediaKind::FloorPlan,
                    featured: false,
                }),
                MediaKind::Other => {}
            }
        }
        gallery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record() -> SourceRecord {
        SourceRecord::new(100)
            .with_price(200_000.0)
            .with_istat_code("022205")
            .with_category(2)
            .with_feature(2, 3)
    }

    #[test]
    fn test_explicit_title_wins() {
        let record = make_record().with_title("Sunny attic with a view");
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.title, "Sunny attic with a view");
    }

    #[test]
    fn test_title_synthesized_from_category_and_region() {
        let entity = RecordMapper::new().map(&make_record());
        assert_eq!(entity.title, "House in Trento, 3 rooms");
        assert_eq!(entity.category.as_deref(), Some("House"));
        assert_eq!(entity.region.as_deref(), Some("Trento"));
    }

    #[test]
    fn test_title_generic_fallback() {
        let record = SourceRecord::new(1);
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.title, "Property listing");
    }

    #[test]
    fn test_unknown_category_dropped() {
        let mut record = make_record();
        record.category_code = Some(999);
        let entity = RecordMapper::new().map(&record);
        assert!(entity.category.is_none());
        // the title degrades to the region half only
        assert!(entity.title.starts_with("Property in Trento"));
    }

    #[test]
    fn test_best_surface_priority() {
        let record = make_record().with_numeric(1, 120.0).with_numeric(12, 95.5);
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.surface, Some(95.5));

        let record = make_record().with_numeric(1, 120.0);
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.surface, Some(120.0));

        // non-positive values never win
        let record = make_record().with_numeric(12, -3.0).with_numeric(3, 0.0).with_numeric(1, 100.0);
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.surface, Some(100.0));

        let record = make_record();
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.surface, None);
    }

    #[test]
    fn test_room_count_sentinel() {
        let mapper = RecordMapper::new();

        let many = SourceRecord::new(1).with_feature(tables::ROOM_COUNT_FEATURE, -1);
        assert_eq!(mapper.map(&many).rooms, Some(4));

        let two = SourceRecord::new(1).with_feature(tables::ROOM_COUNT_FEATURE, 2);
        assert_eq!(mapper.map(&two).rooms, Some(2));

        let absent = SourceRecord::new(1);
        assert_eq!(mapper.map(&absent).rooms, None);

        let zero = SourceRecord::new(1).with_feature(tables::ROOM_COUNT_FEATURE, 0);
        assert_eq!(mapper.map(&zero).rooms, None);
    }

    #[test]
    fn test_feature_flags() {
        let record = SourceRecord::new(1)
            .with_feature(5, 1) // elevator
            .with_feature(9, 0) // balcony, but value 0
            .with_feature(999, 1) // unknown id
            .with_feature(tables::ROOM_COUNT_FEATURE, 3);
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.feature_flags, vec!["elevator"]);

        let empty = SourceRecord::new(2);
        assert!(RecordMapper::new().map(&empty).feature_flags.is_empty());
    }

    #[test]
    fn test_first_image_is_featured() {
        let record = SourceRecord::new(1)
            .with_media(1, MediaKind::FloorPlan, "https://x/plan.pdf")
            .with_media(2, MediaKind::Image, "https://x/a.jpg")
            .with_media(3, MediaKind::Image, "https://x/b.jpg")
            .with_media(4, MediaKind::Other, "https://x/tour.mp4");
        let entity = RecordMapper::new().map(&record);

        assert_eq!(entity.gallery.len(), 3, "unknown kinds are dropped");
        assert_eq!(entity.gallery[0].kind, MediaKind::FloorPlan);
        assert!(!entity.gallery[0].featured, "floor plans are never featured");
        assert!(entity.gallery[1].featured, "first image in feed order");
        assert!(!entity.gallery[2].featured);
    }

    #[test]
    fn test_no_images_no_featured() {
        let record = SourceRecord::new(1).with_media(1, MediaKind::FloorPlan, "https://x/p.pdf");
        let entity = RecordMapper::new().map(&record);
        assert!(entity.gallery.iter().all(|item| !item.featured));
    }

    #[test]
    fn test_energy_class_resolution() {
        let mut record = make_record();
        record.energy_class_code = Some(5);
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.energy_class.as_deref(), Some("B"));

        record.energy_class_code = Some(99);
        let entity = RecordMapper::new().map(&record);
        assert!(entity.energy_class.is_none());
    }

    #[test]
    fn test_numeric_extras_to_extensions() {
        let record = make_record().with_numeric(5, 2.0).with_numeric(7, 3.0);
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.extensions.get("bathrooms").map(String::as_str), Some("2"));
        assert_eq!(entity.extensions.get("floor").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_entity_carries_record_fingerprint() {
        let record = make_record();
        let entity = RecordMapper::new().map(&record);
        assert_eq!(entity.fingerprint, record_fingerprint(&record));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let record = make_record()
            .with_numeric(12, 95.5)
            .with_media(1, MediaKind::Image, "https://x/a.jpg");
        let mapper = RecordMapper::new();
        let a = mapper.map(&record);
        let b = mapper.map(&record);
        assert_eq!(a.title, b.title);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.field_set(), b.field_set());
    }
}
