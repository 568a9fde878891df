//! Static lookup tables for the feed's numeric codes.
//!
//! The single place where magic feed ids live. Unknown codes are dropped by
//! the mapper, never guessed at.

/// Property categories by feed code.
pub const CATEGORIES: &[(u32, &str)] = &[
    (1, "Apartment"),
    (2, "House"),
    (3, "Villa"),
    (4, "Office"),
    (5, "Retail"),
    (6, "Garage"),
    (7, "Land"),
    (8, "Farmhouse"),
];

/// Feature ids that become boolean flags when their value is positive.
pub const FEATURE_FLAGS: &[(u32, &str)] = &[
    (5, "elevator"),
    (9, "balcony"),
    (11, "garden"),
    (13, "terrace"),
    (17, "air-conditioning"),
    (21, "cellar"),
    (24, "furnished"),
    (28, "pool"),
];

/// Feature id carrying the room count. Not a flag.
pub const ROOM_COUNT_FEATURE: u32 = 2;

/// Feed convention: -1 stands for "4 or more" rooms.
pub const ROOM_COUNT_SENTINEL: i64 = -1;
pub const ROOM_COUNT_MANY: i64 = 4;

/// Numeric-field ids holding surfaces, most specific first:
/// walkable (12), usable (10), gross (3), total (1).
/// The first positive value wins.
pub const SURFACE_PRIORITY: &[u32] = &[12, 10, 3, 1];

/// Numeric-field ids copied into the entity extension map.
pub const NUMERIC_EXTRAS: &[(u32, &str)] = &[(5, "bathrooms"), (7, "floor"), (9, "year_built")];

/// Energy performance classes by feed code.
pub const ENERGY_CLASSES: &[(u32, &str)] = &[
    (1, "A4"),
    (2, "A3"),
    (3, "A2"),
    (4, "A1"),
    (5, "B"),
    (6, "C"),
    (7, "D"),
    (8, "E"),
    (9, "F"),
    (10, "G"),
];

/// Province names by 3-digit ISTAT region-code prefix.
pub const REGIONS: &[(&str, &str)] = &[
    ("021", "Bolzano"),
    ("022", "Trento"),
    ("023", "Verona"),
    ("024", "Vicenza"),
    ("025", "Belluno"),
    ("026", "Treviso"),
    ("027", "Venezia"),
    ("028", "Padova"),
    ("029", "Rovigo"),
];

pub fn category_name(code: u32) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

pub fn feature_slug(id: u32) -> Option<&'static str> {
    FEATURE_FLAGS
        .iter()
        .find(|(f, _)| *f == id)
        .map(|(_, slug)| *slug)
}

pub fn energy_class(code: u32) -> Option<&'static str> {
    ENERGY_CLASSES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, class)| *class)
}

pub fn region_name(prefix: &str) -> Option<&'static str> {
    REGIONS
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, name)| *name)
}

pub fn numeric_extra_key(id: u32) -> Option<&'static str> {
    NUMERIC_EXTRAS
        .iter()
        .find(|(n, _)| *n == id)
        .map(|(_, key)| *key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_lookup() {
        assert_eq!(category_name(2), Some("House"));
        assert_eq!(category_name(999), None);
    }

    #[test]
    fn test_region_lookup() {
        assert_eq!(region_name("022"), Some("Trento"));
        assert_eq!(region_name("099"), None);
    }

    #[test]
    fn test_feature_lookup() {
        assert_eq!(feature_slug(5), Some("elevator"));
        assert_eq!(feature_slug(999), None);
    }

    #[test]
    fn test_energy_class_lookup() {
        assert_eq!(energy_class(5), Some("B"));
        assert_eq!(energy_class(0), None);
    }

    #[test]
    fn test_room_count_feature_is_not_a_flag() {
        assert_eq!(feature_slug(ROOM_COUNT_FEATURE), None);
    }
}
