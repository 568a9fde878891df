//! Core types shared across the synchronization pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Feed-assigned numeric identifier of a property record. Unique within a
/// feed and stable across feed generations.
pub type ExternalId = i64;

/// Identifier assigned by the target content store.
pub type TargetId = u64;

/// Identifier of a media attachment in the target content store.
pub type MediaId = u64;

/// Hex-encoded SHA-256 content fingerprint.
///
/// Fingerprints are computed over a canonical serialization of a record
/// (see [`crate::tracking::fingerprint`]), so two records with the same
/// content always produce the same fingerprint regardless of the order
/// fields appeared in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Hash an already-canonicalized payload.
    pub fn compute(payload: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint(s)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Fingerprint(s.to_string())
    }
}

/// Kind of a media attachment carried by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    FloorPlan,
    Other,
}

impl MediaKind {
    /// Parse the feed's `type` attribute. Unknown values map to `Other`
    /// and are dropped from galleries downstream.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "image" | "photo" | "picture" => MediaKind::Image,
            "floorplan" | "floor_plan" | "plan" | "blueprint" => MediaKind::FloorPlan,
            _ => MediaKind::Other,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MediaKind::Image => "image",
            MediaKind::FloorPlan => "floorplan",
            MediaKind::Other => "other",
        }
    }
}

/// Cadastral identification block. All fields optional; a record without
/// cadastral data carries the empty default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CadastralInfo {
    pub sheet: Option<String>,
    pub parcel: Option<String>,
    pub subordinate: Option<String>,
    pub category: Option<String>,
    pub income: Option<f64>,
}

impl CadastralInfo {
    pub fn is_empty(&self) -> bool {
        self.sheet.is_none()
            && self.parcel.is_none()
            && self.subordinate.is_none()
            && self.category.is_none()
            && self.income.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_known_vector() {
        let fp = Fingerprint::compute("hello world");
        assert_eq!(
            fp.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fingerprint::compute("same payload");
        let b = Fingerprint::compute("same payload");
        assert_eq!(a, b);

        let c = Fingerprint::compute("different payload");
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_display() {
        let fp = Fingerprint::from("abc123");
        assert_eq!(format!("{}", fp), "abc123");
        assert_eq!(fp.as_str(), "abc123");
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!(MediaKind::parse("image"), MediaKind::Image);
        assert_eq!(MediaKind::parse("Photo"), MediaKind::Image);
        assert_eq!(MediaKind::parse("floorplan"), MediaKind::FloorPlan);
        assert_eq!(MediaKind::parse("floor_plan"), MediaKind::FloorPlan);
        assert_eq!(MediaKind::parse("video"), MediaKind::Other);
        assert_eq!(MediaKind::parse(""), MediaKind::Other);
    }

    #[test]
    fn test_cadastral_empty() {
        assert!(CadastralInfo::default().is_empty());

        let filled = CadastralInfo {
            sheet: Some("12".to_string()),
            ..Default::default()
        };
        assert!(!filled.is_empty());
    }
}
