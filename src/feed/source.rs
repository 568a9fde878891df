use crate::types::{CadastralInfo, ExternalId, MediaKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A media attachment declared by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: u32,
    pub kind: MediaKind,
    pub url: String,
}

/// Raw agency block as it appears in the feed. Identity is validated by the
/// resolver: a block without both id and name counts as no agency at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgencyBlock {
    pub id: Option<ExternalId>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub logo_url: Option<String>,
}

/// One fully parsed feed record. Built by the reader, immutable afterwards,
/// discarded once mapped and persisted.
///
/// The feature and numeric maps are ordered (`BTreeMap`), so iteration order
/// is canonical no matter how the feed ordered the elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub external_id: ExternalId,
    pub price: Option<f64>,
    pub size_sqm: Option<f64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    /// ISTAT municipality code; its 3-digit prefix is the region code.
    pub istat_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category_code: Option<u32>,
    pub energy_class_code: Option<u32>,
    /// feature id -> value (flags, counters such as room count)
    pub features: BTreeMap<u32, i64>,
    /// numeric field id -> value (surfaces and other measurements)
    pub numeric_fields: BTreeMap<u32, f64>,
    pub media: Vec<MediaItem>,
    pub cadastre: Option<CadastralInfo>,
    pub agency: Option<AgencyBlock>,
    /// The feed itself flagged this record as removed.
    pub deleted: bool,
}

impl SourceRecord {
    pub fn new(external_id: ExternalId) -> Self {
        Self {
            external_id,
            price: None,
            size_sqm: None,
            title: None,
            description: None,
            street: None,
            city: None,
            istat_code: None,
            latitude: None,
            longitude: None,
            category_code: None,
            energy_class_code: None,
            features: BTreeMap::new(),
            numeric_fields: BTreeMap::new(),
            media: Vec::new(),
            cadastre: None,
            agency: None,
            deleted: false,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_istat_code(mut self, code: impl Into<String>) -> Self {
        self.istat_code = Some(code.into());
        self
    }

    pub fn with_category(mut self, code: u32) -> Self {
        self.category_code = Some(code);
        self
    }

    pub fn with_feature(mut self, id: u32, value: i64) -> Self {
        self.features.insert(id, value);
        self
    }

    pub fn with_numeric(mut self, id: u32, value: f64) -> Self {
        self.numeric_fields.insert(id, value);
        self
    }

    pub fn with_media(mut self, id: u32, kind: MediaKind, url: impl Into<String>) -> Self {
        self.media.push(MediaItem {
            id,
            kind,
            url: url.into(),
        });
        self
    }

    /// 3-digit region prefix of the ISTAT code, when one is present.
    pub fn region_code(&self) -> Option<&str> {
        self.istat_code.as_deref().and_then(|code| code.get(..3))
    }
}

/// Errors produced while reading a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("malformed record: {0}")]
    Record(String),

    #[error("feed aborted after {errors} malformed records")]
    ErrorThreshold { errors: usize },
}

impl FeedError {
    /// Whether the rest of the stream is unusable. Record-level errors are
    /// transient; the stream continues past them.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FeedError::Record(_))
    }
}

impl From<quick_xml::Error> for FeedError {
    fn from(e: quick_xml::Error) -> Self {
        FeedError::Xml(e.to_string())
    }
}

/// A forward-only source of feed records. Restart only by reopening.
pub trait RecordSource: Send {
    /// Iterate records one at a time. Transient errors surface as
    /// `Err(FeedError::Record)`; any fatal error ends the stream.
    fn iter_records(&mut self)
        -> Box<dyn Iterator<Item = Result<SourceRecord, FeedError>> + '_>;

    /// Total record count when the source knows it up front.
    fn record_count_hint(&self) -> Option<u64>;

    /// Human-readable source name for logs and reports.
    fn source_name(&self) -> &str;
}
