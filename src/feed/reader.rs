use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::source::{AgencyBlock, FeedError, MediaItem, RecordSource, SourceRecord};
use crate::types::{CadastralInfo, MediaKind};

const DEFAULT_MAX_PARSE_ERRORS: usize = 25;

/// Underlying XML reader, with or without gzip decompression.
enum FeedInput {
    Plain(Reader<BufReader<File>>),
    Gzip(Reader<BufReader<GzDecoder<File>>>),
}

impl FeedInput {
    fn read_event<'a>(&mut self, buf: &'a mut Vec<u8>) -> quick_xml::Result<Event<'a>> {
        buf.clear();
        match self {
            FeedInput::Plain(reader) => reader.read_event_into(buf),
            FeedInput::Gzip(reader) => reader.read_event_into(buf),
        }
    }
}

/// Nested block the cursor is currently inside, so that, say, an `<id>`
/// element under `<agency>` never clobbers the record id.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Block {
    Info,
    Features,
    Numerics,
    Media,
    Cadastre,
    Agency,
}

/// Accumulates raw text for the record subtree currently being parsed.
/// Typed parsing happens once in [`PartialRecord::build`].
#[derive(Debug, Default)]
struct PartialRecord {
    id: Option<String>,
    price: Option<String>,
    size: Option<String>,
    title: Option<String>,
    description: Option<String>,
    street: Option<String>,
    city: Option<String>,
    istat_code: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    category: Option<String>,
    energy_class: Option<String>,
    deleted: Option<String>,
    features: Vec<(String, String)>,
    numerics: Vec<(String, String)>,
    media: Vec<(String, String, String)>,
    cadastre_sheet: Option<String>,
    cadastre_parcel: Option<String>,
    cadastre_subordinate: Option<String>,
    cadastre_category: Option<String>,
    cadastre_income: Option<String>,
    agency_id: Option<String>,
    agency_name: Option<String>,
    agency_email: Option<String>,
    agency_phone: Option<String>,
    agency_website: Option<String>,
    agency_street: Option<String>,
    agency_city: Option<String>,
    agency_logo: Option<String>,
}

impl PartialRecord {
    /// Turn accumulated text into a typed record.
    ///
    /// `Ok(None)` means the record had no parseable external id and is
    /// silently dropped. `Err` means the id parsed but some typed field did
    /// not; the caller counts it against the error threshold.
    fn build(self) -> Result<Option<SourceRecord>, String> {
        let external_id = match self.id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => match raw.parse::<i64>() {
                Ok(id) => id,
                Err(_) => return Ok(None),
            },
            _ => return Ok(None),
        };

        let mut record = SourceRecord::new(external_id);
        record.price = parse_opt_f64(&self.price, external_id, "price")?;
        record.size_sqm = parse_opt_f64(&self.size, external_id, "size")?;
        record.title = non_empty(self.title);
        record.description = non_empty(self.description);
        record.street = non_empty(self.street);
        record.city = non_empty(self.city);
        record.istat_code = non_empty(self.istat_code);
        record.latitude = parse_opt_f64(&self.latitude, external_id, "latitude")?;
        record.longitude = parse_opt_f64(&self.longitude, external_id, "longitude")?;
        record.category_code = parse_opt_u32(&self.category, external_id, "category")?;
        record.energy_class_code =
            parse_opt_u32(&self.energy_class, external_id, "energy_class")?;
        record.deleted = match self.deleted.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(raw) => parse_flag(raw)
                .ok_or_else(|| format!("record {}: deleted flag '{}'", external_id, raw))?,
        };

        for (id, value) in self.features {
            let id: u32 = id.trim().parse().map_err(|_| {
                format!("record {}: feature id '{}' is not numeric", external_id, id)
            })?;
            let value: i64 = value.trim().parse().map_err(|_| {
                format!(
                    "record {}: feature {} value '{}' is not numeric",
                    external_id, id, value
                )
            })?;
            record.features.insert(id, value);
        }

        for (id, value) in self.numerics {
            let id: u32 = id.trim().parse().map_err(|_| {
                format!("record {}: numeric field id '{}' is not numeric", external_id, id)
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                format!(
                    "record {}: numeric field {} value '{}' is not numeric",
                    external_id, id, value
                )
            })?;
            record.numeric_fields.insert(id, value);
        }

        for (id, kind, url) in self.media {
            let id: u32 = id.trim().parse().map_err(|_| {
                format!("record {}: media id '{}' is not numeric", external_id, id)
            })?;
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            record.media.push(MediaItem {
                id,
                kind: MediaKind::parse(&kind),
                url: url.to_string(),
            });
        }

        let cadastre = CadastralInfo {
            sheet: non_empty(self.cadastre_sheet),
            parcel: non_empty(self.cadastre_parcel),
            subordinate: non_empty(self.cadastre_subordinate),
            category: non_empty(self.cadastre_category),
            income: parse_opt_f64(&self.cadastre_income, external_id, "cadastral income")?,
        };
        if !cadastre.is_empty() {
            record.cadastre = Some(cadastre);
        }

        let agency = AgencyBlock {
            // a garbled agency id degrades to "no id"; the resolver then
            // treats the whole block as no agency
            id: self
                .agency_id
                .as_deref()
                .and_then(|raw| raw.trim().parse().ok()),
            name: non_empty(self.agency_name),
            email: non_empty(self.agency_email),
            phone: non_empty(self.agency_phone),
            website: non_empty(self.agency_website),
            street: non_empty(self.agency_street),
            city: non_empty(self.agency_city),
            logo_url: non_empty(self.agency_logo),
        };
        if agency != AgencyBlock::default() {
            record.agency = Some(agency);
        }

        Ok(Some(record))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_opt_f64(raw: &Option<String>, id: i64, field: &str) -> Result<Option<f64>, String> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("record {}: {} '{}' is not numeric", id, field, value)),
    }
}

fn parse_opt_u32(raw: &Option<String>, id: i64, field: &str) -> Result<Option<u32>, String> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| format!("record {}: {} '{}' is not numeric", id, field, value)),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn attr_value(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.to_string()))
}

/// Outcome of pulling one record subtree out of the stream.
enum ParseResult {
    Record(SourceRecord),
    /// No parseable external id; dropped without counting an error.
    Skipped,
    /// Id parsed but a typed field did not; counted against the threshold.
    Malformed(String),
    Eof,
}

/// Streaming reader over a property feed file (`.xml` or `.xml.gz`).
///
/// At most one record subtree is materialized at a time, so feeds far larger
/// than memory stream through a bounded footprint. Malformed records are
/// counted and skipped until `max_errors` is exceeded, at which point the
/// stream aborts with [`FeedError::ErrorThreshold`].
pub struct XmlFeedSource {
    input: FeedInput,
    source_name: String,
    current: Option<PartialRecord>,
    block: Block,
    current_element: Option<String>,
    text_buf: String,
    pending_item_id: Option<String>,
    pending_media: Option<(String, String)>,
    parse_errors: usize,
    max_errors: usize,
    aborted: bool,
}

impl XmlFeedSource {
    /// Open a feed file, detecting gzip compression from the extension.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        let is_gzip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        // 1 MiB buffer: the parser pulls small events from a large file
        let input = if is_gzip {
            FeedInput::Gzip(Reader::from_reader(BufReader::with_capacity(
                1024 * 1024,
                GzDecoder::new(file),
            )))
        } else {
            FeedInput::Plain(Reader::from_reader(BufReader::with_capacity(
                1024 * 1024,
                file,
            )))
        };

        Ok(Self {
            input,
            source_name: path.display().to_string(),
            current: None,
            block: Block::Info,
            current_element: None,
            text_buf: String::new(),
            pending_item_id: None,
            pending_media: None,
            parse_errors: 0,
            max_errors: DEFAULT_MAX_PARSE_ERRORS,
            aborted: false,
        })
    }

    /// Set the malformed-record tolerance before iterating.
    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Malformed records encountered so far.
    pub fn parse_errors(&self) -> usize {
        self.parse_errors
    }

    fn handle_start(&mut self, e: &BytesStart) {
        let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
        match name.as_str() {
            "property" => {
                self.current = Some(PartialRecord::default());
                self.block = Block::Info;
                self.current_element = None;
            }
            "features" if self.current.is_some() => self.block = Block::Features,
            "numerics" if self.current.is_some() => self.block = Block::Numerics,
            "media" if self.current.is_some() => self.block = Block::Media,
            "cadastre" if self.current.is_some() => self.block = Block::Cadastre,
            "agency" if self.current.is_some() => self.block = Block::Agency,
            "feature" if self.block == Block::Features => {
                self.pending_item_id = attr_value(e, "id");
                self.current_element = Some(name);
                self.text_buf.clear();
            }
            "numeric" if self.block == Block::Numerics => {
                self.pending_item_id = attr_value(e, "id");
                self.current_element = Some(name);
                self.text_buf.clear();
            }
            "item" if self.block == Block::Media => {
                self.pending_media = Some((
                    attr_value(e, "id").unwrap_or_default(),
                    attr_value(e, "type").unwrap_or_default(),
                ));
                self.current_element = Some(name);
                self.text_buf.clear();
            }
            _ if self.current.is_some() => {
                self.current_element = Some(name);
                self.text_buf.clear();
            }
            _ => {}
        }
    }

    fn handle_end(&mut self, name: &str) -> Option<ParseResult> {
        match name {
            "property" => {
                if let Some(partial) = self.current.take() {
                    self.block = Block::Info;
                    self.current_element = None;
                    return Some(match partial.build() {
                        Ok(Some(record)) => ParseResult::Record(record),
                        Ok(None) => ParseResult::Skipped,
                        Err(message) => ParseResult::Malformed(message),
                    });
                }
            }
            "features" | "numerics" | "media" | "cadastre" | "agency" => {
                self.block = Block::Info;
                self.current_element = None;
            }
            "feature" => {
                let text = std::mem::take(&mut self.text_buf);
                let id = self.pending_item_id.take().unwrap_or_default();
                if let Some(partial) = self.current.as_mut() {
                    if self.block == Block::Features {
                        partial.features.push((id, text));
                    }
                }
                self.current_element = None;
            }
            "numeric" => {
                let text = std::mem::take(&mut self.text_buf);
                let id = self.pending_item_id.take().unwrap_or_default();
                if let Some(partial) = self.current.as_mut() {
                    if self.block == Block::Numerics {
                        partial.numerics.push((id, text));
                    }
                }
                self.current_element = None;
            }
            "item" => {
                let url = std::mem::take(&mut self.text_buf);
                if let (Some(partial), Some((id, kind))) =
                    (self.current.as_mut(), self.pending_media.take())
                {
                    partial.media.push((id, kind, url));
                }
                self.current_element = None;
            }
            leaf => {
                self.assign_leaf(leaf);
            }
        }
        None
    }

    fn assign_leaf(&mut self, name: &str) {
        let text = std::mem::take(&mut self.text_buf);
        self.current_element = None;
        let Some(partial) = self.current.as_mut() else {
            return;
        };

        match self.block {
            Block::Info => match name {
                "id" => partial.id = Some(text),
                "price" => partial.price = Some(text),
                "size" => partial.size = Some(text),
                "title" => partial.title = Some(text),
                "description" => partial.description = Some(text),
                "street" => partial.street = Some(text),
                "city" => partial.city = Some(text),
                "istat_code" => partial.istat_code = Some(text),
                "latitude" => partial.latitude = Some(text),
                "longitude" => partial.longitude = Some(text),
                "category" => partial.category = Some(text),
                "energy_class" => partial.energy_class = Some(text),
                "deleted" => partial.deleted = Some(text),
                _ => {}
            },
            Block::Cadastre => match name {
                "sheet" => partial.cadastre_sheet = Some(text),
                "parcel" => partial.cadastre_parcel = Some(text),
                "subordinate" => partial.cadastre_subordinate = Some(text),
                "category" => partial.cadastre_category = Some(text),
                "income" => partial.cadastre_income = Some(text),
                _ => {}
            },
            Block::Agency => match name {
                "id" => partial.agency_id = Some(text),
                "name" => partial.agency_name = Some(text),
                "email" => partial.agency_email = Some(text),
                "phone" => partial.agency_phone = Some(text),
                "website" => partial.agency_website = Some(text),
                "street" => partial.agency_street = Some(text),
                "city" => partial.agency_city = Some(text),
                "logo" => partial.agency_logo = Some(text),
                _ => {}
            },
            _ => {}
        }
    }

    fn parse_next_record(&mut self) -> Result<ParseResult, FeedError> {
        let mut buf = Vec::new();
        loop {
            match self.input.read_event(&mut buf) {
                Ok(Event::Start(ref e)) => self.handle_start(e),
                Ok(Event::Text(e)) => {
                    if self.current_element.is_some() {
                        match e.unescape() {
                            Ok(text) => self.text_buf.push_str(&text),
                            Err(_) => self.text_buf.push_str(&String::from_utf8_lossy(&e)),
                        }
                    }
                }
                Ok(Event::CData(e)) => {
                    if self.current_element.is_some() {
                        self.text_buf
                            .push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Ok(Event::End(ref e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if let Some(result) = self.handle_end(&name) {
                        return Ok(result);
                    }
                }
                Ok(Event::Eof) => return Ok(ParseResult::Eof),
                Ok(_) => {}
                Err(e) => return Err(FeedError::Xml(e.to_string())),
            }
        }
    }
}

impl RecordSource for XmlFeedSource {
    fn iter_records(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<SourceRecord, FeedError>> + '_> {
        Box::new(XmlFeedIterator { source: self })
    }

    fn record_count_hint(&self) -> Option<u64> {
        None
    }

    fn source_name(&self) -> &str {
        &self.source_name
    }
}

/// Iterator adapter over the pull parser. Silently drops id-less records,
/// counts malformed ones and aborts past the error threshold.
pub struct XmlFeedIterator<'a> {
    source: &'a mut XmlFeedSource,
}

impl Iterator for XmlFeedIterator<'_> {
    type Item = Result<SourceRecord, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.source.aborted {
            return None;
        }
        loop {
            match self.source.parse_next_record() {
                Ok(ParseResult::Record(record)) => return Some(Ok(record)),
                Ok(ParseResult::Skipped) => {
                    debug!("Skipping record without a parseable id");
                    continue;
                }
                Ok(ParseResult::Malformed(message)) => {
                    self.source.parse_errors += 1;
                    debug!("Malformed record: {}", message);
                    if self.source.parse_errors > self.source.max_errors {
                        self.source.aborted = true;
                        return Some(Err(FeedError::ErrorThreshold {
                            errors: self.source.parse_errors,
                        }));
                    }
                    return Some(Err(FeedError::Record(message)));
                }
                Ok(ParseResult::Eof) => return None,
                Err(e) => {
                    self.source.aborted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<properties>
  <property>
    <id>100</id>
    <price>200000</price>
    <size>95</size>
    <description>Bright three-room flat close to the old town.</description>
    <street>Via Belenzani 12</street>
    <city>Trento</city>
    <istat_code>022205</istat_code>
    <latitude>46.0702</latitude>
    <longitude>11.1217</longitude>
    <category>2</category>
    <energy_class>5</energy_class>
    <deleted>0</deleted>
    <features>
      <feature id="2">3</feature>
      <feature id="5">1</feature>
    </features>
    <numerics>
      <numeric id="12">95.5</numeric>
    </numerics>
    <media>
      <item id="1" type="image">https://cdn.example.com/100/front.jpg</item>
      <item id="2" type="floorplan">https://cdn.example.com/100/plan.pdf</item>
    </media>
    <cadastre>
      <sheet>12</sheet>
      <parcel>345</parcel>
      <category>A/2</category>
      <income>512.40</income>
    </cadastre>
    <agency>
      <id>77</id>
      <name>Dolomiti Case</name>
      <email>info@dolomiticase.example</email>
    </agency>
  </property>
  <property>
    <id>101</id>
    <price>150000</price>
  </property>
  <property>
    <title>No id at all</title>
    <price>999</price>
  </property>
</properties>
"#;

    fn write_feed(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".xml").unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_sample_feed() {
        let file = write_feed(SAMPLE_FEED);
        let mut source = XmlFeedSource::open(file.path()).unwrap();

        let records: Vec<_> = source.iter_records().collect();
        assert_eq!(records.len(), 2, "the id-less record is dropped");

        let first = records[0].as_ref().unwrap();
        assert_eq!(first.external_id, 100);
        assert_eq!(first.price, Some(200_000.0));
        assert_eq!(first.size_sqm, Some(95.0));
        assert_eq!(first.istat_code.as_deref(), Some("022205"));
        assert_eq!(first.region_code(), Some("022"));
        assert_eq!(first.category_code, Some(2));
        assert_eq!(first.features.get(&2), Some(&3));
        assert_eq!(first.features.get(&5), Some(&1));
        assert_eq!(first.numeric_fields.get(&12), Some(&95.5));
        assert!(!first.deleted);

        assert_eq!(first.media.len(), 2);
        assert_eq!(first.media[0].kind, MediaKind::Image);
        assert_eq!(first.media[1].kind, MediaKind::FloorPlan);

        let cadastre = first.cadastre.as_ref().unwrap();
        assert_eq!(cadastre.sheet.as_deref(), Some("12"));
        assert_eq!(cadastre.category.as_deref(), Some("A/2"));
        assert_eq!(cadastre.income, Some(512.40));

        let second = records[1].as_ref().unwrap();
        assert_eq!(second.external_id, 101);
        assert!(second.cadastre.is_none());
        assert!(second.agency.is_none());
    }

    #[test]
    fn test_agency_id_does_not_clobber_record_id() {
        let file = write_feed(SAMPLE_FEED);
        let mut source = XmlFeedSource::open(file.path()).unwrap();

        let records: Vec<_> = source.iter_records().collect();
        let first = records[0].as_ref().unwrap();
        assert_eq!(first.external_id, 100);

        let agency = first.agency.as_ref().unwrap();
        assert_eq!(agency.id, Some(77));
        assert_eq!(agency.name.as_deref(), Some("Dolomiti Case"));
    }

    #[test]
    fn test_garbage_id_is_silently_skipped() {
        let feed = r#"<properties>
  <property><id>not-a-number</id><price>100</price></property>
  <property><id>7</id></property>
</properties>"#;
        let file = write_feed(feed);
        let mut source = XmlFeedSource::open(file.path()).unwrap();

        let records: Vec<_> = source.iter_records().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().external_id, 7);
        assert_eq!(source.parse_errors(), 0);
    }

    #[test]
    fn test_malformed_record_counted_and_stream_continues() {
        let feed = r#"<properties>
  <property><id>1</id><price>cheap</price></property>
  <property><id>2</id><price>80000</price></property>
</properties>"#;
        let file = write_feed(feed);
        let mut source = XmlFeedSource::open(file.path()).unwrap();

        let records: Vec<_> = source.iter_records().collect();
        assert_eq!(records.len(), 2);
        match &records[0] {
            Err(FeedError::Record(message)) => {
                assert!(message.contains("record 1"));
                assert!(message.contains("price"));
            }
            other => panic!("Expected a record error, got {:?}", other),
        }
        assert_eq!(records[1].as_ref().unwrap().external_id, 2);
        assert_eq!(source.parse_errors(), 1);
    }

    #[test]
    fn test_error_threshold_aborts_stream() {
        let feed = r#"<properties>
  <property><id>1</id><price>bad</price></property>
  <property><id>2</id><price>bad</price></property>
  <property><id>3</id><price>80000</price></property>
</properties>"#;
        let file = write_feed(feed);
        let mut source = XmlFeedSource::open(file.path()).unwrap().with_max_errors(1);

        let results: Vec<_> = source.iter_records().collect();
        assert_eq!(results.len(), 2, "stream stops after the threshold error");
        assert!(matches!(results[0], Err(FeedError::Record(_))));
        assert!(matches!(
            results[1],
            Err(FeedError::ErrorThreshold { errors: 2 })
        ));
    }

    #[test]
    fn test_gzip_feed() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(SAMPLE_FEED.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut file = NamedTempFile::with_suffix(".xml.gz").unwrap();
        file.write_all(&compressed).unwrap();
        file.flush().unwrap();

        let mut source = XmlFeedSource::open(file.path()).unwrap();
        let records: Vec<_> = source.iter_records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_ref().unwrap().external_id, 100);
    }

    #[test]
    fn test_deleted_flag() {
        let feed = r#"<properties>
  <property><id>9</id><deleted>1</deleted></property>
</properties>"#;
        let file = write_feed(feed);
        let mut source = XmlFeedSource::open(file.path()).unwrap();

        let records: Vec<_> = source.iter_records().collect();
        assert!(records[0].as_ref().unwrap().deleted);
    }

    #[test]
    fn test_truncated_stream_is_fatal() {
        // cut off in the middle of a start tag
        let feed = "<properties><property><id>1</id><pri";
        let file = write_feed(feed);
        let mut source = XmlFeedSource::open(file.path()).unwrap();

        let results: Vec<_> = source.iter_records().collect();
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(e) => assert!(e.is_fatal()),
            Ok(_) => panic!("Expected a fatal stream error"),
        }
    }
}
