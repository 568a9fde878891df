//! Canonical content fingerprinting.
//!
//! One algorithm serves both change detection and mapped-entity stamping, so
//! the tracker and the mapper can never disagree about whether a record
//! changed.

use std::fmt::Write;

use crate::feed::source::{AgencyBlock, SourceRecord};
use crate::types::{CadastralInfo, Fingerprint};

const FIELD_SEP: char = '\x1f';
const SECTION_SEP: char = '\x1e';

/// Fingerprint the syncable content of a record.
///
/// The payload is a fixed field order with unit separators, followed by the
/// feature, numeric and media collections in ascending key order, the
/// cadastral block and the agency reference. Missing fields serialize as
/// empty, so absent and empty values hash identically. Agency contact
/// details are excluded: they belong to the agency entity and carry their
/// own hash ([`agency_fingerprint`]).
pub fn record_fingerprint(record: &SourceRecord) -> Fingerprint {
    let mut payload = String::with_capacity(256);

    push_f64(&mut payload, record.price);
    push_f64(&mut payload, record.size_sqm);
    push_str(&mut payload, record.title.as_deref());
    push_str(&mut payload, record.description.as_deref());
    push_str(&mut payload, record.street.as_deref());
    push_str(&mut payload, record.city.as_deref());
    push_str(&mut payload, record.istat_code.as_deref());
    push_f64(&mut payload, record.latitude);
    push_f64(&mut payload, record.longitude);
    push_u32(&mut payload, record.category_code);
    push_u32(&mut payload, record.energy_class_code);
    payload.push(if record.deleted { '1' } else { '0' });
    payload.push(SECTION_SEP);

    // BTreeMap iteration is already in ascending key order
    for (id, value) in &record.features {
        let _ = write!(payload, "{}={}", id, value);
        payload.push(FIELD_SEP);
    }
    payload.push(SECTION_SEP);

    for (id, value) in &record.numeric_fields {
        let _ = write!(payload, "{}={}", id, value);
        payload.push(FIELD_SEP);
    }
    payload.push(SECTION_SEP);

    let mut media: Vec<_> = record.media.iter().collect();
    media.sort_by_key(|item| item.id);
    for item in media {
        let _ = write!(payload, "{}:{}:{}", item.id, item.kind.as_str(), item.url);
        payload.push(FIELD_SEP);
    }
    payload.push(SECTION_SEP);

    let empty = CadastralInfo::default();
    let cadastre = record.cadastre.as_ref().unwrap_or(&empty);
    push_str(&mut payload, cadastre.sheet.as_deref());
    push_str(&mut payload, cadastre.parcel.as_deref());
    push_str(&mut payload, cadastre.subordinate.as_deref());
    push_str(&mut payload, cadastre.category.as_deref());
    push_f64(&mut payload, cadastre.income);
    payload.push(SECTION_SEP);

    push_i64(&mut payload, record.agency.as_ref().and_then(|a| a.id));

    Fingerprint::compute(&payload)
}

/// Lightweight hash over agency contact fields, used to skip no-op agency
/// updates. The id is the key, not content.
pub fn agency_fingerprint(agency: &AgencyBlock) -> Fingerprint {
    let mut payload = String::with_capacity(128);
    push_str(&mut payload, agency.name.as_deref());
    push_str(&mut payload, agency.email.as_deref());
    push_str(&mut payload, agency.phone.as_deref());
    push_str(&mut payload, agency.website.as_deref());
    push_str(&mut payload, agency.street.as_deref());
    push_str(&mut payload, agency.city.as_deref());
    push_str(&mut payload, agency.logo_url.as_deref());
    Fingerprint::compute(&payload)
}

fn push_str(out: &mut String, value: Option<&str>) {
    if let Some(v) = value {
        out.push_str(v);
    }
    out.push(FIELD_SEP);
}

fn push_f64(out: &mut String, value: Option<f64>) {
    if let Some(v) = value {
        let _ = write!(out, "{}", v);
    }
    out.push(FIELD_SEP);
}

fn push_u32(out: &mut String, value: Option<u32>) {
    if let Some(v) = value {
        let _ = write!(out, "{}", v);
    }
    out.push(FIELD_SEP);
}

fn push_i64(out: &mut String, value: Option<i64>) {
    if let Some(v) = value {
        let _ = write!(out, "{}", v);
    }
    out.push(FIELD_SEP);
}
