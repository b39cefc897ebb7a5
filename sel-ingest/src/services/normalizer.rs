//! Structural repair of event submissions
//!
//! Normalization never fails and never drops data. Cosmetic cleanup (trimming,
//! keyword casing, URL canonical form) is silent; reversed date ranges are
//! repaired and reported as `DateCorrection`s so the validator can tag them.

use chrono::{DateTime, Duration, FixedOffset, Timelike};
use std::collections::BTreeSet;

use crate::models::{Confidence, EventDraft, OrganizationInput, PlaceInput, VirtualLocationInput};

/// End hours (producer local clock) that look like an overnight event
const OVERNIGHT_END_HOURS: std::ops::Range<u32> = 0..4;
/// Longest plausible overnight event after correction
const OVERNIGHT_MAX_HOURS: i64 = 7;

/// One end date moved forward to restore `end >= start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateCorrection {
    /// Index into `Schedule::ranges()`
    pub index: usize,
    pub original_end: DateTime<FixedOffset>,
    pub corrected_end: DateTime<FixedOffset>,
}

/// Normalizer output
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub draft: EventDraft,
    pub corrections: Vec<DateCorrection>,
}

/// Confidence of the +24h repair for a range whose `end` precedes `start`.
///
/// High when the original end falls in the small hours of its own offset and
/// the corrected event lasts under seven hours.
pub fn reversed_range_confidence(
    start: &DateTime<FixedOffset>,
    end: &DateTime<FixedOffset>,
) -> Confidence {
    let corrected = *end + Duration::hours(24);
    let duration = corrected.signed_duration_since(*start);
    if OVERNIGHT_END_HOURS.contains(&end.hour())
        && duration > Duration::zero()
        && duration < Duration::hours(OVERNIGHT_MAX_HOURS)
    {
        Confidence::High
    } else {
        Confidence::Low
    }
}

/// Shift `end` forward by whole days until it is no longer before `start`.
/// A single day covers every realistic case; more only happens for garbage
/// input, which still must be stored in a valid shape.
pub fn shift_end(start: &DateTime<FixedOffset>, end: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let mut corrected = *end + Duration::hours(24);
    while corrected < *start {
        corrected += Duration::hours(24);
    }
    corrected
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn clean_url(value: &Option<String>) -> Option<String> {
    clean(value).map(|raw| normalize_url(&raw))
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn hex_value(b: u8) -> u8 {
    (b as char).to_digit(16).unwrap_or(0) as u8
}

/// Decode escapes of unreserved characters and uppercase the rest
fn normalize_escapes(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = [bytes[i + 1], bytes[i + 2]];
            let decoded = (hex_value(hex[0]) << 4) | hex_value(hex[1]);
            if is_unreserved(decoded) {
                out.push(decoded);
            } else {
                out.push(b'%');
                out.extend(hex.iter().map(u8::to_ascii_uppercase));
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    // Only ASCII is ever substituted, so the result is still valid UTF-8
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Canonical URL form: lowercase scheme and host, no default port, no
/// fragment, unreserved escapes decoded, other escapes uppercased, empty
/// path as `/`. Unparsable input is returned trimmed and otherwise untouched.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = url::Url::parse(raw) else {
        return raw.to_string();
    };

    url.set_fragment(None);

    let path = normalize_escapes(url.path());
    let path = if path.is_empty() { "/".to_string() } else { path };
    url.set_path(&path);

    if let Some(query) = url.query().map(normalize_escapes) {
        if query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&query));
        }
    }

    url.to_string()
}

fn normalize_place(place: &PlaceInput) -> PlaceInput {
    PlaceInput {
        name: place.name.trim().to_string(),
        street_address: clean(&place.street_address),
        address_locality: clean(&place.address_locality),
        address_region: clean(&place.address_region),
        postal_code: clean(&place.postal_code),
        address_country: clean(&place.address_country),
        latitude: place.latitude,
        longitude: place.longitude,
    }
}

fn normalize_organizer(org: &OrganizationInput) -> OrganizationInput {
    OrganizationInput {
        name: org.name.trim().to_string(),
        url: clean_url(&org.url),
    }
}

fn normalize_virtual(virtual_location: &VirtualLocationInput) -> VirtualLocationInput {
    VirtualLocationInput {
        url: normalize_url(&virtual_location.url),
        name: clean(&virtual_location.name),
    }
}

/// Lowercase, trim, de-duplicate and sort
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Normalize a resolved draft
pub fn normalize(draft: &EventDraft) -> Normalized {
    let mut schedule = draft.schedule.clone();
    let mut corrections = Vec::new();

    for (index, range) in schedule.ranges_mut().iter_mut().enumerate() {
        if let Some(end) = range.end {
            if end < range.start {
                let corrected_end = shift_end(&range.start, &end);
                range.end = Some(corrected_end);
                corrections.push(DateCorrection {
                    index,
                    original_end: end,
                    corrected_end,
                });
            }
        }
    }

    let normalized = EventDraft {
        name: draft.name.trim().to_string(),
        description: clean(&draft.description),
        schedule,
        location: draft.location.as_ref().map(normalize_place),
        virtual_location: draft.virtual_location.as_ref().map(normalize_virtual),
        organizer: draft.organizer.as_ref().map(normalize_organizer),
        url: clean_url(&draft.url),
        image: clean_url(&draft.image),
        keywords: normalize_keywords(&draft.keywords),
    };

    if !corrections.is_empty() {
        tracing::debug!(corrections = corrections.len(), "Reversed date ranges repaired");
    }

    Normalized {
        draft: normalized,
        corrections,
    }
}
