//! Submission payloads
//!
//! `EventInput` is the wire shape producers send (schema.org-style camelCase,
//! any `@context`/`@type`/`@id` keys are ignored). It is resolved once into an
//! `EventDraft`, whose `Schedule` is either a single date range or a list of
//! occurrences, so normalization and validation never branch on payload shape.

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};
use sel_common::{Error, FieldError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MAX_NAME_CHARS: usize = 500;
const MAX_DESCRIPTION_CHARS: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub occurrences: Vec<OccurrenceInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PlaceInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_location: Option<VirtualLocationInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<OrganizationInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceInput {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl PlaceInput {
    /// Free-text address suitable for a geocoder query
    pub fn address_line(&self) -> String {
        [
            Some(&self.name),
            self.street_address.as_ref(),
            self.address_locality.as_ref(),
            self.address_region.as_ref(),
            self.postal_code.as_ref(),
            self.address_country.as_ref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(", ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationInput {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualLocationInput {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One start/end pair. Offsets are preserved so hour-of-day checks see the
/// producer's local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<FixedOffset>,
    pub end: Option<DateTime<FixedOffset>>,
}

/// Resolved event schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Single(DateRange),
    Occurrences(Vec<DateRange>),
}

impl Schedule {
    pub fn ranges(&self) -> &[DateRange] {
        match self {
            Schedule::Single(range) => std::slice::from_ref(range),
            Schedule::Occurrences(ranges) => ranges,
        }
    }

    pub fn ranges_mut(&mut self) -> &mut [DateRange] {
        match self {
            Schedule::Single(range) => std::slice::from_mut(range),
            Schedule::Occurrences(ranges) => ranges,
        }
    }

    /// Field path of the end date of range `index`, as producers spell it
    pub fn end_field(&self, index: usize) -> String {
        match self {
            Schedule::Single(_) => "endDate".to_string(),
            Schedule::Occurrences(_) => format!("occurrences[{}].endDate", index),
        }
    }

    /// Earliest start across all ranges
    pub fn effective_start(&self) -> DateTime<Utc> {
        self.ranges()
            .iter()
            .map(|r| r.start.with_timezone(&Utc))
            .min()
            .unwrap_or_default()
    }

    /// Latest end (or start, for open-ended ranges) across all ranges
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.ranges()
            .iter()
            .map(|r| r.end.unwrap_or(r.start).with_timezone(&Utc))
            .max()
            .unwrap_or_default()
    }
}

/// An event submission after shape resolution
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub name: String,
    pub description: Option<String>,
    pub schedule: Schedule,
    pub location: Option<PlaceInput>,
    pub virtual_location: Option<VirtualLocationInput>,
    pub organizer: Option<OrganizationInput>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub keywords: Vec<String>,
}

/// Parse RFC 3339, or a bare `YYYY-MM-DD` as midnight UTC
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(midnight.and_utc().fixed_offset())
}

pub fn format_date(value: &DateTime<FixedOffset>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn check_url(field: &str, value: &Option<String>, errors: &mut Vec<FieldError>) {
    let Some(raw) = value.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return;
    };
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
        Ok(_) => errors.push(FieldError::new(field, "must be an http(s) URL")),
        Err(e) => errors.push(FieldError::new(field, format!("is not a valid URL: {}", e))),
    }
}

fn parse_range(
    start_field: &str,
    start: Option<&str>,
    end_field: &str,
    end: Option<&str>,
    errors: &mut Vec<FieldError>,
) -> Option<DateRange> {
    let start = match start.map(str::trim).filter(|s| !s.is_empty()) {
        None => {
            errors.push(FieldError::new(start_field, "is required"));
            None
        }
        Some(raw) => {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                errors.push(FieldError::new(start_field, "must be an RFC 3339 timestamp"));
            }
            parsed
        }
    };

    let end = match end.map(str::trim).filter(|s| !s.is_empty()) {
        None => Some(None),
        Some(raw) => match parse_date(raw) {
            Some(dt) => Some(Some(dt)),
            None => {
                errors.push(FieldError::new(end_field, "must be an RFC 3339 timestamp"));
                None
            }
        },
    };

    Some(DateRange { start: start?, end: end? })
}

impl EventDraft {
    /// Resolve a wire payload. Only unparsable input fails; anything
    /// structurally repairable is left for the normalizer.
    pub fn resolve(input: &EventInput) -> Result<Self> {
        let mut errors = Vec::new();

        let name = input.name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("name", "is required"));
        } else if name.chars().count() > MAX_NAME_CHARS {
            errors.push(FieldError::new(
                "name",
                format!("must be at most {} characters", MAX_NAME_CHARS),
            ));
        }

        if let Some(description) = &input.description {
            if description.chars().count() > MAX_DESCRIPTION_CHARS {
                errors.push(FieldError::new(
                    "description",
                    format!("must be at most {} characters", MAX_DESCRIPTION_CHARS),
                ));
            }
        }

        let has_single = input.start_date.is_some() || input.end_date.is_some();
        let schedule = if !input.occurrences.is_empty() {
            if has_single {
                errors.push(FieldError::new(
                    "occurrences",
                    "cannot be combined with startDate/endDate",
                ));
            }
            let ranges: Vec<Option<DateRange>> = input
                .occurrences
                .iter()
                .enumerate()
                .map(|(i, occ)| {
                    parse_range(
                        &format!("occurrences[{}].startDate", i),
                        occ.start_date.as_deref(),
                        &format!("occurrences[{}].endDate", i),
                        occ.end_date.as_deref(),
                        &mut errors,
                    )
                })
                .collect();
            ranges
                .into_iter()
                .collect::<Option<Vec<_>>>()
                .map(Schedule::Occurrences)
        } else {
            parse_range(
                "startDate",
                input.start_date.as_deref(),
                "endDate",
                input.end_date.as_deref(),
                &mut errors,
            )
            .map(Schedule::Single)
        };

        let has_location = input
            .location
            .as_ref()
            .is_some_and(|p| !p.name.trim().is_empty());
        let has_virtual = input
            .virtual_location
            .as_ref()
            .is_some_and(|v| !v.url.trim().is_empty());
        if !has_location && !has_virtual {
            errors.push(FieldError::new(
                "location",
                "either location.name or virtualLocation.url is required",
            ));
        }

        check_url("url", &input.url, &mut errors);
        check_url("image", &input.image, &mut errors);
        if let Some(virtual_location) = &input.virtual_location {
            check_url(
                "virtualLocation.url",
                &Some(virtual_location.url.clone()),
                &mut errors,
            );
        }
        if let Some(organizer) = &input.organizer {
            check_url("organizer.url", &organizer.url, &mut errors);
        }

        match schedule {
            Some(schedule) if errors.is_empty() => Ok(EventDraft {
                name: input.name.clone(),
                description: input.description.clone(),
                schedule,
                location: input.location.clone().filter(|_| has_location),
                virtual_location: input.virtual_location.clone().filter(|_| has_virtual),
                organizer: input.organizer.clone().filter(|o| !o.name.trim().is_empty()),
                url: input.url.clone(),
                image: input.image.clone(),
                keywords: input.keywords.clone(),
            }),
            _ => Err(Error::Validation(errors)),
        }
    }

    /// Back to the wire shape
    pub fn to_input(&self) -> EventInput {
        let (start_date, end_date, occurrences) = match &self.schedule {
            Schedule::Single(range) => (
                Some(format_date(&range.start)),
                range.end.as_ref().map(format_date),
                Vec::new(),
            ),
            Schedule::Occurrences(ranges) => (
                None,
                None,
                ranges
                    .iter()
                    .map(|r| OccurrenceInput {
                        start_date: Some(format_date(&r.start)),
                        end_date: r.end.as_ref().map(format_date),
                    })
                    .collect(),
            ),
        };

        EventInput {
            name: self.name.clone(),
            description: self.description.clone(),
            start_date,
            end_date,
            occurrences,
            location: self.location.clone(),
            virtual_location: self.virtual_location.clone(),
            organizer: self.organizer.clone(),
            url: self.url.clone(),
            image: self.image.clone(),
            keywords: self.keywords.clone(),
        }
    }

    /// JSON object form of `to_input`, the canonical entity payload
    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        object_fields(&self.to_input())
    }

    /// Venue text used in dedup keys and similarity
    pub fn venue_name(&self) -> &str {
        self.location
            .as_ref()
            .map(|p| p.name.as_str())
            .or_else(|| self.virtual_location.as_ref().map(|v| v.url.as_str()))
            .unwrap_or("")
    }
}

/// JSON object form of a payload struct
pub fn object_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Internal(format!("payload serialized to a non-object: {}", other))),
    }
}

/// Parse stored entity fields back into a wire payload
pub fn input_from_fields(fields: &Map<String, Value>) -> Result<EventInput> {
    Ok(serde_json::from_value(Value::Object(fields.clone()))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> EventInput {
        EventInput {
            name: "Jazz Night".into(),
            start_date: Some("2026-03-31T23:00:00Z".into()),
            location: Some(PlaceInput {
                name: "The Rex".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn single_range_resolves() {
        let draft = EventDraft::resolve(&base_input()).unwrap();
        assert!(matches!(draft.schedule, Schedule::Single(DateRange { end: None, .. })));
    }

    #[test]
    fn occurrences_resolve_to_list() {
        let mut input = base_input();
        input.start_date = None;
        input.occurrences = vec![
            OccurrenceInput {
                start_date: Some("2026-04-01T19:00:00-04:00".into()),
                end_date: Some("2026-04-01T22:00:00-04:00".into()),
            },
            OccurrenceInput {
                start_date: Some("2026-04-08".into()),
                end_date: None,
            },
        ];

        let draft = EventDraft::resolve(&input).unwrap();
        let Schedule::Occurrences(ranges) = &draft.schedule else {
            panic!("expected occurrences");
        };
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].start.to_rfc3339(), "2026-04-08T00:00:00+00:00");
    }

    #[test]
    fn unparsable_fields_reported_together() {
        let input = EventInput {
            name: "  ".into(),
            start_date: Some("next tuesday".into()),
            url: Some("ftp://example.com/x".into()),
            ..Default::default()
        };

        let Err(Error::Validation(errors)) = EventDraft::resolve(&input) else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"startDate"));
        assert!(fields.contains(&"location"));
        assert!(fields.contains(&"url"));
    }

    #[test]
    fn mixed_schedule_shapes_rejected() {
        let mut input = base_input();
        input.occurrences = vec![OccurrenceInput {
            start_date: Some("2026-04-01T19:00:00Z".into()),
            end_date: None,
        }];
        assert!(matches!(EventDraft::resolve(&input), Err(Error::Validation(_))));
    }

    #[test]
    fn wire_round_trip_preserves_offsets() {
        let mut input = base_input();
        input.start_date = Some("2026-04-01T19:00:00-04:00".into());
        let draft = EventDraft::resolve(&input).unwrap();
        let back = draft.to_input();
        assert_eq!(back.start_date.as_deref(), Some("2026-04-01T19:00:00-04:00"));
        assert_eq!(EventDraft::resolve(&back).unwrap(), draft);
    }
}
