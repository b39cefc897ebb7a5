//! Warning classification
//!
//! `classify` diffs a draft before and after normalization and tags every
//! structural repair with a confidence. Quality checks add low-confidence
//! warnings for data that is valid but suspicious. Cosmetic changes are
//! never reported.

use chrono::{DateTime, Duration, Utc};

use super::normalizer::reversed_range_confidence;
use crate::models::{codes, Confidence, EventDraft, Warning};

fn describe_gap(gap: Duration) -> String {
    let minutes = gap.num_minutes();
    format!("{}h{:02}m", minutes / 60, minutes % 60)
}

/// Warnings for every end date that normalization moved.
///
/// Pure: the same pair of drafts always yields the same warnings.
pub fn classify(original: &EventDraft, normalized: &EventDraft) -> Vec<Warning> {
    let mut warnings = Vec::new();

    let pairs = original
        .schedule
        .ranges()
        .iter()
        .zip(normalized.schedule.ranges())
        .enumerate();

    for (index, (before, after)) in pairs {
        let Some(original_end) = before.end else {
            continue;
        };
        if after.end == Some(original_end) || original_end >= before.start {
            continue;
        }

        let field = original.schedule.end_field(index);
        let gap = describe_gap(before.start.signed_duration_since(original_end));

        let warning = match reversed_range_confidence(&before.start, &original_end) {
            Confidence::High => Warning::high(
                field,
                codes::REVERSED_DATES_TIMEZONE_LIKELY,
                format!(
                    "end was {} before start (ending at {}) - auto-corrected as likely timezone error",
                    gap,
                    original_end.format("%H:%M")
                ),
            ),
            Confidence::Low => Warning::low(
                field,
                codes::REVERSED_DATES_NEEDS_REVIEW,
                format!("end was {} before start - auto-corrected but needs review", gap),
            ),
        };
        warnings.push(warning);
    }

    warnings
}

/// Low-confidence checks on normalized data
pub fn quality_warnings(draft: &EventDraft, now: DateTime<Utc>, max_future_days: i64) -> Vec<Warning> {
    let mut warnings = Vec::new();

    if draft.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
        warnings.push(Warning::low(
            "description",
            codes::MISSING_DESCRIPTION,
            "Event is missing a description",
        ));
    }

    if draft.schedule.effective_start() > now + Duration::days(max_future_days) {
        warnings.push(Warning::low(
            "startDate",
            codes::TOO_FAR_FUTURE,
            format!(
                "Event is scheduled more than {} days in the future",
                max_future_days
            ),
        ));
    }

    warnings
}

/// Validator with its configured quality limits
#[derive(Debug, Clone)]
pub struct Validator {
    max_future_days: i64,
}

impl Validator {
    pub fn new(max_future_days: i64) -> Self {
        Self { max_future_days }
    }

    /// Correction warnings followed by quality warnings
    pub fn validate(&self, original: &EventDraft, normalized: &EventDraft, now: DateTime<Utc>) -> Vec<Warning> {
        let mut warnings = classify(original, normalized);
        warnings.extend(quality_warnings(normalized, now, self.max_future_days));
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{requires_review, DateRange, PlaceInput, Schedule};
    use crate::services::normalizer::normalize;
    use chrono::{DateTime, FixedOffset};

    fn dt(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn draft(ranges: Vec<(&str, Option<&str>)>) -> EventDraft {
        let ranges: Vec<DateRange> = ranges
            .into_iter()
            .map(|(s, e)| DateRange {
                start: dt(s),
                end: e.map(dt),
            })
            .collect();
        let schedule = if ranges.len() == 1 {
            Schedule::Single(ranges[0])
        } else {
            Schedule::Occurrences(ranges)
        };
        EventDraft {
            name: "Late Show".into(),
            description: Some("Two sets".into()),
            schedule,
            location: Some(PlaceInput {
                name: "The Rex".into(),
                ..Default::default()
            }),
            virtual_location: None,
            organizer: None,
            url: None,
            image: None,
            keywords: vec![],
        }
    }

    fn now() -> DateTime<Utc> {
        dt("2026-01-01T00:00:00Z").with_timezone(&Utc)
    }

    #[test]
    fn overnight_correction_is_informational() {
        let original = draft(vec![("2026-03-31T23:00:00Z", Some("2026-03-31T02:00:00Z"))]);
        let normalized = normalize(&original).draft;

        let warnings = classify(&original, &normalized);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, codes::REVERSED_DATES_TIMEZONE_LIKELY);
        assert_eq!(warnings[0].field, "endDate");
        assert!(!requires_review(&warnings));
    }

    #[test]
    fn daytime_correction_needs_review() {
        let original = draft(vec![("2026-03-31T23:00:00Z", Some("2026-03-31T10:00:00Z"))]);
        let normalized = normalize(&original).draft;

        let warnings = classify(&original, &normalized);
        assert_eq!(warnings[0].code, codes::REVERSED_DATES_NEEDS_REVIEW);
        assert_eq!(warnings[0].confidence, Confidence::Low);
    }

    #[test]
    fn occurrences_get_the_same_treatment() {
        let original = draft(vec![
            ("2026-03-31T23:00:00Z", Some("2026-03-31T02:00:00Z")),
            ("2026-04-07T23:00:00Z", Some("2026-04-07T12:00:00Z")),
        ]);
        let normalized = normalize(&original).draft;

        let warnings = classify(&original, &normalized);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].field, "occurrences[0].endDate");
        assert_eq!(warnings[0].confidence, Confidence::High);
        assert_eq!(warnings[1].field, "occurrences[1].endDate");
        assert_eq!(warnings[1].confidence, Confidence::Low);
    }

    #[test]
    fn unchanged_dates_produce_nothing() {
        let original = draft(vec![("2026-03-31T19:00:00Z", Some("2026-03-31T22:00:00Z"))]);
        assert!(classify(&original, &normalize(&original).draft).is_empty());
    }

    #[test]
    fn reversal_property_over_a_grid() {
        // Every reversed pair shifts by exactly a day; only small-hour ends
        // with short corrected durations are high confidence.
        let start = dt("2026-05-10T22:30:00Z");
        for end_hour in 0..22u32 {
            let end_str = format!("2026-05-10T{:02}:00:00Z", end_hour);
            let end = dt(&end_str);
            let original = draft(vec![("2026-05-10T22:30:00Z", Some(end_str.as_str()))]);
            let normalized = normalize(&original).draft;

            assert_eq!(
                normalized.schedule.ranges()[0].end,
                Some(end + Duration::hours(24))
            );

            let expected_high = end_hour < 4 && (end + Duration::hours(24) - start) < Duration::hours(7);
            let warning = &classify(&original, &normalized)[0];
            assert_eq!(
                warning.confidence == Confidence::High,
                expected_high,
                "end hour {}",
                end_hour
            );
        }
    }

    #[test]
    fn missing_description_forces_review() {
        let mut d = draft(vec![("2026-03-31T19:00:00Z", None)]);
        d.description = None;
        let warnings = quality_warnings(&d, now(), 730);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, codes::MISSING_DESCRIPTION);
        assert!(requires_review(&warnings));
    }

    #[test]
    fn far_future_forces_review() {
        let d = draft(vec![("2029-01-01T19:00:00Z", None)]);
        let warnings = Validator::new(730).validate(&d, &d, now());
        assert!(warnings.iter().any(|w| w.code == codes::TOO_FAR_FUTURE));
    }
}
