//! Text similarity for the dedup layers
//!
//! Events are compared with trigram overlap (word-padded, like Postgres
//! `pg_trgm`), places and organizations with Jaro-Winkler on their normalized
//! names.

use std::collections::HashSet;

/// Weight of the name in an event score when both venues are known
const NAME_WEIGHT: f64 = 0.75;
/// Applied to place/organization scores when both localities are known and differ
const LOCALITY_MISMATCH_PENALTY: f64 = 0.5;

/// Word trigrams of `s`: lowercase alphanumeric words, each padded with two
/// leading spaces and one trailing space.
pub fn trigrams(s: &str) -> HashSet<String> {
    let mut grams = HashSet::new();
    let lowered = s.to_lowercase();
    for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

/// Jaccard similarity of the trigram sets, in `0.0..=1.0`
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    if left.is_empty() && right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count() as f64;
    let total = left.union(&right).count() as f64;
    shared / total
}

/// Event similarity over name and, when both sides have one, venue
pub fn event_similarity(name_a: &str, venue_a: &str, name_b: &str, venue_b: &str) -> f64 {
    let name_score = trigram_similarity(name_a, name_b);
    if venue_a.trim().is_empty() || venue_b.trim().is_empty() {
        return name_score;
    }
    NAME_WEIGHT * name_score + (1.0 - NAME_WEIGHT) * trigram_similarity(venue_a, venue_b)
}

/// Place/organization similarity on already-normalized names
pub fn entity_similarity(
    name_a: &str,
    locality_a: Option<&str>,
    name_b: &str,
    locality_b: Option<&str>,
) -> f64 {
    let score = strsim::jaro_winkler(name_a, name_b);
    match (locality_a, locality_b) {
        (Some(a), Some(b)) if !a.trim().eq_ignore_ascii_case(b.trim()) => {
            score * LOCALITY_MISMATCH_PENALTY
        }
        _ => score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigram_padding() {
        let grams = trigrams("Cat");
        let expected: HashSet<String> = ["  c", " ca", "cat", "at "].iter().map(|s| s.to_string()).collect();
        assert_eq!(grams, expected);
    }

    #[test]
    fn identical_text_scores_one() {
        assert_eq!(trigram_similarity("Jazz Night", "jazz   night"), 1.0);
    }

    #[test]
    fn unrelated_text_scores_low() {
        assert!(trigram_similarity("Jazz Night", "Pottery Workshop") < 0.1);
    }

    #[test]
    fn small_edit_stays_above_surfacing_threshold() {
        let score = event_similarity("Jazz Night at the Rex", "The Rex", "Jazz Nite at the Rex", "The Rex");
        assert!(score > 0.4 && score < 0.95, "score {}", score);
    }

    #[test]
    fn venue_ignored_when_one_side_missing() {
        assert_eq!(
            event_similarity("Jazz Night", "", "Jazz Night", "Somewhere Else"),
            1.0
        );
    }

    #[test]
    fn locality_mismatch_halves_score() {
        let same = entity_similarity("the rex", Some("Toronto"), "the rex", Some("toronto"));
        let other = entity_similarity("the rex", Some("Toronto"), "the rex", Some("Ottawa"));
        assert_eq!(same, 1.0);
        assert_eq!(other, 0.5);
    }
}
