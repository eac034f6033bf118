// 🔍 Fuzzy Matcher - resolve human-entered names against canonical labels
//
// Similarity is the normalized Levenshtein score of the lower-cased,
// whitespace-collapsed strings: "jon doe" lands close to "john doe" while
// "jane doe" does not.

use serde::{Deserialize, Serialize};

/// Minimum score (exclusive) accepted as a confident match
pub const CONFIDENCE_THRESHOLD: f64 = 0.75;

// ============================================================================
// MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Position of the best candidate in the input sequence
    pub index: usize,

    /// Similarity score (0.0 - 1.0)
    pub score: f64,
}

// ============================================================================
// MATCHER
// ============================================================================

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    /// Scores at or below this are not confident (default: 0.75)
    pub threshold: f64,
}

impl FuzzyMatcher {
    pub fn new() -> Self {
        FuzzyMatcher {
            threshold: CONFIDENCE_THRESHOLD,
        }
    }

    /// Similarity in [0, 1]; 1.0 for strings equal after normalization
    pub fn similarity(a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(&normalize(a), &normalize(b))
    }

    /// Highest-scoring candidate; ties keep the earliest. None when empty.
    pub fn best_match<S: AsRef<str>>(&self, query: &str, candidates: &[S]) -> Option<MatchResult> {
        candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| MatchResult {
                index,
                score: Self::similarity(query, candidate.as_ref()),
            })
            .fold(None, |best: Option<MatchResult>, current| match best {
                Some(b) if b.score >= current.score => Some(b),
                _ => Some(current),
            })
    }

    /// Best candidate only if it clears the threshold
    pub fn confident_match<S: AsRef<str>>(&self, query: &str, candidates: &[S]) -> Option<MatchResult> {
        self.best_match(query, candidates)
            .filter(|m| m.score > self.threshold)
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_after_normalization() {
        assert_eq!(FuzzyMatcher::similarity("John  Doe", " john doe "), 1.0);
    }

    #[test]
    fn test_spelling_noise_is_confident() {
        let score = FuzzyMatcher::similarity("Jon Doe", "John Doe");
        assert!(score > CONFIDENCE_THRESHOLD, "score was {}", score);
    }

    #[test]
    fn test_near_miss_labels_are_confident() {
        assert!(FuzzyMatcher::similarity("Educaton", "Education") > CONFIDENCE_THRESHOLD);
        assert!(FuzzyMatcher::similarity("persnal", "Personal") > CONFIDENCE_THRESHOLD);
        assert!(FuzzyMatcher::similarity("Jane Smith", "John Doe") < 0.5);
    }

    #[test]
    fn test_different_first_name_is_not_confident() {
        let score = FuzzyMatcher::similarity("Jane Doe", "John Doe");
        assert!(score <= CONFIDENCE_THRESHOLD, "score was {}", score);
    }

    #[test]
    fn test_unrelated_strings_score_zero() {
        assert_eq!(FuzzyMatcher::similarity("home", "auto"), 0.0);
        assert_eq!(FuzzyMatcher::similarity("a", "b"), 0.0);
    }

    #[test]
    fn test_best_match_picks_highest() {
        let matcher = FuzzyMatcher::new();
        let candidates = ["Home", "Auto", "Personal"];

        let m = matcher.best_match("home", &candidates).unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(m.score, 1.0);

        let m = matcher.best_match("persnal", &candidates).unwrap();
        assert_eq!(m.index, 2);
    }

    #[test]
    fn test_best_match_empty_candidates() {
        let matcher = FuzzyMatcher::new();
        let candidates: Vec<String> = Vec::new();
        assert!(matcher.best_match("John Doe", &candidates).is_none());
    }

    #[test]
    fn test_best_match_returns_weak_candidate_but_confident_match_does_not() {
        let matcher = FuzzyMatcher::new();
        let candidates = ["Jane Doe", "Mary Major"];

        let weak = matcher.best_match("John Doe", &candidates).unwrap();
        assert_eq!(weak.index, 0);
        assert!(matcher.confident_match("John Doe", &candidates).is_none());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let matcher = FuzzyMatcher { threshold: 1.0 };
        assert!(matcher.confident_match("home", &["home"]).is_none());
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let matcher = FuzzyMatcher::new();
        let m = matcher.best_match("home", &["Home", "home"]).unwrap();
        assert_eq!(m.index, 0);
    }
}
