//! SimHash - 64-bit locality-sensitive content hashing
//!
//! Used for near-duplicate detection at encode time and fuzzy anchor
//! resolution at query time. Two texts within Hamming distance
//! [`NEAR_DUPLICATE_DISTANCE`] are treated as the same content.
//!
//! Features are whitespace tokens (dotted and hyphenated tokens stay whole,
//! so hosts, paths and identifiers survive intact), lowercased, with
//! function words removed. Each feature votes on every bit with a weight
//! equal to its character length, which lets long shared identifiers
//! dominate short paraphrase churn ("DB" vs "Database").

use std::hash::{DefaultHasher, Hash, Hasher};

/// Hamming distance at or below which two hashes count as near-duplicates
pub const NEAR_DUPLICATE_DISTANCE: u32 = 6;

/// Function words excluded from hashing in both supported languages
const HASH_STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "am", "i", "we", "you", "he",
    "she", "it", "they", "to", "of", "in", "on", "at", "for", "and", "or", "but", "with", "that",
    "this", "these", "those", "la", "là", "và", "của", "các", "những", "một", "có", "được",
];

/// Compute the 64-bit weighted SimHash of a text
pub fn simhash(text: &str) -> u64 {
    let mut votes = [0i64; 64];
    let mut any = false;

    for token in text.split_whitespace() {
        let token = token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if token.is_empty() || HASH_STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        any = true;

        let weight = token.chars().count() as i64;
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();
        for (bit, vote) in votes.iter_mut().enumerate() {
            if h & (1u64 << bit) != 0 {
                *vote += weight;
            } else {
                *vote -= weight;
            }
        }
    }

    if !any {
        return 0;
    }

    let mut out = 0u64;
    for (bit, vote) in votes.iter().enumerate() {
        if *vote > 0 {
            out |= 1u64 << bit;
        }
    }
    out
}

/// Hamming distance between two hashes
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Whether two hashes are within the near-duplicate threshold
pub fn is_near_duplicate(a: u64, b: u64) -> bool {
    hamming(a, b) <= NEAR_DUPLICATE_DISTANCE
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_identical_hash() {
        assert_eq!(
            simhash("Database host is db.example.com"),
            simhash("Database host is db.example.com")
        );
    }

    #[test]
    fn test_trailing_punctuation_ignored() {
        assert_eq!(
            simhash("deploy finished."),
            simhash("deploy finished")
        );
    }

    #[test]
    fn test_paraphrase_within_threshold() {
        // The shared long token dominates the vote on every bit, so the
        // "DB" / "Database" swap does not move the hash past the threshold
        let a = simhash("Database host is db.example.com");
        let b = simhash("DB host is db.example.com");
        assert!(
            is_near_duplicate(a, b),
            "hamming distance was {}",
            hamming(a, b)
        );
    }

    #[test]
    fn test_unrelated_content_far_apart() {
        let a = simhash("met alice coffee shop talk auth tokens");
        let b = simhash("quarterly revenue grew twelve percent berlin");
        assert!(hamming(a, b) > NEAR_DUPLICATE_DISTANCE);
    }

    #[test]
    fn test_empty_and_stopword_only() {
        assert_eq!(simhash(""), 0);
        assert_eq!(simhash("the is a of"), 0);
        assert_ne!(simhash("postgres"), 0);
    }
}
