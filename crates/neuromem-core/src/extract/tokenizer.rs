//! Tokenizer - Word segmentation behind a trait
//!
//! The engine only needs token spans; language-specific segmentation lives
//! behind [`Tokenizer`] so callers can plug in their own. The default
//! implementation splits on Unicode word boundaries and covers English and
//! Vietnamese well enough for lexicon lookups.

use std::sync::LazyLock;

use regex::Regex;

/// A token with its byte span in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The token text as it appears in the source
    pub text: String,
    /// Byte offset of the token start
    pub start: usize,
    /// Byte offset one past the token end
    pub end: usize,
}

impl Token {
    /// Lowercased token text
    pub fn lower(&self) -> String {
        self.text.to_lowercase()
    }

    /// Whether the token starts with an uppercase letter
    pub fn is_capitalized(&self) -> bool {
        self.text.chars().next().map(char::is_uppercase).unwrap_or(false)
    }
}

/// Word segmentation interface. A tokenizer is a per-brain resource created
/// when the brain handle opens and dropped with it.
pub trait Tokenizer: Send + Sync {
    /// Split `text` into tokens with byte spans
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    // Words, keeping dots/hyphens inside identifiers (hosts, versions)
    Regex::new(r"[\p{L}\p{N}]+(?:[.\-_][\p{L}\p{N}]+)*").expect("static pattern compiles")
});

/// Default tokenizer: Unicode word matching with identifier glue
#[derive(Debug, Default, Clone, Copy)]
pub struct UnicodeTokenizer;

impl Tokenizer for UnicodeTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        WORD.find_iter(text)
            .map(|m| Token {
                text: m.as_str().to_string(),
                start: m.start(),
                end: m.end(),
            })
            .collect()
    }
}

// ============================================================================
// STOP WORDS
// ============================================================================

/// English stop words
pub const STOPWORDS_EN: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "below", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my", "no", "nor",
    "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "out", "over", "own",
    "s", "same", "she", "should", "so", "some", "such", "t", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours",
];

/// Vietnamese stop words
pub const STOPWORDS_VI: &[&str] = &[
    "và", "là", "của", "có", "được", "cho", "trong", "với", "các", "những", "một", "này", "đó",
    "khi", "đã", "sẽ", "cũng", "như", "để", "thì", "mà", "ở", "ra", "vào", "lại", "nên", "vì",
    "bởi", "rằng", "tại", "theo", "về", "trên", "dưới", "sau", "trước", "nữa", "rồi", "đây",
];

/// Whether a lowercased token is a stop word in either supported language
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS_EN.binary_search(&token).is_ok() || STOPWORDS_VI.contains(&token)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_tokens_stay_whole() {
        let toks = UnicodeTokenizer.tokenize("Database host is db.example.com");
        let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Database", "host", "is", "db.example.com"]);
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let text = "Met Alice";
        let toks = UnicodeTokenizer.tokenize(text);
        assert_eq!(&text[toks[1].start..toks[1].end], "Alice");
        assert!(toks[1].is_capitalized());
    }

    #[test]
    fn test_stopword_lists_sorted_for_binary_search() {
        let mut sorted = STOPWORDS_EN.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS_EN);
    }

    #[test]
    fn test_bilingual_stopwords() {
        assert!(is_stopword("the"));
        assert!(is_stopword("của"));
        assert!(!is_stopword("postgres"));
    }

    #[test]
    fn test_vietnamese_tokens() {
        let toks = UnicodeTokenizer.tokenize("tuần trước tôi gặp Alice");
        assert_eq!(toks.len(), 5);
        assert_eq!(toks[0].text, "tuần");
    }
}
