//! Extraction - Deterministic lexical analysis
//!
//! Everything the engine knows about text it learns here, from regexes and
//! lexicons: typed mentions, relations, sentiment, time phrases, and the
//! query stimulus. There is no model inference and no network access, and
//! extractors never fail — pathological input degrades to empty results.

mod query;
mod relations;
mod sentiment;
pub mod simhash;
mod temporal;
mod tokenizer;

pub use query::{
    classify_intents, harvest_mentions, topic_of, AnchorCandidate, Intent, Mention, QueryParser,
    Stimulus,
};
pub use relations::{RelationCandidate, RelationExtractor};
pub use sentiment::{Sentiment, SentimentExtractor, Valence};
pub use simhash::{hamming, is_near_duplicate, simhash, NEAR_DUPLICATE_DISTANCE};
pub use temporal::{TemporalExtractor, TemporalSpan};
pub use tokenizer::{is_stopword, Token, Tokenizer, UnicodeTokenizer};

use chrono::{DateTime, Utc};

/// Full lexical analysis of memory content, as consumed by the encoder
#[derive(Debug, Clone, Default)]
pub struct ContentAnalysis {
    /// Typed mentions in document order
    pub mentions: Vec<Mention>,
    /// Recognized time phrases
    pub temporal: Vec<TemporalSpan>,
    /// Relation candidates between text spans
    pub relations: Vec<RelationCandidate>,
    /// Overall sentiment of the content
    pub sentiment: Sentiment,
    /// SimHash of the whole content
    pub content_hash: u64,
}

/// Bundles the extractors behind one handle. One instance lives on each
/// brain handle next to its tokenizer.
pub struct Extractor {
    tokenizer: Box<dyn Tokenizer>,
    relations: RelationExtractor,
    sentiment: SentimentExtractor,
    temporal: TemporalExtractor,
    query: QueryParser,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::with_tokenizer(Box::new(UnicodeTokenizer))
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with a caller-supplied tokenizer
    pub fn with_tokenizer(tokenizer: Box<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            relations: RelationExtractor::new(),
            sentiment: SentimentExtractor::new(),
            temporal: TemporalExtractor::new(),
            query: QueryParser::new(),
        }
    }

    /// Analyze memory content for encoding
    pub fn analyze(&self, content: &str, reference: DateTime<Utc>) -> ContentAnalysis {
        let tokens = self.tokenizer.tokenize(content);
        ContentAnalysis {
            mentions: harvest_mentions(content, &tokens),
            temporal: self.temporal.extract(content, reference),
            relations: self.relations.extract(content),
            sentiment: self.sentiment.extract_tokens(&tokens),
            content_hash: simhash(content),
        }
    }

    /// Parse a retrieval query
    pub fn parse_query(&self, text: &str, reference: DateTime<Utc>) -> Stimulus {
        self.query.parse(text, reference)
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
