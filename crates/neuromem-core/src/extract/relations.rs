//! Relation extraction - Regex pattern families over encoded content
//!
//! Three families: causal, comparative and sequential, each with English
//! and Vietnamese cue phrases. A match yields the spans on both sides of
//! the cue plus a confidence derived from cue strength.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::graph::SynapseType;

// ============================================================================
// TYPES
// ============================================================================

/// A relation recognized between two spans of the source text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationCandidate {
    /// Text left of the cue (trimmed)
    pub source_span: String,
    /// Text right of the cue (trimmed)
    pub target_span: String,
    /// The synapse type this relation maps to
    pub synapse_type: SynapseType,
    /// Cue confidence in [0, 1]
    pub confidence: f64,
}

struct CuePattern {
    regex: &'static LazyLock<Regex>,
    synapse_type: SynapseType,
    confidence: f64,
    /// When true, the grammatical object is the cause/precedent and the
    /// relation reads target → source
    swap: bool,
}

// ============================================================================
// PATTERNS
// ============================================================================

// Causal family. "X because Y" means Y caused X.
static BECAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.{3,}?)\s+(?:because(?:\s+of)?|due to|bởi vì|tại vì|vì)\s+(.{3,})$")
        .expect("static pattern compiles")
});
static LEADS_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.{3,}?)\s*(?:,\s*)?(?:so|therefore|as a result|leads to|led to|nên|cho nên|dẫn đến)\s+(.{3,})$")
        .expect("static pattern compiles")
});
static ENABLES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.{3,}?)\s+(?:enables?|allows?|giúp)\s+(.{3,})$")
        .expect("static pattern compiles")
});
static PREVENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.{3,}?)\s+(?:prevents?|blocks?|ngăn|chặn)\s+(.{3,})$")
        .expect("static pattern compiles")
});

// Comparative family
static SIMILAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.{3,}?)\s+(?:is\s+)?(?:similar to|like|same as|giống như|giống)\s+(.{3,})$")
        .expect("static pattern compiles")
});
static BETTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.{3,}?)\s+(?:is\s+)?(?:better than|worse than|faster than|slower than|tốt hơn|kém hơn|nhanh hơn)\s+(.{3,})$")
        .expect("static pattern compiles")
});

// Sequential family. "X after Y" means Y came first.
static BEFORE_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.{3,}?)\s+(?:before|and then|then|trước khi|rồi)\s+(.{3,})$")
        .expect("static pattern compiles")
});
static AFTER_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.{3,}?)\s+(?:after|once|sau khi)\s+(.{3,})$")
        .expect("static pattern compiles")
});

static PATTERNS: &[CuePattern] = &[
    CuePattern {
        regex: &BECAUSE,
        synapse_type: SynapseType::CausedBy,
        confidence: 0.9,
        swap: false,
    },
    CuePattern {
        regex: &LEADS_TO,
        synapse_type: SynapseType::LeadsTo,
        confidence: 0.8,
        swap: false,
    },
    CuePattern {
        regex: &ENABLES,
        synapse_type: SynapseType::Enables,
        confidence: 0.7,
        swap: false,
    },
    CuePattern {
        regex: &PREVENTS,
        synapse_type: SynapseType::Prevents,
        confidence: 0.7,
        swap: false,
    },
    CuePattern {
        regex: &BETTER,
        synapse_type: SynapseType::Contradicts,
        confidence: 0.6,
        swap: false,
    },
    CuePattern {
        regex: &SIMILAR,
        synapse_type: SynapseType::SimilarTo,
        confidence: 0.7,
        swap: false,
    },
    CuePattern {
        regex: &BEFORE_CUE,
        synapse_type: SynapseType::Before,
        confidence: 0.75,
        swap: false,
    },
    CuePattern {
        regex: &AFTER_CUE,
        synapse_type: SynapseType::After,
        confidence: 0.75,
        swap: false,
    },
];

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Regex relation extractor over sentences
#[derive(Debug, Default)]
pub struct RelationExtractor;

impl RelationExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract relation candidates from `text`. Sentences are scanned
    /// independently; the first matching cue per family wins per sentence.
    /// Never fails; pathological input yields no candidates.
    pub fn extract(&self, text: &str) -> Vec<RelationCandidate> {
        let mut out = Vec::new();
        for sentence in split_sentences(text) {
            for pattern in PATTERNS {
                let Some(caps) = pattern.regex.captures(sentence) else {
                    continue;
                };
                let left = caps[1].trim().to_string();
                let right = caps[2].trim().to_string();
                if left.is_empty() || right.is_empty() {
                    continue;
                }
                let (source_span, target_span) = if pattern.swap {
                    (right, left)
                } else {
                    (left, right)
                };
                out.push(RelationCandidate {
                    source_span,
                    target_span,
                    synapse_type: pattern.synapse_type,
                    confidence: pattern.confidence,
                });
                // One relation per sentence keeps candidates unambiguous
                break;
            }
        }
        out
    }
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ============================================================================
// TESTS
// ============================================================================
