//! Query parsing - Stimulus construction from free text
//!
//! Turns a query (or memory content) into typed mentions: entities,
//! spatial references, actions, concepts, temporal phrases and intent
//! hints. Purely lexical; capitalization, quoting, a verb lexicon and a
//! handful of prepositions do all the work.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::temporal::{TemporalExtractor, TemporalSpan};
use super::tokenizer::{is_stopword, Token, Tokenizer, UnicodeTokenizer};
use crate::graph::NeuronType;

// ============================================================================
// TYPES
// ============================================================================

/// A typed mention of something the graph may hold a neuron for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    /// The mention text as extracted
    pub text: String,
    /// The neuron type this mention maps to
    pub neuron_type: NeuronType,
}

/// Question intents recognized in queries
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    WhatIs,
    Why,
    When,
    Where,
    Who,
    How,
    Habit,
    Decision,
}

/// An anchor candidate derived from a query mention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorCandidate {
    /// Content to resolve against neuron content
    pub content: String,
    /// Expected neuron type
    pub neuron_type: NeuronType,
    /// Seed weight for spreading; temporal anchors dominate
    pub weight: f64,
}

/// Everything the retrieval pipeline needs from a query string
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Stimulus {
    /// The raw query text
    pub query: String,
    /// Entity mentions (capitalized tokens, quoted spans, acronyms)
    pub entities: Vec<String>,
    /// Content keywords after stop-word removal
    pub keywords: Vec<String>,
    /// Recognized time phrases
    pub temporal: Vec<TemporalSpan>,
    /// Question intents
    pub intents: Vec<Intent>,
    /// Anchor candidates in priority order (time first)
    pub anchors: Vec<AnchorCandidate>,
}

// ============================================================================
// LEXICONS
// ============================================================================

/// Common action verbs (base and inflected forms, English and Vietnamese)
const ACTION_VERBS: &[&str] = &[
    "add", "added", "agree", "agreed", "ask", "asked", "build", "built", "buy", "bought",
    "change", "changed", "choose", "chose", "configure", "configured", "create", "created",
    "decide", "decided", "delete", "deleted", "deploy", "deployed", "discuss", "discussed",
    "fix", "fixed", "implement", "implemented", "install", "installed", "meet", "met",
    "merge", "merged", "migrate", "migrated", "move", "moved", "release", "released",
    "remove", "removed", "rename", "renamed", "review", "reviewed", "rollback", "run",
    "schedule", "scheduled", "ship", "shipped", "suggest", "suggested", "switch", "switched",
    "test", "tested", "update", "updated", "upgrade", "upgraded", "use", "used", "write",
    "wrote",
    // Vietnamese
    "gặp", "chọn", "dùng", "sửa", "cài", "chạy", "viết", "xóa", "thêm", "đổi", "họp",
];

/// Known proper nouns mapped to their topic concept. Encoding an entity
/// from this table also wires it to the topic neuron, so topic-level
/// queries ("database choice") reach entity-level memories.
const PROPER_NOUN_TOPICS: &[(&str, &str)] = &[
    ("postgresql", "database"),
    ("postgres", "database"),
    ("mysql", "database"),
    ("sqlite", "database"),
    ("mongodb", "database"),
    ("cassandra", "database"),
    ("redis", "cache"),
    ("memcached", "cache"),
    ("jwt", "auth"),
    ("oauth", "auth"),
    ("saml", "auth"),
    ("kubernetes", "infrastructure"),
    ("docker", "infrastructure"),
    ("terraform", "infrastructure"),
    ("kafka", "messaging"),
    ("rabbitmq", "messaging"),
    ("graphql", "api"),
    ("grpc", "api"),
    ("react", "frontend"),
    ("vue", "frontend"),
];

/// Topic concept for a known proper noun, if any
pub fn topic_of(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    PROPER_NOUN_TOPICS
        .iter()
        .find(|(noun, _)| *noun == lower)
        .map(|(_, topic)| *topic)
}

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]{2,80})"|'([^']{2,80})'"#).expect("static pattern compiles"));

static SPATIAL_CUE: LazyLock<Regex> = LazyLock::new(|| {
    // "at the coffee shop", "in Hanoi", "ở văn phòng", "tại quán cà phê"
    Regex::new(r"(?i)\b(?:at|in|near|ở|tại)\s+(?:the\s+|a\s+|quán\s+)?(\p{L}[\p{L}\p{N}]*(?:\s+\p{L}[\p{L}\p{N}]*)?)")
        .expect("static pattern compiles")
});

// ============================================================================
// MENTION HARVESTING
// ============================================================================

/// Harvest typed mentions from tokenized text. Shared by the query parser
/// and the encoder so both sides canonicalize content identically.
pub fn harvest_mentions(text: &str, tokens: &[Token]) -> Vec<Mention> {
    let mut mentions: Vec<Mention> = Vec::new();
    let mut push = |text: String, neuron_type: NeuronType| {
        let canonical = text.to_lowercase();
        if canonical.is_empty() || is_stopword(&canonical) {
            return;
        }
        if !mentions
            .iter()
            .any(|m| m.text.eq_ignore_ascii_case(&text) && m.neuron_type == neuron_type)
        {
            mentions.push(Mention { text, neuron_type });
        }
    };

    // Quoted spans are entities verbatim
    for caps in QUOTED.captures_iter(text) {
        if let Some(span) = caps.get(1).or_else(|| caps.get(2)) {
            push(span.as_str().trim().to_string(), NeuronType::Entity);
        }
    }

    // Spatial prepositional phrases; stop at capitalized entity boundaries
    let mut spatial_spans: Vec<(usize, usize)> = Vec::new();
    for caps in SPATIAL_CUE.captures_iter(text) {
        if let Some(span) = caps.get(1) {
            let trimmed = trim_trailing_stopwords(span.as_str());
            if !trimmed.is_empty() {
                spatial_spans.push((span.start(), span.start() + trimmed.len()));
                push(trimmed.to_string(), NeuronType::Spatial);
            }
        }
    }

    for (i, token) in tokens.iter().enumerate() {
        let lower = token.lower();
        let in_spatial = spatial_spans
            .iter()
            .any(|&(s, e)| token.start >= s && token.end <= e);

        if ACTION_VERBS.contains(&lower.as_str()) {
            push(lower.clone(), NeuronType::Action);
            continue;
        }
        if in_spatial {
            continue;
        }
        if is_stopword(&lower) {
            continue;
        }

        // All-caps acronyms read as concepts (JWT, API, SLA)
        let is_acronym =
            token.text.len() >= 2 && token.text.chars().all(|c| c.is_ascii_uppercase());
        if is_acronym {
            push(token.text.clone(), NeuronType::Concept);
            continue;
        }

        // Capitalized tokens are entities; sentence-initial position only
        // counts when the token also appears capitalized elsewhere or is
        // not a common word
        if token.is_capitalized() {
            let sentence_initial = i == 0
                || text[..token.start]
                    .trim_end()
                    .ends_with(['.', '!', '?', ';']);
            if !sentence_initial || !is_common_sentence_starter(&lower) {
                push(token.text.clone(), NeuronType::Entity);
                continue;
            }
        }

        push(lower, NeuronType::Concept);
    }

    mentions
}

/// Words that routinely start sentences without naming anything
fn is_common_sentence_starter(lower: &str) -> bool {
    matches!(
        lower,
        "what" | "why" | "when" | "where" | "who" | "how" | "do" | "did" | "does" | "met"
            | "please" | "remember" | "note" | "yesterday" | "today" | "tomorrow" | "last"
            | "we" | "i" | "the" | "a" | "an" | "this" | "that" | "our" | "my"
    )
}

fn trim_trailing_stopwords(span: &str) -> &str {
    let mut out = span.trim();
    loop {
        let Some((head, tail)) = out.rsplit_once(' ') else {
            break;
        };
        if is_stopword(&tail.to_lowercase()) {
            out = head.trim_end();
        } else {
            break;
        }
    }
    out
}

// ============================================================================
// QUERY PARSER
// ============================================================================

/// Parses queries into [`Stimulus`] values
#[derive(Debug, Default)]
pub struct QueryParser {
    tokenizer: UnicodeTokenizer,
    temporal: TemporalExtractor,
}

impl QueryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query. Deterministic; never fails — an unparseable query
    /// yields a stimulus with no anchors.
    pub fn parse(&self, query: &str, reference: DateTime<Utc>) -> Stimulus {
        let tokens = self.tokenizer.tokenize(query);
        let temporal = self.temporal.extract(query, reference);
        let mentions = harvest_mentions(query, &tokens);
        let intents = classify_intents(query);

        let mut entities = Vec::new();
        let mut keywords = Vec::new();
        let mut anchors = Vec::new();

        // Temporal anchors first, at full priority
        for span in &temporal {
            anchors.push(AnchorCandidate {
                content: span.text.to_lowercase(),
                neuron_type: NeuronType::Time,
                weight: NeuronType::Time.anchor_weight(),
            });
        }

        for mention in &mentions {
            let overlaps_temporal = temporal
                .iter()
                .any(|t| t.text.to_lowercase().contains(&mention.text.to_lowercase()));
            if overlaps_temporal {
                continue;
            }
            match mention.neuron_type {
                NeuronType::Entity => entities.push(mention.text.clone()),
                _ => keywords.push(mention.text.to_lowercase()),
            }
            anchors.push(AnchorCandidate {
                content: mention.text.to_lowercase(),
                neuron_type: mention.neuron_type,
                weight: mention.neuron_type.anchor_weight(),
            });
        }

        // Highest-weight anchors first; content as tiebreak for determinism
        anchors.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.content.cmp(&b.content))
        });

        Stimulus {
            query: query.to_string(),
            entities,
            keywords,
            temporal,
            intents,
            anchors,
        }
    }
}

/// Classify question intents from surface shape
pub fn classify_intents(query: &str) -> Vec<Intent> {
    let q = query.to_lowercase();
    let mut intents = Vec::new();
    let mut add = |i: Intent| {
        if !intents.contains(&i) {
            intents.push(i);
        }
    };

    if q.contains("why") || q.contains("tại sao") || q.contains("vì sao") {
        add(Intent::Why);
    }
    if q.contains("when") || q.contains("khi nào") || q.contains("lúc nào") {
        add(Intent::When);
    }
    if q.contains("where") || q.contains("ở đâu") {
        add(Intent::Where);
    }
    if q.contains("who") || q.contains("ai ") {
        add(Intent::Who);
    }
    if q.starts_with("what is") || q.starts_with("what's") || q.contains("là gì") {
        add(Intent::WhatIs);
    }
    if q.contains("how") || q.contains("làm sao") || q.contains("thế nào") {
        add(Intent::How);
    }
    if q.contains("usually") || q.contains("habit") || q.contains("thường") {
        add(Intent::Habit);
    }
    if q.contains("decide") || q.contains("decision") || q.contains("quyết định") {
        add(Intent::Decision);
    }
    intents
}

// ============================================================================
// TESTS
// ============================================================================
