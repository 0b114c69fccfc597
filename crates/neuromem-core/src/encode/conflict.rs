//! Conflict detection - Contradicting predicates across memories
//!
//! Extracts `(subject, verb class, object)` tuples from content and
//! compares them against what the brain already holds. The same subject
//! asserting an incompatible object yields a contradiction: the two
//! object neurons get a Contradicts edge, both are flagged disputed, and
//! the older one is additionally flagged superseded.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// PREDICATES
// ============================================================================

/// A normalized subject-verb-object assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    /// Lowercased subject ("we", "i", or an entity)
    pub subject: String,
    /// Verb class the surface verb folds into
    pub verb_class: VerbClass,
    /// Lowercased object span
    pub object: String,
}

/// Coarse verb classes; two assertions conflict only within a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerbClass {
    /// decided to use / chose / picked / switched to
    Adopt,
    /// is / equals / lives at
    Assign,
    /// rejected / dropped / abandoned
    Reject,
}

impl VerbClass {
    /// Whether two assertions with this class pair contradict when their
    /// objects differ
    pub fn opposes(&self, other: VerbClass) -> bool {
        match (self, other) {
            // Two different adoptions of the same subject conflict
            (VerbClass::Adopt, VerbClass::Adopt) => true,
            // Assigning two different values conflicts
            (VerbClass::Assign, VerbClass::Assign) => true,
            // Adopting what was rejected (or vice versa) conflicts even
            // with the same object
            (VerbClass::Adopt, VerbClass::Reject) | (VerbClass::Reject, VerbClass::Adopt) => true,
            _ => false,
        }
    }
}

static ADOPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(we|i|team|[A-Z]\w+)\s+(?:have\s+|has\s+)?(?:decided\s+(?:to\s+)?(?:use|go\s+with|adopt)|chose|picked|selected|switched\s+to|will\s+use|quyết\s+định\s+dùng|chọn)\s+([\w.\-]+(?:\s+[\w.\-]+)?)",
    )
    .expect("static pattern compiles")
});

static ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([\w.\-]+(?:\s+[\w.\-]+)?)\s+(?:is|are|equals|là)\s+([\w.\-]+)")
        .expect("static pattern compiles")
});

static REJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(we|i|team|[A-Z]\w+)\s+(?:rejected|dropped|abandoned|stopped\s+using|bỏ)\s+([\w.\-]+(?:\s+[\w.\-]+)?)",
    )
    .expect("static pattern compiles")
});

/// Extract predicates from content. Never fails; unparseable content
/// yields an empty list.
pub fn extract_predicates(content: &str) -> Vec<Predicate> {
    let mut out = Vec::new();

    for caps in ADOPT.captures_iter(content) {
        out.push(Predicate {
            subject: caps[1].to_lowercase(),
            verb_class: VerbClass::Adopt,
            object: trim_object(&caps[2]),
        });
    }
    for caps in REJECT.captures_iter(content) {
        out.push(Predicate {
            subject: caps[1].to_lowercase(),
            verb_class: VerbClass::Reject,
            object: trim_object(&caps[2]),
        });
    }
    for caps in ASSIGN.captures_iter(content) {
        let subject = caps[1].to_lowercase();
        // Pronouns assigning adjectives are not assertions worth tracking
        if matches!(subject.as_str(), "it" | "this" | "that" | "there") {
            continue;
        }
        out.push(Predicate {
            subject,
            verb_class: VerbClass::Assign,
            object: trim_object(&caps[2]),
        });
    }

    out
}

fn trim_object(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', ',', '!', '?'])
        .to_lowercase()
}

/// Whether two predicates contradict each other
pub fn contradicts(a: &Predicate, b: &Predicate) -> bool {
    if a.subject != b.subject {
        return false;
    }
    if !a.verb_class.opposes(b.verb_class) {
        return false;
    }
    match (a.verb_class, b.verb_class) {
        // Opposite classes conflict on the SAME object
        (VerbClass::Adopt, VerbClass::Reject) | (VerbClass::Reject, VerbClass::Adopt) => {
            a.object == b.object
        }
        // Same class conflicts on DIFFERENT objects
        _ => a.object != b.object,
    }
}

// ============================================================================
// TESTS
// ============================================================================
