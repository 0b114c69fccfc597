//! Fiber - A coherent memory cluster
//!
//! A fiber is the "memory" as users perceive it: a set of neurons and
//! synapses produced by one encode, an ordered conduction pathway through
//! them, and bookkeeping for salience, tags and temporal validity. Fibers
//! hold id-only references; the brain owns the neurons and synapses.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// MEMORY TYPES
// ============================================================================

/// User-facing classification of a memory, driving salience, decay and
/// expiration defaults.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A discrete fact
    #[default]
    Fact,
    /// A decision taken, with above-average salience
    Decision,
    /// A task; expires quickly
    Todo,
    /// Situational context; expires within a week
    Context,
    /// A standing instruction
    Instruction,
    /// A pointer to external material
    Reference,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Decision => "decision",
            MemoryType::Todo => "todo",
            MemoryType::Context => "context",
            MemoryType::Instruction => "instruction",
            MemoryType::Reference => "reference",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fact" => MemoryType::Fact,
            "decision" => MemoryType::Decision,
            "todo" => MemoryType::Todo,
            "context" => MemoryType::Context,
            "instruction" => MemoryType::Instruction,
            "reference" => MemoryType::Reference,
            _ => MemoryType::Fact,
        }
    }

    /// Per-day decay rate applied to member neurons
    pub fn default_decay_rate(&self) -> f64 {
        match self {
            MemoryType::Fact | MemoryType::Decision | MemoryType::Instruction => 0.02,
            MemoryType::Todo => 0.15,
            MemoryType::Context => 0.10,
            MemoryType::Reference => 0.05,
        }
    }

    /// Initial fiber salience
    pub fn default_salience(&self) -> f64 {
        match self {
            MemoryType::Decision => 0.9,
            MemoryType::Todo => 0.5,
            MemoryType::Context => 0.3,
            MemoryType::Fact | MemoryType::Instruction | MemoryType::Reference => 0.6,
        }
    }

    /// How long the fiber stays valid; `None` means it never expires
    pub fn expiry(&self) -> Option<Duration> {
        match self {
            MemoryType::Todo => Some(Duration::days(30)),
            MemoryType::Context => Some(Duration::days(7)),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// FIBER
// ============================================================================

/// A cluster of neurons and synapses with an ordered conduction pathway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fiber {
    /// Unique fiber id
    pub id: String,
    /// Member neuron ids (ordered set for deterministic iteration)
    pub neuron_ids: BTreeSet<String>,
    /// Member synapse ids
    pub synapse_ids: BTreeSet<String>,
    /// The neuron a retrieval enters the fiber through; always a member
    pub anchor_neuron_id: String,
    /// Ordered conduction sequence; every id is a member neuron
    pub pathway: Vec<String>,
    /// Conduction multiplier in [0, 1]; rises with use, decays with time
    pub conductivity: f64,
    /// Last time a retrieval conducted along the pathway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_conducted: Option<DateTime<Utc>>,
    /// One-line reconstruction of the memory
    pub summary: String,
    /// Importance in [0, 1]
    pub salience: f64,
    /// Tags produced by extraction
    pub auto_tags: BTreeSet<String>,
    /// Tags supplied by the caller
    pub agent_tags: BTreeSet<String>,
    /// How many times retrievals matched this fiber
    pub frequency: u32,
    /// Start of validity window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<DateTime<Utc>>,
    /// End of validity window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<DateTime<Utc>>,
    /// Classification driving decay/salience defaults
    pub memory_type: MemoryType,
    /// When the fiber was created
    pub created_at: DateTime<Utc>,
}

impl Fiber {
    /// Create an empty fiber anchored at `anchor_neuron_id`
    pub fn new(anchor_neuron_id: impl Into<String>, memory_type: MemoryType) -> Self {
        let anchor = anchor_neuron_id.into();
        let now = Utc::now();
        let mut neuron_ids = BTreeSet::new();
        neuron_ids.insert(anchor.clone());
        Self {
            id: format!("f-{}", uuid::Uuid::new_v4()),
            neuron_ids,
            synapse_ids: BTreeSet::new(),
            anchor_neuron_id: anchor.clone(),
            pathway: vec![anchor],
            conductivity: 1.0,
            last_conducted: None,
            summary: String::new(),
            salience: memory_type.default_salience(),
            auto_tags: BTreeSet::new(),
            agent_tags: BTreeSet::new(),
            frequency: 0,
            time_start: Some(now),
            time_end: memory_type.expiry().map(|d| now + d),
            memory_type,
            created_at: now,
        }
    }

    /// All tags: auto ∪ agent
    pub fn tags(&self) -> BTreeSet<String> {
        self.auto_tags.union(&self.agent_tags).cloned().collect()
    }

    /// Whether the fiber's validity window contains `at`
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        let after_start = self.time_start.map(|t| at >= t).unwrap_or(true);
        let before_end = self.time_end.map(|t| at <= t).unwrap_or(true);
        after_start && before_end
    }

    /// Jaccard similarity of tag sets with another fiber
    pub fn tag_jaccard(&self, other: &Fiber) -> f64 {
        let a = self.tags();
        let b = other.tags();
        if a.is_empty() && b.is_empty() {
            return 0.0;
        }
        let inter = a.intersection(&b).count() as f64;
        let union = a.union(&b).count() as f64;
        inter / union
    }

    /// Structural invariant: pathway ⊆ neuron_ids and the anchor is a member.
    /// Checked by the store on save and by consolidation after merges.
    pub fn check_integrity(&self) -> bool {
        self.neuron_ids.contains(&self.anchor_neuron_id)
            && self.pathway.iter().all(|id| self.neuron_ids.contains(id))
    }

    /// Bump conductivity after a successful trail conduction
    pub fn conduct(&mut self, now: DateTime<Utc>) {
        self.conductivity = (self.conductivity + 0.02).min(1.0);
        self.last_conducted = Some(now);
        self.frequency = self.frequency.saturating_add(1);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_defaults() {
        assert_eq!(MemoryType::Decision.default_salience(), 0.9);
        assert_eq!(MemoryType::Todo.default_decay_rate(), 0.15);
        assert!(MemoryType::Fact.expiry().is_none());
        assert_eq!(MemoryType::Context.expiry(), Some(Duration::days(7)));
    }

    #[test]
    fn test_fiber_integrity() {
        let mut fiber = Fiber::new("n-anchor", MemoryType::Fact);
        assert!(fiber.check_integrity());

        fiber.pathway.push("n-stranger".to_string());
        assert!(!fiber.check_integrity());

        fiber.neuron_ids.insert("n-stranger".to_string());
        assert!(fiber.check_integrity());
    }

    #[test]
    fn test_validity_window() {
        let mut fiber = Fiber::new("n-a", MemoryType::Context);
        let now = Utc::now();
        assert!(fiber.is_valid_at(now));
        // Context memories expire after 7 days
        assert!(!fiber.is_valid_at(now + Duration::days(8)));
        fiber.time_end = None;
        assert!(fiber.is_valid_at(now + Duration::days(365)));
    }

    #[test]
    fn test_tag_jaccard() {
        let mut a = Fiber::new("n-a", MemoryType::Fact);
        let mut b = Fiber::new("n-b", MemoryType::Fact);
        a.auto_tags = ["db", "auth", "jwt"].iter().map(|s| s.to_string()).collect();
        b.auto_tags = ["db", "auth"].iter().map(|s| s.to_string()).collect();
        let j = a.tag_jaccard(&b);
        assert!((j - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_conduct_caps_at_one() {
        let mut fiber = Fiber::new("n-a", MemoryType::Fact);
        fiber.conductivity = 0.99;
        let now = Utc::now();
        fiber.conduct(now);
        fiber.conduct(now);
        assert_eq!(fiber.conductivity, 1.0);
        assert_eq!(fiber.frequency, 2);
        assert_eq!(fiber.last_conducted, Some(now));
    }
}
