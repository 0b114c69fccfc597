//! Neuron - The atomic information unit of the memory graph
//!
//! A neuron is an immutable identity: a typed piece of content that stays
//! stable for the lifetime of a brain. Everything that changes over time
//! (activation, access counts, refractory windows) lives in [`NeuronState`],
//! keyed by the neuron id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// NEURON TYPES
// ============================================================================

/// Types of neurons in the memory graph
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NeuronType {
    /// A point or span in time ("last Tuesday", "2024-03-01")
    Time,
    /// A place or spatial reference ("coffee shop", "office")
    Spatial,
    /// A named entity (people, systems, products)
    Entity,
    /// A verb-like unit (what was done or suggested)
    Action,
    /// A condition or observed state
    State,
    /// An abstract concept or topic
    #[default]
    Concept,
    /// A sensory detail (sound, sight, smell)
    Sensory,
    /// A goal or intent expressed in the memory
    Intent,
}

impl NeuronType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NeuronType::Time => "time",
            NeuronType::Spatial => "spatial",
            NeuronType::Entity => "entity",
            NeuronType::Action => "action",
            NeuronType::State => "state",
            NeuronType::Concept => "concept",
            NeuronType::Sensory => "sensory",
            NeuronType::Intent => "intent",
        }
    }

    /// Parse from string name; unknown names fall back to Concept
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "time" => NeuronType::Time,
            "spatial" => NeuronType::Spatial,
            "entity" => NeuronType::Entity,
            "action" => NeuronType::Action,
            "state" => NeuronType::State,
            "concept" => NeuronType::Concept,
            "sensory" => NeuronType::Sensory,
            "intent" => NeuronType::Intent,
            _ => NeuronType::Concept,
        }
    }

    /// Base anchor weight used when a query matches a neuron of this type.
    ///
    /// Temporal anchors dominate, entities are strong, actions moderate,
    /// concepts weak. Everything else gets a conservative floor.
    pub fn anchor_weight(&self) -> f64 {
        match self {
            NeuronType::Time => 1.0,
            NeuronType::Entity => 0.8,
            NeuronType::Action => 0.6,
            NeuronType::Concept => 0.4,
            NeuronType::Spatial | NeuronType::State | NeuronType::Sensory | NeuronType::Intent => {
                0.3
            }
        }
    }
}

impl std::fmt::Display for NeuronType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// NEURON
// ============================================================================

/// An immutable node of the memory graph.
///
/// Two neurons with equal `(neuron_type, canonical content)` share an id
/// within a brain; the store enforces this with a unique index and an
/// idempotent insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Neuron {
    /// Unique identifier, stable for the brain's lifetime
    pub id: String,
    /// What kind of information this neuron carries
    pub neuron_type: NeuronType,
    /// Display content, as extracted from the source text
    pub content: String,
    /// Free-form metadata. Known flag keys: `_disputed`, `_superseded`.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// 64-bit SimHash of the originating content, for near-duplicate lookup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<u64>,
    /// When the neuron was created
    pub created_at: DateTime<Utc>,
}

impl Neuron {
    /// Create a neuron with a fresh id
    pub fn new(neuron_type: NeuronType, content: impl Into<String>) -> Self {
        Self {
            id: format!("n-{}", uuid::Uuid::new_v4()),
            neuron_type,
            content: content.into(),
            metadata: serde_json::Map::new(),
            content_hash: None,
            created_at: Utc::now(),
        }
    }

    /// Canonical form of the content: lowercased, whitespace-collapsed.
    /// The `(type, canonical)` pair is the dedup key.
    pub fn canonical_content(&self) -> String {
        canonicalize(&self.content)
    }

    /// True if a metadata flag is set to `true`
    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether this neuron carries disputed content
    pub fn is_disputed(&self) -> bool {
        self.flag("_disputed")
    }

    /// Whether this neuron's content has been superseded by a newer memory
    pub fn is_superseded(&self) -> bool {
        self.flag("_superseded")
    }
}

/// Canonicalize content for identity comparison
pub fn canonicalize(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// NEURON STATE
// ============================================================================

/// Mutable per-neuron activation and lifecycle state.
///
/// One-to-one with [`Neuron`], stored separately so identity rows never
/// churn under activation traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeuronState {
    /// Id of the neuron this state belongs to
    pub neuron_id: String,
    /// Current activation in [0, 1]; always post-sigmoid except on direct
    /// reinforcement
    pub activation_level: f64,
    /// How many times the neuron was touched by retrievals
    pub access_frequency: u32,
    /// Last time activation was raised
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activated: Option<DateTime<Utc>>,
    /// Per-day exponential decay rate (type-aware default from the fiber's
    /// memory type)
    pub decay_rate: f64,
    /// Threshold above which the neuron is considered fired
    pub firing_threshold: f64,
    /// While set and in the future, spreading skips this neuron
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refractory_until: Option<DateTime<Utc>>,
    /// Length of the refractory window after firing
    pub refractory_period_ms: u32,
    /// Reserved for homeostatic regulation
    pub homeostatic_target: f64,
    /// When the state row was created
    pub created_at: DateTime<Utc>,
}

impl NeuronState {
    /// Fresh state for a newly created neuron
    pub fn new(neuron_id: impl Into<String>, decay_rate: f64) -> Self {
        Self {
            neuron_id: neuron_id.into(),
            activation_level: 0.0,
            access_frequency: 0,
            last_activated: None,
            decay_rate,
            firing_threshold: 0.3,
            refractory_until: None,
            refractory_period_ms: 500,
            homeostatic_target: 0.5,
            created_at: Utc::now(),
        }
    }

    /// Whether the neuron is inside its refractory window at `now`
    pub fn is_refractory(&self, now: DateTime<Utc>) -> bool {
        self.refractory_until.map(|t| t > now).unwrap_or(false)
    }

    /// Clamp activation into [0, 1]
    pub fn clamp(&mut self) {
        self.activation_level = self.activation_level.clamp(0.0, 1.0);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neuron_type_roundtrip() {
        for t in [
            NeuronType::Time,
            NeuronType::Spatial,
            NeuronType::Entity,
            NeuronType::Action,
            NeuronType::State,
            NeuronType::Concept,
            NeuronType::Sensory,
            NeuronType::Intent,
        ] {
            assert_eq!(NeuronType::parse_name(t.as_str()), t);
        }
        assert_eq!(NeuronType::parse_name("garbage"), NeuronType::Concept);
    }

    #[test]
    fn test_anchor_weight_ordering() {
        assert!(NeuronType::Time.anchor_weight() > NeuronType::Entity.anchor_weight());
        assert!(NeuronType::Entity.anchor_weight() > NeuronType::Action.anchor_weight());
        assert!(NeuronType::Action.anchor_weight() > NeuronType::Concept.anchor_weight());
    }

    #[test]
    fn test_canonical_content() {
        let n = Neuron::new(NeuronType::Entity, "  Coffee   Shop ");
        assert_eq!(n.canonical_content(), "coffee shop");
    }

    #[test]
    fn test_metadata_flags() {
        let mut n = Neuron::new(NeuronType::Entity, "PostgreSQL");
        assert!(!n.is_disputed());
        n.metadata
            .insert("_disputed".into(), serde_json::Value::Bool(true));
        assert!(n.is_disputed());
        assert!(!n.is_superseded());
    }

    #[test]
    fn test_refractory_window() {
        let now = Utc::now();
        let mut state = NeuronState::new("n-1", 0.02);
        assert!(!state.is_refractory(now));
        state.refractory_until = Some(now + chrono::Duration::milliseconds(500));
        assert!(state.is_refractory(now));
        assert!(!state.is_refractory(now + chrono::Duration::seconds(1)));
    }
}
