//! Synapse - Typed, weighted edges between neurons

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard ceiling on synapse weight. Learning asymptotically approaches this
/// and never crosses it.
pub const W_MAX: f64 = 1.0;

// ============================================================================
// SYNAPSE TYPES
// ============================================================================

/// The relation a synapse encodes.
///
/// Grouped by family: temporal, spatial, causal, associative, taxonomic,
/// affective, and structural relations.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynapseType {
    // Temporal
    HappenedAt,
    Before,
    After,
    During,
    // Spatial
    AtLocation,
    Contains,
    Near,
    // Causal
    CausedBy,
    LeadsTo,
    Enables,
    Prevents,
    // Associative
    CoOccurs,
    RelatedTo,
    SimilarTo,
    Contradicts,
    // Taxonomic
    IsA,
    HasProperty,
    Involves,
    // Affective
    Felt,
    Evokes,
    // Structural / discourse
    PartOf,
    MemberOf,
    Supports,
    Opposes,
    Suggests,
    Requires,
    Produces,
    References,
    Supersedes,
}

impl SynapseType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SynapseType::HappenedAt => "happened_at",
            SynapseType::Before => "before",
            SynapseType::After => "after",
            SynapseType::During => "during",
            SynapseType::AtLocation => "at_location",
            SynapseType::Contains => "contains",
            SynapseType::Near => "near",
            SynapseType::CausedBy => "caused_by",
            SynapseType::LeadsTo => "leads_to",
            SynapseType::Enables => "enables",
            SynapseType::Prevents => "prevents",
            SynapseType::CoOccurs => "co_occurs",
            SynapseType::RelatedTo => "related_to",
            SynapseType::SimilarTo => "similar_to",
            SynapseType::Contradicts => "contradicts",
            SynapseType::IsA => "is_a",
            SynapseType::HasProperty => "has_property",
            SynapseType::Involves => "involves",
            SynapseType::Felt => "felt",
            SynapseType::Evokes => "evokes",
            SynapseType::PartOf => "part_of",
            SynapseType::MemberOf => "member_of",
            SynapseType::Supports => "supports",
            SynapseType::Opposes => "opposes",
            SynapseType::Suggests => "suggests",
            SynapseType::Requires => "requires",
            SynapseType::Produces => "produces",
            SynapseType::References => "references",
            SynapseType::Supersedes => "supersedes",
        }
    }

    /// Parse from string name; unknown names fall back to RelatedTo
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "happened_at" => SynapseType::HappenedAt,
            "before" => SynapseType::Before,
            "after" => SynapseType::After,
            "during" => SynapseType::During,
            "at_location" => SynapseType::AtLocation,
            "contains" => SynapseType::Contains,
            "near" => SynapseType::Near,
            "caused_by" => SynapseType::CausedBy,
            "leads_to" => SynapseType::LeadsTo,
            "enables" => SynapseType::Enables,
            "prevents" => SynapseType::Prevents,
            "co_occurs" => SynapseType::CoOccurs,
            "related_to" => SynapseType::RelatedTo,
            "similar_to" => SynapseType::SimilarTo,
            "contradicts" => SynapseType::Contradicts,
            "is_a" => SynapseType::IsA,
            "has_property" => SynapseType::HasProperty,
            "involves" => SynapseType::Involves,
            "felt" => SynapseType::Felt,
            "evokes" => SynapseType::Evokes,
            "part_of" => SynapseType::PartOf,
            "member_of" => SynapseType::MemberOf,
            "supports" => SynapseType::Supports,
            "opposes" => SynapseType::Opposes,
            "suggests" => SynapseType::Suggests,
            "requires" => SynapseType::Requires,
            "produces" => SynapseType::Produces,
            "references" => SynapseType::References,
            "supersedes" => SynapseType::Supersedes,
            _ => SynapseType::RelatedTo,
        }
    }

    /// Symmetric relations default to bidirectional conduction
    pub fn default_direction(&self) -> Direction {
        match self {
            SynapseType::CoOccurs
            | SynapseType::RelatedTo
            | SynapseType::SimilarTo
            | SynapseType::Contradicts
            | SynapseType::Near => Direction::Bi,
            _ => Direction::Uni,
        }
    }
}

impl std::fmt::Display for SynapseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conduction direction of a synapse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Signal flows source → target only
    #[default]
    Uni,
    /// Signal flows both ways
    Bi,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Uni => "uni",
            Direction::Bi => "bi",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "bi" => Direction::Bi,
            _ => Direction::Uni,
        }
    }
}

// ============================================================================
// SYNAPSE
// ============================================================================

/// A typed, weighted edge between two neurons.
///
/// `weight` never exceeds [`W_MAX`]; `reinforced_count` is monotonically
/// non-decreasing and `last_activated` never moves backward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synapse {
    /// Unique edge id
    pub id: String,
    /// Pre-synaptic neuron id
    pub source_id: String,
    /// Post-synaptic neuron id
    pub target_id: String,
    /// Relation type
    pub synapse_type: SynapseType,
    /// Conduction strength in [0, 1]
    pub weight: f64,
    /// Conduction direction
    pub direction: Direction,
    /// Free-form metadata. Known flag keys: `_inferred`, `_superseded`.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// How many times learning reinforced this edge
    pub reinforced_count: u32,
    /// Last time a retrieval conducted through this edge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activated: Option<DateTime<Utc>>,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

impl Synapse {
    /// Create a synapse with a fresh id and the type's default direction
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        synapse_type: SynapseType,
        weight: f64,
    ) -> Self {
        Self {
            id: format!("s-{}", uuid::Uuid::new_v4()),
            source_id: source_id.into(),
            target_id: target_id.into(),
            synapse_type,
            weight: weight.clamp(0.0, W_MAX),
            direction: synapse_type.default_direction(),
            metadata: serde_json::Map::new(),
            reinforced_count: 0,
            last_activated: None,
            created_at: Utc::now(),
        }
    }

    /// Mark this synapse as machine-inferred rather than encoded from text
    pub fn mark_inferred(mut self) -> Self {
        self.metadata
            .insert("_inferred".into(), serde_json::Value::Bool(true));
        self
    }

    /// True if a metadata flag is set to `true`
    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether this edge was created by inference rather than encoding
    pub fn is_inferred(&self) -> bool {
        self.flag("_inferred")
    }

    /// The neuron on the other end, honoring direction.
    ///
    /// Returns `None` when `from` is the target of a unidirectional edge.
    pub fn conducts_to(&self, from: &str) -> Option<&str> {
        if self.source_id == from {
            Some(&self.target_id)
        } else if self.target_id == from && self.direction == Direction::Bi {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[SynapseType] = &[
        SynapseType::HappenedAt,
        SynapseType::Before,
        SynapseType::After,
        SynapseType::During,
        SynapseType::AtLocation,
        SynapseType::Contains,
        SynapseType::Near,
        SynapseType::CausedBy,
        SynapseType::LeadsTo,
        SynapseType::Enables,
        SynapseType::Prevents,
        SynapseType::CoOccurs,
        SynapseType::RelatedTo,
        SynapseType::SimilarTo,
        SynapseType::Contradicts,
        SynapseType::IsA,
        SynapseType::HasProperty,
        SynapseType::Involves,
        SynapseType::Felt,
        SynapseType::Evokes,
        SynapseType::PartOf,
        SynapseType::MemberOf,
        SynapseType::Supports,
        SynapseType::Opposes,
        SynapseType::Suggests,
        SynapseType::Requires,
        SynapseType::Produces,
        SynapseType::References,
        SynapseType::Supersedes,
    ];

    #[test]
    fn test_synapse_type_roundtrip() {
        assert_eq!(ALL.len(), 29);
        for t in ALL {
            assert_eq!(SynapseType::parse_name(t.as_str()), *t);
        }
    }

    #[test]
    fn test_weight_clamped_on_create() {
        let s = Synapse::new("a", "b", SynapseType::CoOccurs, 1.7);
        assert_eq!(s.weight, W_MAX);
        let s = Synapse::new("a", "b", SynapseType::CoOccurs, -0.2);
        assert_eq!(s.weight, 0.0);
    }

    #[test]
    fn test_conduction_direction() {
        // CoOccurs is symmetric
        let co = Synapse::new("a", "b", SynapseType::CoOccurs, 0.5);
        assert_eq!(co.conducts_to("a"), Some("b"));
        assert_eq!(co.conducts_to("b"), Some("a"));

        // CausedBy is directed
        let caused = Synapse::new("a", "b", SynapseType::CausedBy, 0.5);
        assert_eq!(caused.conducts_to("a"), Some("b"));
        assert_eq!(caused.conducts_to("b"), None);
        assert_eq!(caused.conducts_to("c"), None);
    }

    #[test]
    fn test_inferred_marker() {
        let s = Synapse::new("a", "b", SynapseType::RelatedTo, 0.1).mark_inferred();
        assert!(s.is_inferred());
    }
}
