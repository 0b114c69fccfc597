//! Activation engine - Spreading, trail conduction and stabilization
//!
//! A retrieval loads the relevant neighborhood of the graph into an
//! [`ActivationGraph`] working set, then runs pure in-memory passes over
//! it: reflex conduction along fiber pathways, a classic spreading
//! discovery pass, Hebbian co-activation binding, lateral inhibition and
//! a stabilization loop. Nothing here touches the store.

mod spread;
mod stabilize;
mod trail;

pub use spread::{classic_spread, SpreadParams};
pub use stabilize::{stabilize, StabilizeOutcome};
pub use trail::{trail_activation, TrailParams};

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::graph::{Fiber, Neuron, NeuronState, Synapse};

// ============================================================================
// SIGMOID GATING
// ============================================================================

/// Map a raw accumulated signal onto [0, 1].
///
/// Every activation assignment passes through this transform; direct
/// reinforcement is the only path that sets levels explicitly.
pub fn sigmoid(raw: f64, steepness: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (raw - 0.5)).exp())
}

// ============================================================================
// WORKING SET
// ============================================================================

/// A resolved anchor seeding activation
#[derive(Debug, Clone)]
pub struct Anchor {
    /// Neuron the query matched
    pub neuron_id: String,
    /// Seed weight (type base weight, possibly damped by fuzzy matching)
    pub weight: f64,
}

/// The in-memory neighborhood a retrieval operates on
#[derive(Debug, Default)]
pub struct ActivationGraph {
    /// Neurons by id
    pub neurons: HashMap<String, Neuron>,
    /// States by neuron id (absent rows behave as fresh states)
    pub states: HashMap<String, NeuronState>,
    /// Edges in load order
    pub synapses: Vec<Synapse>,
    /// neuron id → indexes into `synapses` touching it
    pub adjacency: HashMap<String, Vec<usize>>,
    /// Candidate fibers (members of the anchor neighborhood)
    pub fibers: Vec<Fiber>,
}

impl ActivationGraph {
    /// Index an edge set for traversal
    pub fn index_synapses(&mut self) {
        self.adjacency.clear();
        for (i, synapse) in self.synapses.iter().enumerate() {
            self.adjacency
                .entry(synapse.source_id.clone())
                .or_default()
                .push(i);
            self.adjacency
                .entry(synapse.target_id.clone())
                .or_default()
                .push(i);
        }
    }

    /// Strongest edge between two neurons, if any
    pub fn edge_between(&self, a: &str, b: &str) -> Option<&Synapse> {
        self.adjacency.get(a).and_then(|indexes| {
            indexes
                .iter()
                .map(|&i| &self.synapses[i])
                .filter(|s| {
                    (s.source_id == a && s.target_id == b) || (s.source_id == b && s.target_id == a)
                })
                .max_by(|x, y| {
                    x.weight
                        .partial_cmp(&y.weight)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        })
    }

    /// Whether a neuron may fire at `now` (outside its refractory window)
    pub fn can_fire(&self, neuron_id: &str, now: DateTime<Utc>) -> bool {
        self.states
            .get(neuron_id)
            .map(|s| !s.is_refractory(now))
            .unwrap_or(true)
    }
}

// ============================================================================
// ACTIVATION MAP
// ============================================================================

/// Accumulated activation for one neuron during a retrieval
#[derive(Debug, Clone, Default)]
pub struct NodeScore {
    /// Raw accumulated signal (pre-sigmoid)
    pub raw: f64,
    /// Anchors (by index) whose signal reached this neuron
    pub anchor_sources: BTreeSet<usize>,
    /// How many times signal arrived here this retrieval
    pub co_fire_count: u32,
}

/// Activation accumulated per neuron id
pub type ActivationMap = HashMap<String, NodeScore>;

/// Merge `discovery` into `base`, scaling the discovery contribution.
/// Reflex results stay ranked above what BFS discovery adds.
pub fn merge_scaled(base: &mut ActivationMap, discovery: ActivationMap, scale: f64) {
    for (id, incoming) in discovery {
        let entry = base.entry(id).or_default();
        entry.raw += incoming.raw * scale;
        entry.anchor_sources.extend(incoming.anchor_sources);
        entry.co_fire_count += incoming.co_fire_count;
    }
}

/// Hebbian binding boost: neurons reached from two or more distinct
/// anchors gain `co_fire_count / anchor_count` on their raw score.
pub fn apply_binding_boost(map: &mut ActivationMap, anchor_count: usize) {
    if anchor_count == 0 {
        return;
    }
    for score in map.values_mut() {
        if score.anchor_sources.len() >= 2 {
            score.raw += f64::from(score.co_fire_count) / anchor_count as f64;
        }
    }
}

/// Lateral inhibition: the top `k` neurons keep their score, everyone
/// else is scaled by `factor`.
pub fn lateral_inhibition(map: &mut ActivationMap, k: usize, factor: f64) {
    if map.len() <= k {
        return;
    }
    let mut ranked: Vec<(String, f64)> = map
        .iter()
        .map(|(id, score)| (id.clone(), score.raw))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let winners: BTreeSet<&String> = ranked.iter().take(k).map(|(id, _)| id).collect();
    for (id, score) in map.iter_mut() {
        if !winners.contains(id) {
            score.raw *= factor;
        }
    }
}

/// Linear time factor for trail conduction: full strength when fresh,
/// linear falloff over one week, floored at 0.1.
pub fn time_factor(last_used: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - last_used).num_minutes() as f64 / 60.0;
    (1.0 - age_hours / 168.0).max(0.1)
}

/// Refractory bookkeeping after a neuron fires
pub fn enter_refractory(state: &mut NeuronState, now: DateTime<Utc>) {
    state.refractory_until = Some(now + Duration::milliseconds(i64::from(state.refractory_period_ms)));
    state.last_activated = Some(now);
    state.access_frequency = state.access_frequency.saturating_add(1);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryType, NeuronType, SynapseType};

    #[test]
    fn test_sigmoid_shape() {
        // Midpoint maps to one half
        assert!((sigmoid(0.5, 6.0) - 0.5).abs() < 1e-9);
        // Monotone, saturating
        assert!(sigmoid(0.9, 6.0) > sigmoid(0.5, 6.0));
        assert!(sigmoid(0.0, 6.0) < 0.1);
        assert!(sigmoid(2.0, 6.0) > 0.99);
        // Steeper gate separates harder
        assert!(sigmoid(0.7, 12.0) > sigmoid(0.7, 6.0));
    }

    #[test]
    fn test_time_factor_window() {
        let now = Utc::now();
        assert!((time_factor(now, now) - 1.0).abs() < 1e-6);
        let half = time_factor(now - Duration::hours(84), now);
        assert!((half - 0.5).abs() < 1e-2);
        // Beyond one week, the floor holds
        assert_eq!(time_factor(now - Duration::days(30), now), 0.1);
    }

    #[test]
    fn test_binding_boost_needs_two_anchors() {
        let mut map = ActivationMap::new();
        map.insert(
            "single".into(),
            NodeScore {
                raw: 0.5,
                anchor_sources: [0].into_iter().collect(),
                co_fire_count: 3,
            },
        );
        map.insert(
            "bound".into(),
            NodeScore {
                raw: 0.5,
                anchor_sources: [0, 1].into_iter().collect(),
                co_fire_count: 4,
            },
        );
        apply_binding_boost(&mut map, 2);
        assert_eq!(map["single"].raw, 0.5);
        assert!((map["bound"].raw - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_lateral_inhibition_keeps_top_k() {
        let mut map = ActivationMap::new();
        for (i, raw) in [0.9, 0.8, 0.3, 0.2].iter().enumerate() {
            map.insert(
                format!("n-{i}"),
                NodeScore {
                    raw: *raw,
                    ..Default::default()
                },
            );
        }
        lateral_inhibition(&mut map, 2, 0.7);
        assert_eq!(map["n-0"].raw, 0.9);
        assert_eq!(map["n-1"].raw, 0.8);
        assert!((map["n-2"].raw - 0.21).abs() < 1e-9);
        assert!((map["n-3"].raw - 0.14).abs() < 1e-9);
    }

    #[test]
    fn test_edge_between_picks_strongest() {
        let mut graph = ActivationGraph::default();
        graph.neurons.insert(
            "a".into(),
            Neuron::new(NeuronType::Entity, "a"),
        );
        graph
            .synapses
            .push(Synapse::new("a", "b", SynapseType::CoOccurs, 0.4));
        graph
            .synapses
            .push(Synapse::new("b", "a", SynapseType::RelatedTo, 0.7));
        graph.index_synapses();

        let edge = graph.edge_between("a", "b").unwrap();
        assert_eq!(edge.weight, 0.7);
        assert!(graph.edge_between("a", "zzz").is_none());
        // Unused fiber list is fine
        let _ = Fiber::new("a", MemoryType::Fact);
    }
}
