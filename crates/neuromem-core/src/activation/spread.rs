//! Classic spreading activation - Priority-ordered BFS from anchors
//!
//! Signal leaves each anchor at its seed weight and attenuates through
//! every edge by `weight * (1 - decay)`. Neurons accumulate signal from
//! all anchors; candidates falling below the activation threshold are
//! pruned, and a global queue cap bounds pathological graphs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::{ActivationGraph, ActivationMap, Anchor, NodeScore};

// ============================================================================
// PARAMETERS
// ============================================================================

/// Tuning for one spreading pass
#[derive(Debug, Clone, Copy)]
pub struct SpreadParams {
    /// Per-hop decay applied on every conduction
    pub decay_rate: f64,
    /// Candidates below this raw activation are pruned
    pub activation_threshold: f64,
    /// Maximum hops from any anchor
    pub max_hops: u32,
    /// Global safety cap on queue entries
    pub queue_cap: usize,
}

// ============================================================================
// QUEUE ENTRY
// ============================================================================

/// Pending conduction. Ordered by descending activation, then by greater
/// edge weight, older edge use, and finally lexicographic target id, so
/// traversal order (and therefore tie-breaking) is fully deterministic.
#[derive(Debug, Clone)]
struct Pending {
    activation: f64,
    edge_weight: f64,
    edge_last_activated: Option<DateTime<Utc>>,
    target_id: String,
    anchor_index: usize,
    hop: u32,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Pending {}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.activation
            .partial_cmp(&other.activation)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                self.edge_weight
                    .partial_cmp(&other.edge_weight)
                    .unwrap_or(Ordering::Equal)
            })
            // Older edges win ties: reverse the timestamp ordering
            .then_with(|| match (self.edge_last_activated, other.edge_last_activated) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => b.cmp(&a),
            })
            .then_with(|| other.target_id.cmp(&self.target_id))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// SPREAD
// ============================================================================

/// Run classic spreading activation over the working set.
///
/// Returns the accumulated activation map and whether the pass completed
/// (false when the deadline cut it short).
pub fn classic_spread(
    graph: &ActivationGraph,
    anchors: &[Anchor],
    params: &SpreadParams,
    now: DateTime<Utc>,
    deadline: Option<Instant>,
) -> (ActivationMap, bool) {
    let mut map = ActivationMap::new();
    let mut queue: BinaryHeap<Pending> = BinaryHeap::new();
    let mut enqueued = 0usize;

    for (anchor_index, anchor) in anchors.iter().enumerate() {
        if !graph.can_fire(&anchor.neuron_id, now) {
            continue;
        }
        let score = map.entry(anchor.neuron_id.clone()).or_default();
        score.raw += anchor.weight;
        score.anchor_sources.insert(anchor_index);
        score.co_fire_count += 1;
        queue.push(Pending {
            activation: anchor.weight,
            edge_weight: 1.0,
            edge_last_activated: None,
            target_id: anchor.neuron_id.clone(),
            anchor_index,
            hop: 0,
        });
        enqueued += 1;
    }

    let mut complete = true;
    while let Some(pending) = queue.pop() {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                complete = false;
                break;
            }
        }
        if pending.hop >= params.max_hops {
            continue;
        }

        let Some(edges) = graph.adjacency.get(&pending.target_id) else {
            continue;
        };
        for &edge_index in edges {
            let synapse = &graph.synapses[edge_index];
            let Some(next_id) = synapse.conducts_to(&pending.target_id) else {
                continue;
            };
            if !graph.can_fire(next_id, now) {
                continue;
            }

            let candidate = pending.activation * synapse.weight * (1.0 - params.decay_rate);
            if candidate < params.activation_threshold {
                continue;
            }
            if enqueued >= params.queue_cap {
                complete = false;
                queue.clear();
                break;
            }

            let score = map.entry(next_id.to_string()).or_default();
            score.raw += candidate;
            score.anchor_sources.insert(pending.anchor_index);
            score.co_fire_count += 1;

            queue.push(Pending {
                activation: candidate,
                edge_weight: synapse.weight,
                edge_last_activated: synapse.last_activated,
                target_id: next_id.to_string(),
                anchor_index: pending.anchor_index,
                hop: pending.hop + 1,
            });
            enqueued += 1;
        }
    }

    (map, complete)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Neuron, NeuronType, Synapse, SynapseType};

    fn params() -> SpreadParams {
        SpreadParams {
            decay_rate: 0.1,
            activation_threshold: 0.05,
            max_hops: 4,
            queue_cap: 50_000,
        }
    }

    fn line_graph(weights: &[f64]) -> ActivationGraph {
        // n0 -> n1 -> n2 ... with the given weights
        let mut graph = ActivationGraph::default();
        for i in 0..=weights.len() {
            let id = format!("n{i}");
            let mut n = Neuron::new(NeuronType::Concept, &id);
            n.id = id.clone();
            graph.neurons.insert(id, n);
        }
        for (i, w) in weights.iter().enumerate() {
            graph.synapses.push(Synapse::new(
                format!("n{i}"),
                format!("n{}", i + 1),
                SynapseType::LeadsTo,
                *w,
            ));
        }
        graph.index_synapses();
        graph
    }

    fn anchor(id: &str, weight: f64) -> Anchor {
        Anchor {
            neuron_id: id.to_string(),
            weight,
        }
    }

    #[test]
    fn test_signal_attenuates_per_hop() {
        let graph = line_graph(&[0.8, 0.8, 0.8]);
        let (map, complete) =
            classic_spread(&graph, &[anchor("n0", 1.0)], &params(), Utc::now(), None);
        assert!(complete);

        let a1 = map["n1"].raw;
        let a2 = map["n2"].raw;
        assert!((a1 - 0.8 * 0.9).abs() < 1e-9);
        assert!((a2 - a1 * 0.8 * 0.9).abs() < 1e-9);
        assert!(a1 > a2);
    }

    #[test]
    fn test_threshold_prunes_weak_signal() {
        // Three weak links: signal dies before the end of the line
        let graph = line_graph(&[0.3, 0.3, 0.3]);
        let (map, _) =
            classic_spread(&graph, &[anchor("n0", 1.0)], &params(), Utc::now(), None);
        assert!(map.contains_key("n1"));
        assert!(!map.contains_key("n3"));
    }

    #[test]
    fn test_hop_limit() {
        let graph = line_graph(&[0.9, 0.9, 0.9, 0.9, 0.9, 0.9]);
        let mut p = params();
        p.max_hops = 2;
        let (map, _) = classic_spread(&graph, &[anchor("n0", 1.0)], &p, Utc::now(), None);
        assert!(map.contains_key("n2"));
        assert!(!map.contains_key("n3"));
    }

    #[test]
    fn test_accumulation_from_two_anchors() {
        // n0 -> shared <- n2
        let mut graph = ActivationGraph::default();
        for id in ["n0", "shared", "n2"] {
            let mut n = Neuron::new(NeuronType::Concept, id);
            n.id = id.to_string();
            graph.neurons.insert(id.to_string(), n);
        }
        graph
            .synapses
            .push(Synapse::new("n0", "shared", SynapseType::LeadsTo, 0.8));
        graph
            .synapses
            .push(Synapse::new("n2", "shared", SynapseType::LeadsTo, 0.8));
        graph.index_synapses();

        let (map, _) = classic_spread(
            &graph,
            &[anchor("n0", 1.0), anchor("n2", 0.8)],
            &params(),
            Utc::now(),
            None,
        );
        let shared = &map["shared"];
        assert_eq!(shared.anchor_sources.len(), 2);
        assert_eq!(shared.co_fire_count, 2);
        assert!((shared.raw - (1.0 * 0.72 + 0.8 * 0.72)).abs() < 1e-9);
    }

    #[test]
    fn test_refractory_neurons_are_skipped() {
        let mut graph = line_graph(&[0.8]);
        let now = Utc::now();
        let mut state = crate::graph::NeuronState::new("n1", 0.02);
        state.refractory_until = Some(now + chrono::Duration::milliseconds(500));
        graph.states.insert("n1".into(), state);

        let (map, _) = classic_spread(&graph, &[anchor("n0", 1.0)], &params(), now, None);
        assert!(!map.contains_key("n1"));
    }

    #[test]
    fn test_unidirectional_edges_do_not_conduct_backwards() {
        let graph = line_graph(&[0.8]);
        let (map, _) = classic_spread(&graph, &[anchor("n1", 1.0)], &params(), Utc::now(), None);
        // LeadsTo is unidirectional; nothing flows n1 -> n0
        assert!(!map.contains_key("n0"));
    }

    #[test]
    fn test_queue_cap_degrades_gracefully() {
        let graph = line_graph(&[0.9, 0.9, 0.9]);
        let mut p = params();
        p.queue_cap = 1;
        let (map, complete) =
            classic_spread(&graph, &[anchor("n0", 1.0)], &p, Utc::now(), None);
        assert!(!complete);
        // The anchor itself is still scored
        assert!(map.contains_key("n0"));
    }
}
