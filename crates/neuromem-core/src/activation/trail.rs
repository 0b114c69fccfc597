//! Reflex trail activation - Conduction along established fiber pathways
//!
//! Instead of exploring the whole neighborhood, reflex mode walks the
//! ordered pathway of each candidate fiber outward from wherever an
//! anchor enters it, forward and backward. Conduction multiplies edge
//! weight, fiber conductivity and a freshness factor, so well-worn recent
//! pathways carry signal much further than stale ones.

use chrono::{DateTime, Utc};

use super::{time_factor, ActivationGraph, ActivationMap, Anchor};

// ============================================================================
// PARAMETERS
// ============================================================================

/// Tuning for one trail pass
#[derive(Debug, Clone, Copy)]
pub struct TrailParams {
    /// Per-step decay applied on every conduction
    pub decay_rate: f64,
    /// Signal below this raw activation stops the walk
    pub activation_threshold: f64,
}

// ============================================================================
// TRAIL ACTIVATION
// ============================================================================

/// Conduct along candidate fiber pathways. Returns the activation map and
/// the ids of fibers whose pathway actually carried signal (they get a
/// conductivity bump in the deferred batch).
pub fn trail_activation(
    graph: &ActivationGraph,
    anchors: &[Anchor],
    params: &TrailParams,
    now: DateTime<Utc>,
) -> (ActivationMap, Vec<String>) {
    let mut map = ActivationMap::new();
    let mut conducted: Vec<String> = Vec::new();

    for fiber in &graph.fibers {
        let freshness = time_factor(fiber.last_conducted.unwrap_or(fiber.created_at), now);
        let mut fiber_conducted = false;

        for (anchor_index, anchor) in anchors.iter().enumerate() {
            let Some(entry_pos) = fiber.pathway.iter().position(|id| *id == anchor.neuron_id)
            else {
                continue;
            };
            if !graph.can_fire(&anchor.neuron_id, now) {
                continue;
            }

            let score = map.entry(anchor.neuron_id.clone()).or_default();
            score.raw += anchor.weight;
            score.anchor_sources.insert(anchor_index);
            score.co_fire_count += 1;
            fiber_conducted = true;

            // Walk outward in both directions from the entry point
            for direction in [1i64, -1i64] {
                let mut signal = anchor.weight;
                let mut pos = entry_pos as i64;
                loop {
                    let next = pos + direction;
                    if next < 0 || next as usize >= fiber.pathway.len() {
                        break;
                    }
                    let from = &fiber.pathway[pos as usize];
                    let to = &fiber.pathway[next as usize];
                    let edge_weight = graph
                        .edge_between(from, to)
                        .map(|s| s.weight)
                        .unwrap_or(0.0);
                    if edge_weight <= 0.0 {
                        break;
                    }

                    signal *= (1.0 - params.decay_rate)
                        * edge_weight
                        * fiber.conductivity
                        * freshness;
                    if signal < params.activation_threshold {
                        break;
                    }
                    if graph.can_fire(to, now) {
                        let score = map.entry(to.clone()).or_default();
                        score.raw += signal;
                        score.anchor_sources.insert(anchor_index);
                        score.co_fire_count += 1;
                    }
                    pos = next;
                }
            }
        }

        if fiber_conducted {
            conducted.push(fiber.id.clone());
        }
    }

    (map, conducted)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Fiber, MemoryType, Neuron, NeuronType, Synapse, SynapseType};

    fn params() -> TrailParams {
        TrailParams {
            decay_rate: 0.1,
            activation_threshold: 0.05,
        }
    }

    fn pathway_graph() -> ActivationGraph {
        // Fiber pathway: t0 -> alice -> suggested -> jwt, strong edges
        let mut graph = ActivationGraph::default();
        for id in ["t0", "alice", "suggested", "jwt"] {
            let mut n = Neuron::new(NeuronType::Concept, id);
            n.id = id.to_string();
            graph.neurons.insert(id.to_string(), n);
        }
        for (a, b) in [("t0", "alice"), ("alice", "suggested"), ("suggested", "jwt")] {
            graph
                .synapses
                .push(Synapse::new(a, b, SynapseType::CoOccurs, 0.9));
        }
        graph.index_synapses();

        let mut fiber = Fiber::new("t0", MemoryType::Fact);
        for id in ["alice", "suggested", "jwt"] {
            fiber.neuron_ids.insert(id.to_string());
            fiber.pathway.push(id.to_string());
        }
        fiber.last_conducted = Some(Utc::now());
        graph.fibers.push(fiber);
        graph
    }

    fn anchor(id: &str, weight: f64) -> Anchor {
        Anchor {
            neuron_id: id.to_string(),
            weight,
        }
    }

    #[test]
    fn test_conduction_runs_both_directions() {
        let graph = pathway_graph();
        let (map, conducted) =
            trail_activation(&graph, &[anchor("alice", 0.8)], &params(), Utc::now());

        // Forward to suggested and jwt, backward to t0
        assert!(map.contains_key("suggested"));
        assert!(map.contains_key("jwt"));
        assert!(map.contains_key("t0"));
        assert_eq!(conducted.len(), 1);

        // Signal attenuates with each step
        assert!(map["alice"].raw > map["suggested"].raw);
        assert!(map["suggested"].raw > map["jwt"].raw);
    }

    #[test]
    fn test_low_conductivity_dampens_trail() {
        let mut graph = pathway_graph();
        graph.fibers[0].conductivity = 0.1;
        let (map, _) = trail_activation(&graph, &[anchor("alice", 0.8)], &params(), Utc::now());
        // First step: 0.8 * 0.9 * 0.9 * 0.1 * ~1.0 ≈ 0.065; second dies
        assert!(map.contains_key("suggested"));
        assert!(!map.contains_key("jwt"));
    }

    #[test]
    fn test_stale_fiber_conducts_weakly() {
        let mut graph = pathway_graph();
        graph.fibers[0].last_conducted = Some(Utc::now() - chrono::Duration::days(30));
        let (fresh_map, _) = trail_activation(
            &pathway_graph(),
            &[anchor("alice", 0.8)],
            &params(),
            Utc::now(),
        );
        let (stale_map, _) =
            trail_activation(&graph, &[anchor("alice", 0.8)], &params(), Utc::now());
        assert!(stale_map["suggested"].raw < fresh_map["suggested"].raw);
    }

    #[test]
    fn test_anchor_outside_pathway_is_ignored() {
        let graph = pathway_graph();
        let (map, conducted) =
            trail_activation(&graph, &[anchor("unrelated", 1.0)], &params(), Utc::now());
        assert!(map.is_empty());
        assert!(conducted.is_empty());
    }
}
