//! Reconstruction - Turning a settled activation map into an answer
//!
//! Three synthesis strategies, selected by the shape of the result: a
//! single dominant neuron speaks for itself, a dominant fiber answers
//! with its summary, and anything else stitches the top contributors
//! together along the best fiber's pathway.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activation::{ActivationGraph, ActivationMap};
use crate::graph::NeuronState;

// ============================================================================
// TYPES
// ============================================================================

/// How the answer was synthesized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMethod {
    /// One neuron dominated the result
    Single,
    /// One fiber held most of the activation mass
    FiberSummary,
    /// Stitched from the top contributing neurons
    MultiNeuron,
    /// Nothing activated
    Empty,
}

/// Score components for the top-ranked neuron
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// Settled activation of the top neuron
    pub base_activation: f64,
    /// Contribution from multi-anchor co-firing
    pub intersection_boost: f64,
    /// Recency bonus, linear over 30 days
    pub freshness_boost: f64,
    /// Log-scaled access frequency bonus
    pub frequency_boost: f64,
}

/// One activated neuron in the ranked result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivatedNeuron {
    /// Neuron id
    pub id: String,
    /// Neuron content
    pub content: String,
    /// Final ranking score (activation plus boosts, after penalties)
    pub score: f64,
}

/// The synthesized answer with its provenance
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub answer: String,
    pub context: String,
    pub method: SynthesisMethod,
    pub breakdown: ScoreBreakdown,
    pub ranked: Vec<ActivatedNeuron>,
    /// Share of total activation mass held by the best fiber, with its id
    pub top_fiber: Option<(String, f64)>,
}

// ============================================================================
// SCORING
// ============================================================================

/// Recency bonus: full tenth of a point when touched now, fading linearly
/// over thirty days
pub fn freshness_boost(state: Option<&NeuronState>, now: DateTime<Utc>) -> f64 {
    let Some(last) = state.and_then(|s| s.last_activated) else {
        return 0.0;
    };
    let days = (now - last).num_hours() as f64 / 24.0;
    (1.0 - days / 30.0).max(0.0) * 0.1
}

/// Frequency bonus: log-scaled so heavy reuse saturates
pub fn frequency_boost(state: Option<&NeuronState>) -> f64 {
    let frequency = state.map(|s| s.access_frequency).unwrap_or(0);
    (1.0 + f64::from(frequency)).ln() * 0.05
}

// ============================================================================
// RECONSTRUCT
// ============================================================================

/// Build the answer from a settled activation map. `anchor_ids` are the
/// query's own matches; they rank and select fibers but never become the
/// answer themselves.
pub fn reconstruct(
    graph: &ActivationGraph,
    map: &ActivationMap,
    states: &HashMap<String, NeuronState>,
    anchor_ids: &[String],
    max_tokens: usize,
    now: DateTime<Utc>,
) -> Reconstruction {
    let total_mass: f64 = map.values().map(|s| s.raw).sum();

    // Rank every activated neuron with its boosts
    let mut ranked: Vec<(ActivatedNeuron, f64)> = map
        .iter()
        .filter_map(|(id, score)| {
            let neuron = graph.neurons.get(id)?;
            let state = states.get(id);
            let intersection = if score.anchor_sources.len() >= 2 {
                f64::from(score.co_fire_count) / score.anchor_sources.len().max(1) as f64
            } else {
                0.0
            };
            let final_score =
                score.raw + freshness_boost(state, now) + frequency_boost(state);
            Some((
                ActivatedNeuron {
                    id: id.clone(),
                    content: neuron.content.clone(),
                    score: final_score,
                },
                intersection,
            ))
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.0.score
            .partial_cmp(&a.0.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });

    if ranked.is_empty() {
        return Reconstruction {
            answer: String::new(),
            context: String::new(),
            method: SynthesisMethod::Empty,
            breakdown: ScoreBreakdown::default(),
            ranked: Vec::new(),
            top_fiber: None,
        };
    }

    // Fiber shares over the whole map (anchors included; they are part of
    // the matched memory)
    let top_fiber = graph
        .fibers
        .iter()
        .map(|fiber| {
            let mass: f64 = fiber
                .neuron_ids
                .iter()
                .filter_map(|id| map.get(id).map(|s| s.raw))
                .sum();
            (fiber, if total_mass > 0.0 { mass / total_mass } else { 0.0 })
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let breakdown = {
        let (top, intersection) = &ranked[0];
        ScoreBreakdown {
            base_activation: map.get(&top.id).map(|s| s.raw).unwrap_or(0.0),
            intersection_boost: *intersection,
            freshness_boost: freshness_boost(states.get(&top.id), now),
            frequency_boost: frequency_boost(states.get(&top.id)),
        }
    };

    // Answer candidates exclude the query's own anchors
    let candidates: Vec<&ActivatedNeuron> = ranked
        .iter()
        .map(|(n, _)| n)
        .filter(|n| !anchor_ids.contains(&n.id))
        .collect();

    let ranked_out: Vec<ActivatedNeuron> = candidates.iter().map(|n| (*n).clone()).collect();

    let (answer, method) = synthesize(graph, &candidates, top_fiber.as_ref());

    // Context: best fiber summary plus top contents, inside the budget
    let mut context_parts: Vec<String> = Vec::new();
    if let Some((fiber, share)) = &top_fiber {
        if *share > 0.0 && !fiber.summary.is_empty() {
            context_parts.push(fiber.summary.clone());
        }
    }
    for neuron in candidates.iter().take(8) {
        if !context_parts.iter().any(|p| p.contains(&neuron.content)) {
            context_parts.push(neuron.content.clone());
        }
    }
    let context = clip_tokens(&context_parts.join(". "), max_tokens);

    Reconstruction {
        answer,
        context,
        method,
        breakdown,
        ranked: ranked_out,
        top_fiber: top_fiber.map(|(f, share)| (f.id.clone(), share)),
    }
}

fn synthesize(
    graph: &ActivationGraph,
    candidates: &[&ActivatedNeuron],
    top_fiber: Option<&(&crate::graph::Fiber, f64)>,
) -> (String, SynthesisMethod) {
    let Some(first) = candidates.first() else {
        // Everything that activated was an anchor; the fiber summary is
        // the only thing left to say
        if let Some((fiber, share)) = top_fiber {
            if *share >= 0.6 && !fiber.summary.is_empty() {
                return (fiber.summary.clone(), SynthesisMethod::FiberSummary);
            }
        }
        return (String::new(), SynthesisMethod::Empty);
    };

    // One neuron dominating everything speaks for itself
    let dominant = match candidates.get(1) {
        Some(second) => first.score > 2.0 * second.score,
        None => true,
    };
    if dominant && top_fiber.map(|(_, share)| *share < 0.6).unwrap_or(true) {
        return (first.content.clone(), SynthesisMethod::Single);
    }

    // A fiber holding most of the mass answers with its summary
    if let Some((fiber, share)) = top_fiber {
        if *share >= 0.6 && !fiber.summary.is_empty() {
            return (fiber.summary.clone(), SynthesisMethod::FiberSummary);
        }
    }

    if dominant {
        return (first.content.clone(), SynthesisMethod::Single);
    }

    // Stitch the top contributors in pathway order where possible
    let mut top: Vec<&ActivatedNeuron> = candidates.iter().take(5).copied().collect();
    if let Some((fiber, _)) = top_fiber {
        let position = |id: &str| {
            fiber
                .pathway
                .iter()
                .position(|p| p == id)
                .unwrap_or(usize::MAX)
        };
        top.sort_by_key(|n| position(&n.id));
    }
    let parts: Vec<&str> = top.iter().map(|n| n.content.as_str()).collect();
    let answer = match parts.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [head @ .., last] => format!("{}, and {}", head.join(", "), last),
    };
    let _ = graph;
    (answer, SynthesisMethod::MultiNeuron)
}

/// Clip to a whitespace-token budget
fn clip_tokens(text: &str, max_tokens: usize) -> String {
    let mut tokens = text.split_whitespace();
    let clipped: Vec<&str> = tokens.by_ref().take(max_tokens).collect();
    if tokens.next().is_some() {
        format!("{}…", clipped.join(" "))
    } else {
        clipped.join(" ")
    }
}

// ============================================================================
// TESTS
// ============================================================================
