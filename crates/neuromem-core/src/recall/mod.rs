//! Recall - The reflex retrieval pipeline
//!
//! parse → anchors → activate → stabilize → reconstruct → deferred
//! writes. The pipeline reads a bounded neighborhood of the graph, runs
//! the activation engine over it in memory, and accumulates every write
//! it wants into a [`DeferredWriteBatch`] the engine flushes after the
//! result is returned. Dropping the pipeline mid-flight therefore leaves
//! no trace.

mod reconstruct;

pub use reconstruct::{
    frequency_boost, freshness_boost, ActivatedNeuron, Reconstruction, ScoreBreakdown,
    SynthesisMethod,
};

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activation::{
    apply_binding_boost, classic_spread, enter_refractory, lateral_inhibition, merge_scaled,
    sigmoid, stabilize, trail_activation, ActivationGraph, Anchor, SpreadParams, TrailParams,
};
use crate::error::Result;
use crate::extract::{simhash, Extractor, Intent, Stimulus};
use crate::graph::{BrainConfig, NeuronState, SynapseType};
use crate::learning::LearningRule;
use crate::storage::{DeferredWriteBatch, Store, SynapseDelta};

/// Discovery pass contribution relative to reflex results
const DISCOVERY_SCALE: f64 = 0.6;

/// At most this many activated neurons pair up into co-activation events
const CO_ACTIVATION_TOP: usize = 10;

/// Anchor resolution cap
const MAX_ANCHORS: usize = 8;

// ============================================================================
// REQUEST / RESULT
// ============================================================================

/// A retrieval request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryRequest {
    /// The query text
    pub query: String,
    /// Traversal depth 0–3; classified from query shape when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u8>,
    /// Context token budget; the brain default applies when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Only consider fibers valid at this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            depth: None,
            max_tokens: None,
            valid_at: None,
        }
    }
}

/// What a retrieval produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    /// Synthesized answer
    pub answer: String,
    /// Supporting context inside the token budget
    pub context: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Activated neurons, ranked (query anchors excluded)
    pub neurons_activated: Vec<ActivatedNeuron>,
    /// Fibers whose pathway conducted
    pub fibers_matched: Vec<String>,
    /// Co-activation pairs recorded by this retrieval
    pub co_activations: usize,
    /// How the answer was synthesized
    pub synthesis_method: SynthesisMethod,
    /// Score components for the top neuron
    pub score_breakdown: ScoreBreakdown,
    /// Mined workflows matching a habit-shaped query
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflow_suggestions: Vec<String>,
    /// True when the soft deadline cut the pipeline short
    pub partial: bool,
}

impl RetrievalResult {
    fn empty() -> Self {
        Self {
            answer: String::new(),
            context: String::new(),
            confidence: 0.0,
            neurons_activated: Vec::new(),
            fibers_matched: Vec::new(),
            co_activations: 0,
            synthesis_method: SynthesisMethod::Empty,
            score_breakdown: ScoreBreakdown::default(),
            workflow_suggestions: Vec::new(),
            partial: false,
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Runs retrievals against one brain
pub struct RecallPipeline<'a> {
    store: &'a Store,
    extractor: &'a Extractor,
    config: &'a BrainConfig,
}

impl<'a> RecallPipeline<'a> {
    pub fn new(store: &'a Store, extractor: &'a Extractor, config: &'a BrainConfig) -> Self {
        Self {
            store,
            extractor,
            config,
        }
    }

    /// Run one retrieval. Returns the result plus the deferred writes the
    /// caller flushes after delivering the result.
    pub fn run(
        &self,
        request: &QueryRequest,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<(RetrievalResult, DeferredWriteBatch)> {
        let stimulus = self.extractor.parse_query(&request.query, now);
        let depth = request.depth.unwrap_or_else(|| classify_depth(&stimulus));
        let hop_budget = hop_budget(depth, self.config.max_spread_hops);

        // ---- Anchors: time first, then by type weight ----
        let anchors = self.resolve_anchors(&stimulus)?;
        if anchors.is_empty() {
            tracing::debug!(query = %request.query, "no anchors resolved");
            return Ok((RetrievalResult::empty(), DeferredWriteBatch::new()));
        }

        // ---- Working set ----
        let (mut graph, mut partial) =
            self.load_working_set(&anchors, request.valid_at, hop_budget, deadline)?;

        // ---- Activate: reflex trail first, then a discovery pass ----
        let trail_params = TrailParams {
            decay_rate: self.config.decay_rate,
            activation_threshold: self.config.activation_threshold,
        };
        let (mut map, conducted) = trail_activation(&graph, &anchors, &trail_params, now);

        let spread_params = SpreadParams {
            decay_rate: self.config.decay_rate,
            activation_threshold: self.config.activation_threshold,
            max_hops: (hop_budget / 2).max(1),
            queue_cap: self.config.queue_cap,
        };
        let (discovery, complete) = classic_spread(&graph, &anchors, &spread_params, now, deadline);
        partial |= !complete;
        merge_scaled(&mut map, discovery, DISCOVERY_SCALE);

        apply_binding_boost(&mut map, anchors.len());
        lateral_inhibition(
            &mut map,
            self.config.lateral_inhibition_k,
            self.config.lateral_inhibition_factor,
        );
        stabilize(&mut map, self.config.weight_normalization_budget);

        // ---- Disputed and superseded content scores down ----
        for (id, score) in map.iter_mut() {
            if let Some(neuron) = graph.neurons.get(id) {
                if neuron.is_superseded() {
                    score.raw *= 0.25;
                } else if neuron.is_disputed() {
                    score.raw *= 0.5;
                }
            }
        }

        // ---- Deferred writes ----
        let mut batch = DeferredWriteBatch::new();
        let mut states = self.store.get_states_batch(&map.keys().cloned().collect())?;
        self.queue_state_updates(&map, &mut states, &mut batch, now);
        self.queue_hebbian_updates(&graph, &map, &states, &mut batch, now);
        self.queue_co_activations(&map, &mut batch, now);
        for fiber_id in &conducted {
            batch.conducted_fibers.push((fiber_id.clone(), now));
            if let Some(mut maturation) = self.store.get_maturation(fiber_id)? {
                maturation.reinforce(now);
                maturation.advance(now);
                batch.maturations.push(maturation);
            }
        }

        // ---- Reconstruct ----
        let anchor_ids: Vec<String> = anchors.iter().map(|a| a.neuron_id.clone()).collect();
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_context_tokens);
        // Fibers that never conducted contribute nothing to shares
        graph.fibers.retain(|f| {
            conducted.contains(&f.id) || f.neuron_ids.iter().any(|id| map.contains_key(id))
        });
        let recon = reconstruct::reconstruct(&graph, &map, &states, &anchor_ids, max_tokens, now);

        // ---- Confidence: activation mass concentration, sigmoid-gated ----
        let total_raw: f64 = map.values().map(|s| s.raw).sum();
        let share = recon
            .top_fiber
            .as_ref()
            .map(|(_, share)| *share)
            .unwrap_or_else(|| {
                let top = recon.ranked.first().map(|n| n.score).unwrap_or(0.0);
                if total_raw > 0.0 {
                    (top / total_raw).min(1.0)
                } else {
                    0.0
                }
            });
        let confidence = if map.is_empty() {
            0.0
        } else {
            sigmoid(share, self.config.sigmoid_steepness)
        };

        // ---- Habit-shaped queries surface mined workflows ----
        let workflow_suggestions = if stimulus.intents.contains(&Intent::Habit) {
            crate::consolidation::suggest_workflows(self.store, &stimulus)?
        } else {
            Vec::new()
        };

        let result = RetrievalResult {
            answer: recon.answer,
            context: recon.context,
            confidence,
            neurons_activated: recon.ranked,
            fibers_matched: conducted,
            co_activations: batch.co_activations.len(),
            synthesis_method: recon.method,
            score_breakdown: recon.breakdown,
            workflow_suggestions,
            partial,
        };
        Ok((result, batch))
    }

    /// Resolve anchor candidates to stored neurons: exact identity first,
    /// then substring, then hash proximity, with fuzzier matches damped.
    fn resolve_anchors(&self, stimulus: &Stimulus) -> Result<Vec<Anchor>> {
        let mut resolved: HashMap<String, f64> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for candidate in &stimulus.anchors {
            if resolved.len() >= MAX_ANCHORS {
                break;
            }
            let hit = if let Some(neuron) = self
                .store
                .find_neuron(candidate.neuron_type, &candidate.content)?
            {
                Some((neuron.id, candidate.weight))
            } else if let Some(neuron) = self
                .store
                .find_neurons_containing(&candidate.content, 3)?
                .into_iter()
                .next()
            {
                Some((neuron.id, candidate.weight * 0.8))
            } else {
                self.store
                    .find_neurons_by_hash(
                        simhash(&candidate.content),
                        crate::extract::NEAR_DUPLICATE_DISTANCE,
                    )?
                    .into_iter()
                    .next()
                    .map(|(neuron, _)| (neuron.id, candidate.weight * 0.6))
            };

            if let Some((neuron_id, weight)) = hit {
                let entry = resolved.entry(neuron_id.clone()).or_insert(0.0);
                if *entry == 0.0 {
                    order.push(neuron_id);
                }
                *entry = entry.max(weight);
            }
        }

        Ok(order
            .into_iter()
            .map(|neuron_id| {
                let weight = resolved[&neuron_id];
                Anchor { neuron_id, weight }
            })
            .collect())
    }

    /// Load the anchor neighborhood: candidate fibers plus the subgraph
    /// reachable within the hop budget
    fn load_working_set(
        &self,
        anchors: &[Anchor],
        valid_at: Option<DateTime<Utc>>,
        hop_budget: u32,
        deadline: Option<Instant>,
    ) -> Result<(ActivationGraph, bool)> {
        let mut partial = false;
        let mut universe: BTreeSet<String> =
            anchors.iter().map(|a| a.neuron_id.clone()).collect();

        let mut fibers = self.store.fibers_for_neurons(&universe)?;
        if let Some(at) = valid_at {
            fibers.retain(|f| f.is_valid_at(at));
        }
        for fiber in &fibers {
            universe.extend(fiber.neuron_ids.iter().cloned());
        }

        let mut graph = ActivationGraph {
            fibers,
            ..Default::default()
        };

        let mut seen_edges: BTreeSet<String> = BTreeSet::new();
        let mut frontier = universe.clone();
        for _ in 0..hop_budget {
            if frontier.is_empty() {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    partial = true;
                    break;
                }
            }
            let edges = self.store.synapses_for_neurons(&frontier)?;
            let mut next = BTreeSet::new();
            for edge in edges {
                if !seen_edges.insert(edge.id.clone()) {
                    continue;
                }
                for endpoint in [&edge.source_id, &edge.target_id] {
                    if universe.insert(endpoint.clone()) {
                        next.insert(endpoint.clone());
                    }
                }
                graph.synapses.push(edge);
            }
            frontier = next;
        }

        for neuron in self.store.get_neurons_batch(&universe)? {
            graph.neurons.insert(neuron.id.clone(), neuron);
        }
        graph.states = self.store.get_states_batch(&universe)?;
        graph.index_synapses();
        Ok((graph, partial))
    }

    /// Post-activation state levels: sigmoid-gated, refractory on firing
    fn queue_state_updates(
        &self,
        map: &crate::activation::ActivationMap,
        states: &mut HashMap<String, NeuronState>,
        batch: &mut DeferredWriteBatch,
        now: DateTime<Utc>,
    ) {
        for (id, score) in map {
            let state = states
                .entry(id.clone())
                .or_insert_with(|| NeuronState::new(id.clone(), 0.02));
            state.activation_level = sigmoid(score.raw, self.config.sigmoid_steepness);
            state.clamp();
            if state.activation_level >= state.firing_threshold {
                enter_refractory(state, now);
            } else {
                state.last_activated = Some(now);
            }
            batch.state_updates.push(state.clone());
        }
    }

    /// Hebbian updates for every edge whose endpoints both activated,
    /// with competitive normalization per pre-synaptic neuron
    fn queue_hebbian_updates(
        &self,
        graph: &ActivationGraph,
        map: &crate::activation::ActivationMap,
        states: &HashMap<String, NeuronState>,
        batch: &mut DeferredWriteBatch,
        now: DateTime<Utc>,
    ) {
        let rule = LearningRule::from_config(self.config);
        let level =
            |id: &str| -> f64 { states.get(id).map(|s| s.activation_level).unwrap_or(0.0) };

        let mut deltas: HashMap<String, SynapseDelta> = HashMap::new();
        for synapse in &graph.synapses {
            if !map.contains_key(&synapse.source_id) || !map.contains_key(&synapse.target_id) {
                continue;
            }
            let a_pre = level(&synapse.source_id);
            let a_post = level(&synapse.target_id);
            if a_pre <= 0.0 || a_post <= 0.0 {
                continue;
            }
            // Contradiction edges weaken when both sides fire together
            let delta = if synapse.synapse_type == SynapseType::Contradicts {
                rule.depress(synapse, a_pre, a_post, now)
            } else {
                rule.potentiate(synapse, a_pre, a_post, now)
            };
            deltas.insert(synapse.id.clone(), delta);
        }

        // Competitive normalization over each pre-neuron's outgoing edges
        // in the working set
        let mut outgoing: HashMap<&str, Vec<&crate::graph::Synapse>> = HashMap::new();
        for synapse in &graph.synapses {
            outgoing
                .entry(synapse.source_id.as_str())
                .or_default()
                .push(synapse);
        }
        for (source, edges) in outgoing {
            if !edges.iter().any(|s| deltas.contains_key(&s.id)) {
                continue;
            }
            let total: f64 = edges
                .iter()
                .map(|s| deltas.get(&s.id).map(|d| d.weight).unwrap_or(s.weight))
                .sum();
            let Some(scale) = rule.normalization_scale(total) else {
                continue;
            };
            tracing::debug!(neuron = source, total, "normalizing outgoing weights");
            for synapse in edges {
                match deltas.get_mut(&synapse.id) {
                    Some(delta) => delta.weight *= scale,
                    None => {
                        deltas.insert(
                            synapse.id.clone(),
                            SynapseDelta {
                                synapse_id: synapse.id.clone(),
                                weight: synapse.weight * scale,
                                reinforced_count: synapse.reinforced_count,
                                last_activated: synapse
                                    .last_activated
                                    .unwrap_or(synapse.created_at),
                            },
                        );
                    }
                }
            }
        }

        let mut ordered: Vec<SynapseDelta> = deltas.into_values().collect();
        ordered.sort_by(|a, b| a.synapse_id.cmp(&b.synapse_id));
        batch.synapse_deltas.extend(ordered);
    }

    /// Top activated neurons pair into co-activation events
    fn queue_co_activations(
        &self,
        map: &crate::activation::ActivationMap,
        batch: &mut DeferredWriteBatch,
        now: DateTime<Utc>,
    ) {
        let mut ranked: Vec<(&String, f64)> =
            map.iter().map(|(id, score)| (id, score.raw)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        let top: Vec<&String> = ranked
            .into_iter()
            .take(CO_ACTIVATION_TOP)
            .map(|(id, _)| id)
            .collect();
        for (i, a) in top.iter().enumerate() {
            for b in top.iter().skip(i + 1) {
                batch.record_co_activation(a, b, now);
            }
        }
    }
}

// ============================================================================
// DEPTH CLASSIFICATION
// ============================================================================

/// Query-shape depth classification: definitions stay shallow, causal
/// questions go deep
pub fn classify_depth(stimulus: &Stimulus) -> u8 {
    if stimulus.intents.contains(&Intent::Why) {
        3
    } else if stimulus.intents.contains(&Intent::Habit) {
        2
    } else if stimulus.intents.contains(&Intent::WhatIs) {
        0
    } else {
        1
    }
}

/// Hop budget per depth
fn hop_budget(depth: u8, max_spread_hops: u32) -> u32 {
    match depth {
        0 => 1,
        1 => 3,
        2 => 5,
        _ => max_spread_hops.max(1),
    }
}

// ============================================================================
// TESTS
// ============================================================================
