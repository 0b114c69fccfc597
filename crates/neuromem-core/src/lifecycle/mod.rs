//! Lifecycle - Decay, reinforcement and stage bookkeeping
//!
//! Decay is exponential per neuron with a type-aware base rate, scaled by
//! the maturation stage of the fibers a neuron belongs to and modulated
//! by strong affect. Inferred synapses that never earned reinforcement
//! decay at a multiple of the base rate.

pub mod patterns;

pub use patterns::{extract_patterns, PatternReport, UnionFind};

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{BrainConfig, MaturationStage, SynapseType};
use crate::storage::Store;

/// Base per-day decay applied to synapse weights
const SYNAPSE_DECAY_PER_DAY: f64 = 0.01;

/// Page size for decay sweeps
const SWEEP_PAGE: usize = 512;

// ============================================================================
// REPORT
// ============================================================================

/// What a decay sweep did (or would do, in dry-run mode)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    /// Neuron states examined
    pub states_examined: usize,
    /// States whose activation actually moved
    pub states_decayed: usize,
    /// States that fell below the prune threshold
    pub prune_candidates: usize,
    /// Inferred synapses whose weight decayed
    pub synapses_decayed: usize,
    /// True when no writes were made
    pub dry_run: bool,
}

// ============================================================================
// DECAY MANAGER
// ============================================================================

/// Runs decay sweeps over one brain
pub struct DecayManager<'a> {
    store: &'a Store,
    config: &'a BrainConfig,
}

impl<'a> DecayManager<'a> {
    pub fn new(store: &'a Store, config: &'a BrainConfig) -> Self {
        Self { store, config }
    }

    /// Run one sweep. Days elapsed are measured per neuron from its last
    /// activation (creation when never activated).
    pub fn run(&self, now: DateTime<Utc>, dry_run: bool) -> Result<DecayReport> {
        let mut report = DecayReport {
            dry_run,
            ..Default::default()
        };

        let stage_multipliers = self.stage_multipliers()?;
        let affect = self.affect_modulation()?;

        let mut offset = 0;
        loop {
            let page = self.store.states_page(SWEEP_PAGE, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();

            for mut state in page {
                report.states_examined += 1;
                let reference = state.last_activated.unwrap_or(state.created_at);
                let days = (now - reference).num_minutes() as f64 / (60.0 * 24.0);
                if days <= 0.0 || state.activation_level <= 0.0 {
                    continue;
                }

                // Stage multiplier from the most mature containing fiber;
                // free-floating neurons decay at their own rate
                let stage_multiplier = stage_multipliers
                    .get(&state.neuron_id)
                    .copied()
                    .unwrap_or(1.0);
                let affect_multiplier =
                    affect.get(&state.neuron_id).copied().unwrap_or(1.0);

                let rate = state.decay_rate * stage_multiplier * affect_multiplier;
                let decayed = state.activation_level * (-rate * days).exp();
                if (decayed - state.activation_level).abs() < f64::EPSILON {
                    continue;
                }

                state.activation_level = decayed;
                state.clamp();
                report.states_decayed += 1;
                if decayed < self.config.prune_threshold {
                    report.prune_candidates += 1;
                }
                if !dry_run {
                    self.store.upsert_state(&state)?;
                }
            }
        }

        report.synapses_decayed = self.decay_inferred_synapses(now, dry_run)?;

        tracing::info!(
            examined = report.states_examined,
            decayed = report.states_decayed,
            prune_candidates = report.prune_candidates,
            dry_run,
            "decay sweep complete"
        );
        Ok(report)
    }

    /// neuron id → decay multiplier of its most mature containing fiber
    fn stage_multipliers(&self) -> Result<HashMap<String, f64>> {
        let mut out: HashMap<String, f64> = HashMap::new();
        let mut offset = 0;
        loop {
            let fibers = self.store.fibers_page(SWEEP_PAGE, offset)?;
            if fibers.is_empty() {
                break;
            }
            offset += fibers.len();
            for fiber in fibers {
                let stage = self
                    .store
                    .get_maturation(&fiber.id)?
                    .map(|m| m.stage)
                    .unwrap_or(MaturationStage::Stm);
                let multiplier = stage.decay_multiplier();
                for neuron_id in &fiber.neuron_ids {
                    out.entry(neuron_id.clone())
                        .and_modify(|m| *m = m.min(multiplier))
                        .or_insert(multiplier);
                }
            }
        }
        Ok(out)
    }

    /// Strong affect slows forgetting: intensely negative memories
    /// persist the longest
    fn affect_modulation(&self) -> Result<HashMap<String, f64>> {
        let mut anchored: HashMap<String, f64> = HashMap::new();
        let mut offset = 0;
        loop {
            let page = self.store.synapses_page(SWEEP_PAGE, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for synapse in page {
                if synapse.synapse_type != SynapseType::Felt || synapse.weight < 0.7 {
                    continue;
                }
                let Some(emotion) = self.store.get_neuron(&synapse.target_id)? else {
                    continue;
                };
                let multiplier = if is_negative_emotion(&emotion.content) {
                    0.7
                } else {
                    0.9
                };
                anchored
                    .entry(synapse.source_id.clone())
                    .and_modify(|m| *m = m.min(multiplier))
                    .or_insert(multiplier);
            }
        }

        // The anchor's modulation covers its whole fiber
        if anchored.is_empty() {
            return Ok(anchored);
        }
        let anchors: BTreeSet<String> = anchored.keys().cloned().collect();
        let mut out = anchored.clone();
        for fiber in self.store.fibers_for_neurons(&anchors)? {
            if let Some(multiplier) = anchored.get(&fiber.anchor_neuron_id) {
                for neuron_id in &fiber.neuron_ids {
                    out.entry(neuron_id.clone())
                        .and_modify(|m| *m = m.min(*multiplier))
                        .or_insert(*multiplier);
                }
            }
        }
        Ok(out)
    }

    /// Inferred synapses without earned reinforcement fade; a recorded
    /// `_decay_multiplier` (dream edges) accelerates it further
    fn decay_inferred_synapses(&self, now: DateTime<Utc>, dry_run: bool) -> Result<usize> {
        let mut decayed = 0;
        let mut offset = 0;
        loop {
            let page = self.store.synapses_page(SWEEP_PAGE, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for synapse in page {
                if !synapse.is_inferred() || synapse.reinforced_count >= 2 {
                    continue;
                }
                let reference = synapse.last_activated.unwrap_or(synapse.created_at);
                let days = (now - reference).num_minutes() as f64 / (60.0 * 24.0);
                if days <= 0.0 {
                    continue;
                }
                let multiplier = synapse
                    .metadata
                    .get("_decay_multiplier")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(2.0);
                let weight =
                    synapse.weight * (-SYNAPSE_DECAY_PER_DAY * multiplier * days).exp();
                if (weight - synapse.weight).abs() < f64::EPSILON {
                    continue;
                }
                decayed += 1;
                if !dry_run {
                    self.store.update_synapse_weight(
                        &synapse.id,
                        weight,
                        synapse.reinforced_count,
                        reference,
                    )?;
                }
            }
        }
        Ok(decayed)
    }
}

fn is_negative_emotion(content: &str) -> bool {
    matches!(
        content.trim_start_matches("emotion:"),
        "frustration" | "fear" | "anger" | "sadness" | "negative" | "urgency"
    )
}

// ============================================================================
// REINFORCEMENT
// ============================================================================

/// Directly reinforce a fiber: members gain activation explicitly (the
/// one path that bypasses the sigmoid gate) and the maturation record
/// logs the event for the spacing-effect gate.
pub fn reinforce_fiber(
    store: &Store,
    config: &BrainConfig,
    fiber_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let fiber = store
        .get_fiber(fiber_id)?
        .ok_or_else(|| crate::error::EngineError::NotFound(format!("fiber {fiber_id}")))?;

    let mut states = store.get_states_batch(&fiber.neuron_ids)?;
    for neuron_id in &fiber.neuron_ids {
        let state = states
            .entry(neuron_id.clone())
            .or_insert_with(|| crate::graph::NeuronState::new(neuron_id.clone(), 0.02));
        state.activation_level =
            (state.activation_level + config.reinforcement_delta).clamp(0.0, 1.0);
        state.last_activated = Some(now);
        state.access_frequency = state.access_frequency.saturating_add(1);
        store.upsert_state(state)?;
    }

    if let Some(mut maturation) = store.get_maturation(fiber_id)? {
        maturation.reinforce(now);
        maturation.advance(now);
        store.save_maturation(&maturation)?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Neuron, NeuronState, NeuronType};
    use chrono::Duration;

    fn setup() -> (Store, BrainConfig) {
        (Store::open_in_memory().unwrap(), BrainConfig::default())
    }

    fn seeded_state(store: &Store, content: &str, decay_rate: f64, days_ago: i64) -> String {
        let neuron = Neuron::new(NeuronType::Concept, content);
        let id = store.add_neuron(&neuron).unwrap();
        let mut state = NeuronState::new(&id, decay_rate);
        state.activation_level = 1.0;
        state.last_activated = Some(Utc::now() - Duration::days(days_ago));
        state.created_at = Utc::now() - Duration::days(days_ago);
        store.upsert_state(&state).unwrap();
        id
    }

    #[test]
    fn test_fact_decay_over_thirty_days() {
        let (store, config) = setup();
        let id = seeded_state(&store, "fact content", 0.02, 30);

        let report = DecayManager::new(&store, &config)
            .run(Utc::now(), false)
            .unwrap();
        assert_eq!(report.states_decayed, 1);

        let state = store
            .get_states_batch(&[id].into_iter().collect())
            .unwrap()
            .into_values()
            .next()
            .unwrap();
        let expected = (-0.6f64).exp();
        assert!(
            (state.activation_level - expected).abs() < 1e-3,
            "got {}, expected {}",
            state.activation_level,
            expected
        );
        assert_eq!(report.prune_candidates, 0);
    }

    #[test]
    fn test_todo_decay_reaches_prune_threshold() {
        let (store, config) = setup();
        seeded_state(&store, "todo content", 0.15, 30);

        let report = DecayManager::new(&store, &config)
            .run(Utc::now(), false)
            .unwrap();
        // exp(-4.5) ≈ 0.011 < 0.02
        assert_eq!(report.prune_candidates, 1);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (store, config) = setup();
        let id = seeded_state(&store, "anything", 0.1, 10);

        let report = DecayManager::new(&store, &config)
            .run(Utc::now(), true)
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.states_decayed, 1);

        let state = store
            .get_states_batch(&[id].into_iter().collect())
            .unwrap()
            .into_values()
            .next()
            .unwrap();
        assert_eq!(state.activation_level, 1.0);
    }

    #[test]
    fn test_semantic_stage_slows_decay() {
        let (store, config) = setup();
        let id = seeded_state(&store, "stable knowledge", 0.1, 10);

        let mut fiber = crate::graph::Fiber::new(id.clone(), crate::graph::MemoryType::Fact);
        store.save_fiber(&fiber).unwrap();
        let mut maturation = crate::graph::Maturation::new(fiber.id.clone());
        maturation.stage = MaturationStage::Semantic;
        store.save_maturation(&maturation).unwrap();
        fiber.neuron_ids.insert(id.clone());
        store.save_fiber(&fiber).unwrap();

        DecayManager::new(&store, &config).run(Utc::now(), false).unwrap();
        let state = store
            .get_states_batch(&[id].into_iter().collect())
            .unwrap()
            .into_values()
            .next()
            .unwrap();
        // 0.3x multiplier: exp(-0.1 * 0.3 * 10) ≈ 0.74 instead of exp(-1)
        assert!((state.activation_level - (-0.3f64).exp()).abs() < 1e-2);
    }

    #[test]
    fn test_inferred_synapse_double_decay() {
        let (store, config) = setup();
        let a = store.add_neuron(&Neuron::new(NeuronType::Concept, "a")).unwrap();
        let b = store.add_neuron(&Neuron::new(NeuronType::Concept, "b")).unwrap();
        let mut synapse =
            crate::graph::Synapse::new(&a, &b, SynapseType::CoOccurs, 0.3).mark_inferred();
        synapse.created_at = Utc::now() - Duration::days(20);
        let sid = store.add_synapse(&synapse).unwrap();

        let report = DecayManager::new(&store, &config)
            .run(Utc::now(), false)
            .unwrap();
        assert_eq!(report.synapses_decayed, 1);

        let updated = store.get_synapse(&sid).unwrap().unwrap();
        // 2x multiplier over 20 days: 0.3 * exp(-0.01 * 2 * 20) ≈ 0.201
        assert!((updated.weight - 0.3 * (-0.4f64).exp()).abs() < 1e-3);
    }

    #[test]
    fn test_reinforce_fiber_bumps_members_and_maturation() {
        let (store, config) = setup();
        let id = seeded_state(&store, "reinforced", 0.02, 0);
        let fiber = crate::graph::Fiber::new(id.clone(), crate::graph::MemoryType::Fact);
        store.save_fiber(&fiber).unwrap();
        store
            .save_maturation(&crate::graph::Maturation::new(fiber.id.clone()))
            .unwrap();

        reinforce_fiber(&store, &config, &fiber.id, Utc::now()).unwrap();

        let state = store
            .get_states_batch(&[id].into_iter().collect())
            .unwrap()
            .into_values()
            .next()
            .unwrap();
        // Already at ceiling; clamp holds
        assert_eq!(state.activation_level, 1.0);
        let maturation = store.get_maturation(&fiber.id).unwrap().unwrap();
        assert_eq!(maturation.reinforcement_count, 1);
        assert_eq!(maturation.reinforcement_days.len(), 1);
    }
}
