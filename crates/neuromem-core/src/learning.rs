//! Learning rule - Hebbian plasticity with novelty adaptation
//!
//! Weight changes are proportional to the product of pre- and
//! post-synaptic activation, scaled by an effective rate that starts
//! boosted for fresh edges and settles as reinforcement accumulates. The
//! `(w_max - w)` term makes growth asymptotic: no sequence of updates can
//! push a weight past the cap.

use chrono::{DateTime, Utc};

use crate::graph::{BrainConfig, Synapse, W_MAX};
use crate::storage::SynapseDelta;

// ============================================================================
// LEARNING RULE
// ============================================================================

/// Hebbian learning parameters lifted from the brain config
#[derive(Debug, Clone, Copy)]
pub struct LearningRule {
    learning_rate: f64,
    novelty_boost_max: f64,
    novelty_decay_rate: f64,
    normalization_budget: f64,
}

impl LearningRule {
    pub fn from_config(config: &BrainConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            novelty_boost_max: config.novelty_boost_max,
            novelty_decay_rate: config.novelty_decay_rate,
            normalization_budget: config.weight_normalization_budget,
        }
    }

    /// Effective learning rate for an edge reinforced `r` times.
    ///
    /// A new edge (r = 0) learns `(1 + novelty_boost_max)` times faster
    /// than a long-reinforced one; the boost decays exponentially with r.
    pub fn effective_rate(&self, reinforced_count: u32) -> f64 {
        let novelty = self.novelty_boost_max
            * (-self.novelty_decay_rate * f64::from(reinforced_count)).exp();
        self.learning_rate * (1.0 + novelty)
    }

    /// Potentiate: the Hebbian strengthening applied when both endpoints
    /// of an edge were active in the same retrieval.
    pub fn potentiate(
        &self,
        synapse: &Synapse,
        a_pre: f64,
        a_post: f64,
        now: DateTime<Utc>,
    ) -> SynapseDelta {
        let eta = self.effective_rate(synapse.reinforced_count);
        let delta = eta * a_pre * a_post * (W_MAX - synapse.weight);
        SynapseDelta {
            synapse_id: synapse.id.clone(),
            weight: (synapse.weight + delta).min(W_MAX),
            reinforced_count: synapse.reinforced_count.saturating_add(1),
            last_activated: now,
        }
    }

    /// Anti-Hebbian depression, used on the disputed/conflict path. The
    /// `w` factor makes weak edges fade faster than established ones
    /// collapse.
    pub fn depress(
        &self,
        synapse: &Synapse,
        a_pre: f64,
        a_post: f64,
        now: DateTime<Utc>,
    ) -> SynapseDelta {
        let eta = self.effective_rate(synapse.reinforced_count);
        let delta = eta * a_pre * a_post * synapse.weight;
        SynapseDelta {
            synapse_id: synapse.id.clone(),
            weight: (synapse.weight - delta).max(0.0),
            // Depression still counts as a conduction event
            reinforced_count: synapse.reinforced_count.saturating_add(1),
            last_activated: now,
        }
    }

    /// Competitive normalization: when one neuron's total outgoing weight
    /// exceeds the budget, all of its outgoing weights scale down
    /// proportionally. Returns the scale factor to apply, or `None` when
    /// the total is within budget.
    pub fn normalization_scale(&self, total_outgoing: f64) -> Option<f64> {
        if total_outgoing > self.normalization_budget && total_outgoing > 0.0 {
            Some(self.normalization_budget / total_outgoing)
        } else {
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
