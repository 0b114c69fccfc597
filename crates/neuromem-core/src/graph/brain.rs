//! Brain - Container and tuning parameters for one memory graph
//!
//! A brain exclusively owns its neurons, synapses, fibers and maturation
//! records; entities never cross brain boundaries except through snapshot
//! export/import. Each brain maps to one database file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// BRAIN CONFIG
// ============================================================================

/// Tuning parameters for encoding, retrieval and learning.
///
/// Persisted as JSON alongside the brain row; unknown keys from newer
/// versions are ignored, missing keys take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrainConfig {
    /// Baseline per-hop decay during spreading
    pub decay_rate: f64,
    /// Activation delta applied on direct reinforcement
    pub reinforcement_delta: f64,
    /// Spreading prunes candidates below this activation
    pub activation_threshold: f64,
    /// Maximum BFS depth for classic spreading
    pub max_spread_hops: u32,
    /// Token budget for reconstructed context
    pub max_context_tokens: usize,
    /// Hebbian base learning rate
    pub learning_rate: f64,
    /// Per-neuron outgoing weight budget for competitive normalization
    pub weight_normalization_budget: f64,
    /// Maximum novelty multiplier for fresh synapses
    pub novelty_boost_max: f64,
    /// How fast novelty fades with reinforcement count
    pub novelty_decay_rate: f64,
    /// Steepness of the activation sigmoid
    pub sigmoid_steepness: f64,
    /// Firing threshold given to new neuron states
    pub default_firing_threshold: f64,
    /// Refractory window given to new neuron states
    pub default_refractory_ms: u32,
    /// Lateral inhibition keeps this many winners untouched
    pub lateral_inhibition_k: usize,
    /// Scale factor applied to non-winners
    pub lateral_inhibition_factor: f64,
    /// Co-activation count needed before inference creates an edge
    pub co_activation_threshold: u32,
    /// Look-back window for co-activation counting
    pub co_activation_window_days: i64,
    /// Cap on edges created by one inference run
    pub max_inferences_per_run: usize,
    /// Neuron states below this activation become prune candidates
    pub prune_threshold: f64,
    /// Synapses below this weight with zero reinforcement are pruned
    pub synapse_prune_weight: f64,
    /// Soft wall-clock limit for one retrieval
    pub retrieval_timeout_ms: u64,
    /// Safety cap on the spreading queue
    pub queue_cap: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.1,
            reinforcement_delta: 0.05,
            activation_threshold: 0.2,
            max_spread_hops: 4,
            max_context_tokens: 1500,
            learning_rate: 0.1,
            weight_normalization_budget: 5.0,
            novelty_boost_max: 4.0,
            novelty_decay_rate: 0.2,
            sigmoid_steepness: 6.0,
            default_firing_threshold: 0.3,
            default_refractory_ms: 500,
            lateral_inhibition_k: 10,
            lateral_inhibition_factor: 0.7,
            co_activation_threshold: 3,
            co_activation_window_days: 7,
            max_inferences_per_run: 100,
            prune_threshold: 0.02,
            synapse_prune_weight: 0.05,
            retrieval_timeout_ms: 5000,
            queue_cap: 50_000,
        }
    }
}

// ============================================================================
// BRAIN
// ============================================================================

/// Identity row for one memory graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brain {
    /// Unique brain id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Tuning parameters
    pub config: BrainConfig,
    /// When the brain was created
    pub created_at: DateTime<Utc>,
}

impl Brain {
    /// Create a brain with a fresh id and default config
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("b-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            config: BrainConfig::default(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
