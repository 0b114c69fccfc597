//! Deferred writes - Batched side effects of a retrieval
//!
//! A retrieval never writes while it runs. Everything it wants to persist
//! (Hebbian weight updates, conductivity bumps, co-activation events,
//! access counters) accumulates here and is applied in one transaction
//! after the result is produced. Dropping the batch unflushed leaves the
//! store untouched, which is what makes cancellation side-effect free.

use chrono::{DateTime, Utc};

// ============================================================================
// TYPES
// ============================================================================

/// A pending synapse mutation from the learning rule
#[derive(Debug, Clone)]
pub struct SynapseDelta {
    /// Synapse to update
    pub synapse_id: String,
    /// New weight (already capped by the learning rule)
    pub weight: f64,
    /// New reinforcement count; must not decrease
    pub reinforced_count: u32,
    /// Conduction timestamp; must not move backward
    pub last_activated: DateTime<Utc>,
}

/// A co-activation observation. Endpoints are stored in canonical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoActivationEvent {
    /// Lexicographically smaller neuron id
    pub neuron_a: String,
    /// Lexicographically larger neuron id
    pub neuron_b: String,
    /// When the pair fired together
    pub occurred_at: DateTime<Utc>,
}

impl CoActivationEvent {
    /// Build an event with canonical endpoint ordering. Returns `None` for
    /// self-pairs.
    pub fn new(a: impl Into<String>, b: impl Into<String>, occurred_at: DateTime<Utc>) -> Option<Self> {
        let a = a.into();
        let b = b.into();
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self {
                neuron_a: a,
                neuron_b: b,
                occurred_at,
            }),
            std::cmp::Ordering::Greater => Some(Self {
                neuron_a: b,
                neuron_b: a,
                occurred_at,
            }),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// All write intents produced by one retrieval
#[derive(Debug, Default, Clone)]
pub struct DeferredWriteBatch {
    /// Hebbian synapse updates
    pub synapse_deltas: Vec<SynapseDelta>,
    /// Fibers whose pathway conducted; conductivity rises by a fixed step
    pub conducted_fibers: Vec<(String, DateTime<Utc>)>,
    /// Co-activation observations
    pub co_activations: Vec<CoActivationEvent>,
    /// Neuron states to upsert (post-activation levels, access bumps)
    pub state_updates: Vec<crate::graph::NeuronState>,
    /// Maturation records to persist (reinforcement bookkeeping)
    pub maturations: Vec<crate::graph::Maturation>,
}

impl DeferredWriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the batch carries nothing to flush
    pub fn is_empty(&self) -> bool {
        self.synapse_deltas.is_empty()
            && self.conducted_fibers.is_empty()
            && self.co_activations.is_empty()
            && self.state_updates.is_empty()
            && self.maturations.is_empty()
    }

    /// Record a co-activation pair, normalizing order and skipping
    /// self-pairs and duplicates within the batch
    pub fn record_co_activation(&mut self, a: &str, b: &str, occurred_at: DateTime<Utc>) {
        if let Some(event) = CoActivationEvent::new(a, b, occurred_at) {
            if !self
                .co_activations
                .iter()
                .any(|e| e.neuron_a == event.neuron_a && e.neuron_b == event.neuron_b)
            {
                self.co_activations.push(event);
            }
        }
    }

    /// Total number of pending writes
    pub fn len(&self) -> usize {
        self.synapse_deltas.len()
            + self.conducted_fibers.len()
            + self.co_activations.len()
            + self.state_updates.len()
            + self.maturations.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
