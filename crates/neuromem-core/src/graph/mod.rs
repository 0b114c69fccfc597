//! Graph model - Core entities of the memory engine
//!
//! Identity and state are kept apart: [`Neuron`], [`Synapse`] and [`Fiber`]
//! are value types owned by a [`Brain`]; per-neuron activation lives in
//! [`NeuronState`]. Fibers reference neurons by id only, so the ownership
//! graph stays acyclic even when the memory graph is not.

mod brain;
mod fiber;
mod maturation;
mod neuron;
mod synapse;

pub use brain::{Brain, BrainConfig};
pub use fiber::{Fiber, MemoryType};
pub use maturation::{Maturation, MaturationStage};
pub use neuron::{canonicalize, Neuron, NeuronState, NeuronType};
pub use synapse::{Direction, Synapse, SynapseType, W_MAX};
