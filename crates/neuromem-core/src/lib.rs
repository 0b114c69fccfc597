//! # NeuroMem Core
//!
//! Persistent, offline memory engine for AI agents. Memories are stored
//! as a typed, weighted graph of neurons and synapses grouped into fibers
//! (coherent clusters) and retrieved by **spreading activation**: signal
//! propagates from query-derived anchors along weighted edges and
//! accumulates on neurons reached from several directions at once.
//!
//! - **Deterministic**: no embeddings, no model inference, no network.
//!   Extraction is regex and lexicon driven; retrieval is graph traversal.
//! - **Reflex pathways**: every memory carries an ordered conduction
//!   pathway whose conductivity rises with use and fades with time, so
//!   well-worn recalls get faster and sharper.
//! - **Hebbian learning**: edges that conduct together strengthen
//!   together, with novelty-boosted rates for fresh edges, competitive
//!   normalization, and anti-Hebbian pressure on contradictions.
//! - **Lifecycle**: type-aware exponential decay, four maturation stages
//!   (short-term → working → episodic → semantic) gated by the spacing
//!   effect, and consolidation strategies from pruning to dreaming.
//! - **One file per brain**: an embedded SQLite database with WAL
//!   semantics; one writer, many readers, deferred write batches.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use neuromem_core::{Engine, EngineOptions, EncodeRequest, QueryRequest};
//!
//! let engine = Engine::new(EngineOptions::default());
//! let brain = engine.create_brain("agent").await?;
//!
//! engine.encode(&brain.id, &EncodeRequest::new(
//!     "Met Alice at coffee shop. She suggested JWT for auth.",
//! )).await?;
//!
//! let result = engine.query(&brain.id, &QueryRequest::new(
//!     "What did Alice suggest?",
//! )).await?;
//! assert!(result.answer.contains("JWT"));
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): compile SQLite into the binary
//! - `encryption`: SQLCipher instead, keyed by `NEUROMEM_ENCRYPTION_KEY`

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod activation;
pub mod consolidation;
pub mod encode;
pub mod engine;
pub mod error;
pub mod extract;
pub mod graph;
pub mod health;
pub mod learning;
pub mod lifecycle;
pub mod recall;
pub mod snapshot;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Graph model
pub use graph::{
    Brain, BrainConfig, Direction, Fiber, Maturation, MaturationStage, MemoryType, Neuron,
    NeuronState, NeuronType, Synapse, SynapseType, W_MAX,
};

// Extraction
pub use extract::{
    simhash, AnchorCandidate, Extractor, Intent, Mention, QueryParser, RelationCandidate,
    Sentiment, SentimentExtractor, Stimulus, TemporalExtractor, TemporalSpan, Token, Tokenizer,
    UnicodeTokenizer, Valence,
};

// Storage layer
pub use storage::{
    ActionEvent, CoActivationEvent, DeferredWriteBatch, Store, StoreError, StoreStats,
    SynapseDelta, LATEST_SCHEMA_VERSION,
};

// Encoder
pub use encode::{EncodeRequest, EncodeResult, Encoder};

// Activation engine
pub use activation::{
    sigmoid, ActivationGraph, ActivationMap, Anchor, NodeScore, SpreadParams, TrailParams,
};

// Learning rule
pub use learning::LearningRule;

// Recall pipeline
pub use recall::{
    ActivatedNeuron, QueryRequest, RecallPipeline, RetrievalResult, ScoreBreakdown,
    SynthesisMethod,
};

// Lifecycle
pub use lifecycle::{DecayManager, DecayReport, PatternReport};

// Consolidation
pub use consolidation::{ConsolidationReport, Strategy, WorkflowTemplate};

// Snapshots
pub use snapshot::{ImportReport, MergeStrategy, Snapshot, SnapshotChunk, SnapshotExporter};

// Health
pub use health::{HealthComponents, HealthReport};

// Engine facade
pub use engine::{BrainStats, Engine, EngineOptions, NeuronFilter, NeuronPage};

// Errors
pub use error::{EngineError, Result};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Brain, BrainConfig, EncodeRequest, EncodeResult, Engine, EngineError, EngineOptions,
        Fiber, MemoryType, Neuron, NeuronType, QueryRequest, Result, RetrievalResult, Strategy,
        SynapseType,
    };
}
