//! Engine - The public asynchronous facade
//!
//! One engine manages many brains. Each brain maps to one database file
//! under the base directory, carries its own tokenizer and extractor, and
//! serializes encodes through a per-brain write gate while retrievals run
//! in parallel on snapshots. Retrieval side effects flush after the
//! result exists, so cancelling a call leaves no trace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::consolidation::{self, ConsolidationReport, Strategy};
use crate::encode::{EncodeRequest, EncodeResult, Encoder};
use crate::error::{EngineError, Result};
use crate::extract::Extractor;
use crate::graph::{Brain, Fiber, Neuron, NeuronType};
use crate::health::{self, HealthReport};
use crate::lifecycle::{reinforce_fiber, DecayManager, DecayReport};
use crate::recall::{QueryRequest, RecallPipeline, RetrievalResult};
use crate::snapshot::{self, ImportReport, MergeStrategy, Snapshot};
use crate::storage::{Store, StoreError, StoreStats};

// ============================================================================
// OPTIONS
// ============================================================================

/// Engine construction options
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Base directory for brain files; the platform data directory is
    /// used when absent
    pub base_dir: Option<PathBuf>,
    /// Keep every brain in memory (tests, throwaway agents)
    pub in_memory: bool,
}

// ============================================================================
// BRAIN HANDLE
// ============================================================================

/// Everything one open brain needs
pub struct BrainHandle {
    brain: Brain,
    store: Arc<Store>,
    extractor: Extractor,
    /// Encodes and maintenance serialize here; retrievals do not take it
    write_gate: Mutex<()>,
    healthy: AtomicBool,
}

impl BrainHandle {
    fn new(brain: Brain, store: Store) -> Self {
        Self {
            brain,
            store: Arc::new(store),
            extractor: Extractor::new(),
            write_gate: Mutex::new(()),
            healthy: AtomicBool::new(true),
        }
    }

    /// Refuse writes on an unhealthy brain until a recheck passes
    fn ensure_healthy(&self) -> Result<()> {
        if self.healthy.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::Internal(
                "brain is marked unhealthy; run a recheck".to_string(),
            ))
        }
    }

    /// Storage integrity failures poison the handle
    fn note_result<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(EngineError::Internal(message)) = &result {
            if message.contains("storage integrity") {
                tracing::warn!(brain = %self.brain.id, "marking brain unhealthy: {message}");
                self.healthy.store(false, Ordering::Release);
            }
        }
        result
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Filters for neuron listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NeuronFilter {
    /// Only this neuron type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neuron_type: Option<NeuronType>,
    /// Only content containing this substring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_contains: Option<String>,
    /// Page size (defaults to 50, capped at 500)
    pub limit: usize,
    /// Page offset
    pub offset: usize,
}

/// One page of a neuron listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeuronPage {
    pub neurons: Vec<Neuron>,
    pub offset: usize,
    /// True when another page exists
    pub has_more: bool,
}

/// Brain-level statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainStats {
    pub brain_id: String,
    pub name: String,
    #[serde(flatten)]
    pub store: StoreStats,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The engine: a registry of open brains plus the operations of the
/// public contract
pub struct Engine {
    options: EngineOptions,
    brains: RwLock<HashMap<String, Arc<BrainHandle>>>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            brains: RwLock::new(HashMap::new()),
        }
    }

    /// Where a brain's database file lives
    fn brain_path(&self, brain_id: &str) -> Result<PathBuf> {
        // Path traversal through a crafted id must not escape the base
        if brain_id.is_empty()
            || !brain_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(EngineError::Invalid(format!("malformed brain id: {brain_id}")));
        }
        let base = match &self.options.base_dir {
            Some(dir) => dir.clone(),
            None => directories::ProjectDirs::from("io", "neuralmemory", "neuromem")
                .ok_or_else(|| {
                    EngineError::Internal("could not determine data directory".to_string())
                })?
                .data_dir()
                .to_path_buf(),
        };
        Ok(base.join("brains").join(format!("{brain_id}.db")))
    }

    /// Create a brain and open its store
    pub async fn create_brain(&self, name: &str) -> Result<Brain> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("empty brain name".to_string()));
        }
        let brain = Brain::new(name.trim());
        let store = if self.options.in_memory {
            Store::open_in_memory()?
        } else {
            Store::open(&self.brain_path(&brain.id)?)?
        };
        store.save_brain(&brain)?;
        tracing::info!(brain = %brain.id, name = %brain.name, "brain created");

        let handle = Arc::new(BrainHandle::new(brain.clone(), store));
        self.brains
            .write()
            .await
            .insert(brain.id.clone(), handle);
        Ok(brain)
    }

    /// Look up an open brain, or open its file on first access
    async fn handle(&self, brain_id: &str) -> Result<Arc<BrainHandle>> {
        if let Some(handle) = self.brains.read().await.get(brain_id) {
            return Ok(handle.clone());
        }
        if self.options.in_memory {
            return Err(EngineError::NotFound(format!("brain {brain_id}")));
        }

        let path = self.brain_path(brain_id)?;
        if !path.exists() {
            return Err(EngineError::NotFound(format!("brain {brain_id}")));
        }
        let store = Store::open(&path)?;
        let brain = store
            .load_brain()?
            .ok_or_else(|| EngineError::NotFound(format!("brain {brain_id}")))?;
        let handle = Arc::new(BrainHandle::new(brain, store));
        let mut brains = self.brains.write().await;
        Ok(brains
            .entry(brain_id.to_string())
            .or_insert(handle)
            .clone())
    }

    /// Encode one memory. Encodes are serialized per brain; a concurrent
    /// retrieval sees either the whole memory or none of it.
    pub async fn encode(&self, brain_id: &str, request: &EncodeRequest) -> Result<EncodeResult> {
        let handle = self.handle(brain_id).await?;
        handle.ensure_healthy()?;
        let _gate = handle.write_gate.lock().await;
        let encoder = Encoder::new(&handle.store, &handle.extractor, &handle.brain.config);
        let result = encoder.encode(request, Utc::now());
        handle.note_result(result)
    }

    /// Run a retrieval. The soft deadline yields a partial result rather
    /// than an error; deferred writes flush only after the result exists.
    pub async fn query(&self, brain_id: &str, request: &QueryRequest) -> Result<RetrievalResult> {
        if request.query.trim().is_empty() {
            return Err(EngineError::Invalid("empty query".to_string()));
        }
        let handle = self.handle(brain_id).await?;
        let deadline =
            Instant::now() + Duration::from_millis(handle.brain.config.retrieval_timeout_ms);

        let pipeline = RecallPipeline::new(&handle.store, &handle.extractor, &handle.brain.config);
        let (result, batch) = pipeline.run(request, Utc::now(), Some(deadline))?;

        // Side effects land after the result is computed; a dropped
        // future flushes nothing
        if let Err(error) = handle.store.apply_deferred(&batch) {
            tracing::warn!(brain = %brain_id, %error, "deferred write flush failed");
            let _: Result<()> = handle.note_result(Err(error.into()));
        }
        Ok(result)
    }

    /// Directly reinforce a fiber (explicit activation, maturation
    /// bookkeeping, spacing-effect day tracking)
    pub async fn reinforce(&self, brain_id: &str, fiber_id: &str) -> Result<()> {
        let handle = self.handle(brain_id).await?;
        handle.ensure_healthy()?;
        let _gate = handle.write_gate.lock().await;
        let result = reinforce_fiber(&handle.store, &handle.brain.config, fiber_id, Utc::now());
        handle.note_result(result)
    }

    /// List neurons with filters and paging
    pub async fn list_neurons(&self, brain_id: &str, filter: &NeuronFilter) -> Result<NeuronPage> {
        let handle = self.handle(brain_id).await?;
        let limit = if filter.limit == 0 {
            50
        } else {
            filter.limit.min(500)
        };

        let mut neurons = match &filter.content_contains {
            Some(needle) => handle
                .store
                .find_neurons_containing(needle, limit + filter.offset + 1)?
                .into_iter()
                .skip(filter.offset)
                .collect::<Vec<_>>(),
            None => handle.store.neurons_page(limit + 1, filter.offset)?,
        };
        if let Some(neuron_type) = filter.neuron_type {
            neurons.retain(|n| n.neuron_type == neuron_type);
        }
        let has_more = neurons.len() > limit;
        neurons.truncate(limit);
        Ok(NeuronPage {
            neurons,
            offset: filter.offset,
            has_more,
        })
    }

    /// Fetch one fiber
    pub async fn get_fiber(&self, brain_id: &str, fiber_id: &str) -> Result<Option<Fiber>> {
        let handle = self.handle(brain_id).await?;
        Ok(handle.store.get_fiber(fiber_id)?)
    }

    /// Run a decay sweep
    pub async fn decay(&self, brain_id: &str, dry_run: bool) -> Result<DecayReport> {
        let handle = self.handle(brain_id).await?;
        if !dry_run {
            handle.ensure_healthy()?;
        }
        let _gate = handle.write_gate.lock().await;
        let manager = DecayManager::new(&handle.store, &handle.brain.config);
        handle.note_result(manager.run(Utc::now(), dry_run))
    }

    /// Run one consolidation strategy
    pub async fn consolidate(
        &self,
        brain_id: &str,
        strategy: Strategy,
        dry_run: bool,
        max_duration: Option<Duration>,
    ) -> Result<ConsolidationReport> {
        let handle = self.handle(brain_id).await?;
        if !dry_run {
            handle.ensure_healthy()?;
        }
        let _gate = handle.write_gate.lock().await;
        let result = consolidation::consolidate(
            &handle.store,
            &handle.brain.config,
            strategy,
            dry_run,
            max_duration,
            Utc::now(),
        );
        handle.note_result(result)
    }

    /// Export the whole brain as a snapshot
    pub async fn export(&self, brain_id: &str, exclude_sensitive: bool) -> Result<Snapshot> {
        let handle = self.handle(brain_id).await?;
        snapshot::export_snapshot(&handle.store, brain_id, exclude_sensitive, Utc::now())
    }

    /// Merge a snapshot into a brain
    pub async fn import(
        &self,
        brain_id: &str,
        snapshot: &Snapshot,
        strategy: MergeStrategy,
    ) -> Result<ImportReport> {
        let handle = self.handle(brain_id).await?;
        handle.ensure_healthy()?;
        let _gate = handle.write_gate.lock().await;
        let result = snapshot::import_snapshot(&handle.store, snapshot, strategy);
        handle.note_result(result)
    }

    /// Brain statistics
    pub async fn stats(&self, brain_id: &str) -> Result<BrainStats> {
        let handle = self.handle(brain_id).await?;
        Ok(BrainStats {
            brain_id: handle.brain.id.clone(),
            name: handle.brain.name.clone(),
            store: handle.store.stats()?,
        })
    }

    /// Graded health report
    pub async fn health(&self, brain_id: &str) -> Result<HealthReport> {
        let handle = self.handle(brain_id).await?;
        health::assess(&handle.store, Utc::now())
    }

    /// Re-run the storage integrity check; success clears the unhealthy
    /// flag
    pub async fn recheck(&self, brain_id: &str) -> Result<bool> {
        let handle = self.handle(brain_id).await?;
        match handle.store.integrity_check() {
            Ok(()) => {
                handle.healthy.store(true, Ordering::Release);
                Ok(true)
            }
            Err(StoreError::Corrupt(reason)) => {
                tracing::warn!(brain = %brain_id, %reason, "integrity recheck failed");
                handle.healthy.store(false, Ordering::Release);
                Ok(false)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Delete a brain: closes the handle and removes its file
    pub async fn delete_brain(&self, brain_id: &str) -> Result<()> {
        // Resolve first so a brain that exists on disk but was never
        // opened this session still deletes
        let _ = self.handle(brain_id).await?;
        let handle = self
            .brains
            .write()
            .await
            .remove(brain_id)
            .ok_or_else(|| EngineError::NotFound(format!("brain {brain_id}")))?;
        if let Some(path) = handle.store.path() {
            std::fs::remove_file(path)
                .map_err(|e| EngineError::Internal(format!("removing brain file: {e}")))?;
        }
        tracing::info!(brain = %brain_id, "brain deleted");
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("base_dir", &self.options.base_dir)
            .field("in_memory", &self.options.in_memory)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineOptions {
            base_dir: None,
            in_memory: true,
        })
    }

    #[tokio::test]
    async fn test_encode_then_query() {
        let engine = engine();
        let brain = engine.create_brain("agent").await.unwrap();

        let encoded = engine
            .encode(
                &brain.id,
                &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
            )
            .await
            .unwrap();
        assert!(encoded.neurons_created > 0);

        let result = engine
            .query(&brain.id, &QueryRequest::new("What did Alice suggest?"))
            .await
            .unwrap();
        assert!(result.confidence >= 0.5);
        assert!(result.answer.contains("JWT"));
    }

    #[tokio::test]
    async fn test_unknown_brain_is_not_found() {
        let engine = engine();
        let err = engine
            .query("b-missing", &QueryRequest::new("anything"))
            .await;
        assert!(matches!(err, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected() {
        let engine = engine();
        let brain = engine.create_brain("agent").await.unwrap();
        assert!(matches!(
            engine.query(&brain.id, &QueryRequest::new("   ")).await,
            Err(EngineError::Invalid(_))
        ));
        assert!(matches!(
            engine.create_brain("  ").await,
            Err(EngineError::Invalid(_))
        ));
        assert!(matches!(
            engine.brain_path("../escape"),
            Err(EngineError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_list_neurons_filters_and_pages() {
        let engine = engine();
        let brain = engine.create_brain("agent").await.unwrap();
        engine
            .encode(&brain.id, &EncodeRequest::new("Alice suggested JWT for auth"))
            .await
            .unwrap();

        let page = engine
            .list_neurons(
                &brain.id,
                &NeuronFilter {
                    neuron_type: Some(NeuronType::Entity),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(page.neurons.iter().all(|n| n.neuron_type == NeuronType::Entity));
        assert!(page.neurons.iter().any(|n| n.content == "Alice"));
    }

    #[tokio::test]
    async fn test_export_import_between_brains() {
        let engine = engine();
        let source = engine.create_brain("source").await.unwrap();
        engine
            .encode(&source.id, &EncodeRequest::new("Database host is db.example.com"))
            .await
            .unwrap();

        let snapshot = engine.export(&source.id, false).await.unwrap();
        let target = engine.create_brain("target").await.unwrap();
        let report = engine
            .import(&target.id, &snapshot, MergeStrategy::Skip)
            .await
            .unwrap();
        assert!(report.neurons_added > 0);

        let source_stats = engine.stats(&source.id).await.unwrap();
        let target_stats = engine.stats(&target.id).await.unwrap();
        assert_eq!(source_stats.store.neurons, target_stats.store.neurons);
        assert_eq!(source_stats.store.fibers, target_stats.store.fibers);
    }

    #[tokio::test]
    async fn test_decay_and_consolidate_run() {
        let engine = engine();
        let brain = engine.create_brain("agent").await.unwrap();
        engine
            .encode(&brain.id, &EncodeRequest::new("Alice suggested JWT for auth"))
            .await
            .unwrap();

        let decay = engine.decay(&brain.id, true).await.unwrap();
        assert!(decay.dry_run);

        let report = engine
            .consolidate(&brain.id, Strategy::Prune, true, None)
            .await
            .unwrap();
        assert!(report.dry_run);

        let health = engine.health(&brain.id).await.unwrap();
        assert!(health.storage_ok);
        assert!(engine.recheck(&brain.id).await.unwrap());
    }
}
