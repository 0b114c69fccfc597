//! Snapshot export/import - Whole-brain serialization
//!
//! Exports are chunked: a cursor walks the store in bounded pages so a
//! large brain streams without ever materializing twice. Field order in
//! the JSON is fixed (alphabetical) so exports diff cleanly. Importers
//! tolerate unknown keys and missing optional fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::graph::{Fiber, Maturation, Neuron, NeuronState, Synapse};
use crate::storage::Store;

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Rows per export chunk
const CHUNK_SIZE: usize = 256;

/// Metadata keys with these prefixes are dropped by sensitive export
const SENSITIVE_PREFIXES: &[&str] = &["secret_", "private_"];

// ============================================================================
// TYPES
// ============================================================================

/// Entity counts carried in the snapshot trailer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotCounts {
    pub fibers: usize,
    pub maturations: usize,
    pub neuron_states: usize,
    pub neurons: usize,
    pub synapses: usize,
}

/// A complete brain export. Fields are declared alphabetically so the
/// serialized order is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub brain_id: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub fibers: Vec<Fiber>,
    #[serde(default)]
    pub maturations: Vec<Maturation>,
    #[serde(default)]
    pub metadata: SnapshotCounts,
    #[serde(default)]
    pub neuron_states: Vec<NeuronState>,
    #[serde(default)]
    pub neurons: Vec<Neuron>,
    #[serde(default)]
    pub synapses: Vec<Synapse>,
    pub version: u32,
}

/// One bounded page of a streaming export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotChunk {
    Neurons(Vec<Neuron>),
    NeuronStates(Vec<NeuronState>),
    Synapses(Vec<Synapse>),
    Fibers(Vec<Fiber>),
    Maturations(Vec<Maturation>),
}

/// How an import resolves id collisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Existing rows win
    #[default]
    Skip,
    /// Snapshot rows win
    Overwrite,
    /// The row with the later creation timestamp wins
    Newest,
}

/// What an import did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub neurons_added: usize,
    pub synapses_added: usize,
    pub fibers_added: usize,
    pub maturations_added: usize,
    pub states_added: usize,
    pub conflicts: usize,
    pub skipped: usize,
}

// ============================================================================
// EXPORT
// ============================================================================

/// Streaming export cursor. Phases run in dependency order so a partial
/// consumer always holds referentially closed data.
pub struct SnapshotExporter<'a> {
    store: &'a Store,
    exclude_sensitive: bool,
    phase: usize,
    offset: usize,
}

impl<'a> SnapshotExporter<'a> {
    pub fn new(store: &'a Store, exclude_sensitive: bool) -> Self {
        Self {
            store,
            exclude_sensitive,
            phase: 0,
            offset: 0,
        }
    }

    /// Produce the next chunk, or `None` when the export is complete
    pub fn next_chunk(&mut self) -> Result<Option<SnapshotChunk>> {
        loop {
            let chunk = match self.phase {
                0 => {
                    let mut neurons = self.store.neurons_page(CHUNK_SIZE, self.offset)?;
                    if self.exclude_sensitive {
                        for neuron in &mut neurons {
                            neuron.metadata.retain(|key, _| {
                                !SENSITIVE_PREFIXES.iter().any(|p| key.starts_with(p))
                            });
                        }
                    }
                    (!neurons.is_empty()).then_some(SnapshotChunk::Neurons(neurons))
                }
                1 => {
                    let states = self.store.states_page(CHUNK_SIZE, self.offset)?;
                    (!states.is_empty()).then_some(SnapshotChunk::NeuronStates(states))
                }
                2 => {
                    let synapses = self.store.synapses_page(CHUNK_SIZE, self.offset)?;
                    (!synapses.is_empty()).then_some(SnapshotChunk::Synapses(synapses))
                }
                3 => {
                    let fibers = self.store.fibers_page(CHUNK_SIZE, self.offset)?;
                    (!fibers.is_empty()).then_some(SnapshotChunk::Fibers(fibers))
                }
                4 => {
                    let maturations = self.store.maturations_page(CHUNK_SIZE, self.offset)?;
                    (!maturations.is_empty()).then_some(SnapshotChunk::Maturations(maturations))
                }
                _ => return Ok(None),
            };

            match chunk {
                Some(chunk) => {
                    self.offset += CHUNK_SIZE;
                    return Ok(Some(chunk));
                }
                None => {
                    self.phase += 1;
                    self.offset = 0;
                }
            }
        }
    }
}

/// Materialize a full snapshot by draining the chunk cursor
pub fn export_snapshot(
    store: &Store,
    brain_id: &str,
    exclude_sensitive: bool,
    now: DateTime<Utc>,
) -> Result<Snapshot> {
    let mut snapshot = Snapshot {
        brain_id: brain_id.to_string(),
        exported_at: now,
        fibers: Vec::new(),
        maturations: Vec::new(),
        metadata: SnapshotCounts::default(),
        neuron_states: Vec::new(),
        neurons: Vec::new(),
        synapses: Vec::new(),
        version: SNAPSHOT_VERSION,
    };

    let mut exporter = SnapshotExporter::new(store, exclude_sensitive);
    while let Some(chunk) = exporter.next_chunk()? {
        match chunk {
            SnapshotChunk::Neurons(items) => snapshot.neurons.extend(items),
            SnapshotChunk::NeuronStates(items) => snapshot.neuron_states.extend(items),
            SnapshotChunk::Synapses(items) => snapshot.synapses.extend(items),
            SnapshotChunk::Fibers(items) => snapshot.fibers.extend(items),
            SnapshotChunk::Maturations(items) => snapshot.maturations.extend(items),
        }
    }

    snapshot.metadata = SnapshotCounts {
        fibers: snapshot.fibers.len(),
        maturations: snapshot.maturations.len(),
        neuron_states: snapshot.neuron_states.len(),
        neurons: snapshot.neurons.len(),
        synapses: snapshot.synapses.len(),
    };
    Ok(snapshot)
}

// ============================================================================
// IMPORT
// ============================================================================

/// Merge a snapshot into a store
pub fn import_snapshot(
    store: &Store,
    snapshot: &Snapshot,
    strategy: MergeStrategy,
) -> Result<ImportReport> {
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(EngineError::Invalid(format!(
            "snapshot version {} is newer than supported {}",
            snapshot.version, SNAPSHOT_VERSION
        )));
    }

    let mut report = ImportReport::default();

    for neuron in &snapshot.neurons {
        match store.get_neuron(&neuron.id)? {
            None => {
                store.add_neuron(neuron)?;
                report.neurons_added += 1;
            }
            Some(existing) => {
                report.conflicts += 1;
                let overwrite = match strategy {
                    MergeStrategy::Skip => false,
                    MergeStrategy::Overwrite => true,
                    MergeStrategy::Newest => neuron.created_at > existing.created_at,
                };
                if overwrite {
                    store.update_neuron_metadata(&neuron.id, &neuron.metadata)?;
                } else {
                    report.skipped += 1;
                }
            }
        }
    }

    for state in &snapshot.neuron_states {
        store.upsert_state(state)?;
        report.states_added += 1;
    }

    for synapse in &snapshot.synapses {
        match store.get_synapse(&synapse.id)? {
            None => {
                store.add_synapse(synapse)?;
                report.synapses_added += 1;
            }
            Some(existing) => {
                report.conflicts += 1;
                let overwrite = match strategy {
                    MergeStrategy::Skip => false,
                    MergeStrategy::Overwrite => true,
                    MergeStrategy::Newest => synapse.created_at > existing.created_at,
                };
                if overwrite {
                    store.update_synapse_weight(
                        &synapse.id,
                        synapse.weight,
                        synapse.reinforced_count,
                        synapse.last_activated.unwrap_or(synapse.created_at),
                    )?;
                    store.update_synapse_metadata(&synapse.id, &synapse.metadata)?;
                } else {
                    report.skipped += 1;
                }
            }
        }
    }

    for fiber in &snapshot.fibers {
        match store.get_fiber(&fiber.id)? {
            None => {
                store.save_fiber(fiber)?;
                report.fibers_added += 1;
            }
            Some(existing) => {
                report.conflicts += 1;
                let overwrite = match strategy {
                    MergeStrategy::Skip => false,
                    MergeStrategy::Overwrite => true,
                    MergeStrategy::Newest => fiber.created_at > existing.created_at,
                };
                if overwrite {
                    store.save_fiber(fiber)?;
                } else {
                    report.skipped += 1;
                }
            }
        }
    }

    for maturation in &snapshot.maturations {
        match store.get_maturation(&maturation.fiber_id)? {
            None => {
                store.save_maturation(maturation)?;
                report.maturations_added += 1;
            }
            Some(_) if strategy != MergeStrategy::Skip => {
                store.save_maturation(maturation)?;
                report.conflicts += 1;
            }
            Some(_) => {
                report.conflicts += 1;
                report.skipped += 1;
            }
        }
    }

    tracing::info!(
        neurons = report.neurons_added,
        synapses = report.synapses_added,
        fibers = report.fibers_added,
        conflicts = report.conflicts,
        "snapshot imported"
    );
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::encode::{EncodeRequest, Encoder};
    use crate::extract::Extractor;
    use crate::graph::BrainConfig;

    fn populated_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        let extractor = Extractor::new();
        let config = BrainConfig::default();
        let encoder = Encoder::new(&store, &extractor, &config);
        encoder
            .encode(
                &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
                Utc::now(),
            )
            .unwrap();
        encoder
            .encode(&EncodeRequest::new("Database host is db.example.com"), Utc::now())
            .unwrap();
        store
    }

    fn id_sets(store: &Store) -> (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>) {
        let neurons = store
            .neurons_page(10_000, 0)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        let synapses = store
            .synapses_page(10_000, 0)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        let fibers = store
            .fibers_page(10_000, 0)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        (neurons, synapses, fibers)
    }

    #[test]
    fn test_export_import_roundtrip_preserves_graph() {
        let source = populated_store();
        let snapshot = export_snapshot(&source, "b-test", false, Utc::now()).unwrap();
        assert_eq!(snapshot.metadata.neurons, snapshot.neurons.len());
        assert!(snapshot.metadata.neurons > 0);

        let target = Store::open_in_memory().unwrap();
        let report = import_snapshot(&target, &snapshot, MergeStrategy::Skip).unwrap();
        assert_eq!(report.neurons_added, snapshot.neurons.len());
        assert_eq!(report.conflicts, 0);

        assert_eq!(id_sets(&source), id_sets(&target));
    }

    #[test]
    fn test_reimport_skip_counts_conflicts() {
        let store = populated_store();
        let snapshot = export_snapshot(&store, "b-test", false, Utc::now()).unwrap();
        let report = import_snapshot(&store, &snapshot, MergeStrategy::Skip).unwrap();
        assert_eq!(report.neurons_added, 0);
        assert_eq!(report.conflicts > 0, true);
        assert_eq!(report.skipped > 0, true);
    }

    #[test]
    fn test_chunked_export_covers_everything() {
        let store = populated_store();
        let mut exporter = SnapshotExporter::new(&store, false);
        let mut neuron_count = 0;
        while let Some(chunk) = exporter.next_chunk().unwrap() {
            if let SnapshotChunk::Neurons(items) = chunk {
                neuron_count += items.len();
            }
        }
        assert_eq!(neuron_count as i64, store.stats().unwrap().neurons);
    }

    #[test]
    fn test_sensitive_metadata_excluded() {
        let store = Store::open_in_memory().unwrap();
        let mut neuron = crate::graph::Neuron::new(crate::graph::NeuronType::Entity, "api host");
        neuron
            .metadata
            .insert("secret_token".into(), serde_json::Value::String("x".into()));
        neuron
            .metadata
            .insert("region".into(), serde_json::Value::String("eu".into()));
        store.add_neuron(&neuron).unwrap();

        let open = export_snapshot(&store, "b", false, Utc::now()).unwrap();
        assert!(open.neurons[0].metadata.contains_key("secret_token"));

        let redacted = export_snapshot(&store, "b", true, Utc::now()).unwrap();
        assert!(!redacted.neurons[0].metadata.contains_key("secret_token"));
        assert!(redacted.neurons[0].metadata.contains_key("region"));
    }

    #[test]
    fn test_import_tolerates_unknown_keys() {
        let json = r#"{
            "brainId": "b-x",
            "exportedAt": "2024-03-13T09:00:00Z",
            "version": 1,
            "futureField": {"nested": true},
            "neurons": []
        }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.brain_id, "b-x");
        assert!(snapshot.neurons.is_empty());
    }

    #[test]
    fn test_newer_version_rejected() {
        let store = Store::open_in_memory().unwrap();
        let mut snapshot = export_snapshot(&store, "b", false, Utc::now()).unwrap();
        snapshot.version = SNAPSHOT_VERSION + 1;
        assert!(matches!(
            import_snapshot(&store, &snapshot, MergeStrategy::Skip),
            Err(EngineError::Invalid(_))
        ));
    }
}
