//! SQLite Storage Implementation
//!
//! One database file per brain. Separate reader/writer connections give
//! WAL-style one-writer/many-readers semantics; all methods take `&self`,
//! making [`Store`] `Send + Sync` so the engine can hold it in an `Arc`.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::deferred::DeferredWriteBatch;
use super::migrations;
use super::{Result, StoreError};
use crate::extract::simhash::hamming;
use crate::graph::{
    Brain, BrainConfig, Direction, Fiber, Maturation, MaturationStage, MemoryType, Neuron,
    NeuronState, NeuronType, Synapse, SynapseType,
};

/// Chunk size for `IN (...)` reads
const IN_CHUNK: usize = 500;

/// Write retry budget for lock contention
const WRITE_RETRIES: u32 = 3;

// ============================================================================
// AUX TYPES
// ============================================================================

/// An action observation for workflow mining
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    /// Session the action belongs to
    pub session_id: String,
    /// Action label
    pub action: String,
    /// Tags active when the action ran
    pub tags: Vec<String>,
    /// When the action ran
    pub occurred_at: DateTime<Utc>,
}

/// Row counts and aggregates for one brain
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub neurons: i64,
    pub synapses: i64,
    pub fibers: i64,
    pub maturations: i64,
    pub co_activation_events: i64,
    pub action_events: i64,
    pub average_activation: f64,
    pub fibers_by_stage: HashMap<String, i64>,
}

// ============================================================================
// STORE
// ============================================================================

/// Embedded store for one brain
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Apply PRAGMAs and optional encryption to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        #[cfg(feature = "encryption")]
        {
            if let Ok(key) = std::env::var("NEUROMEM_ENCRYPTION_KEY") {
                if !key.is_empty() {
                    conn.pragma_update(None, "key", &key)?;
                }
            }
        }

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        Ok(())
    }

    /// Open (or create) the store at `path`, running migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer_conn = Connection::open(path)?;

        // Restrict database file permissions to owner-only on Unix
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store (shared-cache URI so reader and writer see
    /// the same database). Used by tests and throwaway brains.
    pub fn open_in_memory() -> Result<Self> {
        let uri = format!(
            "file:neuromem-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let writer_conn = Connection::open_with_flags(&uri, flags)?;
        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open_with_flags(&uri, flags)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            path: None,
        })
    }

    /// The backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn write_lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))
    }

    fn read_lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))
    }

    /// Run a write closure with bounded retries on lock contention
    fn with_write_retry<T>(&self, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let mut delay = StdDuration::from_millis(50);
        for attempt in 0..=WRITE_RETRIES {
            let outcome = {
                let conn = self.write_lock()?;
                op(&conn)
            };
            match outcome {
                Err(StoreError::Database(e)) if is_busy(&e) && attempt < WRITE_RETRIES => {
                    tracing::warn!("write contention, retrying (attempt {})", attempt + 1);
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(StoreError::Database(e)) if is_busy(&e) => {
                    return Err(StoreError::Busy(e.to_string()));
                }
                other => return other,
            }
        }
        unreachable!("retry loop always returns")
    }

    // ========================================================================
    // BRAIN
    // ========================================================================

    /// Upsert the brain row (one per file)
    pub fn save_brain(&self, brain: &Brain) -> Result<()> {
        let config = serde_json::to_string(&brain.config)
            .map_err(|e| StoreError::Corrupt(format!("config serialization: {e}")))?;
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO brains (id, name, config, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, config = excluded.config",
                params![brain.id, brain.name, config, brain.created_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Load the brain row, if the file has one
    pub fn load_brain(&self) -> Result<Option<Brain>> {
        let reader = self.read_lock()?;
        reader
            .query_row(
                "SELECT id, name, config, created_at FROM brains LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?
            .map(|(id, name, config, created_at)| {
                let config: BrainConfig = serde_json::from_str(&config)
                    .map_err(|e| StoreError::Corrupt(format!("config row: {e}")))?;
                Ok(Brain {
                    id,
                    name,
                    config,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .transpose()
    }

    // ========================================================================
    // NEURONS
    // ========================================================================

    /// Insert a neuron, idempotent on `(type, canonical)`. Returns the id
    /// that owns the identity — the new one, or the existing one.
    pub fn add_neuron(&self, neuron: &Neuron) -> Result<String> {
        let canonical = neuron.canonical_content();
        let metadata = serde_json::to_string(&neuron.metadata)
            .map_err(|e| StoreError::Corrupt(format!("neuron metadata: {e}")))?;
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO neurons (id, neuron_type, content, canonical, metadata, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(neuron_type, canonical) DO NOTHING",
                params![
                    neuron.id,
                    neuron.neuron_type.as_str(),
                    neuron.content,
                    canonical,
                    metadata,
                    neuron.content_hash.map(|h| h as i64),
                    neuron.created_at.to_rfc3339(),
                ],
            )?;
            let id: String = conn.query_row(
                "SELECT id FROM neurons WHERE neuron_type = ?1 AND canonical = ?2",
                params![neuron.neuron_type.as_str(), canonical],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    /// Get a neuron by id
    pub fn get_neuron(&self, id: &str) -> Result<Option<Neuron>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(&format!("{NEURON_SELECT} WHERE id = ?1"))?;
        stmt.query_row(params![id], neuron_from_row)
            .optional()?
            .map(finish_neuron)
            .transpose()
    }

    /// Find the neuron owning `(type, canonical content)`
    pub fn find_neuron(&self, neuron_type: NeuronType, canonical: &str) -> Result<Option<Neuron>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{NEURON_SELECT} WHERE neuron_type = ?1 AND canonical = ?2"))?;
        stmt.query_row(params![neuron_type.as_str(), canonical], neuron_from_row)
            .optional()?
            .map(finish_neuron)
            .transpose()
    }

    /// Batch fetch neurons by id
    pub fn get_neurons_batch(&self, ids: &BTreeSet<String>) -> Result<Vec<Neuron>> {
        let reader = self.read_lock()?;
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.iter().cloned().collect::<Vec<_>>().chunks(IN_CHUNK) {
            let sql = format!("{NEURON_SELECT} WHERE id IN ({})", placeholders(chunk.len()));
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), neuron_from_row)?;
            for row in rows {
                out.push(finish_neuron(row?)?);
            }
        }
        Ok(out)
    }

    /// Neurons whose content hash is within `max_distance` of `hash`.
    /// Scans hash-bearing rows; brains at this engine's scale keep that a
    /// short, index-backed pass.
    pub fn find_neurons_by_hash(&self, hash: u64, max_distance: u32) -> Result<Vec<(Neuron, u32)>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{NEURON_SELECT} WHERE content_hash IS NOT NULL"))?;
        let rows = stmt.query_map([], neuron_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            let neuron = finish_neuron(row?)?;
            let Some(candidate) = neuron.content_hash else {
                continue;
            };
            let distance = hamming(hash, candidate);
            if distance <= max_distance {
                out.push((neuron, distance));
            }
        }
        out.sort_by_key(|(n, d)| (*d, n.id.clone()));
        Ok(out)
    }

    /// Neurons whose canonical content contains `needle`
    pub fn find_neurons_containing(&self, needle: &str, limit: usize) -> Result<Vec<Neuron>> {
        let pattern = format!(
            "%{}%",
            needle.to_lowercase().replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(&format!(
            "{NEURON_SELECT} WHERE canonical LIKE ?1 ESCAPE '\\' ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, limit as i64], neuron_from_row)?;
        rows.map(|r| finish_neuron(r?)).collect()
    }

    /// Page through neurons for listings and export
    pub fn neurons_page(&self, limit: usize, offset: usize) -> Result<Vec<Neuron>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{NEURON_SELECT} ORDER BY id LIMIT ?1 OFFSET ?2"))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], neuron_from_row)?;
        rows.map(|r| finish_neuron(r?)).collect()
    }

    /// Overwrite a neuron's metadata map
    pub fn update_neuron_metadata(
        &self,
        id: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let json = serde_json::to_string(metadata)
            .map_err(|e| StoreError::Corrupt(format!("neuron metadata: {e}")))?;
        self.with_write_retry(|conn| {
            let changed = conn.execute(
                "UPDATE neurons SET metadata = ?2 WHERE id = ?1",
                params![id, json],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("neuron {id}")));
            }
            Ok(())
        })
    }

    /// Delete neurons and their cascading state/synapse rows
    pub fn delete_neurons(&self, ids: &[String]) -> Result<usize> {
        self.with_write_retry(|conn| {
            let mut deleted = 0;
            for chunk in ids.chunks(IN_CHUNK) {
                let sql = format!("DELETE FROM neurons WHERE id IN ({})", placeholders(chunk.len()));
                deleted += conn.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
            }
            Ok(deleted)
        })
    }

    // ========================================================================
    // NEURON STATES
    // ========================================================================

    /// Batch fetch states; neurons without a row are absent from the result
    pub fn get_states_batch(&self, ids: &BTreeSet<String>) -> Result<HashMap<String, NeuronState>> {
        let reader = self.read_lock()?;
        let mut out = HashMap::with_capacity(ids.len());
        for chunk in ids.iter().cloned().collect::<Vec<_>>().chunks(IN_CHUNK) {
            let sql = format!("{STATE_SELECT} WHERE neuron_id IN ({})", placeholders(chunk.len()));
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), state_from_row)?;
            for row in rows {
                let state = finish_state(row?)?;
                out.insert(state.neuron_id.clone(), state);
            }
        }
        Ok(out)
    }

    /// Page through states for decay sweeps and export
    pub fn states_page(&self, limit: usize, offset: usize) -> Result<Vec<NeuronState>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{STATE_SELECT} ORDER BY neuron_id LIMIT ?1 OFFSET ?2"))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], state_from_row)?;
        rows.map(|r| finish_state(r?)).collect()
    }

    /// Upsert one state row
    pub fn upsert_state(&self, state: &NeuronState) -> Result<()> {
        self.with_write_retry(|conn| upsert_state_tx(conn, state))
    }

    // ========================================================================
    // SYNAPSES
    // ========================================================================

    /// Insert a synapse. On an existing `(source, target, type)` edge the
    /// higher weight wins and metadata is left alone. Returns the id that
    /// owns the edge.
    pub fn add_synapse(&self, synapse: &Synapse) -> Result<String> {
        let metadata = serde_json::to_string(&synapse.metadata)
            .map_err(|e| StoreError::Corrupt(format!("synapse metadata: {e}")))?;
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO synapses (id, source_id, target_id, synapse_type, weight, direction,
                                       metadata, reinforced_count, last_activated, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(source_id, target_id, synapse_type)
                 DO UPDATE SET weight = MAX(weight, excluded.weight)",
                params![
                    synapse.id,
                    synapse.source_id,
                    synapse.target_id,
                    synapse.synapse_type.as_str(),
                    synapse.weight,
                    synapse.direction.as_str(),
                    metadata,
                    synapse.reinforced_count,
                    synapse.last_activated.map(|t| t.to_rfc3339()),
                    synapse.created_at.to_rfc3339(),
                ],
            )?;
            let id: String = conn.query_row(
                "SELECT id FROM synapses WHERE source_id = ?1 AND target_id = ?2 AND synapse_type = ?3",
                params![synapse.source_id, synapse.target_id, synapse.synapse_type.as_str()],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    /// Get a synapse by id
    pub fn get_synapse(&self, id: &str) -> Result<Option<Synapse>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(&format!("{SYNAPSE_SELECT} WHERE id = ?1"))?;
        stmt.query_row(params![id], synapse_from_row)
            .optional()?
            .map(finish_synapse)
            .transpose()
    }

    /// All edges between two neurons, either direction
    pub fn get_synapses_between(&self, a: &str, b: &str) -> Result<Vec<Synapse>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(&format!(
            "{SYNAPSE_SELECT} WHERE (source_id = ?1 AND target_id = ?2)
                                 OR (source_id = ?2 AND target_id = ?1)"
        ))?;
        let rows = stmt.query_map(params![a, b], synapse_from_row)?;
        rows.map(|r| finish_synapse(r?)).collect()
    }

    /// Batched adjacency read: every synapse touching any of `ids`
    pub fn synapses_for_neurons(&self, ids: &BTreeSet<String>) -> Result<Vec<Synapse>> {
        let reader = self.read_lock()?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for chunk in ids.iter().cloned().collect::<Vec<_>>().chunks(IN_CHUNK) {
            let ph = placeholders(chunk.len());
            let sql = format!(
                "{SYNAPSE_SELECT} WHERE source_id IN ({ph}) OR target_id IN ({ph})"
            );
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(chunk.iter().chain(chunk.iter())),
                synapse_from_row,
            )?;
            for row in rows {
                let synapse = finish_synapse(row?)?;
                if seen.insert(synapse.id.clone()) {
                    out.push(synapse);
                }
            }
        }
        Ok(out)
    }

    /// Outgoing edges per source neuron, for competitive normalization
    pub fn outgoing_synapses(&self, source_id: &str) -> Result<Vec<Synapse>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(&format!("{SYNAPSE_SELECT} WHERE source_id = ?1"))?;
        let rows = stmt.query_map(params![source_id], synapse_from_row)?;
        rows.map(|r| finish_synapse(r?)).collect()
    }

    /// Inbound edge counts for a neuron set, for hub detection
    pub fn inbound_counts(&self, ids: &BTreeSet<String>) -> Result<HashMap<String, i64>> {
        let reader = self.read_lock()?;
        let mut out = HashMap::new();
        for chunk in ids.iter().cloned().collect::<Vec<_>>().chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT target_id, COUNT(*) FROM synapses WHERE target_id IN ({}) GROUP BY target_id",
                placeholders(chunk.len())
            );
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (id, count) = row?;
                out.insert(id, count);
            }
        }
        Ok(out)
    }

    /// Atomically set weight and reinforcement bookkeeping.
    /// `reinforced_count` never decreases and `last_activated` never moves
    /// backward, regardless of caller ordering.
    pub fn update_synapse_weight(
        &self,
        id: &str,
        weight: f64,
        reinforced_count: u32,
        last_activated: DateTime<Utc>,
    ) -> Result<()> {
        self.with_write_retry(|conn| {
            let changed = conn.execute(
                "UPDATE synapses
                 SET weight = ?2,
                     reinforced_count = MAX(reinforced_count, ?3),
                     last_activated = MAX(COALESCE(last_activated, ''), ?4)
                 WHERE id = ?1",
                params![id, weight, reinforced_count, last_activated.to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("synapse {id}")));
            }
            Ok(())
        })
    }

    /// Overwrite a synapse's metadata map
    pub fn update_synapse_metadata(
        &self,
        id: &str,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let json = serde_json::to_string(metadata)
            .map_err(|e| StoreError::Corrupt(format!("synapse metadata: {e}")))?;
        self.with_write_retry(|conn| {
            let changed = conn.execute(
                "UPDATE synapses SET metadata = ?2 WHERE id = ?1",
                params![id, json],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("synapse {id}")));
            }
            Ok(())
        })
    }

    /// Page through synapses for export
    pub fn synapses_page(&self, limit: usize, offset: usize) -> Result<Vec<Synapse>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{SYNAPSE_SELECT} ORDER BY id LIMIT ?1 OFFSET ?2"))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], synapse_from_row)?;
        rows.map(|r| finish_synapse(r?)).collect()
    }

    /// Delete synapses by id
    pub fn delete_synapses(&self, ids: &[String]) -> Result<usize> {
        self.with_write_retry(|conn| {
            let mut deleted = 0;
            for chunk in ids.chunks(IN_CHUNK) {
                let sql = format!("DELETE FROM synapses WHERE id IN ({})", placeholders(chunk.len()));
                deleted += conn.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
            }
            Ok(deleted)
        })
    }

    // ========================================================================
    // FIBERS
    // ========================================================================

    /// Insert or fully rewrite a fiber
    pub fn save_fiber(&self, fiber: &Fiber) -> Result<()> {
        if !fiber.check_integrity() {
            return Err(StoreError::Corrupt(format!(
                "fiber {} pathway/anchor outside member set",
                fiber.id
            )));
        }
        self.with_write_retry(|conn| save_fiber_tx(conn, fiber))
    }

    /// Get a fiber by id
    pub fn get_fiber(&self, id: &str) -> Result<Option<Fiber>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(&format!("{FIBER_SELECT} WHERE id = ?1"))?;
        stmt.query_row(params![id], fiber_from_row)
            .optional()?
            .map(finish_fiber)
            .transpose()
    }

    /// Single-query batch lookup: fibers containing any of `neuron_ids`
    pub fn fibers_for_neurons(&self, neuron_ids: &BTreeSet<String>) -> Result<Vec<Fiber>> {
        if neuron_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = neuron_ids.iter().cloned().collect();
        let reader = self.read_lock()?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT DISTINCT f.id, f.neuron_ids, f.synapse_ids, f.anchor_neuron_id, f.pathway,
                        f.conductivity, f.last_conducted, f.summary, f.salience, f.auto_tags,
                        f.agent_tags, f.frequency, f.time_start, f.time_end, f.memory_type, f.created_at
                 FROM fibers f, json_each(f.neuron_ids) member
                 WHERE member.value IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), fiber_from_row)?;
            for row in rows {
                let fiber = finish_fiber(row?)?;
                if seen.insert(fiber.id.clone()) {
                    out.push(fiber);
                }
            }
        }
        Ok(out)
    }

    /// Fibers carrying `tag` in either tag set
    pub fn fibers_by_tag(&self, tag: &str) -> Result<Vec<Fiber>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(&format!(
            "{FIBER_SELECT}
             WHERE EXISTS (SELECT 1 FROM json_each(fibers.auto_tags) WHERE value = ?1)
                OR EXISTS (SELECT 1 FROM json_each(fibers.agent_tags) WHERE value = ?1)"
        ))?;
        let rows = stmt.query_map(params![tag], fiber_from_row)?;
        rows.map(|r| finish_fiber(r?)).collect()
    }

    /// Page through fibers for listings and export
    pub fn fibers_page(&self, limit: usize, offset: usize) -> Result<Vec<Fiber>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{FIBER_SELECT} ORDER BY id LIMIT ?1 OFFSET ?2"))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], fiber_from_row)?;
        rows.map(|r| finish_fiber(r?)).collect()
    }

    /// Delete a fiber (neurons and synapses survive; they may belong to
    /// other fibers)
    pub fn delete_fiber(&self, id: &str) -> Result<bool> {
        self.with_write_retry(|conn| {
            let changed = conn.execute("DELETE FROM fibers WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    // ========================================================================
    // MATURATION
    // ========================================================================

    /// Upsert a maturation record
    pub fn save_maturation(&self, maturation: &Maturation) -> Result<()> {
        self.with_write_retry(|conn| save_maturation_tx(conn, maturation))
    }

    /// Get the maturation record for a fiber
    pub fn get_maturation(&self, fiber_id: &str) -> Result<Option<Maturation>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{MATURATION_SELECT} WHERE fiber_id = ?1"))?;
        stmt.query_row(params![fiber_id], maturation_from_row)
            .optional()?
            .map(finish_maturation)
            .transpose()
    }

    /// All maturation records in a stage
    pub fn maturations_by_stage(&self, stage: MaturationStage) -> Result<Vec<Maturation>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{MATURATION_SELECT} WHERE stage = ?1 ORDER BY fiber_id"))?;
        let rows = stmt.query_map(params![stage.as_str()], maturation_from_row)?;
        rows.map(|r| finish_maturation(r?)).collect()
    }

    /// Page through maturations for export
    pub fn maturations_page(&self, limit: usize, offset: usize) -> Result<Vec<Maturation>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached(&format!("{MATURATION_SELECT} ORDER BY fiber_id LIMIT ?1 OFFSET ?2"))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], maturation_from_row)?;
        rows.map(|r| finish_maturation(r?)).collect()
    }

    // ========================================================================
    // CO-ACTIVATION EVENTS
    // ========================================================================

    /// Record one co-activation pair. Endpoints must already be canonical;
    /// [`DeferredWriteBatch::record_co_activation`] takes care of that.
    pub fn record_co_activation(&self, a: &str, b: &str, occurred_at: DateTime<Utc>) -> Result<()> {
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO co_activation_events (neuron_a, neuron_b, occurred_at) VALUES (?1, ?2, ?3)",
                params![a, b, occurred_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Pair counts within the trailing window
    pub fn co_activation_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, String, u32)>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(
            "SELECT neuron_a, neuron_b, COUNT(*) FROM co_activation_events
             WHERE occurred_at >= ?1
             GROUP BY neuron_a, neuron_b
             ORDER BY COUNT(*) DESC, neuron_a, neuron_b",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? as u32,
            ))
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Drop events older than the window
    pub fn prune_co_activation(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.with_write_retry(|conn| {
            let deleted = conn.execute(
                "DELETE FROM co_activation_events WHERE occurred_at < ?1",
                params![older_than.to_rfc3339()],
            )?;
            Ok(deleted)
        })
    }

    // ========================================================================
    // ACTION EVENTS
    // ========================================================================

    /// Append an action observation
    pub fn append_action_event(&self, event: &ActionEvent) -> Result<()> {
        let tags = serde_json::to_string(&event.tags)
            .map_err(|e| StoreError::Corrupt(format!("action tags: {e}")))?;
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO action_events (session_id, action, tags, occurred_at) VALUES (?1, ?2, ?3, ?4)",
                params![event.session_id, event.action, tags, event.occurred_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Action sequences grouped by session, in arrival order
    pub fn action_sequences(&self) -> Result<HashMap<String, Vec<ActionEvent>>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare_cached(
            "SELECT session_id, action, tags, occurred_at FROM action_events ORDER BY session_id, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out: HashMap<String, Vec<ActionEvent>> = HashMap::new();
        for row in rows {
            let (session_id, action, tags, occurred_at) = row?;
            let tags: Vec<String> = serde_json::from_str(&tags).unwrap_or_default();
            out.entry(session_id.clone()).or_default().push(ActionEvent {
                session_id,
                action,
                tags,
                occurred_at: parse_ts(&occurred_at)?,
            });
        }
        Ok(out)
    }

    /// Drop action events older than `older_than`
    pub fn prune_action_events(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.with_write_retry(|conn| {
            let deleted = conn.execute(
                "DELETE FROM action_events WHERE occurred_at < ?1",
                params![older_than.to_rfc3339()],
            )?;
            Ok(deleted)
        })
    }

    // ========================================================================
    // CANONICAL TAGS
    // ========================================================================

    /// Resolve a raw tag to its canonical form, if one is recorded
    pub fn canonical_tag(&self, tag: &str) -> Result<Option<String>> {
        let reader = self.read_lock()?;
        reader
            .query_row(
                "SELECT canonical FROM canonical_tags WHERE tag = ?1",
                params![tag],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// All recorded canonical tags
    pub fn all_canonical_tags(&self) -> Result<Vec<String>> {
        let reader = self.read_lock()?;
        let mut stmt = reader
            .prepare_cached("SELECT DISTINCT canonical FROM canonical_tags ORDER BY canonical")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Record a tag → canonical mapping
    pub fn save_canonical_tag(&self, tag: &str, canonical: &str) -> Result<()> {
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO canonical_tags (tag, canonical, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(tag) DO UPDATE SET canonical = excluded.canonical",
                params![tag, canonical, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    /// Apply an encode: all entities created by one memory become visible
    /// atomically. Neuron inserts are idempotent; the returned map carries
    /// requested-id → owning-id for every neuron.
    pub fn apply_encode(
        &self,
        neurons: &[Neuron],
        states: &[NeuronState],
        synapses: &[Synapse],
        fiber: &Fiber,
        maturation: &Maturation,
    ) -> Result<HashMap<String, String>> {
        if !fiber.check_integrity() {
            return Err(StoreError::Corrupt(format!(
                "fiber {} pathway/anchor outside member set",
                fiber.id
            )));
        }
        self.with_write_retry(|conn| {
            let tx_guard = TxGuard::begin(conn)?;
            let mut owners = HashMap::new();

            for neuron in neurons {
                let canonical = neuron.canonical_content();
                let metadata = serde_json::to_string(&neuron.metadata)
                    .map_err(|e| StoreError::Corrupt(format!("neuron metadata: {e}")))?;
                conn.execute(
                    "INSERT INTO neurons (id, neuron_type, content, canonical, metadata, content_hash, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(neuron_type, canonical) DO NOTHING",
                    params![
                        neuron.id,
                        neuron.neuron_type.as_str(),
                        neuron.content,
                        canonical,
                        metadata,
                        neuron.content_hash.map(|h| h as i64),
                        neuron.created_at.to_rfc3339(),
                    ],
                )?;
                let owner: String = conn.query_row(
                    "SELECT id FROM neurons WHERE neuron_type = ?1 AND canonical = ?2",
                    params![neuron.neuron_type.as_str(), canonical],
                    |row| row.get(0),
                )?;
                owners.insert(neuron.id.clone(), owner);
            }

            for state in states {
                let mut state = state.clone();
                if let Some(owner) = owners.get(&state.neuron_id) {
                    state.neuron_id = owner.clone();
                }
                // Never clobber an existing state with a fresh zero row
                conn.execute(
                    "INSERT INTO neuron_states (neuron_id, activation_level, access_frequency,
                         last_activated, decay_rate, firing_threshold, refractory_until,
                         refractory_period_ms, homeostatic_target, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(neuron_id) DO NOTHING",
                    state_params(&state),
                )?;
            }

            for synapse in synapses {
                let mut synapse = synapse.clone();
                if let Some(owner) = owners.get(&synapse.source_id) {
                    synapse.source_id = owner.clone();
                }
                if let Some(owner) = owners.get(&synapse.target_id) {
                    synapse.target_id = owner.clone();
                }
                if synapse.source_id == synapse.target_id {
                    continue;
                }
                let metadata = serde_json::to_string(&synapse.metadata)
                    .map_err(|e| StoreError::Corrupt(format!("synapse metadata: {e}")))?;
                conn.execute(
                    "INSERT INTO synapses (id, source_id, target_id, synapse_type, weight, direction,
                                           metadata, reinforced_count, last_activated, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(source_id, target_id, synapse_type)
                     DO UPDATE SET weight = MAX(weight, excluded.weight)",
                    params![
                        synapse.id,
                        synapse.source_id,
                        synapse.target_id,
                        synapse.synapse_type.as_str(),
                        synapse.weight,
                        synapse.direction.as_str(),
                        metadata,
                        synapse.reinforced_count,
                        synapse.last_activated.map(|t| t.to_rfc3339()),
                        synapse.created_at.to_rfc3339(),
                    ],
                )?;
            }

            let mut fiber = fiber.clone();
            fiber.neuron_ids = fiber
                .neuron_ids
                .iter()
                .map(|id| owners.get(id).cloned().unwrap_or_else(|| id.clone()))
                .collect();
            // Mapping can collapse distinct requested ids onto one owner,
            // so rebuild the pathway keeping first occurrences only
            let mut seen_path = BTreeSet::new();
            fiber.pathway = fiber
                .pathway
                .iter()
                .map(|id| owners.get(id).cloned().unwrap_or_else(|| id.clone()))
                .filter(|id| seen_path.insert(id.clone()))
                .collect();
            if let Some(owner) = owners.get(&fiber.anchor_neuron_id) {
                fiber.anchor_neuron_id = owner.clone();
            }
            save_fiber_tx(conn, &fiber)?;
            save_maturation_tx(conn, maturation)?;

            tx_guard.commit()?;
            Ok(owners)
        })
    }

    /// Flush a retrieval's deferred writes in one transaction
    pub fn apply_deferred(&self, batch: &DeferredWriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.with_write_retry(|conn| {
            let tx_guard = TxGuard::begin(conn)?;

            for delta in &batch.synapse_deltas {
                conn.execute(
                    "UPDATE synapses
                     SET weight = ?2,
                         reinforced_count = MAX(reinforced_count, ?3),
                         last_activated = MAX(COALESCE(last_activated, ''), ?4)
                     WHERE id = ?1",
                    params![
                        delta.synapse_id,
                        delta.weight,
                        delta.reinforced_count,
                        delta.last_activated.to_rfc3339(),
                    ],
                )?;
            }

            for (fiber_id, at) in &batch.conducted_fibers {
                conn.execute(
                    "UPDATE fibers
                     SET conductivity = MIN(1.0, conductivity + 0.02),
                         last_conducted = ?2,
                         frequency = frequency + 1
                     WHERE id = ?1",
                    params![fiber_id, at.to_rfc3339()],
                )?;
            }

            for event in &batch.co_activations {
                conn.execute(
                    "INSERT INTO co_activation_events (neuron_a, neuron_b, occurred_at) VALUES (?1, ?2, ?3)",
                    params![event.neuron_a, event.neuron_b, event.occurred_at.to_rfc3339()],
                )?;
            }

            for state in &batch.state_updates {
                upsert_state_tx(conn, state)?;
            }

            for maturation in &batch.maturations {
                save_maturation_tx(conn, maturation)?;
            }

            tx_guard.commit()?;
            Ok(())
        })
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Aggregate counts for stats and health reporting
    pub fn stats(&self) -> Result<StoreStats> {
        let reader = self.read_lock()?;
        let count = |table: &str| -> Result<i64> {
            reader
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(Into::into)
        };
        let neurons = count("neurons")?;
        let synapses = count("synapses")?;
        let fibers = count("fibers")?;
        let maturations = count("maturations")?;
        let co_activation_events = count("co_activation_events")?;
        let action_events = count("action_events")?;
        let average_activation: f64 = reader.query_row(
            "SELECT COALESCE(AVG(activation_level), 0.0) FROM neuron_states",
            [],
            |row| row.get(0),
        )?;
        let mut fibers_by_stage = HashMap::new();
        let mut stmt =
            reader.prepare_cached("SELECT stage, COUNT(*) FROM maturations GROUP BY stage")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (stage, n) = row?;
            fibers_by_stage.insert(stage, n);
        }
        Ok(StoreStats {
            neurons,
            synapses,
            fibers,
            maturations,
            co_activation_events,
            action_events,
            average_activation,
            fibers_by_stage,
        })
    }

    /// Verify file integrity and schema version. A failure here marks the
    /// brain unhealthy; writes are refused until a recheck passes.
    pub fn integrity_check(&self) -> Result<()> {
        let reader = self.read_lock()?;
        let verdict: String = reader.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if verdict != "ok" {
            return Err(StoreError::Corrupt(format!("quick_check: {verdict}")));
        }
        let version = migrations::current_version(&reader)?;
        if version != migrations::LATEST_SCHEMA_VERSION {
            return Err(StoreError::Corrupt(format!(
                "schema version {version}, expected {}",
                migrations::LATEST_SCHEMA_VERSION
            )));
        }
        Ok(())
    }

    /// Create a consistent backup using VACUUM INTO
    pub fn backup_to(&self, path: &Path) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| StoreError::Init("Invalid backup path encoding".to_string()))?;
        // Reject control characters for defense in depth
        if path_str.bytes().any(|b| b < 0x20 && b != b'\t') {
            return Err(StoreError::Init(
                "Backup path contains invalid characters".to_string(),
            ));
        }
        let reader = self.read_lock()?;
        // VACUUM INTO doesn't support parameterized queries; escape quotes
        reader.execute_batch(&format!("VACUUM INTO '{}'", path_str.replace('\'', "''")))?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

// ============================================================================
// TRANSACTION GUARD
// ============================================================================

/// Scoped IMMEDIATE transaction over a borrowed connection. Rolls back on
/// drop unless committed, so every early return and panic unwinds cleanly.
struct TxGuard<'a> {
    conn: &'a Connection,
    committed: bool,
}

impl<'a> TxGuard<'a> {
    fn begin(conn: &'a Connection) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            committed: false,
        })
    }

    fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const NEURON_SELECT: &str =
    "SELECT id, neuron_type, content, metadata, content_hash, created_at FROM neurons";
const STATE_SELECT: &str = "SELECT neuron_id, activation_level, access_frequency, last_activated,
     decay_rate, firing_threshold, refractory_until, refractory_period_ms, homeostatic_target,
     created_at FROM neuron_states";
const SYNAPSE_SELECT: &str = "SELECT id, source_id, target_id, synapse_type, weight, direction,
     metadata, reinforced_count, last_activated, created_at FROM synapses";
const FIBER_SELECT: &str = "SELECT id, neuron_ids, synapse_ids, anchor_neuron_id, pathway,
     conductivity, last_conducted, summary, salience, auto_tags, agent_tags, frequency,
     time_start, time_end, memory_type, created_at FROM fibers";
const MATURATION_SELECT: &str = "SELECT fiber_id, stage, reinforcement_count, reinforcement_days,
     stage_entered_at, created_at FROM maturations";

type NeuronRow = (String, String, String, String, Option<i64>, String);

fn neuron_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NeuronRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn finish_neuron(row: NeuronRow) -> Result<Neuron> {
    let (id, neuron_type, content, metadata, content_hash, created_at) = row;
    Ok(Neuron {
        id,
        neuron_type: NeuronType::parse_name(&neuron_type),
        content,
        metadata: parse_map(&metadata)?,
        content_hash: content_hash.map(|h| h as u64),
        created_at: parse_ts(&created_at)?,
    })
}

type StateRow = (
    String,
    f64,
    u32,
    Option<String>,
    f64,
    f64,
    Option<String>,
    u32,
    f64,
    String,
);

fn state_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn finish_state(row: StateRow) -> Result<NeuronState> {
    let (
        neuron_id,
        activation_level,
        access_frequency,
        last_activated,
        decay_rate,
        firing_threshold,
        refractory_until,
        refractory_period_ms,
        homeostatic_target,
        created_at,
    ) = row;
    Ok(NeuronState {
        neuron_id,
        activation_level,
        access_frequency,
        last_activated: parse_opt_ts(last_activated)?,
        decay_rate,
        firing_threshold,
        refractory_until: parse_opt_ts(refractory_until)?,
        refractory_period_ms,
        homeostatic_target,
        created_at: parse_ts(&created_at)?,
    })
}

type StateParams = (
    String,
    f64,
    u32,
    Option<String>,
    f64,
    f64,
    Option<String>,
    u32,
    f64,
    String,
);

fn state_params(state: &NeuronState) -> StateParams {
    (
        state.neuron_id.clone(),
        state.activation_level,
        state.access_frequency,
        state.last_activated.map(|t| t.to_rfc3339()),
        state.decay_rate,
        state.firing_threshold,
        state.refractory_until.map(|t| t.to_rfc3339()),
        state.refractory_period_ms,
        state.homeostatic_target,
        state.created_at.to_rfc3339(),
    )
}

fn upsert_state_tx(conn: &Connection, state: &NeuronState) -> Result<()> {
    conn.execute(
        "INSERT INTO neuron_states (neuron_id, activation_level, access_frequency, last_activated,
             decay_rate, firing_threshold, refractory_until, refractory_period_ms,
             homeostatic_target, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(neuron_id) DO UPDATE SET
             activation_level = excluded.activation_level,
             access_frequency = MAX(access_frequency, excluded.access_frequency),
             last_activated = MAX(COALESCE(last_activated, ''), COALESCE(excluded.last_activated, '')),
             decay_rate = excluded.decay_rate,
             firing_threshold = excluded.firing_threshold,
             refractory_until = excluded.refractory_until,
             refractory_period_ms = excluded.refractory_period_ms,
             homeostatic_target = excluded.homeostatic_target",
        state_params(state),
    )?;
    Ok(())
}

type SynapseRow = (
    String,
    String,
    String,
    String,
    f64,
    String,
    String,
    u32,
    Option<String>,
    String,
);

fn synapse_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SynapseRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn finish_synapse(row: SynapseRow) -> Result<Synapse> {
    let (
        id,
        source_id,
        target_id,
        synapse_type,
        weight,
        direction,
        metadata,
        reinforced_count,
        last_activated,
        created_at,
    ) = row;
    Ok(Synapse {
        id,
        source_id,
        target_id,
        synapse_type: SynapseType::parse_name(&synapse_type),
        weight,
        direction: Direction::parse_name(&direction),
        metadata: parse_map(&metadata)?,
        reinforced_count,
        last_activated: parse_opt_ts(last_activated)?,
        created_at: parse_ts(&created_at)?,
    })
}

type FiberRow = (
    String,
    String,
    String,
    String,
    String,
    f64,
    Option<String>,
    String,
    f64,
    String,
    String,
    u32,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn fiber_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FiberRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
        row.get(15)?,
    ))
}

fn finish_fiber(row: FiberRow) -> Result<Fiber> {
    let (
        id,
        neuron_ids,
        synapse_ids,
        anchor_neuron_id,
        pathway,
        conductivity,
        last_conducted,
        summary,
        salience,
        auto_tags,
        agent_tags,
        frequency,
        time_start,
        time_end,
        memory_type,
        created_at,
    ) = row;
    Ok(Fiber {
        id,
        neuron_ids: parse_set(&neuron_ids)?,
        synapse_ids: parse_set(&synapse_ids)?,
        anchor_neuron_id,
        pathway: serde_json::from_str(&pathway)
            .map_err(|e| StoreError::Corrupt(format!("fiber pathway: {e}")))?,
        conductivity,
        last_conducted: parse_opt_ts(last_conducted)?,
        summary,
        salience,
        auto_tags: parse_set(&auto_tags)?,
        agent_tags: parse_set(&agent_tags)?,
        frequency,
        time_start: parse_opt_ts(time_start)?,
        time_end: parse_opt_ts(time_end)?,
        memory_type: MemoryType::parse_name(&memory_type),
        created_at: parse_ts(&created_at)?,
    })
}

fn save_fiber_tx(conn: &Connection, fiber: &Fiber) -> Result<()> {
    conn.execute(
        "INSERT INTO fibers (id, neuron_ids, synapse_ids, anchor_neuron_id, pathway, conductivity,
             last_conducted, summary, salience, auto_tags, agent_tags, frequency, time_start,
             time_end, memory_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(id) DO UPDATE SET
             neuron_ids = excluded.neuron_ids,
             synapse_ids = excluded.synapse_ids,
             anchor_neuron_id = excluded.anchor_neuron_id,
             pathway = excluded.pathway,
             conductivity = excluded.conductivity,
             last_conducted = excluded.last_conducted,
             summary = excluded.summary,
             salience = excluded.salience,
             auto_tags = excluded.auto_tags,
             agent_tags = excluded.agent_tags,
             frequency = excluded.frequency,
             time_start = excluded.time_start,
             time_end = excluded.time_end,
             memory_type = excluded.memory_type",
        params![
            fiber.id,
            to_json(&fiber.neuron_ids)?,
            to_json(&fiber.synapse_ids)?,
            fiber.anchor_neuron_id,
            to_json(&fiber.pathway)?,
            fiber.conductivity,
            fiber.last_conducted.map(|t| t.to_rfc3339()),
            fiber.summary,
            fiber.salience,
            to_json(&fiber.auto_tags)?,
            to_json(&fiber.agent_tags)?,
            fiber.frequency,
            fiber.time_start.map(|t| t.to_rfc3339()),
            fiber.time_end.map(|t| t.to_rfc3339()),
            fiber.memory_type.as_str(),
            fiber.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

type MaturationRow = (String, String, u32, String, String, String);

fn maturation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MaturationRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn finish_maturation(row: MaturationRow) -> Result<Maturation> {
    let (fiber_id, stage, reinforcement_count, reinforcement_days, stage_entered_at, created_at) =
        row;
    let days: BTreeSet<NaiveDate> = serde_json::from_str(&reinforcement_days)
        .map_err(|e| StoreError::Corrupt(format!("reinforcement days: {e}")))?;
    Ok(Maturation {
        fiber_id,
        stage: MaturationStage::parse_name(&stage),
        reinforcement_count,
        reinforcement_days: days,
        stage_entered_at: parse_ts(&stage_entered_at)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn save_maturation_tx(conn: &Connection, maturation: &Maturation) -> Result<()> {
    conn.execute(
        "INSERT INTO maturations (fiber_id, stage, reinforcement_count, reinforcement_days,
             stage_entered_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(fiber_id) DO UPDATE SET
             stage = excluded.stage,
             reinforcement_count = MAX(reinforcement_count, excluded.reinforcement_count),
             reinforcement_days = excluded.reinforcement_days,
             stage_entered_at = excluded.stage_entered_at",
        params![
            maturation.fiber_id,
            maturation.stage.as_str(),
            maturation.reinforcement_count,
            to_json(&maturation.reinforcement_days)?,
            maturation.stage_entered_at.to_rfc3339(),
            maturation.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

// ============================================================================
// HELPERS
// ============================================================================

fn placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

fn parse_map(s: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    serde_json::from_str(s).map_err(|e| StoreError::Corrupt(format!("metadata column: {e}")))
}

fn parse_set(s: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(s).map_err(|e| StoreError::Corrupt(format!("id set column: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt(format!("serialization: {e}")))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::W_MAX;

    fn store() -> Store {
        Store::open_in_memory().expect("in-memory store")
    }

    fn neuron(t: NeuronType, content: &str) -> Neuron {
        let mut n = Neuron::new(t, content);
        n.content_hash = Some(crate::extract::simhash(content));
        n
    }

    #[test]
    fn test_neuron_add_is_idempotent_on_identity() {
        let store = store();
        let a = neuron(NeuronType::Entity, "Alice");
        let id_a = store.add_neuron(&a).unwrap();

        // Same identity, different casing, different requested id
        let b = neuron(NeuronType::Entity, "alice");
        let id_b = store.add_neuron(&b).unwrap();
        assert_eq!(id_a, id_b);

        // Different type, same content, is a different neuron
        let c = neuron(NeuronType::Concept, "alice");
        let id_c = store.add_neuron(&c).unwrap();
        assert_ne!(id_a, id_c);
    }

    #[test]
    fn test_find_by_hash_within_distance() {
        let store = store();
        let n = neuron(NeuronType::Concept, "Database host is db.example.com");
        store.add_neuron(&n).unwrap();

        let probe = crate::extract::simhash("DB host is db.example.com");
        let hits = store.find_neurons_by_hash(probe, 6).unwrap();
        assert_eq!(hits.len(), 1);

        let probe = crate::extract::simhash("completely different topic entirely");
        assert!(store.find_neurons_by_hash(probe, 6).unwrap().is_empty());
    }

    #[test]
    fn test_substring_search_escapes_like_wildcards() {
        let store = store();
        store.add_neuron(&neuron(NeuronType::Concept, "100% coverage")).unwrap();
        store.add_neuron(&neuron(NeuronType::Concept, "partial")).unwrap();

        let hits = store.find_neurons_containing("100%", 10).unwrap();
        assert_eq!(hits.len(), 1);
        // A bare % must not match everything
        let hits = store.find_neurons_containing("%", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_synapse_monotonic_bookkeeping() {
        let store = store();
        let a = store.add_neuron(&neuron(NeuronType::Entity, "a")).unwrap();
        let b = store.add_neuron(&neuron(NeuronType::Entity, "b")).unwrap();
        let s = Synapse::new(&a, &b, SynapseType::CoOccurs, 0.5);
        let sid = store.add_synapse(&s).unwrap();

        let now = Utc::now();
        store.update_synapse_weight(&sid, 0.6, 3, now).unwrap();
        // A stale writer cannot roll the counters back
        store
            .update_synapse_weight(&sid, 0.55, 1, now - chrono::Duration::hours(1))
            .unwrap();

        let loaded = store.get_synapse(&sid).unwrap().unwrap();
        assert_eq!(loaded.reinforced_count, 3);
        assert_eq!(loaded.last_activated.unwrap().to_rfc3339(), now.to_rfc3339());
        assert!(loaded.weight <= W_MAX);
    }

    #[test]
    fn test_fiber_roundtrip_and_neuron_lookup() {
        let store = store();
        let a = store.add_neuron(&neuron(NeuronType::Entity, "alice")).unwrap();
        let b = store.add_neuron(&neuron(NeuronType::Concept, "jwt")).unwrap();

        let mut fiber = Fiber::new(a.clone(), MemoryType::Fact);
        fiber.neuron_ids.insert(b.clone());
        fiber.pathway.push(b.clone());
        fiber.auto_tags.insert("auth".into());
        store.save_fiber(&fiber).unwrap();

        let by_neuron = store
            .fibers_for_neurons(&[b.clone()].into_iter().collect())
            .unwrap();
        assert_eq!(by_neuron.len(), 1);
        assert_eq!(by_neuron[0].id, fiber.id);

        let by_tag = store.fibers_by_tag("auth").unwrap();
        assert_eq!(by_tag.len(), 1);

        assert!(store.fibers_by_tag("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_fiber_integrity_rejected() {
        let store = store();
        let a = store.add_neuron(&neuron(NeuronType::Entity, "alice")).unwrap();
        let mut fiber = Fiber::new(a, MemoryType::Fact);
        fiber.pathway.push("n-not-a-member".into());
        assert!(matches!(
            store.save_fiber(&fiber),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_apply_encode_is_atomic_and_remaps_ids() {
        let store = store();
        // Pre-existing neuron that the encode will collide with
        let existing = store.add_neuron(&neuron(NeuronType::Entity, "alice")).unwrap();

        let dup = neuron(NeuronType::Entity, "Alice");
        let fresh = neuron(NeuronType::Concept, "jwt");
        let state_dup = NeuronState::new(&dup.id, 0.02);
        let state_fresh = NeuronState::new(&fresh.id, 0.02);
        let synapse = Synapse::new(&dup.id, &fresh.id, SynapseType::CoOccurs, 0.5);
        let mut fiber = Fiber::new(dup.id.clone(), MemoryType::Fact);
        fiber.neuron_ids.insert(fresh.id.clone());
        fiber.pathway.push(fresh.id.clone());
        let maturation = Maturation::new(fiber.id.clone());

        let owners = store
            .apply_encode(
                &[dup.clone(), fresh.clone()],
                &[state_dup, state_fresh],
                &[synapse],
                &fiber,
                &maturation,
            )
            .unwrap();

        // Duplicate requested id mapped onto the existing owner
        assert_eq!(owners.get(&dup.id).unwrap(), &existing);
        assert_eq!(owners.get(&fresh.id).unwrap(), &fresh.id);

        // Fiber references the owner id, not the requested one
        let saved = store.get_fiber(&fiber.id).unwrap().unwrap();
        assert!(saved.neuron_ids.contains(&existing));
        assert_eq!(saved.anchor_neuron_id, existing);
        assert!(store.get_maturation(&fiber.id).unwrap().is_some());
    }

    #[test]
    fn test_deferred_batch_flush() {
        let store = store();
        let a = store.add_neuron(&neuron(NeuronType::Entity, "x")).unwrap();
        let b = store.add_neuron(&neuron(NeuronType::Entity, "y")).unwrap();
        let sid = store
            .add_synapse(&Synapse::new(&a, &b, SynapseType::CoOccurs, 0.4))
            .unwrap();
        let mut fiber = Fiber::new(a.clone(), MemoryType::Fact);
        fiber.conductivity = 0.9;
        store.save_fiber(&fiber).unwrap();

        let now = Utc::now();
        let mut batch = DeferredWriteBatch::new();
        batch.synapse_deltas.push(super::super::SynapseDelta {
            synapse_id: sid.clone(),
            weight: 0.52,
            reinforced_count: 1,
            last_activated: now,
        });
        batch.conducted_fibers.push((fiber.id.clone(), now));
        batch.record_co_activation(&b, &a, now);
        store.apply_deferred(&batch).unwrap();

        assert_eq!(store.get_synapse(&sid).unwrap().unwrap().weight, 0.52);
        let f = store.get_fiber(&fiber.id).unwrap().unwrap();
        assert!((f.conductivity - 0.92).abs() < 1e-9);
        assert_eq!(f.frequency, 1);

        let counts = store
            .co_activation_counts(now - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(counts.len(), 1);
        assert!(counts[0].0 < counts[0].1);
    }

    #[test]
    fn test_maturation_stage_queries() {
        let store = store();
        let a = store.add_neuron(&neuron(NeuronType::Entity, "a")).unwrap();
        let fiber = Fiber::new(a, MemoryType::Fact);
        store.save_fiber(&fiber).unwrap();

        let mut m = Maturation::new(fiber.id.clone());
        m.stage = MaturationStage::Episodic;
        store.save_maturation(&m).unwrap();

        let episodic = store.maturations_by_stage(MaturationStage::Episodic).unwrap();
        assert_eq!(episodic.len(), 1);
        assert!(store.maturations_by_stage(MaturationStage::Semantic).unwrap().is_empty());
    }

    #[test]
    fn test_stats_and_integrity() {
        let store = store();
        store.add_neuron(&neuron(NeuronType::Entity, "a")).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.neurons, 1);
        assert_eq!(stats.synapses, 0);
        store.integrity_check().unwrap();
    }

    #[test]
    fn test_brain_roundtrip() {
        let store = store();
        let brain = Brain::new("test");
        store.save_brain(&brain).unwrap();
        let loaded = store.load_brain().unwrap().unwrap();
        assert_eq!(loaded.id, brain.id);
        assert_eq!(loaded.config.max_spread_hops, 4);
    }
}
