//! Database Migrations
//!
//! Schema migration definitions for the storage layer. Migrations are
//! forward-only and additive; startup applies every version above the
//! stored one, in order.

/// Newest schema version; `schema_version` must equal this after startup
pub const LATEST_SCHEMA_VERSION: u32 = 9;

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial graph schema: neurons, states, synapses, fibers",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Fiber validity windows",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Maturation stage tracking",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "Co-activation event log",
        up: MIGRATION_V4_UP,
    },
    Migration {
        version: 5,
        description: "Content hashing for near-duplicate detection",
        up: MIGRATION_V5_UP,
    },
    Migration {
        version: 6,
        description: "Fiber pathway and conductivity",
        up: MIGRATION_V6_UP,
    },
    Migration {
        version: 7,
        description: "Action event log for workflow mining",
        up: MIGRATION_V7_UP,
    },
    Migration {
        version: 8,
        description: "Canonical tag table",
        up: MIGRATION_V8_UP,
    },
    Migration {
        version: 9,
        description: "Traversal and lifecycle indexes",
        up: MIGRATION_V9_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial graph schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS brains (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS neurons (
    id TEXT PRIMARY KEY,
    neuron_type TEXT NOT NULL,
    content TEXT NOT NULL,
    canonical TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

-- Identity invariant: one neuron per (type, canonical content)
CREATE UNIQUE INDEX IF NOT EXISTS idx_neurons_identity ON neurons(neuron_type, canonical);
CREATE INDEX IF NOT EXISTS idx_neurons_canonical ON neurons(canonical);

CREATE TABLE IF NOT EXISTS neuron_states (
    neuron_id TEXT PRIMARY KEY REFERENCES neurons(id) ON DELETE CASCADE,
    activation_level REAL NOT NULL DEFAULT 0.0,
    access_frequency INTEGER NOT NULL DEFAULT 0,
    last_activated TEXT,
    decay_rate REAL NOT NULL DEFAULT 0.02,
    firing_threshold REAL NOT NULL DEFAULT 0.3,
    refractory_until TEXT,
    refractory_period_ms INTEGER NOT NULL DEFAULT 500,
    homeostatic_target REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS synapses (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES neurons(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES neurons(id) ON DELETE CASCADE,
    synapse_type TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 0.5,
    direction TEXT NOT NULL DEFAULT 'uni',
    metadata TEXT NOT NULL DEFAULT '{}',
    reinforced_count INTEGER NOT NULL DEFAULT 0,
    last_activated TEXT,
    created_at TEXT NOT NULL
);

-- One edge per (source, target, relation)
CREATE UNIQUE INDEX IF NOT EXISTS idx_synapses_endpoints ON synapses(source_id, target_id, synapse_type);

CREATE TABLE IF NOT EXISTS fibers (
    id TEXT PRIMARY KEY,
    neuron_ids TEXT NOT NULL DEFAULT '[]',
    synapse_ids TEXT NOT NULL DEFAULT '[]',
    anchor_neuron_id TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    salience REAL NOT NULL DEFAULT 0.5,
    auto_tags TEXT NOT NULL DEFAULT '[]',
    agent_tags TEXT NOT NULL DEFAULT '[]',
    frequency INTEGER NOT NULL DEFAULT 0,
    memory_type TEXT NOT NULL DEFAULT 'fact',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fibers_anchor ON fibers(anchor_neuron_id);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Fiber validity windows (todo/context memories expire)
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE fibers ADD COLUMN time_start TEXT;
ALTER TABLE fibers ADD COLUMN time_end TEXT;

CREATE INDEX IF NOT EXISTS idx_fibers_time_start ON fibers(time_start);
CREATE INDEX IF NOT EXISTS idx_fibers_time_end ON fibers(time_end);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Maturation stage tracking per fiber
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS maturations (
    fiber_id TEXT PRIMARY KEY REFERENCES fibers(id) ON DELETE CASCADE,
    stage TEXT NOT NULL DEFAULT 'stm',
    reinforcement_count INTEGER NOT NULL DEFAULT 0,
    reinforcement_days TEXT NOT NULL DEFAULT '[]',
    stage_entered_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_maturations_stage ON maturations(stage);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// V4: Co-activation event log, consumed by inference
/// Pairs are stored in canonical order (neuron_a < neuron_b)
const MIGRATION_V4_UP: &str = r#"
CREATE TABLE IF NOT EXISTS co_activation_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    neuron_a TEXT NOT NULL,
    neuron_b TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    CHECK (neuron_a < neuron_b)
);

CREATE INDEX IF NOT EXISTS idx_coactivation_pair ON co_activation_events(neuron_a, neuron_b);
CREATE INDEX IF NOT EXISTS idx_coactivation_time ON co_activation_events(occurred_at);

UPDATE schema_version SET version = 4, applied_at = datetime('now');
"#;

/// V5: SimHash column for near-duplicate detection
/// Stored as INTEGER; the engine reinterprets the i64 bits as u64
const MIGRATION_V5_UP: &str = r#"
ALTER TABLE neurons ADD COLUMN content_hash INTEGER;

CREATE INDEX IF NOT EXISTS idx_neurons_content_hash ON neurons(content_hash);

UPDATE schema_version SET version = 5, applied_at = datetime('now');
"#;

/// V6: Reflex pathway support — ordered conduction sequence and a
/// per-fiber conductivity that rises with use
const MIGRATION_V6_UP: &str = r#"
ALTER TABLE fibers ADD COLUMN pathway TEXT NOT NULL DEFAULT '[]';
ALTER TABLE fibers ADD COLUMN conductivity REAL NOT NULL DEFAULT 1.0;
ALTER TABLE fibers ADD COLUMN last_conducted TEXT;

UPDATE schema_version SET version = 6, applied_at = datetime('now');
"#;

/// V7: Action events for workflow mining
const MIGRATION_V7_UP: &str = r#"
CREATE TABLE IF NOT EXISTS action_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    action TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_action_events_session ON action_events(session_id);
CREATE INDEX IF NOT EXISTS idx_action_events_time ON action_events(occurred_at);

UPDATE schema_version SET version = 7, applied_at = datetime('now');
"#;

/// V8: Canonical tag table backing tag normalization
const MIGRATION_V8_UP: &str = r#"
CREATE TABLE IF NOT EXISTS canonical_tags (
    tag TEXT PRIMARY KEY,
    canonical TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_canonical_tags_canonical ON canonical_tags(canonical);

UPDATE schema_version SET version = 8, applied_at = datetime('now');
"#;

/// V9: Indexes that keep batched traversal reads flat
const MIGRATION_V9_UP: &str = r#"
CREATE INDEX IF NOT EXISTS idx_synapses_source ON synapses(source_id);
CREATE INDEX IF NOT EXISTS idx_synapses_target ON synapses(target_id);
CREATE INDEX IF NOT EXISTS idx_synapses_weight ON synapses(weight);
CREATE INDEX IF NOT EXISTS idx_states_activation ON neuron_states(activation_level);
CREATE INDEX IF NOT EXISTS idx_states_last_activated ON neuron_states(last_activated);

UPDATE schema_version SET version = 9, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations; returns how many ran
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let start_version = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > start_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_contiguous() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i as u32 + 1);
        }
        assert_eq!(
            MIGRATIONS.last().map(|m| m.version),
            Some(LATEST_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_fresh_database_migrates_to_latest() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied, LATEST_SCHEMA_VERSION);
        assert_eq!(current_version(&conn).unwrap(), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent_across_restarts() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let applied_again = apply_migrations(&conn).unwrap();
        assert_eq!(applied_again, 0);
    }

    #[test]
    fn test_canonical_pair_check_constraint() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let out_of_order = conn.execute(
            "INSERT INTO co_activation_events (neuron_a, neuron_b, occurred_at) VALUES ('n-b', 'n-a', datetime('now'))",
            [],
        );
        assert!(out_of_order.is_err());
    }
}
