//! Shared harness for end-to-end tests
//!
//! Builds engines over temporary directories so every test runs against
//! a real database file and the full public API.

use std::path::PathBuf;

use neuromem_core::{Engine, EngineOptions};
use tempfile::TempDir;

/// An engine bound to a temporary base directory. The directory lives as
/// long as the harness value.
pub struct TestEngine {
    pub engine: Engine,
    _dir: TempDir,
}

impl TestEngine {
    /// File-backed engine in a fresh temporary directory
    pub fn file_backed() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::new(EngineOptions {
            base_dir: Some(PathBuf::from(dir.path())),
            in_memory: false,
        });
        Self { engine, _dir: dir }
    }

    /// In-memory engine for tests that never reopen files
    pub fn in_memory() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::new(EngineOptions {
            base_dir: Some(PathBuf::from(dir.path())),
            in_memory: true,
        });
        Self { engine, _dir: dir }
    }
}
