use std::path::PathBuf;

use airspace_storage::{StoreConfig, StoreError};
use tempfile::TempDir;

use crate::TestManager;

/// Several managers, each with its own handle onto one database file.
pub struct TestAirspace {
    dir: TempDir,
    managers: Vec<TestManager>,
}

impl TestAirspace {
    pub fn new() -> Result<Self, StoreError> {
        let dir = tempfile::tempdir()
            .map_err(|e| StoreError::Config(format!("create temp dir: {e}")))?;
        Ok(Self {
            dir,
            managers: Vec::new(),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.dir.path().join("airspace.db")
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::at_path(self.database_path())
    }

    pub fn add_manager(&mut self, owner: &str) -> Result<usize, StoreError> {
        let manager = TestManager::open(owner, self.config())?;
        let index = self.managers.len();
        self.managers.push(manager);
        Ok(index)
    }

    pub fn manager(&self, index: usize) -> &TestManager {
        &self.managers[index]
    }

    pub fn manager_mut(&mut self, index: usize) -> &mut TestManager {
        &mut self.managers[index]
    }

    /// Hands the managers out, e.g. to move them onto threads. The database
    /// file lives as long as the returned `TempDir`.
    pub fn into_parts(self) -> (TempDir, Vec<TestManager>) {
        (self.dir, self.managers)
    }
}
