use std::path::PathBuf;
use std::time::Duration;

use airspace_core::CoveringPolicy;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; in-memory when absent.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    /// SQLite VM steps between cancellation polls.
    pub cancel_poll_ops: i32,
    pub covering: CoveringPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
            cancel_poll_ops: 1_000,
            covering: CoveringPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, StoreError> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.cancel_poll_ops <= 0 {
            return Err(StoreError::Config(format!(
                "cancel_poll_ops must be positive, got {}",
                self.cancel_poll_ops
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
