use airspace_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("version conflict on {kind} {id}: {reason}")]
    VersionConflict {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("consistency fault: {0}")]
    ConsistencyFault(String),

    #[error("backing store fault during {op}: {source}")]
    BackingStore {
        op: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("cancelled during {op}")]
    Cancelled { op: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn version_conflict(kind: &'static str, id: impl ToString, reason: impl Into<String>) -> Self {
        Self::VersionConflict {
            kind,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may reasonably re-read and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::BackingStore { .. })
    }
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidGeometry(_) | CoreError::CoveringTooLarge { .. } => {
                StoreError::InvalidInput(e.to_string())
            }
            CoreError::InvalidData(_) | CoreError::HlcDriftTooLarge { .. } => {
                StoreError::ConsistencyFault(e.to_string())
            }
        }
    }
}

/// Attaches the failing operation to backing store errors.
pub trait SqliteResultExt<T> {
    fn during(self, op: impl FnOnce() -> String) -> Result<T, StoreError>;
}

impl<T> SqliteResultExt<T> for Result<T, rusqlite::Error> {
    fn during(self, op: impl FnOnce() -> String) -> Result<T, StoreError> {
        self.map_err(|source| match source {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                StoreError::Cancelled { op: op() }
            }
            source => StoreError::BackingStore { op: op(), source },
        })
    }
}
