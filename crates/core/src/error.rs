use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("covering needs {cells} cells at level {level} (max {max_cells})")]
    CoveringTooLarge {
        cells: usize,
        level: u8,
        max_cells: usize,
    },

    #[error("HLC drift too large: remote is {delta_ms}ms ahead (max {max_ms}ms)")]
    HlcDriftTooLarge { delta_ms: u64, max_ms: u64 },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
