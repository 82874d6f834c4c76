use airspace_core::geo::Volume4D;
use airspace_core::{CellUnion, CoveringEngine};
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Overlap query over the cell index. Every bound is optional; cells are not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub cells: CellUnion,
    pub altitude_lo: Option<f64>,
    pub altitude_hi: Option<f64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl SearchFilter {
    pub fn cells(cells: CellUnion) -> Self {
        Self {
            cells,
            ..Self::default()
        }
    }

    /// Covers the volume's footprint; altitude and time bounds carry over.
    pub fn from_volume(volume: &Volume4D, covering: &CoveringEngine) -> Result<Self, StoreError> {
        if volume.spatial.footprint.is_none() {
            return Err(StoreError::InvalidInput(
                "missing geospatial footprint for query".into(),
            ));
        }
        let cells = covering.cover_volume(&volume.spatial)?;
        Ok(Self {
            cells,
            altitude_lo: volume.spatial.altitude_lo,
            altitude_hi: volume.spatial.altitude_hi,
            starts_at: volume.start_time,
            ends_at: volume.end_time,
        })
    }

    pub fn with_altitude(mut self, lo: Option<f64>, hi: Option<f64>) -> Self {
        self.altitude_lo = lo;
        self.altitude_hi = hi;
        self
    }

    pub fn with_window(mut self, starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> Self {
        self.starts_at = starts_at;
        self.ends_at = ends_at;
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.cells.is_empty() {
            return Err(StoreError::InvalidInput("missing cell IDs for query".into()));
        }
        Ok(())
    }
}
