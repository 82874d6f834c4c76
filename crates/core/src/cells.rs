//! Discrete cell coverings over the lat/lng plane.
//!
//! A `CellId` packs a quadtree path into 64 bits: the Morton-interleaved
//! (lng, lat) grid index, one sentinel bit, then two zero bits per level below
//! the cell's own. Ids at every level fit in a positive `i64`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geo::{Footprint, LatLng, LatLngRect, Volume3D};

pub const MAX_LEVEL: u8 = 30;
pub const DEFAULT_LEVEL: u8 = 13;
pub const DEFAULT_MAX_CELLS: usize = 1024;

/// Bounding-box candidates examined per permitted output cell.
const CANDIDATE_FACTOR: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(u64);

impl CellId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }

    pub fn to_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_grid(level: u8, x: u32, y: u32) -> Self {
        let path = interleave(x, y, level);
        Self(((path << 1) | 1) << (2 * u32::from(MAX_LEVEL - level)))
    }

    pub fn from_lat_lng(point: &LatLng, level: u8) -> Self {
        let (x, y) = grid_index(point, level);
        Self::from_grid(level, x, y)
    }

    pub fn is_valid(&self) -> bool {
        let tz = self.0.trailing_zeros();
        self.0 != 0 && tz % 2 == 0 && tz <= 2 * u32::from(MAX_LEVEL) && self.0 >> 61 == 0
    }

    pub fn level(&self) -> u8 {
        MAX_LEVEL.saturating_sub((self.0.trailing_zeros() / 2) as u8)
    }

    fn grid(&self) -> (u8, u32, u32) {
        let level = self.level();
        let path = self.0 >> (2 * u32::from(MAX_LEVEL - level) + 1);
        let (x, y) = deinterleave(path, level);
        (level, x, y)
    }

    pub fn bounds(&self) -> LatLngRect {
        let (level, x, y) = self.grid();
        let n = f64::from(1u32 << level);
        let (lng_size, lat_size) = (360.0 / n, 180.0 / n);
        let lo = LatLng::new(-90.0 + f64::from(y) * lat_size, -180.0 + f64::from(x) * lng_size);
        LatLngRect {
            lo,
            hi: LatLng::new(lo.lat + lat_size, lo.lng + lng_size),
        }
    }

    pub fn parent(&self, level: u8) -> Option<CellId> {
        let (own, x, y) = self.grid();
        if level > own {
            return None;
        }
        let shift = own - level;
        Some(Self::from_grid(level, x >> shift, y >> shift))
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({:#x}@{})", self.0, self.level())
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn grid_index(point: &LatLng, level: u8) -> (u32, u32) {
    let n = 1u64 << level;
    let scale = |v: f64, span: f64| -> u32 {
        let i = (v / span * n as f64).floor() as i64;
        i.clamp(0, n as i64 - 1) as u32
    };
    (scale(point.lng + 180.0, 360.0), scale(point.lat + 90.0, 180.0))
}

fn interleave(x: u32, y: u32, level: u8) -> u64 {
    let mut path = 0u64;
    for i in (0..level).rev() {
        let xb = u64::from((x >> i) & 1);
        let yb = u64::from((y >> i) & 1);
        path = (path << 2) | (yb << 1) | xb;
    }
    path
}

fn deinterleave(path: u64, level: u8) -> (u32, u32) {
    let (mut x, mut y) = (0u32, 0u32);
    for i in 0..level {
        x |= (((path >> (2 * i)) & 1) as u32) << i;
        y |= (((path >> (2 * i + 1)) & 1) as u32) << i;
    }
    (x, y)
}

/// Sorted, deduplicated set of cells.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellUnion(Vec<CellId>);

impl CellUnion {
    pub fn new(cells: impl IntoIterator<Item = CellId>) -> Self {
        let mut cells: Vec<CellId> = cells.into_iter().collect();
        cells.sort_unstable();
        cells.dedup();
        Self(cells)
    }

    pub fn from_raw(raw: impl IntoIterator<Item = u64>) -> Self {
        Self::new(raw.into_iter().map(CellId::from_raw))
    }

    pub fn cells(&self) -> &[CellId] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &CellId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, cell: CellId) -> bool {
        self.0.binary_search(&cell).is_ok()
    }

    pub fn intersects(&self, other: &CellUnion) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }
}

impl FromIterator<CellId> for CellUnion {
    fn from_iter<T: IntoIterator<Item = CellId>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Resolution and fan-out limits for coverings.
///
/// Every covering is produced at the single indexing `level`, so stored and
/// queried coverings overlap on equal ids. `max_cells` bounds how many index
/// rows one footprint may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoveringPolicy {
    pub level: u8,
    pub max_cells: usize,
}

impl Default for CoveringPolicy {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoveringEngine {
    policy: CoveringPolicy,
}

impl CoveringEngine {
    pub fn new(policy: CoveringPolicy) -> Result<Self, CoreError> {
        if policy.level > MAX_LEVEL {
            return Err(CoreError::InvalidData(format!(
                "covering level {} exceeds {MAX_LEVEL}",
                policy.level
            )));
        }
        if policy.max_cells == 0 {
            return Err(CoreError::InvalidData("max_cells must be positive".into()));
        }
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &CoveringPolicy {
        &self.policy
    }

    pub fn cover(&self, footprint: &Footprint) -> Result<CellUnion, CoreError> {
        footprint.validate()?;

        let CoveringPolicy { level, max_cells } = self.policy;
        let bounds = footprint.bounds();
        let (x0, y0) = grid_index(&bounds.lo, level);
        let (x1, y1) = grid_index(&bounds.hi, level);

        let candidates = (x1 - x0 + 1) as usize * (y1 - y0 + 1) as usize;
        if candidates > max_cells.saturating_mul(CANDIDATE_FACTOR) {
            return Err(CoreError::CoveringTooLarge {
                cells: candidates,
                level,
                max_cells,
            });
        }

        let mut cells = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                let cell = CellId::from_grid(level, x, y);
                if footprint.intersects_rect(&cell.bounds()) {
                    cells.push(cell);
                }
            }
        }

        if cells.len() > max_cells {
            return Err(CoreError::CoveringTooLarge {
                cells: cells.len(),
                level,
                max_cells,
            });
        }
        if cells.is_empty() {
            return Err(CoreError::InvalidGeometry(
                "footprint produced an empty covering".into(),
            ));
        }
        Ok(CellUnion::new(cells))
    }

    pub fn cover_volume(&self, volume: &Volume3D) -> Result<CellUnion, CoreError> {
        match &volume.footprint {
            Some(footprint) => self.cover(footprint),
            None => Err(CoreError::InvalidGeometry("missing footprint".into())),
        }
    }
}
