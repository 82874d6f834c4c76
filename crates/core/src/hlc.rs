use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

pub const MAX_DRIFT_MS: u64 = 300_000; // 5 minutes

/// Source of wall-clock milliseconds since the Unix epoch.
pub type WallClock = fn() -> Result<u64, CoreError>;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// A 12-byte Hybrid Logical Clock timestamp: 8 bytes wall_ms (big-endian u64)
/// followed by 4 bytes counter (big-endian u32). Used as the server-assigned
/// `updated_at` of every stored entity.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct Hlc {
    wall_ms: u64,
    counter: u32,
}

impl Hlc {
    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Wall-clock component as a UTC instant, for display at the API boundary.
    pub fn wall_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(i64::try_from(self.wall_ms).ok()?)
    }

    /// Smallest timestamp ordering strictly after this one.
    pub fn successor(&self) -> Hlc {
        match self.counter.checked_add(1) {
            Some(counter) => Hlc::new(self.wall_ms, counter),
            None => Hlc::new(self.wall_ms.saturating_add(1), 0),
        }
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&self.wall_ms.to_be_bytes());
        buf[8..].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let mut wall = [0u8; 8];
        let mut counter = [0u8; 4];
        wall.copy_from_slice(&bytes[..8]);
        counter.copy_from_slice(&bytes[8..]);
        Self {
            wall_ms: u64::from_be_bytes(wall),
            counter: u32::from_be_bytes(counter),
        }
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::invalid_length(v.len(), &"12 bytes"))?;
        Ok(Hlc::from_bytes(&arr))
    }
}

/// Generates monotonically increasing HLC timestamps for one store handle.
pub struct HlcClock {
    wall_ms: u64,
    counter: u32,
    source: WallClock,
}

impl HlcClock {
    pub fn new() -> Self {
        Self::with_source(physical_now)
    }

    pub fn with_source(source: WallClock) -> Self {
        Self {
            wall_ms: 0,
            counter: 0,
            source,
        }
    }

    /// Generate the next monotonically increasing timestamp.
    pub fn tick(&mut self) -> Result<Hlc, CoreError> {
        let now = (self.source)()?;

        let hlc = if now > self.wall_ms {
            Hlc::new(now, 0)
        } else {
            Hlc::new(self.wall_ms, self.counter).successor()
        };

        self.advance(hlc);
        Ok(hlc)
    }

    /// Merge with a timestamp observed elsewhere, producing one greater than both.
    pub fn receive(&mut self, remote: &Hlc) -> Result<Hlc, CoreError> {
        let now = (self.source)()?;

        if remote.wall_ms > now + MAX_DRIFT_MS {
            return Err(CoreError::HlcDriftTooLarge {
                delta_ms: remote.wall_ms - now,
                max_ms: MAX_DRIFT_MS,
            });
        }

        let local = Hlc::new(self.wall_ms, self.counter);
        let hlc = if now > self.wall_ms && now > remote.wall_ms {
            Hlc::new(now, 0)
        } else {
            // The larger of local and remote wins; bump its counter.
            let base = local.max(*remote);
            let counter = if self.wall_ms == remote.wall_ms {
                self.counter.max(remote.counter)
            } else {
                base.counter
            };
            Hlc::new(base.wall_ms, counter + 1)
        };

        self.advance(hlc);
        Ok(hlc)
    }

    /// Timestamp for a write that must order strictly after `previous`.
    ///
    /// A stored row is already accepted state, so no drift check applies:
    /// a row stamped by a fast peer is followed by its successor and the
    /// local clock moves up to it.
    pub fn stamp_after(&mut self, now: Hlc, previous: Option<Hlc>) -> Hlc {
        match previous {
            Some(prev) if prev >= now => {
                let next = prev.successor();
                if next > Hlc::new(self.wall_ms, self.counter) {
                    self.advance(next);
                }
                next
            }
            _ => now,
        }
    }

    fn advance(&mut self, hlc: Hlc) {
        self.wall_ms = hlc.wall_ms;
        self.counter = hlc.counter;
    }
}

impl Default for HlcClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frozen() -> Result<u64, CoreError> {
        Ok(1_700_000_000_000)
    }

    #[test]
    fn tick_monotonicity() {
        let mut clock = HlcClock::new();
        let mut prev = clock.tick().unwrap();
        for _ in 0..100 {
            let next = clock.tick().unwrap();
            assert!(next > prev, "expected {next:?} > {prev:?}");
            prev = next;
        }
    }

    #[test]
    fn frozen_wall_time_increments_counter() {
        let mut clock = HlcClock::with_source(frozen);
        let t1 = clock.tick().unwrap();
        let t2 = clock.tick().unwrap();
        assert_eq!(t1, Hlc::new(1_700_000_000_000, 0));
        assert_eq!(t2, Hlc::new(1_700_000_000_000, 1));
    }

    #[test]
    fn byte_order_matches_logical_order() {
        let pairs = [
            (Hlc::new(100, 0), Hlc::new(200, 0)),
            (Hlc::new(100, 0), Hlc::new(100, 1)),
            (Hlc::new(100, 999), Hlc::new(101, 0)),
        ];
        for (a, b) in &pairs {
            assert!(a.to_bytes() < b.to_bytes());
            assert!(a < b, "expected {a:?} < {b:?}");
            assert_eq!(Hlc::from_bytes(&a.to_bytes()), *a);
        }
    }

    #[test]
    fn drift_rejection() {
        let mut clock = HlcClock::with_source(frozen);
        let remote = Hlc::new(1_700_000_000_000 + MAX_DRIFT_MS + 1, 0);
        match clock.receive(&remote) {
            Err(CoreError::HlcDriftTooLarge { delta_ms, max_ms }) => {
                assert!(delta_ms > MAX_DRIFT_MS);
                assert_eq!(max_ms, MAX_DRIFT_MS);
            }
            other => panic!("expected HlcDriftTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn stamp_after_orders_past_a_newer_row() {
        let mut clock = HlcClock::with_source(frozen);
        let now = clock.tick().unwrap();
        let newer = Hlc::new(now.wall_ms() + 10, 4);

        let stamped = clock.stamp_after(now, Some(newer));
        assert!(stamped > newer, "{stamped:?} should be > {newer:?}");
        assert_eq!(clock.stamp_after(now, None), now);
    }

    #[test]
    fn stamp_after_same_value_still_advances() {
        let mut clock = HlcClock::with_source(frozen);
        let now = clock.tick().unwrap();
        let stamped = clock.stamp_after(now, Some(now));
        assert!(stamped > now);
    }

    #[test]
    fn stamp_after_a_far_future_row_skips_drift_check() {
        let mut clock = HlcClock::with_source(frozen);
        let now = clock.tick().unwrap();
        let ahead = Hlc::new(now.wall_ms() + 2 * MAX_DRIFT_MS, 9);

        let stamped = clock.stamp_after(now, Some(ahead));
        assert_eq!(stamped, Hlc::new(ahead.wall_ms(), 10));
        // Later ticks keep ordering after the adopted time.
        assert!(clock.tick().unwrap() > stamped);
    }

    #[test]
    fn successor_carries_counter_overflow() {
        assert_eq!(Hlc::new(5, 7).successor(), Hlc::new(5, 8));
        assert_eq!(Hlc::new(5, u32::MAX).successor(), Hlc::new(6, 0));
        assert!(Hlc::new(5, u32::MAX).successor() > Hlc::new(5, u32::MAX));
    }

    #[test]
    fn wall_time_converts() {
        let hlc = Hlc::new(1_700_000_000_000, 3);
        assert_eq!(hlc.wall_time().unwrap().timestamp_millis(), 1_700_000_000_000);
    }
}
