//! Entity builders with fixed windows so tests can reason about overlap.

use airspace_core::{
    CellUnion, IdentificationServiceArea, IsaId, OperationalIntent, OperationalIntentId,
    OperationalIntentState, Subscription, SubscriptionId,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

/// 2024-01-01T00:00:00Z.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn hours(h: i64) -> DateTime<Utc> {
    t0() + Duration::hours(h)
}

pub fn cells(raw: &[u64]) -> CellUnion {
    CellUnion::from_raw(raw.iter().copied())
}

/// Deterministic intent id; ids compare in `n` order.
pub fn intent_id(n: u128) -> OperationalIntentId {
    OperationalIntentId::from_uuid(Uuid::from_u128(n))
}

pub fn isa(owner: &str, raw_cells: &[u64]) -> IdentificationServiceArea {
    IdentificationServiceArea {
        id: IsaId::new(),
        owner: owner.to_string(),
        url: format!("https://{owner}.example/isa"),
        starts_at: Some(t0()),
        ends_at: Some(hours(24)),
        updated_at: None,
        cells: cells(raw_cells),
    }
}

pub fn subscription(owner: &str, raw_cells: &[u64]) -> Subscription {
    Subscription {
        id: SubscriptionId::new(),
        owner: owner.to_string(),
        url: format!("https://{owner}.example/subscriptions"),
        notification_index: 0,
        starts_at: Some(t0()),
        ends_at: Some(hours(24)),
        updated_at: None,
        cells: cells(raw_cells),
    }
}

pub fn intent(manager: &str, raw_cells: &[u64], altitude: (f64, f64)) -> OperationalIntent {
    OperationalIntent {
        id: OperationalIntentId::new(),
        manager: manager.to_string(),
        version: 0,
        url: format!("https://{manager}.example/operational_intents"),
        altitude_lower: Some(altitude.0),
        altitude_upper: Some(altitude.1),
        starts_at: Some(t0()),
        ends_at: Some(hours(24)),
        subscription_id: None,
        state: OperationalIntentState::Accepted,
        updated_at: None,
        cells: cells(raw_cells),
    }
}
