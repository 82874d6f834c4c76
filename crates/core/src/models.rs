use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cells::CellUnion;
use crate::error::CoreError;
use crate::hlc::Hlc;
use crate::ids::*;
use crate::ovn::Ovn;

/// Identification Service Area: a volume/time claim that Remote ID data is
/// available for a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationServiceArea {
    pub id: IsaId,
    pub owner: String,
    pub url: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Server-assigned; `None` until the row has been written.
    pub updated_at: Option<Hlc>,
    pub cells: CellUnion,
}

impl IdentificationServiceArea {
    pub fn ovn(&self) -> Option<Ovn> {
        self.updated_at.map(|t| Ovn::derive(t, self.id.as_bytes()))
    }
}

/// Registration for change notifications over a footprint and time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner: String,
    pub url: String,
    pub notification_index: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub updated_at: Option<Hlc>,
    pub cells: CellUnion,
}

impl Subscription {
    pub fn ovn(&self) -> Option<Ovn> {
        self.updated_at.map(|t| Ovn::derive(t, self.id.as_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationalIntentState {
    Accepted,
    Activated,
    Nonconforming,
    Contingent,
    Ended,
}

impl OperationalIntentState {
    pub const ALL: [Self; 5] = [
        Self::Accepted,
        Self::Activated,
        Self::Nonconforming,
        Self::Contingent,
        Self::Ended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Activated => "Activated",
            Self::Nonconforming => "Nonconforming",
            Self::Contingent => "Contingent",
            Self::Ended => "Ended",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| CoreError::InvalidData(format!("unknown operational intent state: {s}")))
    }
}

/// A planned or active flight operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalIntent {
    pub id: OperationalIntentId,
    pub manager: String,
    /// Sequence number bumped by the store on every successful write.
    pub version: i32,
    pub url: String,
    pub altitude_lower: Option<f64>,
    pub altitude_upper: Option<f64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Weak link to the subscription notified about this intent; may dangle.
    pub subscription_id: Option<SubscriptionId>,
    pub state: OperationalIntentState,
    pub updated_at: Option<Hlc>,
    pub cells: CellUnion,
}

impl OperationalIntent {
    pub fn ovn(&self) -> Option<Ovn> {
        self.updated_at.map(|t| Ovn::derive(t, self.id.as_bytes()))
    }
}

/// `starts_at < ends_at` when both are present.
pub fn validate_time_bounds(
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
) -> Result<(), CoreError> {
    match (starts_at, ends_at) {
        (Some(start), Some(end)) if start >= end => Err(CoreError::InvalidData(format!(
            "starts_at {start} must precede ends_at {end}"
        ))),
        _ => Ok(()),
    }
}
