use airspace_core::hlc::Hlc;
use airspace_core::models::validate_time_bounds;
use airspace_core::{
    CellId, CellUnion, IdentificationServiceArea, Identifier, IsaId, OperationalIntent,
    OperationalIntentId, OperationalIntentState, Subscription, SubscriptionId,
};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::{Type, Value};

use crate::descriptor::{Record, TableDescriptor};
use crate::error::StoreError;

/// Error wrapper for column values that decode but fail domain checks.
#[derive(Debug)]
struct ColumnDecodeError(String);

impl std::fmt::Display for ColumnDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ColumnDecodeError {}

fn decode_error(row: &Row<'_>, column: &str, ty: Type, message: String) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, ty, Box::new(ColumnDecodeError(message)))
}

pub fn pack_cells(cells: &CellUnion) -> Vec<u8> {
    cells.iter().flat_map(|c| c.to_i64().to_be_bytes()).collect()
}

pub fn unpack_cells(bytes: &[u8]) -> Result<CellUnion, String> {
    if bytes.is_empty() || bytes.len() % 8 != 0 {
        return Err(format!("cells column holds {} bytes", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            CellId::from_i64(i64::from_be_bytes(word))
        })
        .collect())
}

fn id_value<I: Identifier>(id: &I) -> Value {
    Value::Blob(id.as_bytes().to_vec())
}

fn time_value(at: Option<DateTime<Utc>>) -> Value {
    at.map_or(Value::Null, |t| Value::Integer(t.timestamp_micros()))
}

fn hlc_value(at: Option<Hlc>) -> Value {
    at.map_or(Value::Null, |t| Value::Blob(t.to_bytes().to_vec()))
}

fn real_value(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Real)
}

fn read_id<I: Identifier>(row: &Row<'_>, column: &str) -> rusqlite::Result<I> {
    let bytes: Vec<u8> = row.get(column)?;
    let bytes: [u8; 16] = bytes.try_into().map_err(|b: Vec<u8>| {
        decode_error(row, column, Type::Blob, format!("id is {} bytes", b.len()))
    })?;
    Ok(I::from_bytes(bytes))
}

fn read_optional_id<I: Identifier>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<I>> {
    match row.get::<_, Option<Vec<u8>>>(column)? {
        None => Ok(None),
        Some(_) => read_id(row, column).map(Some),
    }
}

fn read_time(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(column)? {
        None => Ok(None),
        Some(micros) => DateTime::from_timestamp_micros(micros).map(Some).ok_or_else(|| {
            decode_error(row, column, Type::Integer, format!("{micros} out of range"))
        }),
    }
}

fn read_hlc(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<Hlc>> {
    let bytes: Vec<u8> = row.get(column)?;
    let bytes: [u8; 12] = bytes.try_into().map_err(|b: Vec<u8>| {
        decode_error(row, column, Type::Blob, format!("timestamp is {} bytes", b.len()))
    })?;
    Ok(Some(Hlc::from_bytes(&bytes)))
}

fn read_cells(row: &Row<'_>, column: &str) -> rusqlite::Result<CellUnion> {
    let bytes: Vec<u8> = row.get(column)?;
    unpack_cells(&bytes).map_err(|message| decode_error(row, column, Type::Blob, message))
}

fn validate_common(
    cells: &CellUnion,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
) -> Result<(), StoreError> {
    if cells.is_empty() {
        return Err(StoreError::InvalidInput("missing cell IDs".into()));
    }
    validate_time_bounds(starts_at, ends_at).map_err(|e| StoreError::InvalidInput(e.to_string()))
}

impl Record for IdentificationServiceArea {
    type Id = IsaId;

    const TABLE: TableDescriptor = TableDescriptor {
        kind: "identification service area",
        table: "identification_service_areas",
        cells_table: "identification_service_area_cells",
        columns: &["id", "owner", "url", "starts_at", "ends_at", "updated_at", "cells"],
        altitude_bounds: false,
    };

    fn id(&self) -> IsaId {
        self.id
    }

    fn cells(&self) -> &CellUnion {
        &self.cells
    }

    fn set_cells(&mut self, cells: CellUnion) {
        self.cells = cells;
    }

    fn updated_at(&self) -> Option<Hlc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: Hlc) {
        self.updated_at = Some(at);
    }

    fn time_bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.starts_at, self.ends_at)
    }

    fn validate(&self) -> Result<(), StoreError> {
        validate_common(&self.cells, self.starts_at, self.ends_at)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            owner: row.get("owner")?,
            url: row.get("url")?,
            starts_at: read_time(row, "starts_at")?,
            ends_at: read_time(row, "ends_at")?,
            updated_at: read_hlc(row, "updated_at")?,
            cells: read_cells(row, "cells")?,
        })
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", id_value(&self.id)),
            ("owner", Value::Text(self.owner.clone())),
            ("url", Value::Text(self.url.clone())),
            ("starts_at", time_value(self.starts_at)),
            ("ends_at", time_value(self.ends_at)),
            ("updated_at", hlc_value(self.updated_at)),
            ("cells", Value::Blob(pack_cells(&self.cells))),
        ]
    }
}

impl Record for Subscription {
    type Id = SubscriptionId;

    const TABLE: TableDescriptor = TableDescriptor {
        kind: "subscription",
        table: "subscriptions",
        cells_table: "subscription_cells",
        columns: &[
            "id",
            "owner",
            "url",
            "notification_index",
            "starts_at",
            "ends_at",
            "updated_at",
            "cells",
        ],
        altitude_bounds: false,
    };

    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn cells(&self) -> &CellUnion {
        &self.cells
    }

    fn set_cells(&mut self, cells: CellUnion) {
        self.cells = cells;
    }

    fn updated_at(&self) -> Option<Hlc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: Hlc) {
        self.updated_at = Some(at);
    }

    fn time_bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.starts_at, self.ends_at)
    }

    fn validate(&self) -> Result<(), StoreError> {
        validate_common(&self.cells, self.starts_at, self.ends_at)
    }

    // Only notification increments move the index; writers never set it.
    fn apply_server_fields(&mut self, previous: Option<&Self>) {
        self.notification_index = previous.map_or(0, |prev| prev.notification_index);
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: read_id(row, "id")?,
            owner: row.get("owner")?,
            url: row.get("url")?,
            notification_index: row.get("notification_index")?,
            starts_at: read_time(row, "starts_at")?,
            ends_at: read_time(row, "ends_at")?,
            updated_at: read_hlc(row, "updated_at")?,
            cells: read_cells(row, "cells")?,
        })
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", id_value(&self.id)),
            ("owner", Value::Text(self.owner.clone())),
            ("url", Value::Text(self.url.clone())),
            ("notification_index", Value::Integer(i64::from(self.notification_index))),
            ("starts_at", time_value(self.starts_at)),
            ("ends_at", time_value(self.ends_at)),
            ("updated_at", hlc_value(self.updated_at)),
            ("cells", Value::Blob(pack_cells(&self.cells))),
        ]
    }
}

impl Record for OperationalIntent {
    type Id = OperationalIntentId;

    const TABLE: TableDescriptor = TableDescriptor {
        kind: "operational intent",
        table: "operational_intents",
        cells_table: "operational_intent_cells",
        columns: &[
            "id",
            "owner",
            "version",
            "url",
            "altitude_lower",
            "altitude_upper",
            "starts_at",
            "ends_at",
            "subscription_id",
            "updated_at",
            "state",
            "cells",
        ],
        altitude_bounds: true,
    };

    fn id(&self) -> OperationalIntentId {
        self.id
    }

    fn cells(&self) -> &CellUnion {
        &self.cells
    }

    fn set_cells(&mut self, cells: CellUnion) {
        self.cells = cells;
    }

    fn updated_at(&self) -> Option<Hlc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: Hlc) {
        self.updated_at = Some(at);
    }

    fn time_bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.starts_at, self.ends_at)
    }

    fn validate(&self) -> Result<(), StoreError> {
        for altitude in [self.altitude_lower, self.altitude_upper].into_iter().flatten() {
            if !altitude.is_finite() {
                return Err(StoreError::InvalidInput(format!("altitude {altitude} is not finite")));
            }
        }
        if let (Some(lower), Some(upper)) = (self.altitude_lower, self.altitude_upper) {
            if lower > upper {
                return Err(StoreError::InvalidInput(format!(
                    "altitude_lower {lower} above altitude_upper {upper}"
                )));
            }
        }
        validate_common(&self.cells, self.starts_at, self.ends_at)
    }

    fn apply_server_fields(&mut self, previous: Option<&Self>) {
        self.version = previous.map_or(1, |prev| prev.version + 1);
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let state: String = row.get("state")?;
        let state = OperationalIntentState::parse(&state)
            .map_err(|e| decode_error(row, "state", Type::Text, e.to_string()))?;
        Ok(Self {
            id: read_id(row, "id")?,
            manager: row.get("owner")?,
            version: row.get("version")?,
            url: row.get("url")?,
            altitude_lower: row.get("altitude_lower")?,
            altitude_upper: row.get("altitude_upper")?,
            starts_at: read_time(row, "starts_at")?,
            ends_at: read_time(row, "ends_at")?,
            subscription_id: read_optional_id(row, "subscription_id")?,
            state,
            updated_at: read_hlc(row, "updated_at")?,
            cells: read_cells(row, "cells")?,
        })
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", id_value(&self.id)),
            ("owner", Value::Text(self.manager.clone())),
            ("version", Value::Integer(i64::from(self.version))),
            ("url", Value::Text(self.url.clone())),
            ("altitude_lower", real_value(self.altitude_lower)),
            ("altitude_upper", real_value(self.altitude_upper)),
            ("starts_at", time_value(self.starts_at)),
            ("ends_at", time_value(self.ends_at)),
            (
                "subscription_id",
                self.subscription_id.as_ref().map_or(Value::Null, id_value),
            ),
            ("updated_at", hlc_value(self.updated_at)),
            ("state", Value::Text(self.state.as_str().to_string())),
            ("cells", Value::Blob(pack_cells(&self.cells))),
        ]
    }
}
