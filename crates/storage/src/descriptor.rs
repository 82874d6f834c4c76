//! Named field descriptors, one per entity kind.
//!
//! The projection used to read rows and the statement used to write them are
//! both generated from the same column list, and the values a record binds
//! are checked against it before every write.

use airspace_core::{CellUnion, Hlc, Identifier};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Value;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy)]
pub struct TableDescriptor {
    /// Human-readable kind used in errors and logs.
    pub kind: &'static str,
    pub table: &'static str,
    pub cells_table: &'static str,
    pub columns: &'static [&'static str],
    pub altitude_bounds: bool,
}

impl TableDescriptor {
    pub fn projection(&self) -> String {
        self.columns.join(", ")
    }

    pub fn select_by_id_sql(&self) -> String {
        format!("SELECT {} FROM {} WHERE id = :id", self.projection(), self.table)
    }

    pub fn select_by_owner_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE owner = :owner ORDER BY id",
            self.projection(),
            self.table
        )
    }

    pub fn upsert_sql(&self) -> String {
        let placeholders: Vec<String> = self.columns.iter().map(|c| format!(":{c}")).collect();
        let updates: Vec<String> = self
            .columns
            .iter()
            .filter(|c| **c != "id")
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        format!(
            "INSERT INTO {table} ({projection}) VALUES ({values})
             ON CONFLICT (id) DO UPDATE SET {updates}
             RETURNING {projection}",
            table = self.table,
            projection = self.projection(),
            values = placeholders.join(", "),
            updates = updates.join(", "),
        )
    }

    /// Overlap search; an absent bound on either side never excludes a row.
    pub fn search_sql(&self) -> String {
        let mut sql = format!(
            "SELECT {projection} FROM {table}
             WHERE id IN (SELECT entity_id FROM {cells} WHERE cell_id IN rarray(:cells))
             AND COALESCE(ends_at >= :starts_at, 1)
             AND COALESCE(starts_at <= :ends_at, 1)",
            projection = self.projection(),
            table = self.table,
            cells = self.cells_table,
        );
        if self.altitude_bounds {
            sql.push_str(
                "
             AND COALESCE(altitude_upper >= :altitude_lo, 1)
             AND COALESCE(altitude_lower <= :altitude_hi, 1)",
            );
        }
        sql
    }

    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = ?1", self.table)
    }

    pub fn cells_select_sql(&self) -> String {
        format!(
            "SELECT cell_id FROM {} WHERE entity_id = ?1 ORDER BY cell_id",
            self.cells_table
        )
    }

    pub fn cells_clear_sql(&self) -> String {
        format!("DELETE FROM {} WHERE entity_id = ?1", self.cells_table)
    }

    pub fn cells_insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (cell_id, entity_id) VALUES (?1, ?2)",
            self.cells_table
        )
    }

    /// Ensures a record binds exactly the descriptor's columns.
    pub fn check_bindings<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<(), StoreError> {
        let mut bound: Vec<&str> = names.into_iter().collect();
        bound.sort_unstable();
        let mut expected: Vec<&str> = self.columns.to_vec();
        expected.sort_unstable();
        if bound != expected {
            tracing::error!(kind = self.kind, ?bound, ?expected, "record bindings drifted from descriptor");
            return Err(StoreError::ConsistencyFault(format!(
                "{} binds {bound:?}, descriptor expects {expected:?}",
                self.kind
            )));
        }
        Ok(())
    }
}

/// An entity kind persisted through a `TableDescriptor`.
pub trait Record: Sized {
    type Id: Identifier;

    const TABLE: TableDescriptor;

    fn id(&self) -> Self::Id;

    fn cells(&self) -> &CellUnion;

    fn set_cells(&mut self, cells: CellUnion);

    fn updated_at(&self) -> Option<Hlc>;

    fn set_updated_at(&mut self, at: Hlc);

    fn time_bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

    /// Kind-specific checks run before any mutation.
    fn validate(&self) -> Result<(), StoreError>;

    /// Fields the store owns rather than the caller, e.g. sequence counters.
    fn apply_server_fields(&mut self, _previous: Option<&Self>) {}

    /// Reads every descriptor column by name.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Values for every descriptor column, keyed by column name.
    fn to_values(&self) -> Vec<(&'static str, Value)>;
}
