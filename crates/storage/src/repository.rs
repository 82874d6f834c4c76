use std::fmt;
use std::rc::Rc;

use airspace_core::geo::Volume4D;
use airspace_core::hlc::{Hlc, HlcClock};
use airspace_core::{CellId, CellUnion, CoveringEngine, Identifier, Ovn};
use rusqlite::ToSql;
use rusqlite::types::Value;
use rusqlite::vtab::array::Array;

use crate::cancel::Cancel;
use crate::descriptor::Record;
use crate::error::{SqliteResultExt, StoreError};
use crate::filter::SearchFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    Read,
    Write,
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeMode::Read => f.write_str("read"),
            ScopeMode::Write => f.write_str("write"),
        }
    }
}

/// One transaction against the store. Every operation issued through a scope
/// commits or rolls back together.
pub struct Scope<'conn> {
    tx: rusqlite::Transaction<'conn>,
    clock: &'conn mut HlcClock,
    covering: &'conn CoveringEngine,
    cancel: Cancel,
    mode: ScopeMode,
    // Shared by every write in the scope.
    timestamp: Option<Hlc>,
}

impl<'conn> Scope<'conn> {
    pub(crate) fn new(
        tx: rusqlite::Transaction<'conn>,
        clock: &'conn mut HlcClock,
        covering: &'conn CoveringEngine,
        cancel: Cancel,
        mode: ScopeMode,
    ) -> Self {
        Self {
            tx,
            clock,
            covering,
            cancel,
            mode,
            timestamp: None,
        }
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    pub fn covering(&self) -> &CoveringEngine {
        self.covering
    }

    pub(crate) fn commit(self) -> Result<(), StoreError> {
        self.cancel.check(|| "commit".into())?;
        self.tx.progress_handler(0, None::<fn() -> bool>);
        self.tx.commit().during(|| "commit".into())
    }

    pub(crate) fn rollback(self) -> Result<(), StoreError> {
        self.tx.progress_handler(0, None::<fn() -> bool>);
        // An interrupted write makes SQLite abandon the transaction itself.
        if self.tx.is_autocommit() {
            return Ok(());
        }
        self.tx.rollback().during(|| "rollback".into())
    }

    pub(crate) fn check(&self, op: impl FnOnce() -> String) -> Result<(), StoreError> {
        self.cancel.check(op)
    }

    pub(crate) fn require_write(&self, op: impl FnOnce() -> String) -> Result<(), StoreError> {
        if self.mode == ScopeMode::Read {
            return Err(StoreError::InvalidInput(format!("{} in a read-only scope", op())));
        }
        Ok(())
    }

    pub(crate) fn tx(&self) -> &rusqlite::Transaction<'conn> {
        &self.tx
    }

    fn transaction_time(&mut self) -> Result<Hlc, StoreError> {
        if let Some(at) = self.timestamp {
            return Ok(at);
        }
        let at = self.clock.tick()?;
        self.timestamp = Some(at);
        Ok(at)
    }

    pub(crate) fn fetch<R: Record>(
        &self,
        sql: &str,
        params: &[(&str, &dyn ToSql)],
        op: &str,
    ) -> Result<Vec<R>, StoreError> {
        let mut stmt = self.tx.prepare_cached(sql).during(|| op.to_string())?;
        let rows = stmt
            .query_map(params, |row| R::from_row(row))
            .during(|| op.to_string())?;
        rows.collect::<Result<Vec<_>, _>>().during(|| op.to_string())
    }

    /// Core row only, without consulting the cell index.
    fn find<R: Record>(&self, id: R::Id, op: &str) -> Result<Option<R>, StoreError> {
        let mut rows = self.fetch::<R>(
            &R::TABLE.select_by_id_sql(),
            &[(":id", &id.as_bytes().as_slice())],
            op,
        )?;
        if rows.len() > 1 {
            return Err(StoreError::ConsistencyFault(format!(
                "{} rows for {} {id}",
                rows.len(),
                R::TABLE.kind
            )));
        }
        Ok(rows.pop())
    }

    pub fn get<R: Record>(&self, id: R::Id) -> Result<R, StoreError> {
        let kind = R::TABLE.kind;
        let op = format!("get {kind} {id}");
        let _span = tracing::debug_span!("get", kind, %id).entered();
        self.check(|| op.clone())?;

        let mut entity = self
            .find::<R>(id, &op)?
            .ok_or_else(|| StoreError::not_found(kind, id))?;
        let indexed = self.indexed_cells::<R>(id)?;
        if indexed.is_empty() || &indexed != entity.cells() {
            tracing::error!(
                kind,
                %id,
                indexed = indexed.len(),
                stored = entity.cells().len(),
                "cell index disagrees with stored cells"
            );
            return Err(StoreError::ConsistencyFault(format!(
                "cell index for {kind} {id} disagrees with the stored row"
            )));
        }
        entity.set_cells(indexed);
        Ok(entity)
    }

    /// Cells recorded for `id` in the kind's overlap index.
    pub fn indexed_cells<R: Record>(&self, id: R::Id) -> Result<CellUnion, StoreError> {
        let op = || format!("read cell index of {} {id}", R::TABLE.kind);
        let mut stmt = self
            .tx
            .prepare_cached(&R::TABLE.cells_select_sql())
            .during(op)?;
        let cells = stmt
            .query_map([id.as_bytes().as_slice()], |row| row.get::<_, i64>(0))
            .during(op)?
            .map(|cell| cell.map(CellId::from_i64))
            .collect::<Result<CellUnion, _>>()
            .during(op)?;
        Ok(cells)
    }

    pub fn search<R: Record>(&self, filter: &SearchFilter) -> Result<Vec<R>, StoreError> {
        let kind = R::TABLE.kind;
        let op = format!("search {kind}");
        let _span = tracing::debug_span!("search", kind, cells = filter.cells.len()).entered();
        filter.validate()?;
        self.check(|| op.clone())?;

        let cells: Array = Rc::new(
            filter
                .cells
                .iter()
                .map(|cell| Value::Integer(cell.to_i64()))
                .collect(),
        );
        let starts_at = filter.starts_at.map(|t| t.timestamp_micros());
        let ends_at = filter.ends_at.map(|t| t.timestamp_micros());
        let mut params: Vec<(&str, &dyn ToSql)> = vec![
            (":cells", &cells as &dyn ToSql),
            (":starts_at", &starts_at as &dyn ToSql),
            (":ends_at", &ends_at as &dyn ToSql),
        ];
        if R::TABLE.altitude_bounds {
            params.push((":altitude_lo", &filter.altitude_lo as &dyn ToSql));
            params.push((":altitude_hi", &filter.altitude_hi as &dyn ToSql));
        }
        let found = self.fetch::<R>(&R::TABLE.search_sql(), &params, &op)?;
        tracing::debug!(kind, found = found.len(), "search complete");
        Ok(found)
    }

    /// Covers the volume with the store's covering policy, then searches.
    pub fn search_volume<R: Record>(&self, volume: &Volume4D) -> Result<Vec<R>, StoreError> {
        let filter = SearchFilter::from_volume(volume, self.covering)?;
        self.search::<R>(&filter)
    }

    pub fn list_by_owner<R: Record>(&self, owner: &str) -> Result<Vec<R>, StoreError> {
        let op = format!("list {} owned by {owner}", R::TABLE.kind);
        self.check(|| op.clone())?;
        self.fetch::<R>(&R::TABLE.select_by_owner_sql(), &[(":owner", &owner)], &op)
    }

    /// Creates or replaces `entity`.
    ///
    /// With a version token the write only succeeds against an existing row
    /// whose current token matches. Without one the write creates the row, or
    /// replaces whatever is there.
    pub fn upsert<R: Record>(&mut self, mut entity: R, expected: Option<&Ovn>) -> Result<R, StoreError> {
        let kind = R::TABLE.kind;
        let id = entity.id();
        let op = format!("upsert {kind} {id}");
        let _span = tracing::debug_span!("upsert", kind, %id).entered();
        self.require_write(|| op.clone())?;
        self.check(|| op.clone())?;
        entity.validate()?;

        let previous = self.find::<R>(id, &op)?;
        match (expected, &previous) {
            (Some(_), None) => {
                return Err(StoreError::version_conflict(kind, id, "update of nonexistent entity"));
            }
            (Some(token), Some(prev)) => {
                let current = prev.updated_at().ok_or_else(|| {
                    StoreError::ConsistencyFault(format!("{kind} {id} has no update timestamp"))
                })?;
                if !token.matches(current, id.as_bytes()) {
                    return Err(StoreError::version_conflict(kind, id, "stale version token"));
                }
            }
            (None, Some(_)) => {
                tracing::warn!(kind, %id, "upsert without version token replaces existing entity");
            }
            (None, None) => {}
        }

        let now = self.transaction_time()?;
        let stamp = self
            .clock
            .stamp_after(now, previous.as_ref().and_then(R::updated_at));
        entity.set_updated_at(stamp);
        entity.apply_server_fields(previous.as_ref());

        let values = entity.to_values();
        R::TABLE.check_bindings(values.iter().map(|(name, _)| *name))?;
        let named: Vec<(String, Value)> = values
            .into_iter()
            .map(|(name, value)| (format!(":{name}"), value))
            .collect();
        let params: Vec<(&str, &dyn ToSql)> = named
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();

        let mut written = self.fetch::<R>(&R::TABLE.upsert_sql(), &params, &op)?;
        if written.len() != 1 {
            return Err(StoreError::ConsistencyFault(format!(
                "upsert of {kind} {id} returned {} rows",
                written.len()
            )));
        }
        let mut written = written.remove(0);
        self.replace_indexed_cells::<R>(id, entity.cells(), &op)?;
        written.set_cells(entity.cells().clone());

        tracing::debug!(kind, %id, replaced = previous.is_some(), "upserted");
        Ok(written)
    }

    fn replace_indexed_cells<R: Record>(
        &self,
        id: R::Id,
        cells: &CellUnion,
        op: &str,
    ) -> Result<(), StoreError> {
        let id_bytes = id.as_bytes().as_slice();
        self.tx
            .prepare_cached(&R::TABLE.cells_clear_sql())
            .and_then(|mut stmt| stmt.execute([id_bytes]))
            .during(|| op.to_string())?;
        let mut insert = self
            .tx
            .prepare_cached(&R::TABLE.cells_insert_sql())
            .during(|| op.to_string())?;
        for cell in cells.iter() {
            insert
                .execute(rusqlite::params![cell.to_i64(), id_bytes])
                .during(|| op.to_string())?;
        }
        Ok(())
    }

    pub fn delete<R: Record>(&mut self, id: R::Id) -> Result<(), StoreError> {
        let kind = R::TABLE.kind;
        let op = format!("delete {kind} {id}");
        let _span = tracing::debug_span!("delete", kind, %id).entered();
        self.require_write(|| op.clone())?;
        self.check(|| op.clone())?;

        let id_bytes = id.as_bytes().as_slice();
        self.tx
            .execute(&R::TABLE.cells_clear_sql(), [id_bytes])
            .during(|| op.clone())?;
        let deleted = self
            .tx
            .execute(&R::TABLE.delete_sql(), [id_bytes])
            .during(|| op.clone())?;
        match deleted {
            0 => Err(StoreError::not_found(kind, id)),
            1 => {
                tracing::debug!(kind, %id, "deleted");
                Ok(())
            }
            n => Err(StoreError::ConsistencyFault(format!(
                "delete of {kind} {id} removed {n} rows"
            ))),
        }
    }
}
