use std::sync::atomic::Ordering;

use airspace_core::geo::Volume4D;
use airspace_core::hlc::HlcClock;
use airspace_core::{CoveringEngine, OperationalIntentId, Ovn, SubscriptionId};
use rusqlite::{Connection, TransactionBehavior};

use crate::cancel::Cancel;
use crate::config::StoreConfig;
use crate::descriptor::Record;
use crate::error::{SqliteResultExt, StoreError};
use crate::filter::SearchFilter;
use crate::repository::{Scope, ScopeMode};
use crate::schema;

/// A handle onto the shared database. Each handle owns one connection and
/// runs one scope at a time; open one handle per concurrent worker.
pub struct Store {
    conn: Connection,
    clock: HlcClock,
    covering: CoveringEngine,
    config: StoreConfig,
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .during(|| "open database".into())?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(StoreConfig::default())
    }

    fn from_connection(conn: Connection, config: StoreConfig) -> Result<Self, StoreError> {
        let covering = CoveringEngine::new(config.covering)
            .map_err(|e| StoreError::Config(e.to_string()))?;
        conn.busy_timeout(config.busy_timeout())
            .during(|| "set busy timeout".into())?;
        rusqlite::vtab::array::load_module(&conn).during(|| "load rarray module".into())?;
        schema::bootstrap(&conn)?;
        tracing::info!(
            path = ?config.path,
            level = config.covering.level,
            max_cells = config.covering.max_cells,
            "store opened"
        );
        Ok(Self {
            conn,
            clock: HlcClock::new(),
            covering,
            config,
        })
    }

    /// Replaces the timestamp source, e.g. with a frozen clock in tests.
    pub fn with_clock(mut self, clock: HlcClock) -> Self {
        self.clock = clock;
        self
    }

    /// Re-runs schema creation. Idempotent.
    pub fn bootstrap(&self) -> Result<(), StoreError> {
        schema::bootstrap(&self.conn)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn covering(&self) -> &CoveringEngine {
        &self.covering
    }

    /// Runs `f` inside one write transaction.
    ///
    /// Commits when `f` returns `Ok` and the caller has not cancelled; rolls
    /// back on any error. A panic inside `f` drops the transaction, which
    /// rolls it back before the panic reaches the caller.
    pub fn transact<T, F>(&mut self, cancel: &Cancel, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<T, StoreError>,
    {
        self.run(ScopeMode::Write, cancel, f)
    }

    /// Runs `f` inside a read transaction that is always rolled back.
    /// Mutations through the scope fail with `InvalidInput`.
    pub fn read<T, F>(&mut self, cancel: &Cancel, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<T, StoreError>,
    {
        self.run(ScopeMode::Read, cancel, f)
    }

    fn run<T, F>(&mut self, mode: ScopeMode, cancel: &Cancel, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<T, StoreError>,
    {
        cancel.check(|| format!("begin {mode} scope"))?;
        let flag = cancel.flag();
        self.conn.progress_handler(
            self.config.cancel_poll_ops,
            Some(move || flag.load(Ordering::SeqCst)),
        );
        let result = self.run_scope(mode, cancel, f);
        self.conn.progress_handler(0, None::<fn() -> bool>);
        result
    }

    fn run_scope<T, F>(&mut self, mode: ScopeMode, cancel: &Cancel, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Scope<'_>) -> Result<T, StoreError>,
    {
        let behavior = match mode {
            ScopeMode::Write => TransactionBehavior::Immediate,
            ScopeMode::Read => TransactionBehavior::Deferred,
        };
        let tx = self
            .conn
            .transaction_with_behavior(behavior)
            .during(|| format!("begin {mode} scope"))?;
        let mut scope = Scope::new(tx, &mut self.clock, &self.covering, cancel.clone(), mode);

        match f(&mut scope) {
            Ok(value) if mode == ScopeMode::Write => {
                scope.commit()?;
                tracing::debug!("scope committed");
                Ok(value)
            }
            Ok(value) => {
                scope.rollback()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = scope.rollback() {
                    tracing::error!(error = %rollback, "rollback failed");
                }
                tracing::debug!(%mode, error = %err, "scope rolled back");
                Err(err)
            }
        }
    }

    pub fn get<R: Record>(&mut self, cancel: &Cancel, id: R::Id) -> Result<R, StoreError> {
        self.read(cancel, |scope| scope.get::<R>(id))
    }

    pub fn search<R: Record>(&mut self, cancel: &Cancel, filter: &SearchFilter) -> Result<Vec<R>, StoreError> {
        self.read(cancel, |scope| scope.search::<R>(filter))
    }

    pub fn search_volume<R: Record>(&mut self, cancel: &Cancel, volume: &Volume4D) -> Result<Vec<R>, StoreError> {
        self.read(cancel, |scope| scope.search_volume::<R>(volume))
    }

    pub fn upsert<R: Record>(&mut self, cancel: &Cancel, entity: R, expected: Option<&Ovn>) -> Result<R, StoreError> {
        self.transact(cancel, |scope| scope.upsert(entity, expected))
    }

    pub fn delete<R: Record>(&mut self, cancel: &Cancel, id: R::Id) -> Result<(), StoreError> {
        self.transact(cancel, |scope| scope.delete::<R>(id))
    }

    pub fn dependents_of_subscription(
        &mut self,
        cancel: &Cancel,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<OperationalIntentId>, StoreError> {
        self.read(cancel, |scope| scope.dependents_of_subscription(subscription_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airspace_core::hlc::Hlc;
    use airspace_core::{CellUnion, IdentificationServiceArea, IsaId};
    use chrono::{TimeZone, Utc};

    fn frozen() -> Result<u64, airspace_core::CoreError> {
        Ok(1_700_000_000_000)
    }

    fn isa(cells: &[u64]) -> IdentificationServiceArea {
        IdentificationServiceArea {
            id: IsaId::new(),
            owner: "uss1".into(),
            url: "https://uss1.example/isa".into(),
            starts_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ends_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()),
            updated_at: None,
            cells: CellUnion::from_raw(cells.iter().copied()),
        }
    }

    #[test]
    fn writes_in_one_scope_share_a_timestamp() {
        let mut store = Store::open_in_memory()
            .unwrap()
            .with_clock(HlcClock::with_source(frozen));
        let cancel = Cancel::new();
        let (a, b) = store
            .transact(&cancel, |scope| {
                let a = scope.upsert(isa(&[1]), None)?;
                let b = scope.upsert(isa(&[2]), None)?;
                Ok((a, b))
            })
            .unwrap();
        assert_eq!(a.updated_at, b.updated_at);
        assert_eq!(a.updated_at.map(|t| t.wall_ms()), Some(1_700_000_000_000));
    }

    #[test]
    fn rewrite_in_same_scope_still_advances() {
        let mut store = Store::open_in_memory()
            .unwrap()
            .with_clock(HlcClock::with_source(frozen));
        let cancel = Cancel::new();
        let (first, second) = store
            .transact(&cancel, |scope| {
                let first = scope.upsert(isa(&[1]), None)?;
                let second = scope.upsert(first.clone(), first.ovn().as_ref())?;
                Ok((first, second))
            })
            .unwrap();
        assert!(second.updated_at > first.updated_at);
        assert_ne!(first.ovn(), second.ovn());
    }

    #[test]
    fn error_rolls_back_every_write() {
        let mut store = Store::open_in_memory().unwrap();
        let cancel = Cancel::new();
        let kept = isa(&[1]);
        let result: Result<(), _> = store.transact(&cancel, |scope| {
            scope.upsert(kept.clone(), None)?;
            Err(StoreError::InvalidInput("abort".into()))
        });
        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
        assert!(matches!(
            store.get::<IdentificationServiceArea>(&cancel, kept.id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn cancelled_before_start() {
        let mut store = Store::open_in_memory().unwrap();
        let cancel = Cancel::new();
        cancel.cancel();
        assert!(matches!(
            store.upsert(&cancel, isa(&[1]), None),
            Err(StoreError::Cancelled { .. })
        ));
    }

    #[test]
    fn long_query_is_interrupted_once_cancelled() {
        let mut store = Store::open_in_memory().unwrap();
        let cancel = Cancel::new();
        let trigger = cancel.clone();
        let result = store.read(&cancel, |scope| {
            trigger.cancel();
            scope
                .tx()
                .query_row(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 10000000)
                     SELECT count(*) FROM n",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .during(|| "count".into())
        });
        assert!(matches!(result, Err(StoreError::Cancelled { ref op }) if op == "count"));

        // The handle recovers for the next caller.
        let fresh = Cancel::new();
        assert!(store.read(&fresh, |scope| scope.list_by_owner::<IdentificationServiceArea>("uss1")).is_ok());
    }

    #[test]
    fn bad_covering_policy_is_a_config_error() {
        let mut config = StoreConfig::default();
        config.covering.max_cells = 0;
        assert!(matches!(Store::open(config), Err(StoreError::Config(_))));
    }

    #[test]
    fn second_handle_sees_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::at_path(dir.path().join("airspace.db"));
        let cancel = Cancel::new();

        let mut writer = Store::open(config.clone()).unwrap();
        let written = writer.upsert(&cancel, isa(&[3, 4]), None).unwrap();

        let mut reader = Store::open(config).unwrap();
        let read: IdentificationServiceArea = reader.get(&cancel, written.id).unwrap();
        assert_eq!(read.ovn(), written.ovn());
    }

    #[test]
    fn stored_timestamp_roundtrips() {
        let mut store = Store::open_in_memory()
            .unwrap()
            .with_clock(HlcClock::with_source(frozen));
        let cancel = Cancel::new();
        let written = store.upsert(&cancel, isa(&[7, 8]), None).unwrap();
        let read: IdentificationServiceArea = store.get(&cancel, written.id).unwrap();
        assert_eq!(read.updated_at, Some(Hlc::new(1_700_000_000_000, 0)));
        assert_eq!(read, written);
    }
}
