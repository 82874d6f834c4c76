use rusqlite::Connection;

use crate::error::{SqliteResultExt, StoreError};

pub const SCHEMA_VERSION: i32 = 1;

/// Creates every table and index the store needs. Idempotent: safe to run on
/// every process start against an already bootstrapped database.
pub fn bootstrap(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
    ",
    )
    .during(|| "apply connection pragmas".into())?;
    conn.execute_batch(SCHEMA_SQL)
        .during(|| "bootstrap schema".into())?;
    tracing::debug!(version = SCHEMA_VERSION, "schema bootstrapped");
    Ok(())
}

// Cells are kept twice: packed big-endian i64s on the row (never empty) and
// one row per cell in the matching *_cells table, which serves overlap search.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS identification_service_areas (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    owner TEXT NOT NULL,
    url TEXT NOT NULL,
    starts_at INTEGER,
    ends_at INTEGER,
    updated_at BLOB NOT NULL CHECK (length(updated_at) = 12),
    cells BLOB NOT NULL CHECK (length(cells) > 0 AND length(cells) % 8 = 0),
    CHECK (starts_at IS NULL OR ends_at IS NULL OR starts_at < ends_at)
);
CREATE INDEX IF NOT EXISTS idx_isa_owner ON identification_service_areas (owner);
CREATE INDEX IF NOT EXISTS idx_isa_starts_at ON identification_service_areas (starts_at);
CREATE INDEX IF NOT EXISTS idx_isa_ends_at ON identification_service_areas (ends_at);
CREATE INDEX IF NOT EXISTS idx_isa_updated_at ON identification_service_areas (updated_at);

CREATE TABLE IF NOT EXISTS identification_service_area_cells (
    cell_id INTEGER NOT NULL,
    entity_id BLOB NOT NULL REFERENCES identification_service_areas (id) ON DELETE CASCADE,
    PRIMARY KEY (cell_id, entity_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_isa_cells_entity ON identification_service_area_cells (entity_id);

CREATE TABLE IF NOT EXISTS subscriptions (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    owner TEXT NOT NULL,
    url TEXT NOT NULL,
    notification_index INTEGER NOT NULL DEFAULT 0 CHECK (notification_index >= 0),
    starts_at INTEGER,
    ends_at INTEGER,
    updated_at BLOB NOT NULL CHECK (length(updated_at) = 12),
    cells BLOB NOT NULL CHECK (length(cells) > 0 AND length(cells) % 8 = 0),
    CHECK (starts_at IS NULL OR ends_at IS NULL OR starts_at < ends_at)
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_owner ON subscriptions (owner);
CREATE INDEX IF NOT EXISTS idx_subscriptions_starts_at ON subscriptions (starts_at);
CREATE INDEX IF NOT EXISTS idx_subscriptions_ends_at ON subscriptions (ends_at);
CREATE INDEX IF NOT EXISTS idx_subscriptions_updated_at ON subscriptions (updated_at);

CREATE TABLE IF NOT EXISTS subscription_cells (
    cell_id INTEGER NOT NULL,
    entity_id BLOB NOT NULL REFERENCES subscriptions (id) ON DELETE CASCADE,
    PRIMARY KEY (cell_id, entity_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_subscription_cells_entity ON subscription_cells (entity_id);

CREATE TABLE IF NOT EXISTS operational_intents (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    owner TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version > 0),
    url TEXT NOT NULL,
    altitude_lower REAL,
    altitude_upper REAL,
    starts_at INTEGER,
    ends_at INTEGER,
    subscription_id BLOB CHECK (subscription_id IS NULL OR length(subscription_id) = 16),
    updated_at BLOB NOT NULL CHECK (length(updated_at) = 12),
    state TEXT NOT NULL CHECK (state IN ('Accepted', 'Activated', 'Nonconforming', 'Contingent', 'Ended')),
    cells BLOB NOT NULL CHECK (length(cells) > 0 AND length(cells) % 8 = 0),
    CHECK (starts_at IS NULL OR ends_at IS NULL OR starts_at < ends_at),
    CHECK (altitude_lower IS NULL OR altitude_upper IS NULL OR altitude_lower <= altitude_upper)
);
CREATE INDEX IF NOT EXISTS idx_operational_intents_owner ON operational_intents (owner);
CREATE INDEX IF NOT EXISTS idx_operational_intents_starts_at ON operational_intents (starts_at);
CREATE INDEX IF NOT EXISTS idx_operational_intents_ends_at ON operational_intents (ends_at);
CREATE INDEX IF NOT EXISTS idx_operational_intents_updated_at ON operational_intents (updated_at);
CREATE INDEX IF NOT EXISTS idx_operational_intents_subscription ON operational_intents (subscription_id);

CREATE TABLE IF NOT EXISTS operational_intent_cells (
    cell_id INTEGER NOT NULL,
    entity_id BLOB NOT NULL REFERENCES operational_intents (id) ON DELETE CASCADE,
    PRIMARY KEY (cell_id, entity_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_operational_intent_cells_entity ON operational_intent_cells (entity_id);
";

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_objects(conn: &Connection) -> Vec<(String, String)> {
        let mut stmt = conn
            .prepare("SELECT type, name FROM sqlite_master ORDER BY type, name")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn bootstrap_twice_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap(&conn).unwrap();
        let first = schema_objects(&conn);
        bootstrap(&conn).unwrap();
        assert_eq!(schema_objects(&conn), first);

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn creates_every_table() {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap(&conn).unwrap();
        let tables: Vec<String> = schema_objects(&conn)
            .into_iter()
            .filter(|(kind, _)| kind == "table")
            .map(|(_, name)| name)
            .collect();
        for expected in [
            "identification_service_areas",
            "identification_service_area_cells",
            "subscriptions",
            "subscription_cells",
            "operational_intents",
            "operational_intent_cells",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn empty_cells_and_inverted_bounds_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap(&conn).unwrap();
        let insert = "INSERT INTO subscriptions (id, owner, url, starts_at, ends_at, updated_at, cells)
                      VALUES (?1, 'uss', 'https://uss', ?2, ?3, ?4, ?5)";
        let stamp = [0u8; 12];

        let empty = conn.execute(
            insert,
            rusqlite::params![&[1u8; 16][..], None::<i64>, None::<i64>, &stamp[..], Vec::<u8>::new()],
        );
        assert!(empty.is_err());

        let inverted = conn.execute(
            insert,
            rusqlite::params![&[2u8; 16][..], 20i64, 10i64, &stamp[..], &[0u8; 8][..]],
        );
        assert!(inverted.is_err());

        let ok = conn.execute(
            insert,
            rusqlite::params![&[3u8; 16][..], 10i64, 20i64, &stamp[..], &[0u8; 8][..]],
        );
        assert_eq!(ok.unwrap(), 1);
    }
}
