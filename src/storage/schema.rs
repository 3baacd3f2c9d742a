//! Database schema definitions.
//!
//! This module contains the SQLite layout of the export state store at the
//! current schema version, the historical 4.3 layout that migrations start
//! from, and the helpers that read and write the authoritative version row.

use rusqlite::{Connection, OptionalExtension, Result, params};
use std::time::Duration;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: &str = "8.0";

/// Tool version recorded alongside the schema version.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The complete SQL schema at [`CURRENT_SCHEMA_VERSION`].
///
/// Note: `export_results_data.datetime` is INTEGER microseconds so ring slots
/// order strictly; every other timestamp is RFC 3339 text.
pub const SCHEMA_SQL: &str = r"
-- Authoritative schema version (single row)
CREATE TABLE IF NOT EXISTS version (
    id INTEGER PRIMARY KEY,
    tool_version TEXT NOT NULL,
    schema_version TEXT NOT NULL
);

-- Informational banner
CREATE TABLE IF NOT EXISTS about (
    id INTEGER PRIMARY KEY,
    about TEXT
);

-- Append-only audit of tool invocations
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY,
    datetime TEXT,
    tool_path TEXT,
    args TEXT,
    cwd TEXT
);

-- Saved run configurations (bounded)
CREATE TABLE IF NOT EXISTS config (
    id INTEGER PRIMARY KEY,
    datetime TEXT,
    config TEXT
);

-- Per-asset metadata snapshot
CREATE TABLE IF NOT EXISTS photoinfo (
    id INTEGER PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE,
    photoinfo TEXT
);

-- One row per exported file
CREATE TABLE IF NOT EXISTS export_data (
    id INTEGER PRIMARY KEY,
    filepath TEXT NOT NULL,
    filepath_normalized TEXT NOT NULL,
    uuid TEXT,
    src_mode INTEGER,
    src_size INTEGER,
    src_mtime INTEGER,
    dest_mode INTEGER,
    dest_size INTEGER,
    dest_mtime INTEGER,
    digest TEXT,
    exifdata TEXT,
    export_options TEXT,
    timestamp TEXT,
    error TEXT,
    UNIQUE (filepath_normalized)
);

CREATE INDEX IF NOT EXISTS idx_export_data_uuid ON export_data(uuid);

-- Fixed-size ring of whole-run result blobs
CREATE TABLE IF NOT EXISTS export_results_data (
    id INTEGER PRIMARY KEY,
    datetime INTEGER NOT NULL DEFAULT 0,
    export_results TEXT
);
";

/// Layout of a store last written at schema 4.3.
///
/// Per-asset metadata lived in `info`, there was no result ring and no
/// per-record error column.
pub const SCHEMA_4_3_SQL: &str = r"
CREATE TABLE IF NOT EXISTS version (
    id INTEGER PRIMARY KEY,
    tool_version TEXT NOT NULL,
    schema_version TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS about (id INTEGER PRIMARY KEY, about TEXT);
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY,
    datetime TEXT,
    tool_path TEXT,
    args TEXT,
    cwd TEXT
);
CREATE TABLE IF NOT EXISTS config (id INTEGER PRIMARY KEY, datetime TEXT, config TEXT);
CREATE TABLE IF NOT EXISTS info (id INTEGER PRIMARY KEY, uuid TEXT NOT NULL, json_info TEXT);
CREATE TABLE IF NOT EXISTS export_data (
    id INTEGER PRIMARY KEY,
    filepath TEXT NOT NULL,
    filepath_normalized TEXT NOT NULL,
    uuid TEXT,
    src_mode INTEGER,
    src_size INTEGER,
    src_mtime INTEGER,
    dest_mode INTEGER,
    dest_size INTEGER,
    dest_mtime INTEGER,
    digest TEXT,
    exifdata TEXT,
    export_options TEXT,
    timestamp TEXT,
    UNIQUE (filepath_normalized)
);
";

const ABOUT_TEXT: &str = "Export state store: tracks exported files, their source assets and change signatures.";

/// Apply connection pragmas.
///
/// WAL, relaxed sync, a 64MB page cache and in-memory temp tables: this is a
/// local single-writer cache, not a system of record.
///
/// # Errors
///
/// Returns an error if a pragma cannot be set.
pub fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", "-64000")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

/// Create every table at the current version and seed the result ring.
///
/// Idempotent: all statements use `IF NOT EXISTS`, and ring seeding only
/// tops up missing slots.
///
/// # Errors
///
/// Returns an error if the SQL execution fails.
pub fn create_current(conn: &Connection, result_capacity: usize) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    fit_result_ring(conn, result_capacity)?;
    conn.execute(
        "INSERT INTO about (about) SELECT ?1 WHERE NOT EXISTS (SELECT 1 FROM about)",
        [ABOUT_TEXT],
    )?;
    Ok(())
}

/// Resize the result ring to exactly `capacity` rows: insert empty slots, or
/// drop the oldest snapshots when the configured capacity shrank.
pub(crate) fn fit_result_ring(conn: &Connection, capacity: usize) -> Result<()> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM export_results_data", [], |r| r.get(0))?;
    let wanted = i64::try_from(capacity).unwrap_or(i64::MAX);
    for _ in existing..wanted {
        conn.execute(
            "INSERT INTO export_results_data (datetime, export_results) VALUES (0, NULL)",
            [],
        )?;
    }
    if existing > wanted {
        conn.execute(
            "DELETE FROM export_results_data WHERE id NOT IN
               (SELECT id FROM export_results_data ORDER BY datetime DESC, id DESC LIMIT ?1)",
            [wanted],
        )?;
    }
    Ok(())
}

/// Read the current `(tool_version, schema_version)` row, if any.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn read_version(conn: &Connection) -> Result<Option<(String, String)>> {
    if !table_exists(conn, "version")? {
        return Ok(None);
    }
    conn.query_row(
        "SELECT tool_version, schema_version FROM version ORDER BY id DESC LIMIT 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

/// Append the new version row and drop older ones, keeping a single row.
///
/// # Errors
///
/// Returns an error if the SQL execution fails.
pub fn write_version(conn: &Connection, schema_version: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO version (tool_version, schema_version) VALUES (?1, ?2)",
        params![TOOL_VERSION, schema_version],
    )?;
    conn.execute(
        "DELETE FROM version WHERE id <> (SELECT MAX(id) FROM version)",
        [],
    )?;
    Ok(())
}

/// Check if a table exists.
pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?
        .exists([table])
}

/// Check if a column exists in a table.
pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")?
        .exists([table, column])
}

/// Whether the database has no user tables at all.
pub(crate) fn is_empty(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;
    Ok(count == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_create_current() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn, Duration::from_secs(1)).unwrap();
        create_current(&conn, 10).expect("Failed to apply schema");

        let tables = tables(&conn);
        for expected in [
            "about",
            "config",
            "export_data",
            "export_results_data",
            "photoinfo",
            "runs",
            "version",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
        assert!(column_exists(&conn, "export_data", "error").unwrap());
    }

    #[test]
    fn test_create_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_current(&conn, 4).unwrap();
        create_current(&conn, 4).unwrap();

        let slots: i64 = conn
            .query_row("SELECT COUNT(*) FROM export_results_data", [], |r| r.get(0))
            .unwrap();
        assert_eq!(slots, 4);
        let about: i64 = conn
            .query_row("SELECT COUNT(*) FROM about", [], |r| r.get(0))
            .unwrap();
        assert_eq!(about, 1);
    }

    #[test]
    fn test_version_row_stays_single() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(read_version(&conn).unwrap().is_none());

        create_current(&conn, 1).unwrap();
        write_version(&conn, "7.1").unwrap();
        write_version(&conn, CURRENT_SCHEMA_VERSION).unwrap();

        let (tool, schema) = read_version(&conn).unwrap().unwrap();
        assert_eq!(tool, TOOL_VERSION);
        assert_eq!(schema, CURRENT_SCHEMA_VERSION);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_unique_normalized_path() {
        let conn = Connection::open_in_memory().unwrap();
        create_current(&conn, 1).unwrap();
        conn.execute(
            "INSERT INTO export_data (filepath, filepath_normalized, uuid) VALUES ('A.jpg', 'a.jpg', 'u1')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO export_data (filepath, filepath_normalized, uuid) VALUES ('a.JPG', 'a.jpg', 'u2')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_is_empty() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(is_empty(&conn).unwrap());
        conn.execute_batch(SCHEMA_4_3_SQL).unwrap();
        assert!(!is_empty(&conn).unwrap());
        assert!(!column_exists(&conn, "export_data", "error").unwrap());
    }
}
