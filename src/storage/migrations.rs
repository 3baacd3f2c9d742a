//! Ordered schema migrations.
//!
//! Each step names the schema version it produces and checks whether its
//! change is already present before applying it, so re-running a step on a
//! partially migrated file is harmless. Steps run one transaction each; after
//! the last step the version row is rewritten and the file is compacted.
//!
//! Any failure aborts the open. The version row is only written once every
//! step has committed, so an interrupted upgrade re-runs from the old version
//! next time instead of leaving a half-migrated store in use.

use super::schema::{self, CURRENT_SCHEMA_VERSION};
use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, info};

/// Options that shape migrated data.
#[derive(Debug, Clone, Copy)]
pub struct MigrationOptions {
    pub result_capacity: usize,
    pub config_history: usize,
}

/// A single migration step.
struct Migration {
    version: &'static str,
    description: &'static str,
    apply: fn(&Connection, &MigrationOptions) -> rusqlite::Result<()>,
}

/// All migrations in ascending version order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "5.0",
        description: "move per-asset metadata from info to photoinfo",
        apply: migrate_5_0,
    },
    Migration {
        version: "6.0",
        description: "add run result ring",
        apply: migrate_6_0,
    },
    Migration {
        version: "7.0",
        description: "add per-record error column",
        apply: migrate_7_0,
    },
    Migration {
        version: "7.1",
        description: "trim saved configs and index asset ids",
        apply: migrate_7_1,
    },
    Migration {
        version: "8.0",
        description: "reset result blobs not in the versioned envelope",
        apply: migrate_8_0,
    },
];

/// Result of bringing a store up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaState {
    pub was_created: bool,
    /// `(from, to)` when migrations ran.
    pub upgraded: Option<(String, String)>,
}

/// Parse `"major.minor"` for ordering. A bare major is `major.0`.
#[must_use]
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().splitn(2, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    Some((major, minor))
}

fn compare_versions(path: &Path, a: &str, b: &str) -> Result<Ordering> {
    match (parse_version(a), parse_version(b)) {
        (Some(x), Some(y)) => Ok(x.cmp(&y)),
        _ => Err(Error::Migration {
            path: path.to_path_buf(),
            from: a.to_string(),
            to: b.to_string(),
            reason: "unparseable schema version".to_string(),
        }),
    }
}

/// Create or upgrade the schema of an open connection.
///
/// # Errors
///
/// Returns [`Error::UnsupportedSchemaVersion`] if the file is newer than this
/// build, or [`Error::Migration`] naming `path` if any step fails.
pub fn prepare_schema(conn: &Connection, path: &Path, options: &MigrationOptions) -> Result<SchemaState> {
    let migration_err = |from: &str, to: &str, e: &dyn std::fmt::Display| Error::Migration {
        path: path.to_path_buf(),
        from: from.to_string(),
        to: to.to_string(),
        reason: e.to_string(),
    };

    let Some((_, stored)) = schema::read_version(conn).map_err(|e| migration_err("?", CURRENT_SCHEMA_VERSION, &e))? else {
        let empty = schema::is_empty(conn).map_err(|e| migration_err("?", CURRENT_SCHEMA_VERSION, &e))?;
        if !empty && !schema::table_exists(conn, "version").unwrap_or(false) {
            return Err(migration_err(
                "?",
                CURRENT_SCHEMA_VERSION,
                &"file has tables but no version table; not an export state store",
            ));
        }
        create_fresh(conn, options).map_err(|e| migration_err("none", CURRENT_SCHEMA_VERSION, &e))?;
        info!(path = %path.display(), version = CURRENT_SCHEMA_VERSION, "Created export state store");
        return Ok(SchemaState {
            was_created: true,
            upgraded: None,
        });
    };

    match compare_versions(path, &stored, CURRENT_SCHEMA_VERSION)? {
        Ordering::Greater => Err(Error::UnsupportedSchemaVersion {
            path: path.to_path_buf(),
            found: stored,
            supported: CURRENT_SCHEMA_VERSION.to_string(),
        }),
        Ordering::Equal => {
            // The configured capacity wins over the stored ring size.
            schema::fit_result_ring(conn, options.result_capacity)
                .map_err(|e| migration_err(&stored, &stored, &e))?;
            Ok(SchemaState {
                was_created: false,
                upgraded: None,
            })
        }
        Ordering::Less => {
            run_migrations(conn, path, &stored, CURRENT_SCHEMA_VERSION, options)?;
            schema::write_version(conn, CURRENT_SCHEMA_VERSION)
                .map_err(|e| migration_err(&stored, CURRENT_SCHEMA_VERSION, &e))?;
            conn.execute_batch("VACUUM")
                .map_err(|e| migration_err(&stored, CURRENT_SCHEMA_VERSION, &e))?;
            info!(
                path = %path.display(),
                from = %stored,
                to = CURRENT_SCHEMA_VERSION,
                "Migrated export state store"
            );
            Ok(SchemaState {
                was_created: false,
                upgraded: Some((stored, CURRENT_SCHEMA_VERSION.to_string())),
            })
        }
    }
}

fn create_fresh(conn: &Connection, options: &MigrationOptions) -> rusqlite::Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    schema::create_current(&tx, options.result_capacity)?;
    schema::write_version(&tx, CURRENT_SCHEMA_VERSION)?;
    tx.commit()
}

/// Apply every step newer than `from` and not newer than `to`.
///
/// Does not touch the version row.
///
/// # Errors
///
/// Returns [`Error::Migration`] naming the failed step.
pub fn run_migrations(
    conn: &Connection,
    path: &Path,
    from: &str,
    to: &str,
    options: &MigrationOptions,
) -> Result<()> {
    for migration in MIGRATIONS {
        if compare_versions(path, migration.version, from)? != Ordering::Greater
            || compare_versions(path, migration.version, to)? == Ordering::Greater
        {
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );

        let step = || -> rusqlite::Result<()> {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            (migration.apply)(&tx, options)?;
            tx.commit()
        };
        step().map_err(|e| Error::Migration {
            path: path.to_path_buf(),
            from: from.to_string(),
            to: migration.version.to_string(),
            reason: e.to_string(),
        })?;

        debug!(version = migration.version, "Migration complete");
    }
    Ok(())
}

fn migrate_5_0(conn: &Connection, _: &MigrationOptions) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS photoinfo (
            id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            photoinfo TEXT
        )",
    )?;
    if schema::table_exists(conn, "info")? {
        // Later rows win when an asset appears twice.
        conn.execute_batch(
            "INSERT OR REPLACE INTO photoinfo (uuid, photoinfo)
                SELECT uuid, json_info FROM info ORDER BY id;
             DROP TABLE info;",
        )?;
    }
    Ok(())
}

fn migrate_6_0(conn: &Connection, options: &MigrationOptions) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS export_results_data (
            id INTEGER PRIMARY KEY,
            datetime INTEGER NOT NULL DEFAULT 0,
            export_results TEXT
        )",
    )?;
    schema::fit_result_ring(conn, options.result_capacity)
}

fn migrate_7_0(conn: &Connection, _: &MigrationOptions) -> rusqlite::Result<()> {
    if !schema::column_exists(conn, "export_data", "error")? {
        conn.execute("ALTER TABLE export_data ADD COLUMN error TEXT", [])?;
    }
    Ok(())
}

fn migrate_7_1(conn: &Connection, options: &MigrationOptions) -> rusqlite::Result<()> {
    let keep = i64::try_from(options.config_history).unwrap_or(i64::MAX);
    conn.execute(
        "DELETE FROM config WHERE id NOT IN (SELECT id FROM config ORDER BY id DESC LIMIT ?1)",
        [keep],
    )?;
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_export_data_uuid ON export_data(uuid)")
}

fn migrate_8_0(conn: &Connection, _: &MigrationOptions) -> rusqlite::Result<()> {
    let reset = conn.execute(
        "UPDATE export_results_data
            SET export_results = NULL, datetime = 0
          WHERE export_results IS NOT NULL
            AND CASE WHEN typeof(export_results) <> 'text' THEN 1
                     WHEN json_valid(export_results)
                     THEN json_type(export_results, '$.format') IS NULL
                     ELSE 1 END",
        [],
    )?;
    if reset > 0 {
        debug!(reset, "Cleared result blobs in a legacy encoding");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{SCHEMA_4_3_SQL, column_exists, table_exists};

    const OPTIONS: MigrationOptions = MigrationOptions {
        result_capacity: 10,
        config_history: 9,
    };

    fn legacy_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_4_3_SQL).unwrap();
        conn.execute(
            "INSERT INTO version (tool_version, schema_version) VALUES ('0.60.0', '4.3')",
            [],
        )
        .unwrap();
        for i in 0..5 {
            conn.execute(
                "INSERT INTO export_data (filepath, filepath_normalized, uuid) VALUES (?1, lower(?1), ?2)",
                rusqlite::params![format!("IMG_{i:04}.JPG"), format!("UUID-{i}")],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO info (uuid, json_info) VALUES (?1, '{}')",
                [format!("UUID-{i}")],
            )
            .unwrap();
        }
        for i in 0..12 {
            conn.execute(
                "INSERT INTO config (datetime, config) VALUES ('2023-01-01', ?1)",
                [format!("cfg{i}")],
            )
            .unwrap();
        }
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("4.3"), Some((4, 3)));
        assert_eq!(parse_version("8"), Some((8, 0)));
        assert_eq!(parse_version("x.1"), None);
        assert!(parse_version("7.10") > parse_version("7.9"));
    }

    #[test]
    fn test_migrations_are_ordered() {
        let versions: Vec<_> = MIGRATIONS.iter().map(|m| parse_version(m.version).unwrap()).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(MIGRATIONS.last().unwrap().version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_full_chain_from_4_3() {
        let conn = legacy_db();
        let path = Path::new("legacy.db");

        let state = prepare_schema(&conn, path, &OPTIONS).unwrap();
        assert!(!state.was_created);
        assert_eq!(state.upgraded, Some(("4.3".to_string(), "8.0".to_string())));

        assert_eq!(count(&conn, "export_data"), 5);
        assert_eq!(count(&conn, "photoinfo"), 5);
        assert_eq!(count(&conn, "export_results_data"), 10);
        assert_eq!(count(&conn, "config"), 9);
        assert!(!table_exists(&conn, "info").unwrap());
        assert!(column_exists(&conn, "export_data", "error").unwrap());

        let again = prepare_schema(&conn, path, &OPTIONS).unwrap();
        assert_eq!(again.upgraded, None);
        assert_eq!(count(&conn, "export_data"), 5);
    }

    #[test]
    fn test_steps_are_reentrant() {
        let conn = legacy_db();
        let path = Path::new("legacy.db");
        run_migrations(&conn, path, "4.3", "8.0", &OPTIONS).unwrap();
        // Same steps again as if the version row had not been written.
        run_migrations(&conn, path, "4.3", "8.0", &OPTIONS).unwrap();
        assert_eq!(count(&conn, "export_data"), 5);
        assert_eq!(count(&conn, "export_results_data"), 10);
    }

    #[test]
    fn test_partial_range() {
        let conn = legacy_db();
        run_migrations(&conn, Path::new("x.db"), "4.3", "6.0", &OPTIONS).unwrap();
        assert!(table_exists(&conn, "export_results_data").unwrap());
        assert!(!column_exists(&conn, "export_data", "error").unwrap());
    }

    #[test]
    fn test_legacy_result_blobs_reset() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_current(&conn, 3).unwrap();
        conn.execute_batch(
            "UPDATE export_results_data SET datetime = 1, export_results = 'not json' WHERE id = 1;
             UPDATE export_results_data SET datetime = 2, export_results = '{\"format\":1,\"data\":{}}' WHERE id = 2;
             UPDATE export_results_data SET datetime = 3, export_results = X'8004' WHERE id = 3;",
        )
        .unwrap();

        migrate_8_0(&conn, &OPTIONS).unwrap();

        let kept: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM export_results_data WHERE export_results IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(kept, 1);
        assert_eq!(count(&conn, "export_results_data"), 3);
    }

    #[test]
    fn test_newer_store_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_current(&conn, 1).unwrap();
        schema::write_version(&conn, "99.0").unwrap();
        let err = prepare_schema(&conn, Path::new("future.db"), &OPTIONS).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSchemaVersion { .. }));
    }

    #[test]
    fn test_foreign_database_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY)").unwrap();
        let err = prepare_schema(&conn, Path::new("notes.db"), &OPTIONS).unwrap_err();
        match err {
            Error::Migration { path, .. } => assert_eq!(path, Path::new("notes.db")),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_fresh_database_created() {
        let conn = Connection::open_in_memory().unwrap();
        let state = prepare_schema(&conn, Path::new("new.db"), &OPTIONS).unwrap();
        assert!(state.was_created);
        assert_eq!(
            schema::read_version(&conn).unwrap().unwrap().1,
            CURRENT_SCHEMA_VERSION
        );
    }
}
