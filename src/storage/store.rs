//! The persistent export state store.
//!
//! [`ExportStateStore`] owns one SQLite connection behind a store-wide mutex.
//! Every operation (reads included) takes the lock, so compound operations
//! such as get-or-create are atomic end to end and all calls are linearized.
//! Store calls are retried on a transiently busy backing file according to the
//! configured [`RetryPolicy`]; uniqueness violations are returned immediately.

use super::migrations::{self, MigrationOptions, SchemaState};
use super::record::{RecordError, RecordHandle, RecordTxn, now_timestamp};
use super::retry::RetryPolicy;
use super::schema::{self, TOOL_VERSION};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::path::{self, PathKey};

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Current encoding of run-result snapshots.
pub const RESULT_FORMAT: u32 = 1;

/// Versioned wrapper around a run-result snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct ResultEnvelope<T> {
    format: u32,
    tool_version: String,
    data: T,
}

/// One row of the `runs` audit table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub datetime: String,
    pub tool_path: String,
    pub args: Vec<String>,
    pub cwd: String,
}

/// One saved run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    pub datetime: String,
    pub config: String,
}

/// A record carrying a per-file error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub path: String,
    pub asset_id: Option<String>,
    pub timestamp: Option<String>,
    pub error: RecordError,
}

/// Rows from a read-only ad hoc query, rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Single forward pass over `(asset_id, path)` pairs of exported files.
#[derive(Debug)]
pub struct ExportedFiles {
    inner: std::vec::IntoIter<(String, String)>,
}

impl Iterator for ExportedFiles {
    type Item = (String, String);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ExportedFiles {}

/// Persistent mapping of exported files to their source assets and signatures.
pub struct ExportStateStore {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
    export_root: PathBuf,
    config: StoreConfig,
    state: SchemaState,
}

impl std::fmt::Debug for ExportStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportStateStore")
            .field("path", &self.path)
            .field("export_root", &self.export_root)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Whether a rusqlite error means the file is not a usable database.
fn is_corrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::DatabaseCorrupt)
    )
}

fn micros_now() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

impl ExportStateStore {
    /// Open (or create) the store at `path`, migrating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Migration`] naming the file if it is corrupt or a
    /// migration fails, [`Error::UnsupportedSchemaVersion`] for a store written
    /// by a newer release, or a database error.
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, path, config)
    }

    /// Open an existing store; never creates one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreNotFound`] if `path` does not exist, otherwise as
    /// [`Self::open`].
    pub fn open_existing(path: &Path, config: StoreConfig) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::StoreNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::open(path, config)
    }

    /// Wrap an already-open connection. `path` names the store in errors and
    /// determines the default export root.
    pub(crate) fn from_connection(conn: Connection, path: &Path, config: StoreConfig) -> Result<Self> {
        let corrupt = |e: rusqlite::Error| -> Error {
            if is_corrupt(&e) {
                Error::Migration {
                    path: path.to_path_buf(),
                    from: "?".to_string(),
                    to: schema::CURRENT_SCHEMA_VERSION.to_string(),
                    reason: format!("not a valid export state store: {e}"),
                }
            } else {
                Error::from(e)
            }
        };
        schema::apply_pragmas(&conn, config.busy_timeout).map_err(corrupt)?;

        let options = MigrationOptions {
            result_capacity: config.result_capacity.max(1),
            config_history: config.config_history,
        };
        let state = migrations::prepare_schema(&conn, path, &options)?;
        // Keys are relative to the root, so it must not depend on the cwd later.
        let export_root = std::path::absolute(config.export_root_for(path))?;

        let store = Self {
            conn: Mutex::new(Some(conn)),
            path: path.to_path_buf(),
            export_root,
            config,
            state,
        };
        if store.config.record_run {
            store.record_run()?;
        }
        debug!(path = %store.path.display(), root = %store.export_root.display(), "Opened export state store");
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the connection under the store lock and retry policy.
    pub(crate) fn with_conn<R, F>(&self, operation: &str, mut f: F) -> Result<R>
    where
        F: FnMut(&Connection) -> Result<R>,
    {
        self.with_locked(operation, |conn, retry| retry.run(operation, || f(conn)))
    }

    /// Run `f` once under the store lock, handing it the retry policy.
    pub(crate) fn with_locked<R, F>(&self, operation: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection, &RetryPolicy) -> Result<R>,
    {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;
        debug!(operation, "Store operation");
        f(conn, &self.config.retry)
    }

    /// Run `f` inside one IMMEDIATE transaction, retrying the whole unit on busy.
    fn with_tx<R, F>(&self, operation: &str, mut f: F) -> Result<R>
    where
        F: FnMut(&Transaction<'_>) -> Result<R>,
    {
        self.with_conn(operation, |conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
    }

    fn record_run(&self) -> Result<()> {
        let tool_path = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let args: Vec<String> = std::env::args().skip(1).collect();
        let args = serde_json::to_string(&args)?;
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.with_conn("record_run", |conn| {
            conn.execute(
                "INSERT INTO runs (datetime, tool_path, args, cwd) VALUES (?1, ?2, ?3, ?4)",
                params![now_timestamp(), tool_path, args, cwd],
            )?;
            Ok(())
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn export_root(&self) -> &Path {
        &self.export_root
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether this open created the store.
    #[must_use]
    pub const fn was_created(&self) -> bool {
        self.state.was_created
    }

    /// Schema version the store was migrated from during this open.
    #[must_use]
    pub fn upgraded_from(&self) -> Option<&str> {
        self.state.upgraded.as_ref().map(|(from, _)| from.as_str())
    }

    /// `(from, to)` if this open ran migrations.
    #[must_use]
    pub fn upgrade(&self) -> Option<(&str, &str)> {
        self.state
            .upgraded
            .as_ref()
            .map(|(from, to)| (from.as_str(), to.as_str()))
    }

    /// Build the store key for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `path` is outside the export root.
    pub fn key(&self, path: impl AsRef<Path>) -> Result<PathKey> {
        path::path_key(&self.export_root, path.as_ref())
    }

    // ── Records ───────────────────────────────────────────────

    /// Handle for an existing record, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the store fails.
    pub fn get_record(&self, path: impl AsRef<Path>) -> Result<Option<RecordHandle<'_>>> {
        let key = self.key(path)?;
        let exists = self.with_conn("get_record", |conn| {
            Ok(conn
                .prepare_cached("SELECT 1 FROM export_data WHERE filepath_normalized = ?1")?
                .exists([&key.normalized])?)
        })?;
        Ok(exists.then(|| RecordHandle::new(self, key)))
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UniquenessViolation`] if a record already exists for
    /// the normalized path. This is never retried.
    pub fn create_record(&self, path: impl AsRef<Path>, asset_id: &str) -> Result<RecordHandle<'_>> {
        let key = self.key(path)?;
        self.with_conn("create_record", |conn| {
            conn.execute(
                "INSERT INTO export_data (filepath, filepath_normalized, uuid, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.raw, key.normalized, asset_id, now_timestamp()],
            )
            .map_err(|e| match Error::from(e) {
                Error::UniquenessViolation { .. } => Error::UniquenessViolation {
                    path: key.raw.clone(),
                },
                other => other,
            })?;
            Ok(())
        })?;
        Ok(RecordHandle::new(self, key))
    }

    /// Return the record for `path`, inserting it if absent.
    ///
    /// Concurrent callers for the same normalized path all end up with the
    /// single row; an existing row keeps its original asset id.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the store fails.
    pub fn get_or_create_record(&self, path: impl AsRef<Path>, asset_id: &str) -> Result<RecordHandle<'_>> {
        let key = self.key(path)?;
        self.with_conn("get_or_create_record", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO export_data (filepath, filepath_normalized, uuid, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.raw, key.normalized, asset_id, now_timestamp()],
            )?;
            Ok(())
        })?;
        Ok(RecordHandle::new(self, key))
    }

    /// Snapshot of the record for `path`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid, a stored field cannot be
    /// decoded, or the store fails.
    pub fn file_record(&self, path: impl AsRef<Path>) -> Result<Option<super::record::FileRecord>> {
        let key = self.key(path)?;
        match self.with_conn("file_record", |conn| RecordTxn::new(conn, &key).snapshot()) {
            Ok(record) => Ok(Some(record)),
            Err(Error::RecordNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Asset that produced `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the store fails.
    pub fn get_asset_id_for_path(&self, path: impl AsRef<Path>) -> Result<Option<String>> {
        let key = self.key(path)?;
        self.with_conn("get_asset_id_for_path", |conn| {
            Ok(conn
                .query_row(
                    "SELECT uuid FROM export_data WHERE filepath_normalized = ?1",
                    [&key.normalized],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten())
        })
    }

    /// Recorded paths (original case, relative to the export root) for an asset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_paths_for_asset(&self, asset_id: &str) -> Result<Vec<String>> {
        self.with_conn("get_paths_for_asset", |conn| {
            let mut stmt =
                conn.prepare_cached("SELECT filepath FROM export_data WHERE uuid = ?1 ORDER BY filepath")?;
            let rows = stmt
                .query_map([asset_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(rows)
        })
    }

    /// Every asset id that has at least one recorded file.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_previously_known_asset_ids(&self) -> Result<Vec<String>> {
        self.with_conn("get_previously_known_asset_ids", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT uuid FROM export_data WHERE uuid IS NOT NULL ORDER BY uuid",
            )?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(rows)
        })
    }

    /// A previously recorded output for `asset_id` that `candidate` would
    /// collide with, allowing a ` (N)` disambiguation suffix on the stem.
    ///
    /// The match requires the same directory and extension (case-insensitive).
    /// Returns the absolute path of the recorded output, so a rerun reuses the
    /// numbered name chosen last time.
    ///
    /// # Errors
    ///
    /// Returns an error if `candidate` is invalid or the store fails.
    pub fn find_existing_output_for_asset(
        &self,
        asset_id: &str,
        candidate: impl AsRef<Path>,
    ) -> Result<Option<PathBuf>> {
        let key = self.key(candidate)?;
        let (dir, stem, ext) = split_name(&key.normalized);
        let recorded: Vec<(String, String)> = self.with_conn("find_existing_output_for_asset", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT filepath, filepath_normalized FROM export_data WHERE uuid = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([asset_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
            Ok(rows)
        })?;

        Ok(recorded
            .into_iter()
            .find(|(_, normalized)| {
                let (d, s, e) = split_name(normalized);
                d == dir && e == ext && stem_matches(s, stem)
            })
            .map(|(raw, _)| path::absolute(&self.export_root, &raw)))
    }

    // ── Asset metadata ────────────────────────────────────────

    /// Stored metadata snapshot for an asset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_metadata_blob_for_asset(&self, asset_id: &str) -> Result<Option<String>> {
        self.with_conn("get_metadata_blob_for_asset", |conn| {
            Ok(conn
                .query_row(
                    "SELECT photoinfo FROM photoinfo WHERE uuid = ?1",
                    [asset_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten())
        })
    }

    /// Insert or replace the metadata snapshot for an asset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn set_metadata_blob_for_asset(&self, asset_id: &str, blob: &str) -> Result<()> {
        self.with_conn("set_metadata_blob_for_asset", |conn| {
            conn.execute(
                "INSERT INTO photoinfo (uuid, photoinfo) VALUES (?1, ?2)
                 ON CONFLICT(uuid) DO UPDATE SET photoinfo = excluded.photoinfo",
                params![asset_id, blob],
            )?;
            Ok(())
        })
    }

    // ── Deletion ──────────────────────────────────────────────

    /// Delete every file record and the metadata row of an asset.
    ///
    /// Returns the number of file records removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn delete_records_for_asset(&self, asset_id: &str) -> Result<usize> {
        let count = self.with_tx("delete_records_for_asset", |tx| {
            let count = tx.execute("DELETE FROM export_data WHERE uuid = ?1", [asset_id])?;
            tx.execute("DELETE FROM photoinfo WHERE uuid = ?1", [asset_id])?;
            Ok(count)
        })?;
        info!(asset_id, count, "Deleted records for asset");
        Ok(count)
    }

    /// Delete the record for `path` and the metadata row of its asset.
    ///
    /// Returns the number of file records removed (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the store fails.
    pub fn delete_records_for_path(&self, path: impl AsRef<Path>) -> Result<usize> {
        let key = self.key(path)?;
        let count = self.with_tx("delete_records_for_path", |tx| {
            let asset: Option<String> = tx
                .query_row(
                    "SELECT uuid FROM export_data WHERE filepath_normalized = ?1",
                    [&key.normalized],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            let count = tx.execute(
                "DELETE FROM export_data WHERE filepath_normalized = ?1",
                [&key.normalized],
            )?;
            if let Some(asset) = asset {
                tx.execute("DELETE FROM photoinfo WHERE uuid = ?1", [asset])?;
            }
            Ok(count)
        })?;
        info!(path = %key.raw, count, "Deleted record for path");
        Ok(count)
    }

    /// All `(asset_id, path)` pairs, in insertion order.
    ///
    /// The rows are read under the lock in one query; the returned iterator
    /// does not hold the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn iterate_exported_files(&self) -> Result<ExportedFiles> {
        let rows = self.with_conn("iterate_exported_files", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT uuid, filepath FROM export_data WHERE uuid IS NOT NULL ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
            Ok(rows)
        })?;
        Ok(ExportedFiles {
            inner: rows.into_iter(),
        })
    }

    // ── Run config and results ────────────────────────────────

    /// Save a run configuration, keeping only the most recent ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn set_run_config(&self, config: &str) -> Result<()> {
        let keep = i64::try_from(self.config.config_history).unwrap_or(i64::MAX);
        self.with_tx("set_run_config", |tx| {
            tx.execute(
                "INSERT INTO config (datetime, config) VALUES (?1, ?2)",
                params![now_timestamp(), config],
            )?;
            tx.execute(
                "DELETE FROM config WHERE id NOT IN (SELECT id FROM config ORDER BY id DESC LIMIT ?1)",
                [keep],
            )?;
            Ok(())
        })
    }

    /// Newest saved run configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn last_run_config(&self) -> Result<Option<ConfigSnapshot>> {
        self.with_conn("last_run_config", |conn| {
            Ok(conn
                .query_row(
                    "SELECT datetime, config FROM config ORDER BY id DESC LIMIT 1",
                    [],
                    |row| {
                        Ok(ConfigSnapshot {
                            datetime: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                            config: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Store a run-result snapshot, overwriting the oldest ring slot.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `results` cannot be encoded, or a
    /// store error.
    pub fn set_run_result_snapshot<T: Serialize>(&self, results: &T) -> Result<()> {
        let envelope = ResultEnvelope {
            format: RESULT_FORMAT,
            tool_version: TOOL_VERSION.to_string(),
            data: results,
        };
        let blob = serde_json::to_string(&envelope).map_err(|e| Error::serialization("run results", e))?;

        self.with_tx("set_run_result_snapshot", |tx| {
            let newest: i64 = tx.query_row(
                "SELECT COALESCE(MAX(datetime), 0) FROM export_results_data",
                [],
                |row| row.get(0),
            )?;
            // Strictly increasing even if the clock stalls or steps back.
            let stamp = micros_now().max(newest + 1);
            let updated = tx.execute(
                "UPDATE export_results_data SET datetime = ?1, export_results = ?2
                  WHERE id = (SELECT id FROM export_results_data ORDER BY datetime, id LIMIT 1)",
                params![stamp, blob],
            )?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO export_results_data (datetime, export_results) VALUES (?1, ?2)",
                    params![stamp, blob],
                )?;
            }
            Ok(())
        })
    }

    fn run_result_blob(&self, runs_ago: usize) -> Result<Option<String>> {
        let offset = i64::try_from(runs_ago).unwrap_or(i64::MAX);
        self.with_conn("get_run_result_snapshot", |conn| {
            Ok(conn
                .query_row(
                    "SELECT export_results FROM export_results_data
                      WHERE export_results IS NOT NULL
                      ORDER BY datetime DESC, id DESC LIMIT 1 OFFSET ?1",
                    [offset],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Run-result snapshot from `runs_ago` runs back (0 = most recent).
    ///
    /// Returns `None` if fewer than `runs_ago + 1` snapshots exist.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the stored blob has an unknown format
    /// or does not decode as `T`.
    pub fn get_run_result_snapshot<T: DeserializeOwned>(&self, runs_ago: usize) -> Result<Option<T>> {
        self.get_run_result_value(runs_ago)?
            .map(|data| serde_json::from_value(data).map_err(|e| Error::serialization("run results", e)))
            .transpose()
    }

    /// Like [`Self::get_run_result_snapshot`] but untyped.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the stored blob has an unknown format.
    pub fn get_run_result_value(&self, runs_ago: usize) -> Result<Option<serde_json::Value>> {
        let Some(blob) = self.run_result_blob(runs_ago)? else {
            return Ok(None);
        };
        let envelope: ResultEnvelope<serde_json::Value> =
            serde_json::from_str(&blob).map_err(|e| Error::serialization("run results", e))?;
        if envelope.format != RESULT_FORMAT {
            return Err(Error::serialization(
                "run results",
                format!("unknown format {}", envelope.format),
            ));
        }
        Ok(Some(envelope.data))
    }

    // ── Inspection ────────────────────────────────────────────

    /// `(tool_version, schema_version)` from the version row.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn version_info(&self) -> Result<(String, String)> {
        self.with_conn("version_info", |conn| {
            schema::read_version(conn)?.ok_or_else(|| Error::Other("store has no version row".to_string()))
        })
    }

    /// Most recent entry of the run audit log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn last_run(&self) -> Result<Option<RunRecord>> {
        self.with_conn("last_run", |conn| {
            let row = conn
                .query_row(
                    "SELECT datetime, tool_path, args, cwd FROM runs ORDER BY id DESC LIMIT 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                            row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                            row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(datetime, tool_path, args, cwd)| RunRecord {
                // Older stores kept a space-joined string instead of a JSON list.
                args: serde_json::from_str(&args)
                    .unwrap_or_else(|_| args.split_whitespace().map(String::from).collect()),
                datetime,
                tool_path,
                cwd,
            }))
        })
    }

    /// Records with a stored error, newest first.
    ///
    /// An error value that isn't valid JSON is reported verbatim as the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn records_with_errors(&self) -> Result<Vec<ErrorEntry>> {
        self.with_conn("records_with_errors", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT filepath, uuid, timestamp, error FROM export_data
                  WHERE error IS NOT NULL ORDER BY timestamp DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .map(|(path, asset_id, timestamp, raw)| ErrorEntry {
                    error: serde_json::from_str(&raw).unwrap_or_else(|_| RecordError {
                        message: raw,
                        kind: None,
                        timestamp: timestamp.clone().unwrap_or_default(),
                    }),
                    path,
                    asset_id,
                    timestamp,
                })
                .collect())
        })
    }

    /// Run one read-only SQL statement and render every value as text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a statement that would write,
    /// or a database error.
    pub fn query(&self, sql: &str) -> Result<QueryRows> {
        self.with_conn("query", |conn| {
            let mut stmt = conn.prepare(sql)?;
            if !stmt.readonly() {
                return Err(Error::InvalidArgument(format!(
                    "only read-only statements are allowed: {sql}"
                )));
            }
            let columns: Vec<String> = stmt.column_names().iter().map(|c| (*c).to_string()).collect();
            let width = columns.len();
            let rows = stmt
                .query_map([], |row| {
                    (0..width)
                        .map(|i| row.get_ref(i).map(render_value))
                        .collect::<rusqlite::Result<Vec<String>>>()
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(QueryRows { columns, rows })
        })
    }

    /// Compact the database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn vacuum(&self) -> Result<()> {
        self.with_conn("vacuum", |conn| {
            conn.execute_batch("VACUUM")?;
            Ok(())
        })?;
        info!(path = %self.path.display(), "Vacuumed export state store");
        Ok(())
    }

    /// Copy the store file and its `-wal`/`-shm` siblings to datestamped
    /// `.bak` files next to it. Returns the main backup path.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a copy fails.
    pub fn backup(&self) -> Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        self.with_conn("backup", |conn| {
            // Fold the WAL into the main file first; siblings are copied anyway.
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            let mut main = None;
            for suffix in ["", "-wal", "-shm"] {
                let src = PathBuf::from(format!("{}{suffix}", self.path.display()));
                if !src.exists() {
                    continue;
                }
                let dest = PathBuf::from(format!("{}{suffix}.{stamp}.bak", self.path.display()));
                std::fs::copy(&src, &dest)?;
                if suffix.is_empty() {
                    main = Some(dest);
                }
            }
            main.ok_or_else(|| Error::StoreNotFound {
                path: self.path.clone(),
            })
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Close the connection. Later calls fail with [`Error::StoreClosed`].
    ///
    /// Idempotent.
    pub fn close(&self) {
        let Some(conn) = self.lock().take() else {
            return;
        };
        if let Err((_, e)) = conn.close() {
            warn!(path = %self.path.display(), error = %e, "Error closing export state store");
        } else {
            debug!(path = %self.path.display(), "Closed export state store");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

/// Split a normalized relative path into (directory, stem, extension).
fn split_name(normalized: &str) -> (&str, &str, &str) {
    let (dir, name) = normalized.rsplit_once('/').unwrap_or(("", normalized));
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (name, ""),
    };
    (dir, stem, ext)
}

/// `recorded` equals `candidate` or is `"{candidate} (N)"`.
fn stem_matches(recorded: &str, candidate: &str) -> bool {
    let Some(rest) = recorded.strip_prefix(candidate) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    rest.strip_prefix(" (")
        .and_then(|r| r.strip_suffix(')'))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn render_value(value: rusqlite::types::ValueRef<'_>) -> String {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

impl Drop for ExportStateStore {
    fn drop(&mut self) {
        self.close();
    }
}
