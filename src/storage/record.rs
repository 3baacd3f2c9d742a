//! Per-record access.
//!
//! [`RecordHandle`] is bound to one normalized path. Each standalone call takes
//! the store lock once and commits immediately. [`RecordHandle::transaction`]
//! holds the lock for a whole closure and commits once, so several fields can
//! change atomically.
//!
//! All field SQL lives on [`RecordTxn`], which borrows a connection (or an
//! open transaction) directly; the handle only decides how that connection is
//! obtained.

use super::store::ExportStateStore;
use crate::digest;
use crate::error::{Error, Result};
use crate::path::PathKey;
use crate::signature::FileSignature;
use rusqlite::types::FromSql;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Structured per-file error stored in the record's `error` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub message: String,
    /// Short machine tag such as `"io"` or `"exiftool"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub timestamp: String,
}

impl RecordError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            timestamp: now_timestamp(),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// Full snapshot of one `export_data` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub normalized_path: String,
    pub raw_path: String,
    pub asset_id: Option<String>,
    pub source_signature: Option<FileSignature>,
    pub destination_signature: Option<FileSignature>,
    pub content_digest: Option<String>,
    pub metadata_blob: Option<String>,
    pub export_options_fingerprint: Option<String>,
    pub last_error: Option<RecordError>,
    pub last_modified_timestamp: Option<String>,
}

/// RFC 3339 UTC timestamp with microseconds. Sorts lexically.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, Copy)]
enum SigColumns {
    Source,
    Destination,
}

impl SigColumns {
    const fn names(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Source => ("src_mode", "src_size", "src_mtime"),
            Self::Destination => ("dest_mode", "dest_size", "dest_mtime"),
        }
    }
}

fn decode_error(path: &str, raw: Option<String>) -> Result<Option<RecordError>> {
    raw.map(|json| {
        serde_json::from_str(&json)
            .map_err(|e| Error::serialization(format!("error field of {path}"), e))
    })
    .transpose()
}

type SigParts = (Option<i64>, Option<i64>, Option<i64>);

fn sig_parts(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<SigParts> {
    Ok((row.get(first)?, row.get(first + 1)?, row.get(first + 2)?))
}

/// Rebuild a signature from its columns. Any NULL column means no signature;
/// a negative mode or size is a corrupt record.
fn sig_from_parts(path: &str, parts: SigParts) -> Result<Option<FileSignature>> {
    let (Some(mode), Some(size), Some(mtime)) = parts else {
        return Ok(None);
    };
    let corrupt = |e: std::num::TryFromIntError| Error::serialization(format!("signature of {path}"), e);
    Ok(Some(FileSignature::new(
        u32::try_from(mode).map_err(corrupt)?,
        u64::try_from(size).map_err(corrupt)?,
        mtime,
    )))
}

// ── Connection-bound record access ───────────────────────────

/// Field access for one record over a borrowed connection or transaction.
///
/// Obtained inside [`RecordHandle::transaction`]. Writes stamp the record's
/// timestamp. Every call on a missing row fails with [`Error::RecordNotFound`].
pub struct RecordTxn<'c> {
    conn: &'c Connection,
    key: &'c PathKey,
}

impl<'c> RecordTxn<'c> {
    pub(crate) const fn new(conn: &'c Connection, key: &'c PathKey) -> Self {
        Self { conn, key }
    }

    fn not_found(&self) -> Error {
        Error::RecordNotFound {
            path: self.key.raw.clone(),
        }
    }

    fn get<T: FromSql>(&self, column: &str) -> Result<Option<T>> {
        let sql = format!("SELECT {column} FROM export_data WHERE filepath_normalized = ?1");
        self.conn
            .query_row(&sql, [&self.key.normalized], |row| row.get::<_, Option<T>>(0))
            .optional()?
            .ok_or_else(|| self.not_found())
    }

    fn set(&self, column: &str, value: &dyn rusqlite::ToSql) -> Result<()> {
        let sql = format!(
            "UPDATE export_data SET {column} = ?1, timestamp = ?2 WHERE filepath_normalized = ?3"
        );
        let changed = self
            .conn
            .execute(&sql, params![value, now_timestamp(), self.key.normalized])?;
        if changed == 0 {
            return Err(self.not_found());
        }
        Ok(())
    }

    fn get_sig(&self, which: SigColumns) -> Result<Option<FileSignature>> {
        let (m, s, t) = which.names();
        let sql = format!("SELECT {m}, {s}, {t} FROM export_data WHERE filepath_normalized = ?1");
        let parts = self
            .conn
            .query_row(&sql, [&self.key.normalized], |row| sig_parts(row, 0))
            .optional()?
            .ok_or_else(|| self.not_found())?;
        sig_from_parts(&self.key.raw, parts)
    }

    fn set_sig(&self, which: SigColumns, sig: Option<FileSignature>) -> Result<()> {
        let (m, s, t) = which.names();
        let sql = format!(
            "UPDATE export_data SET {m} = ?1, {s} = ?2, {t} = ?3, timestamp = ?4 \
             WHERE filepath_normalized = ?5"
        );
        let size = sig
            .map(|x| i64::try_from(x.size))
            .transpose()
            .map_err(|_| Error::InvalidArgument("file size exceeds i64".to_string()))?;
        let changed = self.conn.execute(
            &sql,
            params![
                sig.map(|x| x.mode),
                size,
                sig.map(|x| x.mtime),
                now_timestamp(),
                self.key.normalized
            ],
        )?;
        if changed == 0 {
            return Err(self.not_found());
        }
        Ok(())
    }

    #[must_use]
    pub const fn key(&self) -> &PathKey {
        self.key
    }

    /// Path as first recorded (original case).
    pub fn raw_path(&self) -> Result<String> {
        self.get::<String>("filepath")?.ok_or_else(|| self.not_found())
    }

    pub fn asset_id(&self) -> Result<Option<String>> {
        self.get("uuid")
    }

    pub fn set_asset_id(&self, asset_id: &str) -> Result<()> {
        self.set("uuid", &asset_id)
    }

    pub fn source_signature(&self) -> Result<Option<FileSignature>> {
        self.get_sig(SigColumns::Source)
    }

    pub fn set_source_signature(&self, sig: Option<FileSignature>) -> Result<()> {
        self.set_sig(SigColumns::Source, sig)
    }

    pub fn destination_signature(&self) -> Result<Option<FileSignature>> {
        self.get_sig(SigColumns::Destination)
    }

    pub fn set_destination_signature(&self, sig: Option<FileSignature>) -> Result<()> {
        self.set_sig(SigColumns::Destination, sig)
    }

    pub fn digest(&self) -> Result<Option<String>> {
        self.get("digest")
    }

    pub fn set_digest(&self, digest: Option<&str>) -> Result<()> {
        self.set("digest", &digest)
    }

    /// Record the digest of `metadata` if it differs from the stored one.
    /// Returns `true` when it changed (or none was stored).
    pub fn update_digest<T: Serialize>(&self, metadata: &T) -> Result<bool> {
        let current = digest::compute_digest(metadata)?;
        let changed = digest::has_changed(&current, self.digest()?.as_deref());
        if changed {
            self.set_digest(Some(&current))?;
        }
        Ok(changed)
    }

    pub fn metadata_blob(&self) -> Result<Option<String>> {
        self.get("exifdata")
    }

    pub fn set_metadata_blob(&self, blob: Option<&str>) -> Result<()> {
        self.set("exifdata", &blob)
    }

    pub fn export_options(&self) -> Result<Option<String>> {
        self.get("export_options")
    }

    pub fn set_export_options(&self, fingerprint: Option<&str>) -> Result<()> {
        self.set("export_options", &fingerprint)
    }

    /// Last per-file error. A stored value that isn't valid JSON is a
    /// serialization failure for this record only.
    pub fn last_error(&self) -> Result<Option<RecordError>> {
        let raw: Option<String> = self.get("error")?;
        decode_error(&self.key.raw, raw)
    }

    /// Record or clear the per-file error.
    pub fn set_last_error(&self, error: Option<&RecordError>) -> Result<()> {
        let json = error
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::serialization("record error", e))?;
        self.set("error", &json)
    }

    pub fn timestamp(&self) -> Result<Option<String>> {
        self.get("timestamp")
    }

    /// Read every field in one query.
    pub fn snapshot(&self) -> Result<FileRecord> {
        let row = self
            .conn
            .query_row(
                "SELECT filepath, filepath_normalized, uuid,
                        src_mode, src_size, src_mtime,
                        dest_mode, dest_size, dest_mtime,
                        digest, exifdata, export_options, error, timestamp
                   FROM export_data WHERE filepath_normalized = ?1",
                [&self.key.normalized],
                |row| {
                    Ok((
                        (
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ),
                        sig_parts(row, 3)?,
                        sig_parts(row, 6)?,
                        (
                            row.get::<_, Option<String>>(9)?,
                            row.get::<_, Option<String>>(10)?,
                            row.get::<_, Option<String>>(11)?,
                        ),
                        row.get::<_, Option<String>>(12)?,
                        row.get::<_, Option<String>>(13)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| self.not_found())?;

        let ((raw_path, normalized_path, asset_id), src, dest, (digest, blob, options), error, ts) = row;
        let (source_signature, destination_signature) =
            (sig_from_parts(&raw_path, src)?, sig_from_parts(&raw_path, dest)?);
        Ok(FileRecord {
            last_error: decode_error(&raw_path, error)?,
            normalized_path,
            raw_path,
            asset_id,
            source_signature,
            destination_signature,
            content_digest: digest,
            metadata_blob: blob,
            export_options_fingerprint: options,
            last_modified_timestamp: ts,
        })
    }
}

// ── Handle ────────────────────────────────────────────────────

/// Accessor bound to one record of an [`ExportStateStore`].
#[derive(Clone)]
pub struct RecordHandle<'s> {
    store: &'s ExportStateStore,
    key: PathKey,
}

impl std::fmt::Debug for RecordHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordHandle").field("key", &self.key).finish()
    }
}

macro_rules! standalone {
    ($(#[$doc:meta])* $name:ident ( $($arg:ident : $ty:ty),* ) -> $ret:ty) => {
        $(#[$doc])*
        ///
        /// # Errors
        ///
        /// Returns [`Error::RecordNotFound`] if the record was deleted, or a
        /// store error.
        pub fn $name(&self, $($arg: $ty),*) -> Result<$ret> {
            self.store
                .with_conn(stringify!($name), |conn| RecordTxn::new(conn, &self.key).$name($($arg),*))
        }
    };
}

impl<'s> RecordHandle<'s> {
    pub(crate) const fn new(store: &'s ExportStateStore, key: PathKey) -> Self {
        Self { store, key }
    }

    #[must_use]
    pub const fn key(&self) -> &PathKey {
        &self.key
    }

    /// Case-folded store key.
    #[must_use]
    pub fn normalized_path(&self) -> &str {
        &self.key.normalized
    }

    standalone!(
        /// Path as first recorded (original case).
        raw_path() -> String
    );
    standalone!(asset_id() -> Option<String>);
    standalone!(set_asset_id(asset_id: &str) -> ());
    standalone!(source_signature() -> Option<FileSignature>);
    standalone!(set_source_signature(sig: Option<FileSignature>) -> ());
    standalone!(destination_signature() -> Option<FileSignature>);
    standalone!(set_destination_signature(sig: Option<FileSignature>) -> ());
    standalone!(digest() -> Option<String>);
    standalone!(set_digest(digest: Option<&str>) -> ());
    standalone!(metadata_blob() -> Option<String>);
    standalone!(set_metadata_blob(blob: Option<&str>) -> ());
    standalone!(export_options() -> Option<String>);
    standalone!(set_export_options(fingerprint: Option<&str>) -> ());
    standalone!(last_error() -> Option<RecordError>);
    standalone!(set_last_error(error: Option<&RecordError>) -> ());
    standalone!(timestamp() -> Option<String>);
    standalone!(
        /// Every field in one read.
        snapshot() -> FileRecord
    );

    /// See [`RecordTxn::update_digest`]; the compare and write are one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `metadata` cannot be encoded, or a
    /// store error.
    pub fn update_digest<T: Serialize>(&self, metadata: &T) -> Result<bool> {
        self.transaction(|txn| txn.update_digest(metadata))
    }

    /// Run `f` with the store lock held and a single transaction open.
    ///
    /// Commits if `f` returns `Ok`, rolls back if it returns `Err`. Only
    /// beginning the transaction is retried on a busy store; `f` runs once.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a store error from begin/commit.
    pub fn transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&RecordTxn<'_>) -> Result<R>,
    {
        self.store.with_locked("record_transaction", |conn, retry| {
            let tx = retry.run("begin", || {
                Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(Error::from)
            })?;
            let result = f(&RecordTxn::new(&tx, &self.key))?;
            tx.commit()?;
            debug!(path = %self.key.raw, "Committed record transaction");
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::storage::memory::InMemoryStore;

    fn store() -> InMemoryStore {
        InMemoryStore::disposable("/export", StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_signature_round_trip() {
        let store = store();
        let rec = store.get_or_create_record("IMG_0001.JPG", "UUID-A").unwrap();
        let sig = FileSignature::new(0o100_644, 1024, 1_700_000_000);

        assert_eq!(rec.destination_signature().unwrap(), None);
        rec.set_destination_signature(Some(sig)).unwrap();
        assert_eq!(rec.destination_signature().unwrap(), Some(sig));
        assert_eq!(rec.source_signature().unwrap(), None);
        assert!(rec.timestamp().unwrap().is_some());
    }

    #[test]
    fn test_text_fields() {
        let store = store();
        let rec = store.get_or_create_record("a/B.jpg", "UUID-B").unwrap();
        rec.set_digest(Some("abc")).unwrap();
        rec.set_metadata_blob(Some("{\"k\":1}")).unwrap();
        rec.set_export_options(Some("fp")).unwrap();

        let snap = rec.snapshot().unwrap();
        assert_eq!(snap.raw_path, "a/B.jpg");
        assert_eq!(snap.normalized_path, "a/b.jpg");
        assert_eq!(snap.asset_id.as_deref(), Some("UUID-B"));
        assert_eq!(snap.content_digest.as_deref(), Some("abc"));
        assert_eq!(snap.metadata_blob.as_deref(), Some("{\"k\":1}"));
        assert_eq!(snap.export_options_fingerprint.as_deref(), Some("fp"));

        rec.set_digest(None).unwrap();
        assert_eq!(rec.digest().unwrap(), None);
    }

    #[test]
    fn test_error_field_round_trip() {
        let store = store();
        let rec = store.get_or_create_record("x.jpg", "U").unwrap();
        let err = RecordError::new("disk full").with_kind("io");
        rec.set_last_error(Some(&err)).unwrap();
        assert_eq!(rec.last_error().unwrap(), Some(err));
        rec.set_last_error(None).unwrap();
        assert_eq!(rec.last_error().unwrap(), None);
    }

    #[test]
    fn test_corrupt_error_field_is_per_record() {
        let store = store();
        let rec = store.get_or_create_record("x.jpg", "U").unwrap();
        store
            .with_conn("corrupt", |conn| {
                conn.execute("UPDATE export_data SET error = 'not json'", [])?;
                Ok(())
            })
            .unwrap();
        let err = rec.last_error().unwrap_err();
        assert_eq!(err.error_code(), crate::error::ErrorCode::SerializationFailure);
        // The rest of the record is still readable.
        assert_eq!(rec.asset_id().unwrap().as_deref(), Some("U"));
    }

    #[test]
    fn test_negative_signature_column_is_serialization_failure() {
        let store = store();
        let rec = store.get_or_create_record("neg.jpg", "U").unwrap();
        rec.set_destination_signature(Some(FileSignature::new(0o100_644, 10, 5)))
            .unwrap();
        store
            .with_conn("corrupt", |conn| {
                conn.execute("UPDATE export_data SET dest_size = -1", [])?;
                Ok(())
            })
            .unwrap();

        let err = rec.destination_signature().unwrap_err();
        assert_eq!(err.error_code(), crate::error::ErrorCode::SerializationFailure);
        assert!(rec.snapshot().is_err());
        assert_eq!(rec.source_signature().unwrap(), None);
    }

    #[test]
    fn test_deleted_record_reads_not_found() {
        let store = store();
        let rec = store.get_or_create_record("gone.jpg", "U").unwrap();
        store.delete_records_for_path("gone.jpg").unwrap();
        assert!(rec.asset_id().unwrap_err().is_not_found());
        assert!(rec.set_digest(Some("d")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_transaction_commits_all_fields() {
        let store = store();
        let rec = store.get_or_create_record("t.jpg", "U").unwrap();
        rec.set_last_error(Some(&RecordError::new("boom"))).unwrap();

        let sig = FileSignature::new(0o100_644, 5, 42);
        rec.transaction(|txn| {
            txn.set_destination_signature(Some(sig))?;
            txn.set_last_error(None)
        })
        .unwrap();

        assert_eq!(rec.destination_signature().unwrap(), Some(sig));
        assert_eq!(rec.last_error().unwrap(), None);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = store();
        let rec = store.get_or_create_record("t.jpg", "U").unwrap();

        let result: Result<()> = rec.transaction(|txn| {
            txn.set_digest(Some("partial"))?;
            Err(Error::Other("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(rec.digest().unwrap(), None);
    }

    #[test]
    fn test_update_digest_reports_changes() {
        let store = store();
        let rec = store.get_or_create_record("d.jpg", "U").unwrap();
        let meta = serde_json::json!({ "title": "Sunset", "keywords": ["beach"] });

        assert!(rec.update_digest(&meta).unwrap());
        let stored = rec.digest().unwrap().unwrap();
        assert_eq!(stored, digest::compute_digest(&meta).unwrap());
        assert!(!rec.update_digest(&meta).unwrap());

        let edited = serde_json::json!({ "title": "Sunset", "keywords": ["beach", "sea"] });
        assert!(rec.update_digest(&edited).unwrap());
        assert_ne!(rec.digest().unwrap().unwrap(), stored);
    }
}
