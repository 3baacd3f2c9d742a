//! Error types for the export state store.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Retryability flags so the store can retry transient failures
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for export state operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Callers branch on the code (retryable vs. fatal vs. not-found) instead of
/// matching error message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Database (exit 2)
    DatabaseError,
    TransientBusy,
    MigrationFailure,
    StoreClosed,

    // Not Found (exit 3)
    NotFound,

    // Validation (exit 4)
    InvalidArgument,

    // Uniqueness (exit 5)
    UniquenessViolation,

    // Serialization (exit 6)
    SerializationFailure,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::TransientBusy => "TRANSIENT_BUSY",
            Self::MigrationFailure => "MIGRATION_FAILURE",
            Self::StoreClosed => "STORE_CLOSED",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::UniquenessViolation => "UNIQUENESS_VIOLATION",
            Self::SerializationFailure => "SERIALIZATION_FAILURE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError | Self::TransientBusy | Self::MigrationFailure | Self::StoreClosed => 2,
            Self::NotFound => 3,
            Self::InvalidArgument => 4,
            Self::UniquenessViolation => 5,
            Self::SerializationFailure => 6,
            Self::ConfigError => 7,
            Self::IoError => 8,
        }
    }

    /// Whether repeating the same call can succeed.
    ///
    /// Only a momentarily locked backing file qualifies. Uniqueness violations
    /// are deliberately excluded: the caller re-fetches instead.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientBusy)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in export state operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No record for path: {path}")]
    RecordNotFound { path: String },

    #[error("No records for asset: {asset_id}")]
    AssetNotFound { asset_id: String },

    #[error("Export state store not found: {}", path.display())]
    StoreNotFound { path: PathBuf },

    #[error("Store busy during {operation} (gave up after {attempts} attempts)")]
    TransientBusy { operation: String, attempts: u32 },

    #[error("A record already exists for path: {path}")]
    UniquenessViolation { path: String },

    #[error("Failed to migrate {} from schema {from} to {to}: {reason}", path.display())]
    Migration {
        path: PathBuf,
        from: String,
        to: String,
        reason: String,
    },

    #[error("Store {} has schema {found}, newer than supported {supported}", path.display())]
    UnsupportedSchemaVersion {
        path: PathBuf,
        found: String,
        supported: String,
    },

    #[error("Could not encode or decode {what}: {reason}")]
    Serialization { what: String, reason: String },

    #[error("Export state store is closed")]
    StoreClosed,

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode as Sqlite;

        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            match failure.code {
                Sqlite::DatabaseBusy | Sqlite::DatabaseLocked => {
                    return Self::TransientBusy {
                        operation: err.to_string(),
                        attempts: 1,
                    };
                }
                Sqlite::ConstraintViolation
                    if matches!(
                        failure.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
                {
                    return Self::UniquenessViolation {
                        path: err.to_string(),
                    };
                }
                _ => {}
            }
        }
        Self::Database(err)
    }
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::RecordNotFound { .. } | Self::AssetNotFound { .. } | Self::StoreNotFound { .. } => {
                ErrorCode::NotFound
            }
            Self::TransientBusy { .. } => ErrorCode::TransientBusy,
            Self::UniquenessViolation { .. } => ErrorCode::UniquenessViolation,
            Self::Migration { .. } | Self::UnsupportedSchemaVersion { .. } => {
                ErrorCode::MigrationFailure
            }
            Self::Serialization { .. } | Self::Json(_) => ErrorCode::SerializationFailure,
            Self::StoreClosed => ErrorCode::StoreClosed,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether this is a record/asset/store lookup miss.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.error_code(), ErrorCode::NotFound)
    }

    /// Build a serialization error for a named value.
    pub fn serialization(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Serialization {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Context-aware recovery hint for humans.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::StoreNotFound { path } => Some(format!(
                "No export state store at {}. Pass the store file or the export directory that contains it.",
                path.display()
            )),
            Self::RecordNotFound { path } => Some(format!(
                "'{path}' has no record. Paths are matched relative to the export directory; use --export-dir if the store lives elsewhere."
            )),
            Self::TransientBusy { .. } => Some(
                "Another process holds the store lock. Retry once the other export finishes."
                    .to_string(),
            ),
            Self::UniquenessViolation { .. } => Some(
                "Fetch the existing record instead of creating a new one.".to_string(),
            ),
            Self::Migration { path, .. } => Some(format!(
                "The store was left at its previous version. Restore a backup of {} or remove it to start fresh.",
                path.display()
            )),
            Self::UnsupportedSchemaVersion { .. } => Some(
                "This store was written by a newer release. Upgrade before using it.".to_string(),
            ),
            Self::StoreClosed => Some("Re-open the store before using it.".to_string()),
            Self::AssetNotFound { .. }
            | Self::Serialization { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
