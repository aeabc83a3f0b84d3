//! Error types for the webp-migrate library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`MigrateError`] is **fatal**: the run cannot proceed at all (missing
//!   upload root, no database URL, another run holds the lock, a row write
//!   failed). Returned as `Err(MigrateError)` from [`crate::migrate::run`].
//!
//! * [`ConversionError`] is **non-fatal**: a single file or inline payload
//!   could not be converted. The caller logs it, counts it and leaves the
//!   original value untouched; the batch continues.
//!
//! Deleting originals is best-effort and uses plain `std::io::Result`; the
//! caller decides to swallow it.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the webp-migrate library.
#[derive(Debug, Error)]
pub enum MigrateError {
    // ── Environment errors ────────────────────────────────────────────────
    /// The configured upload root does not exist or is not a directory.
    #[error("Upload root not found: '{path}'\nSet UPLOAD_ROOT or pass --upload-root.")]
    UploadRootNotFound { path: PathBuf },

    /// The database phase needs a connection string but none was provided.
    #[error(
        "DATABASE_URL is required to rewrite {mappings} URL mapping(s).\n\
Set DATABASE_URL, or pass --skip-db to convert files only."
    )]
    DatabaseUrlMissing { mappings: usize },

    /// Another run holds the lock file in the upload root.
    #[error(
        "Another migration appears to be running: lock file '{path}' exists.\n\
If no other run is active, delete the file and retry."
    )]
    LockHeld { path: PathBuf },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A target spec names an unusable table or column.
    #[error("Invalid target '{table}': {reason}")]
    InvalidTarget { table: String, reason: String },

    /// The targets file could not be read or parsed.
    #[error("Failed to load targets from '{path}': {reason}")]
    TargetsFile { path: PathBuf, reason: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// A database read or write failed.
    #[error("Database error on '{table}': {source}")]
    Database {
        table: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Could not open the database session.
    #[error("Failed to connect to the database: {0}")]
    Connect(#[source] tokio_postgres::Error),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Filesystem operation on the upload tree failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error converting one file or inline payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    /// Zero bytes were handed to the converter.
    #[error("input buffer is empty")]
    EmptyInput,

    /// The codec could not parse the input.
    #[error("could not decode image: {0}")]
    Decode(String),

    /// libwebp refused to encode the decoded pixels.
    #[error("could not encode WebP: {0}")]
    Encode(String),

    /// Reading the source or writing the target failed.
    #[error("I/O failure: {0}")]
    Io(String),
}

impl From<image::ImageError> for ConversionError {
    fn from(e: image::ImageError) -> Self {
        ConversionError::Decode(e.to_string())
    }
}
