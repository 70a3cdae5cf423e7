//! Crate-level error type.
//!
//! Per-concern failures (subprocess, snapshot, state) carry their own enums
//! and convert into [`Error`] via `#[from]`. Anything that must remain a
//! decision rather than an abort (probe misses, recovery outcomes, verify
//! findings) is modeled as a value, not an error.

use thiserror::Error;

/// Result alias used throughout vigil-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for vigil-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external command failed.
    #[error(transparent)]
    Command(#[from] crate::exec::CommandError),

    /// Snapshot capture or retrieval failed.
    #[error(transparent)]
    Snapshot(#[from] crate::snapshot::SnapshotError),

    /// Timer registration with the host scheduler failed.
    #[error("scheduler registration error: {0}")]
    Schedule(String),

    /// HTTP request failure outside the probe path.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
