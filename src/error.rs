//! Crate-wide error taxonomy.
//!
//! Mirrors the error classes the fetch core must distinguish: transient vs.
//! terminal network failures, range-unsupported origins, integrity
//! mismatches, filesystem faults and configuration mistakes. Only the
//! phase-level entry points (crawl/scan/plan/download/sort) return `Err`
//! out to the CLI; per-item failures inside the fetch engine are captured
//! as `DownloadResult` values instead (see `fetch::DownloadResult`).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnacsyncError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("terminal network error (HTTP {status}): {message}")]
    TerminalNetwork { status: u16, message: String },

    #[error("server does not support range requests for {url}")]
    RangeNotSupported { url: String },

    #[error("integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed state record in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnacsyncError>;
