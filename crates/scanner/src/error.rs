//! Scanner error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a directory or repository scan.
///
/// Individual archives that fail to parse are not errors; they are logged
/// and counted in the scan result.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("repository root {path} is not a readable directory: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker pool closed")]
    PoolClosed,

    #[error("scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for scanner operations.
pub type Result<T> = std::result::Result<T, ScanError>;
