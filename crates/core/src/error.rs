//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid package archive: {0}")]
    InvalidPackage(String),

    #[error("package archive has no control file")]
    MissingControl,

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("no certificate found in PEM input")]
    NoCertificate,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
