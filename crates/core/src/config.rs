//! Configuration types shared across crates.

use crate::checksum::ChecksumSelection;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: false).
    /// The endpoint sits outside client scoping, so restrict it at the
    /// network level when enabled.
    #[serde(default)]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: false,
        }
    }
}

/// How the `Packages.gz` document is produced.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressorConfig {
    /// Pipe through the system `gzip` program.
    #[default]
    External,
    /// Compress in-process.
    Native,
}

/// Repository scanning configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Directory containing the packages (scanned recursively).
    pub root: PathBuf,
    /// Maximum number of packages parsed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Compute MD5 checksums of scanned packages.
    #[serde(default = "default_true")]
    pub md5: bool,
    /// Compute SHA-1 checksums of scanned packages.
    #[serde(default)]
    pub sha1: bool,
    /// Compressor for the package index.
    #[serde(default)]
    pub compressor: CompressorConfig,
    /// Path of the opkg feeds snippet.
    #[serde(default = "default_feeds_path")]
    pub feeds_path: String,
}

fn default_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_feeds_path() -> String {
    "/opkg.conf".to_string()
}

impl RepositoryConfig {
    /// Repository configuration with defaults for everything but the root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workers: default_workers(),
            md5: true,
            sha1: false,
            compressor: CompressorConfig::default(),
            feeds_path: default_feeds_path(),
        }
    }

    /// Checksums selected for scanning.
    pub fn checksums(&self) -> ChecksumSelection {
        ChecksumSelection {
            md5: self.md5,
            sha1: self.sha1,
        }
    }
}

/// TLS listener configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM encoded certificate chain.
    pub cert: PathBuf,
    /// PEM encoded private key.
    pub key: PathBuf,
    /// PEM encoded CA certificates used to verify client certificates.
    #[serde(default)]
    pub client_cas: Option<PathBuf>,
    /// Reject clients that do not present a certificate.
    #[serde(default)]
    pub require_client_cert: bool,
}

/// Client identity scoping configuration.
///
/// Each client identity maps to a directory `<root>/<identity>`; the
/// repository directories a client may reach are mirrored as subdirectories.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientMapConfig {
    /// Directory containing the client mappings.
    pub root: PathBuf,
    /// Serve requests without a client certificate unscoped instead of
    /// rejecting them.
    #[serde(default)]
    pub allow_anonymous: bool,
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also append log output to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Filter directives used when RUST_LOG is not set.
    #[serde(default)]
    pub filter: Option<String>,
}

impl LoggingConfig {
    pub fn filter(&self) -> &str {
        self.filter.as_deref().unwrap_or("info,tower_http=info")
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Repository configuration (required).
    pub repository: RepositoryConfig,
    /// TLS configuration (optional, plain HTTP when absent).
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Client scoping (optional, unscoped when absent).
    #[serde(default)]
    pub client_map: Option<ClientMapConfig>,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create a test configuration serving `root`.
    ///
    /// **For testing only.** Uses the in-process compressor so tests do not
    /// depend on a `gzip` binary.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        let mut repository = RepositoryConfig::with_root(root);
        repository.compressor = CompressorConfig::Native;
        Self {
            server: ServerConfig::default(),
            repository,
            tls: None,
            client_map: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Validate settings that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.repository.workers == 0 {
            return Err(Error::InvalidConfig(
                "repository.workers must be at least 1".to_string(),
            ));
        }
        if !self.repository.feeds_path.starts_with('/') || self.repository.feeds_path.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "repository.feeds_path must be an absolute URL path, got {:?}",
                self.repository.feeds_path
            )));
        }
        if self.server.metrics_enabled && self.repository.feeds_path == "/metrics" {
            return Err(Error::InvalidConfig(
                "repository.feeds_path conflicts with the metrics endpoint".to_string(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.require_client_cert && tls.client_cas.is_none() {
                return Err(Error::InvalidConfig(
                    "tls.require_client_cert requires tls.client_cas".to_string(),
                ));
            }
        }
        if self.client_map.is_some()
            && self.tls.as_ref().is_none_or(|tls| tls.client_cas.is_none())
        {
            return Err(Error::InvalidConfig(
                "client_map requires tls with client_cas to be configured".to_string(),
            ));
        }
        Ok(())
    }

    /// URL scheme the server is reachable under.
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() { "https" } else { "http" }
    }
}
