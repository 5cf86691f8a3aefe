//! Application state shared across handlers.

use crate::error::ServeError;
use crate::metrics;
use crate::tree::RepositoryTree;
use larder_core::config::AppConfig;
use larder_scanner::{ScanOptions, scan_repository};
use std::sync::Arc;

/// Shared application state.
///
/// Built once at startup and never mutated while serving.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Mounted repositories.
    pub tree: Arc<RepositoryTree>,
}

impl AppState {
    pub fn new(config: AppConfig, tree: RepositoryTree) -> Self {
        Self {
            config: Arc::new(config),
            tree: Arc::new(tree),
        }
    }

    /// Scan the configured repository root and build the mount table.
    pub async fn load(config: AppConfig) -> Result<Self, ServeError> {
        let options = ScanOptions::from(&config.repository);
        let scan = scan_repository(&config.repository.root, &options).await?;
        let packages = scan.package_count();
        let failed = scan.failed_count();
        let tree = RepositoryTree::build(scan, config.repository.compressor).await?;

        metrics::PACKAGE_MOUNTS.set(tree.feeds().len() as i64);
        metrics::PACKAGES_INDEXED.set(packages as i64);
        metrics::PACKAGES_FAILED.set(failed as i64);

        Ok(Self::new(config, tree))
    }
}
