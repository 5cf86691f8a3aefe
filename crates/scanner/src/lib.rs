//! Package directory scanning.
//!
//! Builds one [`PackageIndex`](larder_core::PackageIndex) per directory of a
//! repository tree. Archives are parsed concurrently, bounded by a
//! [`WorkerPool`].

pub mod error;
pub mod pool;
pub mod scan;
pub mod walk;

pub use error::{Result, ScanError};
pub use pool::{Worker, WorkerPool};
pub use scan::{DirectoryScan, ScanOptions, scan_directory};
pub use walk::{RepositoryScan, ScannedDirectory, scan_repository};
