//! Core domain types for the larder package repository server.
//!
//! This crate defines the data model shared by the scanner and the server:
//! - Package records parsed from `.ipk` archives
//! - Checksums computed over archive bytes
//! - The per-directory package index and its wire formats
//! - Client identities derived from X.509 certificate subjects
//! - Application configuration

pub mod checksum;
pub mod config;
pub mod error;
pub mod identity;
pub mod index;
pub mod package;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use checksum::{ChecksumSelection, Checksums};
pub use error::{Error, Result};
pub use identity::{identity_from_der, identity_from_name, identity_from_pem};
pub use index::{PackageIndex, PackageIndexBuilder};
pub use package::PackageRecord;

/// File extension of package archives, without the leading dot.
pub const PACKAGE_EXTENSION: &str = "ipk";
