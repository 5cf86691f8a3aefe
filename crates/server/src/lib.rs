//! HTTP server for opkg package repositories.
//!
//! This crate serves the scanned repository tree:
//! - Package index documents per package directory
//! - HTML listings and control stanza lookups
//! - The opkg feeds snippet
//! - Client scoping by TLS certificate identity

pub mod compression;
pub mod context;
pub mod error;
pub mod listing;
pub mod metrics;
pub mod repository;
pub mod routes;
pub mod scope;
pub mod serve;
pub mod state;
pub mod tree;

pub use context::RequestContext;
pub use error::{ApiError, ServeError};
pub use routes::create_router;
pub use scope::ClientScope;
pub use serve::{PeerCertificates, load_tls_config, serve};
pub use state::AppState;
pub use tree::RepositoryTree;
