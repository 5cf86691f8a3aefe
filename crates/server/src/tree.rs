//! Mount table for a scanned repository.
//!
//! Every scanned directory is mounted at its path relative to the repository
//! root. Directories with packages get the full repository handler; the rest
//! serve plain files. A request goes to the longest mount that is a prefix
//! of its path at a segment boundary, with that prefix stripped.

use crate::error::{ApiError, ServeError};
use crate::repository::Repository;
use crate::scope::ClientScope;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::Uri;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use larder_core::config::CompressorConfig;
use larder_scanner::RepositoryScan;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeDir;

/// Characters escaped when a decoded path is put back into a URI.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One mounted directory.
#[derive(Clone)]
pub struct Mount {
    path: String,
    repository: Option<Arc<Repository>>,
    router: Router,
}

impl Mount {
    /// URL prefix, `/` for the repository root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The package repository served here, if any.
    pub fn repository(&self) -> Option<&Arc<Repository>> {
        self.repository.as_ref()
    }

    fn matches(&self, path: &str) -> bool {
        self.path == "/"
            || path
                .strip_prefix(self.path.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// All mounts of a repository, longest path first.
#[derive(Clone, Default)]
pub struct RepositoryTree {
    mounts: Vec<Mount>,
    feeds: Vec<String>,
}

impl RepositoryTree {
    /// Generate documents for every package directory and mount everything.
    pub async fn build(
        scan: RepositoryScan,
        compressor: CompressorConfig,
    ) -> Result<Self, ServeError> {
        let mut tree = Self::default();
        for directory in scan.directories {
            let mount = directory.mount.clone();
            if directory.has_packages() {
                let repository = Arc::new(Repository::build(directory, compressor).await?);
                tree.feeds.push(mount.clone());
                tree.mounts.push(Mount {
                    path: mount,
                    router: repository.clone().router(),
                    repository: Some(repository),
                });
            } else {
                tree.mounts.push(Mount {
                    path: mount,
                    router: Router::new().fallback_service(ServeDir::new(&directory.path)),
                    repository: None,
                });
            }
        }
        tree.mounts
            .sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(a.path.cmp(&b.path)));
        Ok(tree)
    }

    /// Mount paths of all package repositories, in scan order.
    pub fn feeds(&self) -> &[String] {
        &self.feeds
    }

    pub fn mounts(&self) -> impl Iterator<Item = &Mount> {
        self.mounts.iter()
    }

    /// Longest mount covering the decoded request `path`.
    pub fn resolve(&self, path: &str) -> Option<&Mount> {
        self.mounts.iter().find(|mount| mount.matches(path))
    }
}

/// Percent-decode a request path into its canonical form.
///
/// Empty and `.` segments are dropped so the result is what `ServeDir`
/// would resolve; a trailing slash is kept. Paths with `..` segments or NUL
/// bytes are rejected.
pub fn decode_path(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    if decoded.contains('\0') {
        return None;
    }

    let mut path = String::with_capacity(decoded.len());
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            segment => {
                path.push('/');
                path.push_str(segment);
            }
        }
    }
    if path.is_empty() || decoded.ends_with('/') {
        path.push('/');
    }
    Some(path)
}

/// Rewrite `uri` to `path` (decoded), keeping its query.
fn rewrite_uri(uri: &Uri, path: &str) -> Option<Uri> {
    let mut path_and_query = utf8_percent_encode(path, PATH).to_string();
    if let Some(query) = uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }
    path_and_query.parse().ok()
}

/// Fallback handler routing a request to its mount.
pub async fn dispatch(State(state): State<AppState>, mut req: Request) -> Response {
    let Some(path) = decode_path(req.uri().path()) else {
        return ApiError::NotFound.into_response();
    };
    let Some(mount) = state.tree.resolve(&path) else {
        return ApiError::NotFound.into_response();
    };

    let rest = if mount.path == "/" {
        path.as_str()
    } else {
        &path[mount.path.len()..]
    };
    let rest = if rest.is_empty() { "/" } else { rest };
    let Some(uri) = rewrite_uri(req.uri(), rest) else {
        return ApiError::NotFound.into_response();
    };
    *req.uri_mut() = uri;

    match mount.router.clone().oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// GET handler for the opkg feeds snippet.
///
/// Lists one `src/gz` line per package repository. Scoped clients only see
/// repositories that exist inside their scope.
pub async fn feeds_handler(
    State(state): State<AppState>,
    scope: Option<Extension<ClientScope>>,
    req: Request,
) -> Response {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_else(|| state.config.server.bind.clone());
    let scheme = state.config.scheme();

    let mut body = String::new();
    for mount in state.tree.feeds() {
        if let Some(Extension(scope)) = &scope {
            if !scope.allows(mount).await {
                continue;
            }
        }
        body.push_str(&feed_line(scheme, &host, mount));
    }

    ([(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// `src/gz <name>-ipks <url>` line for a package mount.
///
/// Packages at the repository root are published as `root-ipks`.
pub fn feed_line(scheme: &str, host: &str, mount: &str) -> String {
    let name = match mount.trim_start_matches('/') {
        "" => "root".to_string(),
        relative => relative.replace('/', "-"),
    };
    format!("src/gz {name}-ipks {scheme}://{host}{mount}\n")
}
