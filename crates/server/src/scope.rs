//! Client scoping by certificate identity.
//!
//! With a client map configured, every client identity `id` owns the
//! directory `<client_map.root>/<id>`. A client may only reach mounts that
//! are mirrored as subdirectories there: a request for `/armv7/base/...`
//! requires `<client_map.root>/<id>/armv7/base` to exist. Requests that fall
//! outside the scope get the same 404 as missing files.

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;
use crate::tree::decode_path;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::path::{Path, PathBuf};

/// The scope a request was admitted under.
#[derive(Clone, Debug)]
pub struct ClientScope {
    /// Client identity.
    pub identity: String,
    /// Scope directory of this identity.
    pub dir: PathBuf,
}

impl ClientScope {
    pub fn new(root: &Path, identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            dir: root.join(identity),
        }
    }

    /// Directory that must exist for `mount` to be visible.
    pub fn mount_dir(&self, mount: &str) -> PathBuf {
        let relative = mount.trim_start_matches('/');
        if relative.is_empty() {
            self.dir.clone()
        } else {
            self.dir.join(relative)
        }
    }

    /// Whether `mount` is visible in this scope.
    pub async fn allows(&self, mount: &str) -> bool {
        is_dir(&self.mount_dir(mount)).await
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_dir())
}

fn reject(reason: &'static str, identity: Option<&str>, path: &str) -> Response {
    metrics::record_scope_rejection(reason);
    tracing::debug!(reason, identity, path, "Request outside client scope");
    ApiError::NotFound.into_response()
}

/// Restrict each request to the caller's scope.
///
/// Expects a [`RequestContext`] extension; a request without one counts as
/// anonymous.
pub async fn scope_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(client_map) = state.config.client_map.as_ref() else {
        return next.run(req).await;
    };

    let identity = req
        .extensions()
        .get::<RequestContext>()
        .and_then(RequestContext::identity)
        .map(str::to_string);

    let Some(identity) = identity else {
        if client_map.allow_anonymous {
            return next.run(req).await;
        }
        return reject("anonymous", None, req.uri().path());
    };

    let scope = ClientScope::new(&client_map.root, &identity);
    if !is_dir(&scope.dir).await {
        return reject("unknown_client", Some(&identity), req.uri().path());
    }

    if req.uri().path() != state.config.repository.feeds_path {
        let mount = decode_path(req.uri().path())
            .and_then(|path| state.tree.resolve(&path).map(|m| m.path().to_string()));
        let Some(mount) = mount else {
            return reject("unknown_path", Some(&identity), req.uri().path());
        };
        if !scope.allows(&mount).await {
            return reject("outside_scope", Some(&identity), req.uri().path());
        }
    }

    req.extensions_mut().insert(scope);
    next.run(req).await
}
