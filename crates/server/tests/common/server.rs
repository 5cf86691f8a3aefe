//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use larder_core::config::AppConfig;
use larder_server::{AppState, PeerCertificates, create_router};
use rustls::pki_types::CertificateDer;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A response with its body collected.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8(self.body.to_vec()).expect("Body is not UTF-8")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A test server over a temporary package repository.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub repo_dir: TempDir,
    pub client_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Build a server over a repository populated by `populate`.
    pub async fn new<F>(populate: F) -> Self
    where
        F: FnOnce(&Path),
    {
        Self::with_config(populate, |_, _| {}).await
    }

    /// Build a server with custom config modifications.
    ///
    /// `modifier` also receives the client map directory.
    pub async fn with_config<F, M>(populate: F, modifier: M) -> Self
    where
        F: FnOnce(&Path),
        M: FnOnce(&mut AppConfig, &Path),
    {
        let repo_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let client_dir = tempfile::tempdir().expect("Failed to create temp directory");
        populate(repo_dir.path());

        let mut config = AppConfig::for_testing(repo_dir.path());
        modifier(&mut config, client_dir.path());

        let state = AppState::load(config)
            .await
            .expect("Failed to build application state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            repo_dir,
            client_dir,
        }
    }

    /// Send a GET request.
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Send a GET request with extra headers.
    pub async fn get_with(&self, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::get(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    /// Send a GET request as a TLS client presenting `cert`.
    pub async fn get_as(&self, uri: &str, cert: CertificateDer<'static>) -> TestResponse {
        let mut request = Request::get(uri)
            .header("host", "repo.test")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(PeerCertificates(Arc::new(vec![cert])));
        self.request(request).await
    }

    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }
}
