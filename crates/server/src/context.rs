//! Per-request context and access logging.

use crate::metrics;
use crate::serve::PeerCertificates;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::HOST;
use axum::middleware::Next;
use axum::response::Response;
use larder_core::identity_from_der;
use std::net::SocketAddr;
use tracing::Instrument;

/// Facts about the client, attached to every request as an extension.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Identity derived from the first peer certificate, if one was presented.
    pub client_id: Option<String>,
    /// Remote socket address, if known.
    pub remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    /// Derive the context from connection extensions.
    pub fn from_request(req: &Request) -> Self {
        let client_id = req
            .extensions()
            .get::<PeerCertificates>()
            .and_then(PeerCertificates::first)
            .map(|cert| identity_from_der(cert.as_ref()));
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self {
            client_id,
            remote_addr,
        }
    }

    /// Non-empty client identity.
    pub fn identity(&self) -> Option<&str> {
        self.client_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Attach a [`RequestContext`] and log one line per request.
pub async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    let context = RequestContext::from_request(&req);
    let method = req.method().clone();
    let uri = req.uri().clone();
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();

    req.extensions_mut().insert(context.clone());

    let client_id = context.client_id.as_deref().unwrap_or("-");
    let span = tracing::info_span!("request", client_id = %client_id);
    let response = next.run(req).instrument(span.clone()).await;

    span.in_scope(|| {
        tracing::info!(
            remote = %context.remote_addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
            client_id = %client_id,
            method = %method,
            status = response.status().as_u16(),
            host = %host,
            uri = %uri,
            "request"
        );
    });
    metrics::record_response(response.status());

    response
}
