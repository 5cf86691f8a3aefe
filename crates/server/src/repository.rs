//! HTTP handlers for a single package directory.
//!
//! All documents are generated once when the repository is built and served
//! from memory afterwards:
//!
//! | Path               | Response                                       |
//! |--------------------|------------------------------------------------|
//! | `/`                | HTML listing                                   |
//! | `/Packages`        | plain index, gzip-encoded when the client asks |
//! | `/Packages.gz`     | gzip index                                     |
//! | `/Packages.stamps` | filename and checksums per package             |
//! | `/<file>.control`  | control stanza of `<file>`                     |
//!
//! Everything else is served from the directory on disk.

use crate::compression;
use crate::error::{ApiError, ServeError};
use crate::listing::ListingPage;
use askama::Template;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, LAST_MODIFIED, VARY};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use larder_core::PackageIndex;
use larder_core::config::CompressorConfig;
use larder_scanner::ScannedDirectory;
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::format_description;
use tower::ServiceExt;
use tower_http::services::ServeDir;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const APPLICATION_GZIP: &str = "application/gzip";

/// A document held in memory together with its gzip encoding.
#[derive(Debug, Clone)]
struct Document {
    plain: Bytes,
    gzip: Bytes,
}

/// A package directory and its generated documents.
#[derive(Debug)]
pub struct Repository {
    dir: PathBuf,
    index: PackageIndex,
    packages: Document,
    stamps: Bytes,
    listing: Document,
    last_modified: Option<HeaderValue>,
}

impl Repository {
    /// Generate all documents for a scanned directory.
    pub async fn build(
        scanned: ScannedDirectory,
        compressor: CompressorConfig,
    ) -> Result<Self, ServeError> {
        let ScannedDirectory {
            mount, path, index, ..
        } = scanned;
        let generated = OffsetDateTime::now_utc();

        let packages_text = index.to_packages_text();
        let packages_gz = compression::gzip(packages_text.as_bytes(), compressor)
            .await
            .map_err(ServeError::Compress)?;
        let stamps = index.to_stamps_text();

        let listing = ListingPage::new(
            &mount,
            &index,
            &[
                ("Packages", packages_text.len()),
                ("Packages.gz", packages_gz.len()),
                ("Packages.stamps", stamps.len()),
            ],
            generated,
        )
        .render()?;
        let listing_gz = compression::gzip(listing.as_bytes(), compressor)
            .await
            .map_err(ServeError::Compress)?;

        Ok(Self {
            dir: path,
            index,
            packages: Document {
                plain: Bytes::from(packages_text),
                gzip: Bytes::from(packages_gz),
            },
            stamps: Bytes::from(stamps),
            listing: Document {
                plain: Bytes::from(listing),
                gzip: Bytes::from(listing_gz),
            },
            last_modified: http_date(generated),
        })
    }

    pub fn index(&self) -> &PackageIndex {
        &self.index
    }

    /// Routes relative to the mount.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", get(listing))
            .route("/Packages", get(packages))
            .route("/Packages.gz", get(packages_gz))
            .route("/Packages.stamps", get(packages_stamps))
            .fallback(control_or_file)
            .with_state(self)
    }

    fn respond(&self, body: Bytes, content_type: &'static str) -> Response {
        let mut response = ([(CONTENT_TYPE, content_type)], body).into_response();
        if let Some(last_modified) = &self.last_modified {
            response
                .headers_mut()
                .insert(LAST_MODIFIED, last_modified.clone());
        }
        response
    }

    /// Serve `document` gzip-encoded if the client accepts it.
    fn negotiate(
        &self,
        document: &Document,
        content_type: &'static str,
        headers: &HeaderMap,
    ) -> Response {
        let gzip = accepts_gzip(headers);
        let body = if gzip {
            document.gzip.clone()
        } else {
            document.plain.clone()
        };
        let mut response = self.respond(body, content_type);
        let response_headers = response.headers_mut();
        if gzip {
            response_headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        response_headers.insert(VARY, HeaderValue::from_static("accept-encoding"));
        response
    }
}

async fn listing(State(repo): State<Arc<Repository>>, headers: HeaderMap) -> Response {
    repo.negotiate(&repo.listing, TEXT_HTML, &headers)
}

async fn packages(State(repo): State<Arc<Repository>>, headers: HeaderMap) -> Response {
    repo.negotiate(&repo.packages, TEXT_PLAIN, &headers)
}

async fn packages_gz(State(repo): State<Arc<Repository>>) -> Response {
    repo.respond(repo.packages.gzip.clone(), APPLICATION_GZIP)
}

async fn packages_stamps(State(repo): State<Arc<Repository>>) -> Response {
    repo.respond(repo.stamps.clone(), TEXT_PLAIN)
}

/// `<file>.control` lookups by basename, otherwise a file from disk.
async fn control_or_file(State(repo): State<Arc<Repository>>, req: Request) -> Response {
    if let Some(stem) = req.uri().path().strip_suffix(".control") {
        let stem = percent_decode_str(stem).decode_utf8_lossy();
        let filename = stem.rsplit('/').next().unwrap_or_default();
        return match repo.index.get(filename) {
            Some(record) => ([(CONTENT_TYPE, TEXT_PLAIN)], record.control.clone()).into_response(),
            None => ApiError::NotFound.into_response(),
        };
    }

    match ServeDir::new(&repo.dir).oneshot(req).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

/// Whether `Accept-Encoding` lists gzip with a non-zero quality.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| {
            let mut parts = coding.split(';').map(str::trim);
            let name = parts.next().unwrap_or_default();
            if !name.eq_ignore_ascii_case("gzip") && !name.eq_ignore_ascii_case("x-gzip") {
                return false;
            }
            !parts.any(|param| {
                param
                    .strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            })
        })
}

fn http_date(at: OffsetDateTime) -> Option<HeaderValue> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    let text = at.to_offset(time::UtcOffset::UTC).format(format).ok()?;
    HeaderValue::from_str(&text).ok()
}
