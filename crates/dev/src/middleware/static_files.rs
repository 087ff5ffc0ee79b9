//! Static file serving for the dev server.
//!
//! Files are streamed in fixed-size chunks so the compressing interceptor and
//! the socket's backpressure apply to them like to any other body.

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::BytesMut;
use http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};
use trs_http::handler::BoxError;
use trs_http::protocol::RequestHeader;
use trs_http::writer::{ResponseWriter, ResponseWriterExt};

use crate::middleware::{Flow, Middleware};

const CHUNK_SIZE: usize = 16 * 1024;

const INDEX_FILE: &str = "index.html";

/// Serves the files below `root`.
///
/// With `single` set, extension-less paths that match no file get the root
/// `index.html` instead, unless they contain one of the `ignores` fragments.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    single: bool,
    etag: bool,
    ignores: Vec<String>,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into(), single: false, etag: true, ignores: Vec::new() }
    }

    /// Enables the single-page-app fallback.
    pub fn single(mut self, single: bool) -> Self {
        self.single = single;
        self
    }

    pub fn etag(mut self, etag: bool) -> Self {
        self.etag = etag;
        self
    }

    /// Path fragments excluded from the single-page-app fallback.
    pub fn ignore<S: Into<String>>(mut self, fragment: S) -> Self {
        self.ignores.push(fragment.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a request path onto a file below the root.
    ///
    /// Returns `None` for traversal attempts, hidden files and anything that
    /// doesn't resolve to a regular file.
    async fn resolve(&self, request_path: &str) -> Option<(PathBuf, Metadata)> {
        let decoded = urlencoding::decode(request_path).ok()?;
        let relative = decoded.trim_start_matches('/');

        for component in Path::new(relative).components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    debug!(path = request_path, "refusing path outside of the root");
                    return None;
                }
                Component::Normal(name) if name.to_str().is_some_and(|name| name.starts_with('.')) => {
                    debug!(path = request_path, "refusing hidden file");
                    return None;
                }
                _ => {}
            }
        }

        let canonical_root = tokio::fs::canonicalize(&self.root).await.ok()?;
        let mut canonical = tokio::fs::canonicalize(canonical_root.join(relative)).await.ok()?;
        if !canonical.starts_with(&canonical_root) {
            debug!(path = request_path, "resolved path escapes the root");
            return None;
        }

        let mut metadata = tokio::fs::metadata(&canonical).await.ok()?;
        if metadata.is_dir() {
            canonical.push(INDEX_FILE);
            metadata = tokio::fs::metadata(&canonical).await.ok()?;
        }
        metadata.is_file().then_some((canonical, metadata))
    }

    fn falls_back(&self, request_path: &str) -> bool {
        self.single
            && Path::new(request_path).extension().is_none()
            && !self.ignores.iter().any(|fragment| request_path.contains(fragment.as_str()))
    }
}

fn weak_etag(metadata: &Metadata) -> Option<HeaderValue> {
    let mtime = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?.as_millis();
    HeaderValue::try_from(format!("W/\"{}-{mtime}\"", metadata.len())).ok()
}

fn matches_etag(headers: &HeaderMap, etag: &HeaderValue) -> bool {
    let Some(candidates) = headers.get(IF_NONE_MATCH).and_then(|value| value.to_str().ok()) else {
        return false;
    };
    let etag = etag.as_bytes();
    candidates.split(',').map(str::trim).any(|candidate| candidate == "*" || candidate.as_bytes() == etag)
}

/// Content type by file extension.
fn content_type(path: &Path) -> &'static str {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();

    match extension.as_str() {
        "html" | "htm" => "text/html;charset=utf-8",
        "css" => "text/css;charset=utf-8",
        "js" | "mjs" | "cjs" => "text/javascript;charset=utf-8",
        "json" | "map" => "application/json;charset=utf-8",
        "xml" => "application/xml",
        "txt" => "text/plain;charset=utf-8",
        "md" => "text/markdown;charset=utf-8",
        "csv" => "text/csv;charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        "webmanifest" => "application/manifest+json",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Middleware for StaticFiles {
    async fn handle(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<Flow, BoxError> {
        let method = req.method();
        if method != Method::GET && method != Method::HEAD {
            return Ok(Flow::Next);
        }

        let request_path = req.uri().path();
        let resolved = match self.resolve(request_path).await {
            Some(found) => Some(found),
            None if self.falls_back(request_path) => self.resolve("/").await,
            None => None,
        };
        let Some((path, metadata)) = resolved else {
            return Ok(Flow::Next);
        };

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

        let etag = if self.etag { weak_etag(&metadata) } else { None };
        if let Some(etag) = etag {
            if matches_etag(req.headers(), &etag) {
                trace!(path = %path.display(), "not modified");
                headers.insert(ETAG, etag);
                res.write_head(StatusCode::NOT_MODIFIED, headers)?;
                res.end(None).await?;
                return Ok(Flow::Handled);
            }
            headers.insert(ETAG, etag);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));

        if method == Method::HEAD {
            res.write_head(StatusCode::OK, headers)?;
            res.end(None).await?;
            return Ok(Flow::Handled);
        }

        let mut file = tokio::fs::File::open(&path).await?;
        res.write_head(StatusCode::OK, headers)?;

        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            if file.read_buf(&mut buf).await? == 0 {
                break;
            }
            res.write(buf.split().freeze()).await?;
            buf.reserve(CHUNK_SIZE);
        }
        res.end(None).await?;

        debug!(path = %path.display(), size = metadata.len(), "served file");
        Ok(Flow::Handled)
    }
}
