use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use trs_http::handler::BoxError;
use trs_http::protocol::RequestHeader;
use trs_http::writer::{ResponseWriter, ResponseWriterExt};

use crate::html::inject_bootstrap;
use crate::middleware::{Flow, Middleware};

static FILE_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.[a-z]+$").expect("valid regex"));

const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

/// Serves `index.html` with the client bootstrap injected for page navigations,
/// i.e. paths without a file extension outside `/@npm`.
///
/// When the file can't be read the request goes on to the next middleware.
#[derive(Debug, Clone)]
pub struct IndexBootstrap {
    root: PathBuf,
}

impl IndexBootstrap {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn applies_to(path: &str) -> bool {
        !FILE_EXTENSION.is_match(path) && !path.starts_with("/@npm")
    }
}

#[async_trait]
impl Middleware for IndexBootstrap {
    async fn handle(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<Flow, BoxError> {
        if !Self::applies_to(req.uri().path()) {
            return Ok(Flow::Next);
        }

        let start = Instant::now();
        let index = self.root.join("index.html");
        let html = match tokio::fs::read_to_string(&index).await {
            Ok(html) => html,
            Err(e) => {
                debug!(cause = %e, path = %index.display(), "can't read index.html, passing on");
                return Ok(Flow::Next);
            }
        };
        let body = Bytes::from(inject_bootstrap(&html).into_owned());
        let elapsed = start.elapsed().as_millis();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html;charset=utf-8"));
        headers.insert(SERVER_TIMING, HeaderValue::try_from(format!("index.html;dur={elapsed}"))?);
        res.write_head(StatusCode::OK, headers)?;
        res.end(Some(body)).await?;
        Ok(Flow::Handled)
    }
}
