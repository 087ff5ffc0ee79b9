use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, LOCATION};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::debug;
use trs_http::handler::BoxError;
use trs_http::protocol::RequestHeader;
use trs_http::writer::{ResponseWriter, ResponseWriterExt};

use crate::middleware::{Flow, Middleware};

/// Query browsers' devtools append when fetching a sourcemap.
const SOURCEMAP_QUERIES: [&str; 2] = ["%20[sm]", "%20%5Bsm%5D"];

/// Redirects `/app.js?%20[sm]` to `/app.js.map`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourcemapRedirect;

#[async_trait]
impl Middleware for SourcemapRedirect {
    async fn handle(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<Flow, BoxError> {
        let Some(query) = req.uri().query() else {
            return Ok(Flow::Next);
        };
        if !SOURCEMAP_QUERIES.iter().any(|sm| query.eq_ignore_ascii_case(sm)) {
            return Ok(Flow::Next);
        }

        let location = format!("{}.map", req.uri().path());
        debug!(%location, "redirecting sourcemap request");

        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::try_from(location)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        res.write_head(StatusCode::FOUND, headers)?;
        res.end(None).await?;
        Ok(Flow::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::test_util::MockWriter;
    use http::Request;

    fn request(uri: &str) -> RequestHeader {
        Request::builder().uri(uri).body(()).unwrap().into()
    }

    #[tokio::test]
    async fn sourcemap_query_redirects_to_map_file() {
        let mut res = MockWriter::new();
        let flow = SourcemapRedirect.handle(&request("/src/app.js?%20[sm]"), &mut res).await.unwrap();

        assert_eq!(flow, Flow::Handled);
        assert_eq!(res.status, StatusCode::FOUND);
        assert_eq!(res.headers.get(LOCATION).unwrap(), "/src/app.js.map");
        assert!(res.closed);
    }

    #[tokio::test]
    async fn other_requests_pass() {
        let mut res = MockWriter::new();
        assert_eq!(SourcemapRedirect.handle(&request("/src/app.js?v=1"), &mut res).await.unwrap(), Flow::Next);
        assert_eq!(SourcemapRedirect.handle(&request("/src/app.js"), &mut res).await.unwrap(), Flow::Next);
        assert_eq!(res.head_writes, 0);
    }
}
