//! Request line and headers of a decoded request.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version, header};

/// The head of an incoming request.
///
/// Bodies are never exposed to handlers: the connection reads and discards them,
/// so this wraps a bodiless `http::Request<()>`.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether a request with this method may carry a body worth framing.
    ///
    /// GET, HEAD, DELETE, OPTIONS and CONNECT are treated as bodiless.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Whether the connection should stay open after this exchange.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is present,
    /// HTTP/1.0 only keeps the connection when `Connection: keep-alive` is present.
    pub fn is_keep_alive(&self) -> bool {
        let connection = self.headers().get(header::CONNECTION).map(|value| value.as_bytes());
        match self.version() {
            Version::HTTP_10 => connection.is_some_and(|value| value.eq_ignore_ascii_case(b"keep-alive")),
            _ => !connection.is_some_and(|value| value.eq_ignore_ascii_case(b"close")),
        }
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}
