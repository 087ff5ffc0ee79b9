use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures::{Sink, SinkExt};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::{debug, warn};
use trs_http::protocol::{RequestHeader, SendError, declared_length};
use trs_http::writer::{ResponseEvent, ResponseWriter};

use crate::compression::encoder::Encoder;
use crate::compression::policy::{DecisionInput, decide};
use crate::compression::{CompressionConfig, CompressionStream, EncodingChoice};

/// What the interceptor knows about its response.
#[derive(Debug, Default)]
pub struct ResponseState {
    /// Set on the first body write or end; the encoding is fixed at that moment.
    pub started: bool,
    pub encoding: EncodingChoice,
    /// Body bytes written so far, before compression.
    pub accumulated_size: u64,
    pub pending_status: Option<StatusCode>,
    pub pending_headers: HeaderMap,
}

/// Where body writes go.
#[derive(Debug)]
enum Route {
    /// No body byte yet. Drain listeners wait here until the target is known.
    Deciding { pending: Vec<Waker> },
    Passthrough,
    Compressing(CompressionStream),
}

/// A [`ResponseWriter`] that compresses the body when it turns out to be worth it.
///
/// Status and headers set before the first body write are held back. The first
/// write (or the end of the response) decides the encoding from the request's
/// `Accept-Encoding` and the response's headers and size, then flushes the head to
/// the inner writer exactly once. Later writes go straight through or into a
/// [`CompressionStream`].
#[derive(Debug)]
pub struct ResponseInterceptor<W> {
    inner: W,
    config: Arc<CompressionConfig>,
    method: Method,
    accept_encoding: Option<HeaderValue>,
    state: ResponseState,
    route: Route,
}

impl<W: ResponseWriter> ResponseInterceptor<W> {
    pub fn new(inner: W, req: &RequestHeader, config: Arc<CompressionConfig>) -> Self {
        Self {
            inner,
            config,
            method: req.method().clone(),
            accept_encoding: req.headers().get(ACCEPT_ENCODING).cloned(),
            state: ResponseState::default(),
            route: Route::Deciding { pending: Vec::new() },
        }
    }

    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    /// The chosen encoding, [`EncodingChoice::None`] until decided.
    pub fn encoding(&self) -> EncodingChoice {
        self.state.encoding
    }

    fn staged_header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.state.pending_headers.get(name).or_else(|| self.inner.header(name))
    }

    fn known_size(&self) -> u64 {
        let declared = declared_length(&self.state.pending_headers).or_else(|| {
            self.inner.header(&CONTENT_LENGTH).and_then(|value| value.to_str().ok()).and_then(|value| value.trim().parse().ok())
        });
        match declared {
            Some(length) if length > 0 => length,
            _ => self.state.accumulated_size,
        }
    }

    /// Decides the encoding and flushes the head. Runs once per response.
    fn start(&mut self) -> Result<(), SendError> {
        if self.state.started {
            return Ok(());
        }
        self.state.started = true;

        let size = self.known_size();
        let choice = decide(
            &DecisionInput {
                method: &self.method,
                accept_encoding: self.accept_encoding.as_ref(),
                content_type: self.staged_header(&CONTENT_TYPE),
                content_encoding: self.staged_header(&CONTENT_ENCODING),
                size,
            },
            &self.config,
        );

        let (encoding, route) = match choice.header_value() {
            None => (EncodingChoice::None, Route::Passthrough),
            Some(value) => match Encoder::new(choice, self.config.level, size) {
                Ok(encoder) => {
                    self.state.pending_headers.insert(CONTENT_ENCODING, value);
                    self.state.pending_headers.remove(CONTENT_LENGTH);
                    if self.inner.header(&CONTENT_LENGTH).is_some() {
                        self.inner.remove_header(&CONTENT_LENGTH)?;
                    }
                    (choice, Route::Compressing(CompressionStream::new(encoder)))
                }
                Err(e) => {
                    warn!(cause = %e, encoding = ?choice, level = self.config.level, "can't create encoder, sending response uncompressed");
                    (EncodingChoice::None, Route::Passthrough)
                }
            },
        };
        debug!(encoding = ?encoding, size, method = %self.method, "response encoding decided");
        self.state.encoding = encoding;

        let status = self.state.pending_status.take().unwrap_or_else(|| self.inner.status());
        let headers = mem::take(&mut self.state.pending_headers);
        self.inner.write_head(status, headers)?;

        if let Route::Deciding { pending } = mem::replace(&mut self.route, route) {
            for waker in pending {
                self.on_drain(&waker);
            }
        }
        Ok(())
    }

    fn on_drain(&mut self, waker: &Waker) {
        match &mut self.route {
            Route::Deciding { pending } => pending.push(waker.clone()),
            Route::Passthrough => self.inner.on(ResponseEvent::Drain, waker),
            Route::Compressing(stream) => stream.on_drain(waker, &mut self.inner),
        }
    }
}

impl<W: ResponseWriter> Sink<Bytes> for ResponseInterceptor<W> {
    type Error = SendError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        match &mut this.route {
            Route::Deciding { .. } => Poll::Ready(Ok(())),
            Route::Passthrough => this.inner.poll_ready_unpin(cx),
            Route::Compressing(stream) => stream.poll_ready(cx, &mut this.inner),
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        let this = self.get_mut();
        this.state.accumulated_size += item.len() as u64;
        this.start()?;

        match &mut this.route {
            Route::Deciding { .. } => Err(SendError::invalid_body("response encoding undecided")),
            Route::Passthrough => this.inner.start_send_unpin(item),
            Route::Compressing(stream) => stream.start_send(&item),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        match &mut this.route {
            Route::Deciding { .. } => Poll::Ready(Ok(())),
            Route::Passthrough => this.inner.poll_flush_unpin(cx),
            Route::Compressing(stream) => stream.poll_flush(cx, &mut this.inner),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        this.start()?;

        match &mut this.route {
            Route::Deciding { .. } => Poll::Ready(Err(SendError::invalid_body("response encoding undecided"))),
            Route::Passthrough => this.inner.poll_close_unpin(cx),
            Route::Compressing(stream) => stream.poll_close(cx, &mut this.inner),
        }
    }
}

impl<W: ResponseWriter> ResponseWriter for ResponseInterceptor<W> {
    fn status(&self) -> StatusCode {
        self.state.pending_status.unwrap_or_else(|| self.inner.status())
    }

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.staged_header(name)
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), SendError> {
        if self.state.started {
            return Err(SendError::HeadersSent);
        }
        self.state.pending_headers.insert(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), SendError> {
        if self.state.started {
            return Err(SendError::HeadersSent);
        }
        self.state.pending_headers.remove(name);
        if self.inner.header(name).is_some() {
            self.inner.remove_header(name)?;
        }
        Ok(())
    }

    /// Stages `status` and `headers`; nothing reaches the inner writer until the
    /// first body write or the end of the response.
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), SendError> {
        if self.state.started {
            return Err(SendError::HeadersSent);
        }
        self.state.pending_status = Some(status);
        self.state.pending_headers.extend(headers);
        Ok(())
    }

    fn headers_sent(&self) -> bool {
        self.state.started
    }

    fn on(&mut self, event: ResponseEvent, waker: &Waker) {
        match event {
            ResponseEvent::Drain => self.on_drain(waker),
            ResponseEvent::Finish => self.inner.on(event, waker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::test_util::{MockWriter, WakeFlag, noise};
    use async_trait::async_trait;
    use http::Request;
    use std::io::Read;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use trs_http::connection::HttpConnection;
    use trs_http::handler::{BoxError, Handler};
    use trs_http::protocol::HttpError;
    use trs_http::writer::ResponseWriterExt;

    fn request(method: Method, accept: &str) -> RequestHeader {
        Request::builder().method(method).uri("/app.js").header(ACCEPT_ENCODING, accept).body(()).unwrap().into()
    }

    fn interceptor<'a>(inner: &'a mut MockWriter, req: &RequestHeader, config: CompressionConfig) -> ResponseInterceptor<&'a mut MockWriter> {
        ResponseInterceptor::new(inner, req, Arc::new(config))
    }

    fn text(len: usize) -> Bytes {
        Bytes::from("console.log('hello world');\n".repeat(len / 28 + 1)[..len].to_string())
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn small_body_passes_through_unchanged() {
        let req = request(Method::GET, "gzip, br");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default());

        res.set_header(CONTENT_TYPE, HeaderValue::from_static("text/javascript")).unwrap();
        res.end(Some(text(100))).await.unwrap();
        assert_eq!(res.encoding(), EncodingChoice::None);
        drop(res);

        assert_eq!(inner.body(), text(100));
        assert!(inner.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(inner.head_writes, 1);
        assert!(inner.closed);
    }

    #[tokio::test]
    async fn large_text_body_is_gzipped() {
        let req = request(Method::GET, "gzip, deflate");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default());

        let body = text(8000);
        res.set_header(CONTENT_TYPE, HeaderValue::from_static("application/javascript")).unwrap();
        res.set_header(CONTENT_LENGTH, HeaderValue::from(body.len())).unwrap();
        for chunk in body.chunks(1000) {
            res.write(Bytes::copy_from_slice(chunk)).await.unwrap();
        }
        res.end(None).await.unwrap();
        assert_eq!(res.state().accumulated_size, 8000);
        drop(res);

        assert_eq!(inner.headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert!(inner.headers.get(CONTENT_LENGTH).is_none());
        assert_eq!(inner.head_writes, 1);
        assert_eq!(gunzip(&inner.body()), body);
    }

    #[tokio::test]
    async fn brotli_round_trip() {
        let req = request(Method::GET, "gzip, deflate, br");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::dev(1024));

        let body = text(20_000);
        res.end(Some(body.clone())).await.unwrap();
        assert_eq!(res.encoding(), EncodingChoice::Brotli);
        drop(res);

        assert_eq!(inner.headers.get(CONTENT_ENCODING).unwrap(), "br");
        let mut decoded = Vec::new();
        brotli::Decompressor::new(inner.body().as_slice(), 4096).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[tokio::test]
    async fn declared_length_counts_before_any_write() {
        let req = request(Method::GET, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default());

        // first chunk alone is under the threshold, the declared length is not
        res.set_header(CONTENT_LENGTH, HeaderValue::from(4096_u64)).unwrap();
        res.write(text(10)).await.unwrap();
        res.write(text(4086)).await.unwrap();
        res.end(None).await.unwrap();
        assert_eq!(res.encoding(), EncodingChoice::Gzip);
        drop(res);

        assert_eq!(gunzip(&inner.body()).len(), 4096);
    }

    #[tokio::test]
    async fn png_is_never_compressed() {
        let req = request(Method::GET, "gzip, br");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::dev(0));

        let body = Bytes::from(noise(10_000, 7));
        res.set_header(CONTENT_TYPE, HeaderValue::from_static("image/png")).unwrap();
        res.end(Some(body.clone())).await.unwrap();
        drop(res);

        assert!(inner.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(inner.body(), body);
    }

    #[tokio::test]
    async fn existing_content_encoding_is_not_reencoded() {
        let req = request(Method::GET, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default());

        let body = text(5000);
        res.set_header(CONTENT_ENCODING, HeaderValue::from_static("identity")).unwrap();
        res.end(Some(body.clone())).await.unwrap();
        drop(res);

        assert_eq!(inner.headers.get(CONTENT_ENCODING).unwrap(), "identity");
        assert_eq!(inner.body(), body);
    }

    #[tokio::test]
    async fn head_request_is_not_compressed() {
        let req = request(Method::HEAD, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default());

        res.set_header(CONTENT_LENGTH, HeaderValue::from(5000_u64)).unwrap();
        res.end(None).await.unwrap();
        drop(res);

        assert!(inner.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(inner.headers.get(CONTENT_LENGTH).unwrap(), "5000");
    }

    #[tokio::test]
    async fn staged_head_is_flushed_once_on_first_write() {
        let req = request(Method::GET, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        res.write_head(StatusCode::NOT_FOUND, headers).unwrap();
        assert!(!res.headers_sent());
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.inner.head_writes, 0);

        res.write(Bytes::from_static(b"missing")).await.unwrap();
        assert!(res.headers_sent());
        assert!(matches!(res.set_header(CONTENT_TYPE, HeaderValue::from_static("text/html")), Err(SendError::HeadersSent)));
        res.end(None).await.unwrap();
        drop(res);

        assert_eq!(inner.head_writes, 1);
        assert_eq!(inner.status, StatusCode::NOT_FOUND);
        assert_eq!(inner.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn bad_level_falls_back_to_passthrough() {
        let req = request(Method::GET, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default().with_level(42));

        let body = text(4000);
        res.end(Some(body.clone())).await.unwrap();
        assert_eq!(res.encoding(), EncodingChoice::None);
        drop(res);

        assert!(inner.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(inner.body(), body);
    }

    #[test]
    fn not_ready_while_downstream_is_full() {
        let noop = futures::task::noop_waker();
        let mut cx = Context::from_waker(&noop);
        let req = request(Method::GET, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default().with_level(1));

        let first = noise(64 * 1024, 11);
        let second = noise(32 * 1024, 12);

        // before the decision the interceptor is always ready
        assert!(Pin::new(&mut res).poll_ready(&mut cx).is_ready());
        res.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain")).unwrap();
        Pin::new(&mut res).start_send(Bytes::from(first.clone())).unwrap();
        assert_eq!(res.encoding(), EncodingChoice::Gzip);

        let (flag, drain) = WakeFlag::new();
        res.inner.full = true;
        assert!(Pin::new(&mut res).poll_ready(&mut cx).is_pending());
        res.on(ResponseEvent::Drain, &drain);
        let forwarded = res.inner.chunks.len();
        assert!(Pin::new(&mut res).poll_ready(&mut cx).is_pending());
        assert_eq!(res.inner.chunks.len(), forwarded);
        assert!(!flag.is_set());

        res.inner.drain();
        assert!(flag.is_set());
        assert!(matches!(Pin::new(&mut res).poll_ready(&mut cx), Poll::Ready(Ok(()))));
        assert!(res.inner.chunks.len() > forwarded);

        Pin::new(&mut res).start_send(Bytes::from(second.clone())).unwrap();
        assert!(matches!(Pin::new(&mut res).poll_close(&mut cx), Poll::Ready(Ok(()))));
        drop(res);

        assert_eq!(gunzip(&inner.body()), [first, second].concat());
    }

    #[tokio::test]
    async fn downstream_failure_while_compressing_is_returned() {
        let req = request(Method::GET, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default().with_level(1));

        res.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain")).unwrap();
        res.write(Bytes::from(noise(64 * 1024, 21))).await.unwrap();
        assert_eq!(res.encoding(), EncodingChoice::Gzip);
        assert!(res.headers_sent());

        res.inner.failing = true;
        let err = res.write(Bytes::from(noise(64 * 1024, 22))).await.unwrap_err();
        assert!(matches!(err, SendError::Io { .. }));
        assert!(matches!(res.end(None).await, Err(SendError::Io { .. })));
        drop(res);

        assert_eq!(inner.head_writes, 1);
        assert!(!inner.closed);
    }

    struct StreamNoise;

    #[async_trait]
    impl Handler for StreamNoise {
        async fn call(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<(), BoxError> {
            let mut res = ResponseInterceptor::new(res, req, Arc::new(CompressionConfig::default().with_level(1)));
            res.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))?;
            for seed in 0..64 {
                res.write(Bytes::from(noise(16 * 1024, seed))).await?;
            }
            res.end(None).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn peer_gone_mid_body_aborts_the_connection() {
        let (client, server) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"GET /noise.txt HTTP/1.1\r\nHost: 127.0.0.1\r\nAccept-Encoding: gzip\r\n\r\n").await.unwrap();
        let connection = tokio::spawn(HttpConnection::new(reader, writer).process(Arc::new(StreamNoise)));

        let mut head = [0_u8; 17];
        client_read.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"HTTP/1.1 200 OK\r\n");
        drop(client_read);
        drop(client_write);

        let result = connection.await.unwrap();
        assert!(matches!(result, Err(HttpError::ResponseError { source: SendError::Aborted { .. } })));
    }

    #[test]
    fn encoder_failure_after_head_is_an_encode_error() {
        let req = request(Method::GET, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default().with_level(1));

        Pin::new(&mut res).start_send(Bytes::from(noise(4096, 23))).unwrap();
        assert!(res.headers_sent());
        let Route::Compressing(stream) = &mut res.route else {
            panic!("response is not compressed");
        };
        stream.break_encoder();

        let err = Pin::new(&mut res).start_send(Bytes::from(noise(64 * 1024, 24))).unwrap_err();
        assert!(matches!(err, SendError::Encode { .. }));
    }

    #[test]
    fn drain_registered_while_deciding_is_replayed() {
        let req = request(Method::GET, "gzip");
        let mut inner = MockWriter::new();
        let mut res = interceptor(&mut inner, &req, CompressionConfig::default());

        let (flag, drain) = WakeFlag::new();
        res.on(ResponseEvent::Drain, &drain);
        assert!(!flag.is_set());

        Pin::new(&mut res).start_send(Bytes::from_static(b"tiny")).unwrap();
        assert_eq!(res.encoding(), EncodingChoice::None);
        assert!(flag.is_set());
    }
}
