//! [`ResponseWriter`] backed by the connection's framed socket.

use std::pin::Pin;
use std::task::{Context, Poll, Waker, ready};

use bytes::Bytes;
use futures::Sink;
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, Version};
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;
use tracing::trace;

use crate::codec::ResponseEncoder;
use crate::ensure;
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError, declared_length, is_bodiless_status};
use crate::writer::{ResponseEvent, ResponseWriter};

type Frame = Message<(ResponseHead, PayloadSize), Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// status and headers are staged, nothing written yet
    Head,
    /// head written, body open
    Body,
    /// eof written
    Finished,
}

/// Writes one response onto the connection.
///
/// The head is staged until the first body chunk, an explicit `write_head`, or the
/// end of the response. The payload is framed with `Content-Length` when a valid one
/// was staged at flush time, otherwise with chunked encoding. An empty response
/// ended without any write is sent with `Content-Length: 0`.
///
/// When `discard_body` is set (a HEAD request) the head is sent as staged and
/// body chunks are accepted but dropped.
pub struct ConnectionWriter<'conn, W> {
    framed: &'conn mut FramedWrite<W, ResponseEncoder>,
    status: StatusCode,
    headers: HeaderMap,
    phase: Phase,
    discard_body: bool,
    body_bytes: u64,
    finish_wakers: Vec<Waker>,
}

impl<'conn, W> ConnectionWriter<'conn, W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(framed: &'conn mut FramedWrite<W, ResponseEncoder>, discard_body: bool) -> Self {
        Self {
            framed,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            phase: Phase::Head,
            discard_body,
            body_bytes: 0,
            finish_wakers: Vec::new(),
        }
    }

    /// Whether the end of the response has been written.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Body bytes handed to the encoder so far.
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    fn framed(&mut self) -> Pin<&mut FramedWrite<W, ResponseEncoder>> {
        Pin::new(&mut *self.framed)
    }

    fn ensure_head_pending(&self) -> Result<(), SendError> {
        ensure!(self.phase == Phase::Head, SendError::HeadersSent);
        Ok(())
    }

    /// Hands the staged head to the encoder. `ending` is set when no body chunk will follow.
    fn send_head(&mut self, ending: bool) -> Result<(), SendError> {
        let payload_size = if self.discard_body || is_bodiless_status(self.status) {
            PayloadSize::Empty
        } else {
            match declared_length(&self.headers) {
                Some(length) => PayloadSize::Length(length),
                None if ending => PayloadSize::Empty,
                None => PayloadSize::Chunked,
            }
        };

        let mut head = Response::new(());
        *head.status_mut() = self.status;
        *head.version_mut() = Version::HTTP_11;
        *head.headers_mut() = self.headers.clone();

        trace!(status = %self.status, ?payload_size, "sending response head");
        self.framed().start_send(Frame::Header((head, payload_size)))?;
        self.phase = Phase::Body;
        Ok(())
    }
}

impl<W> Sink<Bytes> for ConnectionWriter<'_, W>
where
    W: AsyncWrite + Unpin,
{
    type Error = SendError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        <FramedWrite<W, ResponseEncoder> as Sink<Frame>>::poll_ready(self.get_mut().framed(), cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        let this = self.get_mut();
        match this.phase {
            Phase::Finished => return Err(SendError::invalid_body("write after end")),
            Phase::Head => this.send_head(false)?,
            Phase::Body => {}
        }

        if this.discard_body || item.is_empty() {
            return Ok(());
        }

        this.body_bytes += item.len() as u64;
        this.framed().start_send(Frame::Payload(PayloadItem::Chunk(item)))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        <FramedWrite<W, ResponseEncoder> as Sink<Frame>>::poll_flush(self.get_mut().framed(), cx)
    }

    /// Writes the end of the response and flushes it. The socket itself stays open
    /// for the next request on the connection.
    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();

        if this.phase != Phase::Finished {
            ready!(<FramedWrite<W, ResponseEncoder> as Sink<Frame>>::poll_ready(this.framed(), cx))?;
            if this.phase == Phase::Head {
                this.send_head(true)?;
            }
            this.framed().start_send(Frame::Payload(PayloadItem::Eof))?;
            this.phase = Phase::Finished;
        }

        ready!(<FramedWrite<W, ResponseEncoder> as Sink<Frame>>::poll_flush(this.framed(), cx))?;
        for waker in this.finish_wakers.drain(..) {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl<W> ResponseWriter for ConnectionWriter<'_, W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn status(&self) -> StatusCode {
        self.status
    }

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), SendError> {
        self.ensure_head_pending()?;
        self.headers.insert(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), SendError> {
        self.ensure_head_pending()?;
        self.headers.remove(name);
        Ok(())
    }

    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), SendError> {
        self.ensure_head_pending()?;
        self.status = status;
        self.headers.extend(headers);
        self.send_head(false)
    }

    fn headers_sent(&self) -> bool {
        self.phase != Phase::Head
    }

    fn on(&mut self, event: ResponseEvent, waker: &Waker) {
        match event {
            ResponseEvent::Drain => {
                let mut cx = Context::from_waker(waker);
                if <FramedWrite<W, ResponseEncoder> as Sink<Frame>>::poll_ready(self.framed(), &mut cx).is_ready() {
                    waker.wake_by_ref();
                }
            }
            ResponseEvent::Finish => {
                if self.is_finished() {
                    waker.wake_by_ref();
                } else {
                    self.finish_wakers.push(waker.clone());
                }
            }
        }
    }
}

impl<W> std::fmt::Debug for ConnectionWriter<'_, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWriter")
            .field("status", &self.status)
            .field("phase", &self.phase)
            .field("discard_body", &self.discard_body)
            .field("body_bytes", &self.body_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ResponseWriterExt;
    use futures::SinkExt;
    use http::header;

    fn output(framed: FramedWrite<Vec<u8>, ResponseEncoder>) -> String {
        String::from_utf8(framed.into_inner()).unwrap()
    }

    #[tokio::test]
    async fn declared_length_frames_body() {
        let mut framed = FramedWrite::new(Vec::new(), ResponseEncoder::new());
        let mut res = ConnectionWriter::new(&mut framed, false);

        res.set_header(header::CONTENT_LENGTH, HeaderValue::from_static("5")).unwrap();
        res.end(Some(Bytes::from_static(b"hello"))).await.unwrap();
        assert!(res.is_finished());
        assert_eq!(res.body_bytes(), 5);
        drop(res);

        let out = output(framed);
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("content-length: 5\r\n"));
        assert!(out.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn unknown_length_is_chunked() {
        let mut framed = FramedWrite::new(Vec::new(), ResponseEncoder::new());
        let mut res = ConnectionWriter::new(&mut framed, false);

        res.write(Bytes::from_static(b"abc")).await.unwrap();
        res.end(Some(Bytes::from_static(b"defg"))).await.unwrap();
        drop(res);

        let out = output(framed);
        assert!(out.contains("transfer-encoding: chunked\r\n"));
        assert!(out.ends_with("\r\n\r\n3\r\nabc\r\n4\r\ndefg\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn empty_end_sends_zero_length() {
        let mut framed = FramedWrite::new(Vec::new(), ResponseEncoder::new());
        let mut res = ConnectionWriter::new(&mut framed, false);

        res.end(None).await.unwrap();
        drop(res);

        let out = output(framed);
        assert!(out.contains("content-length: 0\r\n"));
        assert!(!out.contains("transfer-encoding"));
    }

    #[tokio::test]
    async fn head_request_drops_body_but_keeps_length() {
        let mut framed = FramedWrite::new(Vec::new(), ResponseEncoder::new());
        let mut res = ConnectionWriter::new(&mut framed, true);

        res.set_header(header::CONTENT_LENGTH, HeaderValue::from_static("5")).unwrap();
        res.end(Some(Bytes::from_static(b"hello"))).await.unwrap();
        drop(res);

        let out = output(framed);
        assert!(out.contains("content-length: 5\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn headers_are_frozen_after_flush() {
        let mut framed = FramedWrite::new(Vec::new(), ResponseEncoder::new());
        let mut res = ConnectionWriter::new(&mut framed, false);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        res.write_head(StatusCode::CREATED, headers).unwrap();

        assert!(res.headers_sent());
        assert!(matches!(res.set_header(header::ETAG, HeaderValue::from_static("W/\"1\"")), Err(SendError::HeadersSent)));
        assert!(matches!(res.write_head(StatusCode::OK, HeaderMap::new()), Err(SendError::HeadersSent)));
        res.close().await.unwrap();
        drop(res);

        let out = output(framed);
        assert!(out.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(out.contains("content-type: text/plain\r\n"));
    }

    #[tokio::test]
    async fn write_after_end_fails() {
        let mut framed = FramedWrite::new(Vec::new(), ResponseEncoder::new());
        let mut res = ConnectionWriter::new(&mut framed, false);

        res.end(None).await.unwrap();
        assert!(res.write(Bytes::from_static(b"late")).await.is_err());
    }
}
