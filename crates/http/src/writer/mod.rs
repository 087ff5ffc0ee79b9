//! The streaming response writer capability.
//!
//! A handler receives a `&mut dyn ResponseWriter`. Before the first body byte it may
//! stage a status and headers; the head is flushed exactly once, either explicitly via
//! [`ResponseWriter::write_head`] or implicitly by the first body write or by ending the
//! response. Body bytes go through the [`Sink`] half of the trait, which is also how
//! backpressure surfaces: `poll_ready` returning `Pending` means the socket is full and
//! the caller's task will be woken once it drains.
//!
//! Writers compose. A wrapper such as a compressing interceptor implements the same
//! trait around an inner writer and forwards to it.

mod connection_writer;

pub use connection_writer::ConnectionWriter;

use std::task::Waker;

use bytes::Bytes;
use futures::sink::Feed;
use futures::{Sink, SinkExt};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::protocol::SendError;

/// Events a caller can subscribe to with [`ResponseWriter::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseEvent {
    /// The writer can accept more body bytes.
    Drain,
    /// The response has been fully written out.
    Finish,
}

/// A response that is written incrementally.
pub trait ResponseWriter: Sink<Bytes, Error = SendError> + Send + Unpin {
    /// Status that will be (or was) sent.
    fn status(&self) -> StatusCode;

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue>;

    /// Replaces every value of `name`. Fails with [`SendError::HeadersSent`] once the head is out.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), SendError>;

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), SendError>;

    /// Sets the status, merges `headers` over the staged ones and flushes the head.
    ///
    /// Headers named in `headers` replace staged values of the same name.
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), SendError>;

    fn headers_sent(&self) -> bool;

    /// Registers `waker` to be woken on `event`.
    ///
    /// For [`ResponseEvent::Drain`] the waker is woken at once if the writer is already ready.
    fn on(&mut self, event: ResponseEvent, waker: &Waker);
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn status(&self) -> StatusCode {
        (**self).status()
    }

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        (**self).header(name)
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), SendError> {
        (**self).set_header(name, value)
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), SendError> {
        (**self).remove_header(name)
    }

    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), SendError> {
        (**self).write_head(status, headers)
    }

    fn headers_sent(&self) -> bool {
        (**self).headers_sent()
    }

    fn on(&mut self, event: ResponseEvent, waker: &Waker) {
        (**self).on(event, waker);
    }
}

/// `write` / `end` conveniences over any [`ResponseWriter`].
pub trait ResponseWriterExt: ResponseWriter {
    /// Queues one body chunk, waiting for readiness first.
    fn write(&mut self, chunk: Bytes) -> Feed<'_, Self, Bytes> {
        self.feed(chunk)
    }

    /// Writes an optional last chunk, then ends and flushes the response.
    fn end(&mut self, chunk: Option<Bytes>) -> impl Future<Output = Result<(), SendError>> + Send + '_ {
        async move {
            if let Some(chunk) = chunk {
                self.feed(chunk).await?;
            }
            self.close().await
        }
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriterExt for W {}
