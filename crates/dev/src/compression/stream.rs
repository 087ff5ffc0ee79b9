use std::collections::VecDeque;
use std::task::{Context, Poll, Waker, ready};

use bytes::Bytes;
use futures::SinkExt;
use tracing::{debug, trace};
use trs_http::protocol::SendError;
use trs_http::writer::{ResponseEvent, ResponseWriter};

use crate::compression::EncodingChoice;
use crate::compression::encoder::Encoder;

/// Feeds one response body through an encoder and forwards the compressed output
/// to the underlying writer.
///
/// The stream does not own the underlying writer; it is passed in on every call.
/// Compressed chunks the writer is not ready for stay queued and the stream
/// reports not-ready to its own caller, so no more input reaches the encoder until
/// the writer drains.
#[derive(Debug)]
pub struct CompressionStream {
    encoding: EncodingChoice,
    encoder: Option<Encoder>,
    queue: VecDeque<Bytes>,
    paused: bool,
    drain_wakers: Vec<Waker>,
}

impl CompressionStream {
    pub(crate) fn new(encoder: Encoder) -> Self {
        Self { encoding: encoder.choice(), encoder: Some(encoder), queue: VecDeque::new(), paused: false, drain_wakers: Vec::new() }
    }

    /// Whether forwarding is held back by the underlying writer.
    #[cfg(test)]
    fn is_paused(&self) -> bool {
        self.paused
    }

    /// Compressed bytes waiting for the underlying writer.
    #[cfg(test)]
    fn queued_bytes(&self) -> usize {
        self.queue.iter().map(Bytes::len).sum()
    }

    #[cfg(test)]
    pub(crate) fn break_encoder(&mut self) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.break_output();
        }
    }

    /// Pushes queued output downstream. Ready once the queue is empty.
    fn poll_forward<W>(&mut self, cx: &mut Context<'_>, inner: &mut W) -> Poll<Result<(), SendError>>
    where
        W: ResponseWriter + ?Sized,
    {
        while !self.queue.is_empty() {
            match inner.poll_ready_unpin(cx) {
                Poll::Ready(Ok(())) => {
                    if let Some(chunk) = self.queue.pop_front() {
                        inner.start_send_unpin(chunk)?;
                    }
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {
                    if !self.paused {
                        trace!(queued = self.queue.len(), "downstream is full, pausing compression");
                        self.paused = true;
                    }
                    return Poll::Pending;
                }
            }
        }

        if self.paused {
            trace!("downstream drained, resuming compression");
            self.paused = false;
            for waker in self.drain_wakers.drain(..) {
                waker.wake();
            }
        }
        Poll::Ready(Ok(()))
    }

    pub(crate) fn poll_ready<W>(&mut self, cx: &mut Context<'_>, inner: &mut W) -> Poll<Result<(), SendError>>
    where
        W: ResponseWriter + ?Sized,
    {
        self.poll_forward(cx, inner)
    }

    /// Compresses `chunk` and queues whatever output the encoder produced.
    pub(crate) fn start_send(&mut self, chunk: &[u8]) -> Result<(), SendError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(SendError::invalid_body("write after end"));
        };

        encoder.write(chunk).map_err(SendError::encode)?;
        let output = encoder.take();
        if !output.is_empty() {
            trace!(input = chunk.len(), output = output.len(), "compressed chunk");
            self.queue.push_back(output);
        }
        Ok(())
    }

    pub(crate) fn poll_flush<W>(&mut self, cx: &mut Context<'_>, inner: &mut W) -> Poll<Result<(), SendError>>
    where
        W: ResponseWriter + ?Sized,
    {
        ready!(self.poll_forward(cx, inner))?;
        inner.poll_flush_unpin(cx)
    }

    /// Finishes the encoder, forwards the trailer, then ends the underlying writer.
    pub(crate) fn poll_close<W>(&mut self, cx: &mut Context<'_>, inner: &mut W) -> Poll<Result<(), SendError>>
    where
        W: ResponseWriter + ?Sized,
    {
        ready!(self.poll_forward(cx, inner))?;

        if let Some(encoder) = self.encoder.take() {
            let trailer = encoder.finish().map_err(SendError::encode)?;
            debug!(encoding = ?self.encoding, trailer = trailer.len(), "compression finished");
            if !trailer.is_empty() {
                self.queue.push_back(trailer);
            }
            ready!(self.poll_forward(cx, inner))?;
        }

        inner.poll_close_unpin(cx)
    }

    /// Wakes `waker` once the stream can take input again.
    pub(crate) fn on_drain<W>(&mut self, waker: &Waker, inner: &mut W)
    where
        W: ResponseWriter + ?Sized,
    {
        if self.paused {
            self.drain_wakers.push(waker.clone());
            inner.on(ResponseEvent::Drain, waker);
        } else {
            waker.wake_by_ref();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::test_util::{MockWriter, WakeFlag, noise};
    use std::io::Read;

    fn gzip_stream() -> CompressionStream {
        CompressionStream::new(Encoder::new(EncodingChoice::Gzip, 1, 0).unwrap())
    }

    #[test]
    fn backpressure_pauses_and_resumes_without_loss() {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut inner = MockWriter::new();
        let mut stream = gzip_stream();

        let first = noise(64 * 1024, 1);
        let second = noise(64 * 1024, 2);

        assert!(stream.poll_ready(&mut cx, &mut inner).is_ready());
        stream.start_send(&first).unwrap();
        assert!(stream.queued_bytes() > 0);

        inner.full = true;
        assert!(stream.poll_ready(&mut cx, &mut inner).is_pending());
        assert!(stream.is_paused());
        assert!(inner.chunks.is_empty());
        let queued = stream.queued_bytes();

        // still paused, nothing forwarded or dropped
        assert!(stream.poll_ready(&mut cx, &mut inner).is_pending());
        assert_eq!(stream.queued_bytes(), queued);
        assert!(inner.chunks.is_empty());

        inner.drain();
        assert!(matches!(stream.poll_ready(&mut cx, &mut inner), Poll::Ready(Ok(()))));
        assert!(!stream.is_paused());
        assert_eq!(inner.body().len(), queued);

        stream.start_send(&second).unwrap();
        assert!(matches!(stream.poll_close(&mut cx, &mut inner), Poll::Ready(Ok(()))));
        assert!(inner.closed);

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(inner.body().as_slice()).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, [first, second].concat());
    }

    #[test]
    fn drain_listener_is_woken_on_resume() {
        let noop = futures::task::noop_waker();
        let mut cx = Context::from_waker(&noop);
        let mut inner = MockWriter::new();
        let mut stream = gzip_stream();

        stream.start_send(&noise(64 * 1024, 3)).unwrap();
        inner.full = true;
        assert!(stream.poll_ready(&mut cx, &mut inner).is_pending());

        let (flag, waker) = WakeFlag::new();
        stream.on_drain(&waker, &mut inner);
        assert!(!flag.is_set());

        inner.drain();
        flag.reset();
        assert!(stream.poll_ready(&mut cx, &mut inner).is_ready());
        assert!(flag.is_set());
    }

    #[test]
    fn drain_listener_is_woken_at_once_when_not_paused() {
        let mut inner = MockWriter::new();
        let mut stream = gzip_stream();

        let (flag, waker) = WakeFlag::new();
        stream.on_drain(&waker, &mut inner);
        assert!(flag.is_set());
    }

    #[test]
    fn write_after_close_is_rejected() {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut inner = MockWriter::new();
        let mut stream = gzip_stream();

        assert!(stream.poll_close(&mut cx, &mut inner).is_ready());
        assert!(matches!(stream.start_send(b"late"), Err(SendError::InvalidBody { .. })));
    }
}
