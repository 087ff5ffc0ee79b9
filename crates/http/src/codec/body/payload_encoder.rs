use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Frames response body chunks the way the head announced.
///
/// The response encoder drops this after [`PayloadItem::Eof`], so it keeps no
/// end-of-body state of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoder {
    /// Copies bytes through, refusing anything past the declared `Content-Length`.
    Length { remaining: u64 },
    /// `{len:X}\r\n{data}\r\n` per chunk, `0\r\n\r\n` at the end.
    Chunked,
    /// Bodiless response: chunks are dropped.
    Empty,
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(remaining) => PayloadEncoder::Length { remaining },
            PayloadSize::Chunked => PayloadEncoder::Chunked,
            PayloadSize::Empty => PayloadEncoder::Empty,
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (self, item) {
            (PayloadEncoder::Empty, _) => Ok(()),

            (_, PayloadItem::Chunk(data)) if !data.has_remaining() => Ok(()),

            (PayloadEncoder::Length { remaining }, PayloadItem::Chunk(data)) => {
                let len = data.remaining() as u64;
                if len > *remaining {
                    warn!(declared_left = *remaining, received = len, "response body exceeds content-length");
                    return Err(SendError::invalid_body("response body exceeds content-length"));
                }
                *remaining -= len;
                dst.put(data);
                Ok(())
            }
            (PayloadEncoder::Length { remaining }, PayloadItem::Eof) => {
                if *remaining != 0 {
                    warn!(missing = *remaining, "response body shorter than content-length");
                }
                Ok(())
            }

            (PayloadEncoder::Chunked, PayloadItem::Chunk(data)) => {
                let len = data.remaining();
                dst.reserve(len + 12);
                write!((&mut *dst).writer(), "{len:X}\r\n")?;
                dst.put(data);
                dst.put_slice(b"\r\n");
                Ok(())
            }
            (PayloadEncoder::Chunked, PayloadItem::Eof) => {
                dst.put_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}
