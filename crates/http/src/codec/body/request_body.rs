use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

/// Counts a `Content-Length` request body down to zero.
///
/// The connection never hands request bodies to handlers, so the chunks are only
/// read off the socket to reach the next request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBodyDecoder {
    remaining: u64,
}

impl RequestBodyDecoder {
    pub fn new(content_length: u64) -> Self {
        Self { remaining: content_length }
    }

    /// Body bytes not yet seen.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Decoder for RequestBodyDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let take = usize::try_from(self.remaining).map_or(src.len(), |remaining| remaining.min(src.len()));
        self.remaining -= take as u64;
        Ok(Some(PayloadItem::Chunk(src.split_to(take).freeze())))
    }
}
