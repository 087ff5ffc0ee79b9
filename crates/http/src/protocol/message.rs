use bytes::{Buf, Bytes};

/// A frame travelling through the codecs: a message head, then its payload in pieces.
///
/// `T` is `(RequestHeader, PayloadSize)` on the decoding side and
/// `(ResponseHead, PayloadSize)` on the encoding side.
#[derive(Debug)]
pub enum Message<T, Data: Buf = Bytes> {
    Header(T),
    Payload(PayloadItem<Data>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    Chunk(Data),
    /// End of the payload. Chunked framing writes its terminator here.
    Eof,
}

impl<D: Buf> PayloadItem<D> {
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    pub fn chunk(&self) -> Option<&D> {
        match self {
            PayloadItem::Chunk(data) => Some(data),
            PayloadItem::Eof => None,
        }
    }
}

/// Framing chosen for a payload when its head is written or read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// `Content-Length: n`
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// nothing follows the head
    Empty,
}

impl PayloadSize {
    pub fn is_empty(self) -> bool {
        self == PayloadSize::Empty
    }
}
