//! Streaming decoder for HTTP requests.
//!
//! A request is yielded as one [`Message::Header`] followed, when the request
//! declares a `Content-Length`, by [`Message::Payload`] chunks and a final
//! [`PayloadItem::Eof`]. Bodiless requests yield the head only.

use crate::codec::body::RequestBodyDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

/// Decodes a request head, then its payload if any.
///
/// `payload_decoder` is `None` while waiting for the next head.
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<RequestBodyDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let Some((header, payload_size)) = self.header_decoder.decode(src)? else {
            return Ok(None);
        };

        match payload_size {
            PayloadSize::Length(length) => self.payload_decoder = Some(RequestBodyDecoder::new(length)),
            PayloadSize::Empty => {}
            PayloadSize::Chunked => {
                trace!(uri = %header.uri(), "rejecting chunked request body");
                return Err(ParseError::unsupported_body("chunked request bodies are not accepted"));
            }
        }

        Ok(Some(Message::Header((header, payload_size))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use indoc::indoc;

    #[test]
    fn head_then_body() {
        let str = indoc! {r##"
        POST /submit HTTP/1.1
        Host: 127.0.0.1:8080
        Content-Length: 5

        hello"##};

        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new();

        let Some(Message::Header((header, payload_size))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expect request head");
        };
        assert_eq!(header.method(), &Method::POST);
        assert_eq!(payload_size, PayloadSize::Length(5));

        let Some(Message::Payload(item)) = decoder.decode(&mut buf).unwrap() else {
            panic!("expect payload chunk");
        };
        assert_eq!(item.chunk().map(|bytes| &bytes[..]), Some(&b"hello"[..]));

        let Some(Message::Payload(item)) = decoder.decode(&mut buf).unwrap() else {
            panic!("expect payload eof");
        };
        assert!(item.is_eof());
    }

    #[test]
    fn bodiless_request_yields_head_only() {
        let str = indoc! {r##"
        GET /a HTTP/1.1
        Host: 127.0.0.1:8080

        GET /b HTTP/1.1
        Host: 127.0.0.1:8080

        "##};

        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new();

        let Some(Message::Header((first, _))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expect first head");
        };
        assert_eq!(first.uri().path(), "/a");

        let Some(Message::Header((second, _))) = decoder.decode(&mut buf).unwrap() else {
            panic!("expect second head");
        };
        assert_eq!(second.uri().path(), "/b");
    }

    #[test]
    fn chunked_request_body_is_rejected() {
        let str = indoc! {r##"
        POST /upload HTTP/1.1
        Host: 127.0.0.1:8080
        Transfer-Encoding: chunked

        "##};

        let mut buf = BytesMut::from(str);
        let result = RequestDecoder::new().decode(&mut buf);
        assert!(matches!(result, Err(ParseError::UnsupportedBody { .. })));
    }
}
