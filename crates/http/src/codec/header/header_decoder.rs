//! Request head decoder built on `httparse`.
//!
//! The decoder parses in place, records where every header name and value sits
//! in the buffer, then splits the head off the buffer and builds the
//! `http::Request` from shared slices of it, so header values are not copied.
//!
//! Limits: 64 headers, 8KB for the whole head, HTTP/1.0 and HTTP/1.1 only.

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;

use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Shortest head worth handing to the parser: `GET / HTTP/1.1\n\n`
const MIN_HEAD_BYTES: usize = 16;

/// Decodes a request head and reports how its payload is framed.
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_HEAD_BYTES {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let status = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            _ => return Err(ParseError::InvalidVersion(req.version)),
        };
        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let path = req.path.ok_or(ParseError::InvalidUri)?;

        let header_count = req.headers.len();
        let mut header_index = [HeaderIndex::EMPTY; MAX_HEADER_NUM];
        HeaderIndex::record(src, req.headers, &mut header_index);

        let mut builder = Request::builder().method(method).uri(path).version(version);
        if let Some(headers) = builder.headers_mut() {
            headers.reserve(header_count);
        }

        let head_bytes = src.split_to(body_offset).freeze();
        for index in &header_index[..header_count] {
            let name = HeaderName::from_bytes(&head_bytes[index.name.0..index.name.1])
                .map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(head_bytes.slice(index.value.0..index.value.1))
                .map_err(ParseError::invalid_header)?;
            builder = builder.header(name, value);
        }

        let header = RequestHeader::from(builder.body(()).map_err(ParseError::invalid_header)?);
        let payload_size = parse_payload(&header)?;

        Ok(Some((header, payload_size)))
    }
}

/// Byte ranges of one header's name and value inside the parsed buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderIndex {
    const EMPTY: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, index) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            index.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            index.value = (value_start, value_start + header.value.len());
        }
    }
}

/// Chooses the request payload framing, see RFC 9112 section 6.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    if !header.need_body() {
        return Ok(PayloadSize::Empty);
    }

    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Ok(PayloadSize::Empty)
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            if length == 0 { Ok(PayloadSize::Empty) } else { Ok(PayloadSize::Length(length)) }
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers"))
        }
    }
}

/// Whether `chunked` is the final transfer coding.
fn is_chunked(header_value: &HeaderValue) -> bool {
    header_value
        .as_bytes()
        .rsplit(|b| *b == b',')
        .next()
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
