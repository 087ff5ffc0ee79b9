//! `tokio_util` codecs for HTTP/1.x.
//!
//! - [`RequestDecoder`] turns raw bytes into a request head followed by payload items.
//! - [`ResponseEncoder`] turns a response head followed by payload items into raw bytes,
//!   framing the payload with `Content-Length` or chunked transfer encoding.
//!
//! ```no_run
//! use trs_http::codec::{RequestDecoder, ResponseEncoder};
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
//! let request = decoder.decode(&mut buffer);
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
