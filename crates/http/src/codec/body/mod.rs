//! Payload framing codecs.
//!
//! Request bodies only ever carry a `Content-Length` and are decoded just to be
//! skipped ([`RequestBodyDecoder`]). Response bodies are framed by
//! `Content-Length`, chunked transfer encoding, or not at all ([`PayloadEncoder`]).

mod payload_encoder;
mod request_body;

pub use payload_encoder::PayloadEncoder;
pub use request_body::RequestBodyDecoder;
