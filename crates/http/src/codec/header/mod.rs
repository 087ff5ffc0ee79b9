//! Request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`] parses a request line and headers, enforcing size limits,
//!   and decides how the request payload is framed.
//! - [`HeaderEncoder`] writes a status line and headers, reconciling
//!   `Content-Length` / `Transfer-Encoding` with the chosen payload framing.

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
