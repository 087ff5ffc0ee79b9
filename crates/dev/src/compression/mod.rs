//! Streaming response compression.
//!
//! The pieces, leaves first:
//!
//! - [`policy`]: decides from request and response metadata whether a body gets
//!   gzip, brotli or nothing.
//! - `encoder`: the gzip / brotli encoders writing into an in-memory buffer.
//! - [`stream`]: [`CompressionStream`], which feeds a body through one encoder and
//!   forwards the output to the real writer, pausing when the writer is full.
//! - [`interceptor`]: [`ResponseInterceptor`], a [`ResponseWriter`](trs_http::writer::ResponseWriter)
//!   wrapper that holds back the head until the first body write, makes the
//!   decision then, and routes the rest of the body accordingly.

mod encoder;
pub mod interceptor;
pub mod policy;
pub mod stream;

pub use interceptor::ResponseInterceptor;
pub use policy::EncodingChoice;
pub use stream::CompressionStream;

use once_cell::sync::Lazy;
use regex::Regex;

/// Content types worth compressing unless configured otherwise.
static DEFAULT_MIMES: Lazy<Regex> = Lazy::new(|| Regex::new("(?i)text|javascript|/json|xml").expect("valid regex"));

/// Settings shared by every response the interceptor wraps.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Bodies smaller than this many bytes are sent as is.
    pub threshold: u64,
    /// Compression level, `-1` picks each encoder's default. Gzip takes `0..=9`,
    /// brotli `0..=11`.
    pub level: i32,
    pub brotli: bool,
    pub gzip: bool,
    /// Matched against the response `Content-Type`.
    pub mimes: Regex,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { threshold: 1024, level: -1, brotli: false, gzip: true, mimes: DEFAULT_MIMES.clone() }
    }
}

impl CompressionConfig {
    /// The settings the dev server runs with: brotli on, level 4.
    pub fn dev(threshold: u64) -> Self {
        Self { threshold, level: 4, brotli: true, ..Self::default() }
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_brotli(mut self, brotli: bool) -> Self {
        self.brotli = brotli;
        self
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn with_mimes(mut self, mimes: Regex) -> Self {
        self.mimes = mimes;
        self
    }
}
