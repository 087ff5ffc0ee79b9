//! The compress-or-not decision.

use http::{HeaderValue, Method};
use mime::Mime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::compression::CompressionConfig;

static BR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bbr\b").expect("valid regex"));
static GZIP_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bgzip\b").expect("valid regex"));

/// Content type assumed when a response does not declare one.
static DEFAULT_CONTENT_TYPE: Mime = mime::TEXT_PLAIN;

/// How a response body will be encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncodingChoice {
    #[default]
    None,
    Gzip,
    Brotli,
}

impl EncodingChoice {
    /// The `Content-Encoding` token, `None` for an identity body.
    pub fn token(self) -> Option<&'static str> {
        match self {
            EncodingChoice::None => None,
            EncodingChoice::Gzip => Some("gzip"),
            EncodingChoice::Brotli => Some("br"),
        }
    }

    pub fn header_value(self) -> Option<HeaderValue> {
        self.token().map(HeaderValue::from_static)
    }

    pub fn is_none(self) -> bool {
        self == EncodingChoice::None
    }
}

/// Everything the decision looks at.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub method: &'a Method,
    pub accept_encoding: Option<&'a HeaderValue>,
    pub content_type: Option<&'a HeaderValue>,
    pub content_encoding: Option<&'a HeaderValue>,
    /// Declared `Content-Length` when non-zero, otherwise the bytes written so far.
    pub size: u64,
}

/// Picks the body encoding. Rules are checked in order, the first that applies wins:
///
/// 1. `HEAD` requests are never compressed.
/// 2. A response that already has a `Content-Encoding` is left alone.
/// 3. The content type (default `text/plain`) must match `config.mimes`.
/// 4. The size must reach `config.threshold`.
/// 5. Brotli when enabled and `br` is accepted, else gzip when enabled and `gzip`
///    is accepted, else nothing.
pub fn decide(input: &DecisionInput<'_>, config: &CompressionConfig) -> EncodingChoice {
    if input.method == Method::HEAD {
        return EncodingChoice::None;
    }

    if input.content_encoding.is_some() {
        return EncodingChoice::None;
    }

    let content_type = input.content_type.and_then(|value| value.to_str().ok()).unwrap_or(DEFAULT_CONTENT_TYPE.as_ref());
    if !config.mimes.is_match(content_type) {
        return EncodingChoice::None;
    }

    if input.size < config.threshold {
        return EncodingChoice::None;
    }

    let accept_encoding = input.accept_encoding.and_then(|value| value.to_str().ok()).unwrap_or_default();
    if config.brotli && BR_TOKEN.is_match(accept_encoding) {
        EncodingChoice::Brotli
    } else if config.gzip && GZIP_TOKEN.is_match(accept_encoding) {
        EncodingChoice::Gzip
    } else {
        EncodingChoice::None
    }
}
