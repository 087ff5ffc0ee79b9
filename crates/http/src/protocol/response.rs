//! Response head type and helpers for reading framing information from headers.

use http::{HeaderMap, Response, StatusCode, header};

/// Status line and headers of a response, with the body left out.
pub type ResponseHead = Response<()>;

/// Parses `Content-Length` from `headers`.
///
/// Returns `None` when the header is absent or not a valid unsigned integer.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(header::CONTENT_LENGTH)?.to_str().ok()?.trim().parse::<u64>().ok()
}

/// Statuses whose responses never carry a body (1xx, 204, 304).
pub fn is_bodiless_status(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}
