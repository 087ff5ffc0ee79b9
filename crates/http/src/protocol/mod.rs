//! Protocol types shared by the codecs, the response writer and handlers.
//!
//! - [`Message`], [`PayloadItem`] and [`PayloadSize`] describe framed traffic
//!   between the codecs and the connection loop.
//! - [`RequestHeader`] wraps the decoded request line and headers.
//! - [`ResponseHead`] is the status line plus headers handed to the encoder.
//! - [`HttpError`], [`ParseError`] and [`SendError`] are the error types.

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;
pub use response::declared_length;
pub use response::is_bodiless_status;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
