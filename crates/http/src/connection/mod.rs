//! Per-connection request loop.
//!
//! [`HttpConnection`] reads requests off one socket, hands each to a
//! [`Handler`](crate::handler::Handler) together with a fresh
//! [`ConnectionWriter`](crate::writer::ConnectionWriter), and keeps going while the
//! client keeps the connection alive.

mod http_connection;

pub use http_connection::HttpConnection;
