//! HTTP/1.1 plumbing for the trs development server
//!
//! This crate decodes requests, encodes responses and drives one connection at a
//! time. Unlike a request/response-value server, handlers here write their
//! response incrementally through the [`writer::ResponseWriter`] capability: they
//! may set headers, stage a status line, then push body chunks and finally end the
//! response. The writer exposes readiness the same way a [`futures::Sink`] does,
//! so a slow client pushes back all the way into the handler.
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use http::{header, HeaderMap, HeaderValue, StatusCode};
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn, Level};
//! use tracing_subscriber::FmtSubscriber;
//! use trs_http::connection::HttpConnection;
//! use trs_http::handler::Handler;
//! use trs_http::protocol::RequestHeader;
//! use trs_http::writer::{ResponseWriter, ResponseWriterExt};
//!
//! struct HelloWorld;
//!
//! #[async_trait]
//! impl Handler for HelloWorld {
//!     async fn call(&self, _req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<(), Box<dyn Error + Send + Sync>> {
//!         res.set_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))?;
//!         res.end(Some(Bytes::from_static(b"Hello World!\r\n"))).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     info!(port = 8080, "start listening");
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(HelloWorld);
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = handler.clone();
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             if let Err(e) = HttpConnection::new(reader, writer).process(handler).await {
//!                 error!(cause = %e, "connection aborted");
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: message, request, response and error types
//! - [`codec`]: `tokio_util` decoder for requests and encoder for responses
//! - [`writer`]: the [`writer::ResponseWriter`] capability and its socket-backed implementation
//! - [`handler`]: the [`handler::Handler`] trait
//! - [`connection`]: the per-connection request loop
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - No TLS
//! - Request bodies are read and discarded; chunked request bodies are rejected
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod writer;

mod utils;
pub(crate) use utils::ensure;
