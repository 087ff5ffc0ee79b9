//! The request pipeline of the dev server.
//!
//! Middleware run in order until one of them handles the request. All of them
//! write through the same [`ResponseWriter`], which is the compressing
//! interceptor when compression is on.

mod index;
mod sourcemap;
mod static_files;

pub use index::IndexBootstrap;
pub use sourcemap::SourcemapRedirect;
pub use static_files::StaticFiles;

use async_trait::async_trait;
use trs_http::handler::BoxError;
use trs_http::protocol::RequestHeader;
use trs_http::writer::ResponseWriter;

/// What a middleware did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The response was written; later middleware are skipped.
    Handled,
    /// Not for this middleware, try the next one.
    Next,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<Flow, BoxError>;
}
