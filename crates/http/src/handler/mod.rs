//! Request handler trait.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::RequestHeader;
use crate::writer::ResponseWriter;

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Produces the response for one request by writing into `res`.
///
/// A handler that returns `Err` before the head was sent gets a `500` written on its
/// behalf. Once the head is out an error aborts the connection. A handler that returns
/// `Ok` without ending the response has it ended for it.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<(), BoxError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn call(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<(), BoxError> {
        (**self).call(req, res).await
    }
}
