use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use http::header::{CONTENT_LENGTH, EXPECT};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, SendError};
use crate::writer::{ConnectionWriter, ResponseWriter};

/// Read buffer capacity, also the largest accepted request head.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Write buffer level above which the writer reports not-ready and flushes first.
const WRITE_HIGH_WATER_MARK: usize = 16 * 1024;

/// How long a connection may sit idle waiting for its next request.
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// An HTTP/1.x connection.
///
/// Requests are served one after another. Request bodies are drained and dropped
/// before the handler runs, so the handler only sees the head.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        let mut framed_write = FramedWrite::new(writer, ResponseEncoder::new());
        framed_write.set_backpressure_boundary(WRITE_HIGH_WATER_MARK);
        Self { framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), READ_BUFFER_SIZE), framed_write }
    }

    /// Serves requests until the peer closes, asks to close, stays idle for
    /// longer than the keep-alive timeout, or an error occurs.
    ///
    /// Malformed requests are answered with `400` before the error is returned.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        loop {
            let Ok(next) = timeout(KEEP_ALIVE_TIMEOUT, self.framed_read.next()).await else {
                debug!(timeout = ?KEEP_ALIVE_TIMEOUT, "connection idle for too long, closing it");
                return Ok(());
            };

            match next {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    self.skip_body(&header, payload_size).await?;
                    let keep_alive = header.is_keep_alive();
                    self.do_process(header, &*handler).await?;
                    if !keep_alive {
                        debug!("client asked to close the connection");
                        return Ok(());
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("receive payload while expecting a request head");
                    self.send_status(StatusCode::BAD_REQUEST).await?;
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "can't receive next request");
                    self.send_status(StatusCode::BAD_REQUEST).await?;
                    return Err(e.into());
                }

                None => {
                    info!("cant read more request, break this connection down");
                    return Ok(());
                }
            }
        }
    }

    /// Reads and drops the request body, answering `Expect: 100-continue` first.
    async fn skip_body(&mut self, header: &RequestHeader, payload_size: PayloadSize) -> Result<(), HttpError> {
        if payload_size.is_empty() {
            return Ok(());
        }

        if header.headers().get(EXPECT).is_some_and(|value| value.as_bytes().starts_with(b"100-")) {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            info!("receive expect request header, sent continue response");
        }

        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Payload(PayloadItem::Eof))) => return Ok(()),
                Some(Ok(Message::Payload(PayloadItem::Chunk(_)))) => {}
                Some(Ok(Message::Header(_))) => return Err(ParseError::invalid_body("receive request head inside body").into()),
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ParseError::invalid_body("connection closed while reading request body").into()),
            }
        }
    }

    async fn do_process<H>(&mut self, header: RequestHeader, handler: &H) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        let discard_body = header.method() == Method::HEAD;
        let mut writer = ConnectionWriter::new(&mut self.framed_write, discard_body);

        match handler.call(&header, &mut writer).await {
            Ok(()) => {
                if !writer.is_finished() {
                    warn!(uri = %header.uri(), "handler returned without ending the response");
                    writer.close().await?;
                }
                Ok(())
            }
            Err(e) if !writer.headers_sent() => {
                error!(cause = %e, uri = %header.uri(), "handle request error");
                end_with_status(&mut writer, StatusCode::INTERNAL_SERVER_ERROR).await?;
                Ok(())
            }
            Err(e) => {
                error!(cause = %e, uri = %header.uri(), "response failed after its head was sent, aborting connection");
                Err(SendError::aborted(e).into())
            }
        }
    }

    async fn send_status(&mut self, status: StatusCode) -> Result<(), HttpError> {
        let mut writer = ConnectionWriter::new(&mut self.framed_write, false);
        end_with_status(&mut writer, status).await
    }
}

async fn end_with_status<W>(writer: &mut ConnectionWriter<'_, W>, status: StatusCode) -> Result<(), HttpError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    writer.write_head(status, headers)?;
    writer.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxError;
    use crate::writer::ResponseWriterExt;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::header;
    use indoc::indoc;
    use tokio::io::AsyncReadExt;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<(), BoxError> {
            match req.uri().path() {
                "/fail" => Err("boom".into()),
                "/fail-late" => {
                    res.write(Bytes::from_static(b"partial")).await?;
                    Err("boom".into())
                }
                path => {
                    let body = Bytes::from(path.to_string());
                    res.set_header(header::CONTENT_LENGTH, body.len().into())?;
                    res.end(Some(body)).await?;
                    Ok(())
                }
            }
        }
    }

    async fn serve(input: &str) -> (Result<(), HttpError>, String) {
        let mut output = Vec::new();
        let result = HttpConnection::new(input.as_bytes(), &mut output).process(Arc::new(Echo)).await;
        (result, String::from_utf8(output).unwrap())
    }

    #[tokio::test]
    async fn keep_alive_serves_pipelined_requests() {
        let input = indoc! {r##"
        GET /first HTTP/1.1
        Host: 127.0.0.1

        POST /second HTTP/1.1
        Host: 127.0.0.1
        Content-Length: 4

        dataGET /third HTTP/1.1
        Host: 127.0.0.1

        "##};

        let (result, output) = serve(input).await;
        assert!(result.is_ok());

        assert_eq!(output.matches("HTTP/1.1 200 OK\r\n").count(), 3);
        assert!(output.contains("\r\n\r\n/first"));
        assert!(output.contains("\r\n\r\n/second"));
        assert!(output.ends_with("\r\n\r\n/third"));
    }

    #[tokio::test]
    async fn head_request_has_no_body() {
        let (result, output) = serve("HEAD /resource HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n").await;
        assert!(result.is_ok());
        assert!(output.contains("content-length: 9\r\n"));
        assert!(output.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn handler_error_before_head_is_500() {
        let (result, output) = serve("GET /fail HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n").await;
        assert!(result.is_ok());
        assert!(output.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[tokio::test]
    async fn handler_error_after_head_aborts() {
        let (result, output) = serve("GET /fail-late HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n").await;
        assert!(matches!(result, Err(HttpError::ResponseError { source: SendError::Aborted { .. } })));
        assert!(!output.contains("500"));
        assert!(!output.ends_with("0\r\n\r\n"));
    }

    #[tokio::test]
    async fn malformed_request_is_400() {
        let (result, output) = serve("GET /x HTTP/1.1\r\nBad Header\r\n\r\n").await;
        assert!(result.is_err());
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn connection_close_stops_the_loop() {
        let input = "GET /a HTTP/1.1\r\nConnection: close\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (result, output) = serve(input).await;
        assert!(result.is_ok());
        assert_eq!(output.matches("HTTP/1.1 200 OK\r\n").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_closed_after_keep_alive_timeout() {
        let (client, server) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(server);
        let started = tokio::time::Instant::now();
        let connection = tokio::spawn(HttpConnection::new(reader, writer).process(Arc::new(Echo)));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(b"GET /first HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n").await.unwrap();

        let result = connection.await.unwrap();
        assert!(result.is_ok());
        assert!(started.elapsed() >= KEEP_ALIVE_TIMEOUT);

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(output.ends_with("\r\n\r\n/first"));
    }
}
