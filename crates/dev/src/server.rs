//! The dev server: listener, accept loop and the request pipeline.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, DATE};
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trs_http::connection::HttpConnection;
use trs_http::handler::{BoxError, Handler};
use trs_http::protocol::RequestHeader;
use trs_http::writer::{ResponseWriter, ResponseWriterExt};

use crate::compression::{CompressionConfig, ResponseInterceptor};
use crate::config::DevOptions;
use crate::date::DateService;
use crate::error::DevError;
use crate::middleware::{Flow, IndexBootstrap, Middleware, SourcemapRedirect, StaticFiles};
use crate::net::{ConnectionDrainer, get_port, server_addresses};

/// Paths never answered with the single-page-app fallback.
const SPA_IGNORE: &str = "@npm";

/// Runs every request through the middleware, behind the compressing interceptor
/// when compression is on.
struct DevApp {
    middleware: Vec<Box<dyn Middleware>>,
    compression: Option<Arc<CompressionConfig>>,
    date: DateService,
}

impl DevApp {
    async fn dispatch(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<(), BoxError> {
        for middleware in &self.middleware {
            if middleware.handle(req, res).await? == Flow::Handled {
                // no-op when the middleware already ended the response
                res.close().await?;
                return Ok(());
            }
        }

        debug!(method = %req.method(), uri = %req.uri(), "no middleware handled the request");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain;charset=utf-8"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("9"));
        res.write_head(StatusCode::NOT_FOUND, headers)?;
        res.end(Some(Bytes::from_static(b"Not Found"))).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for DevApp {
    async fn call(&self, req: &RequestHeader, res: &mut dyn ResponseWriter) -> Result<(), BoxError> {
        if let Some(date) = self.date.http_date() {
            res.set_header(DATE, date)?;
        }

        match &self.compression {
            Some(config) => {
                let mut res = ResponseInterceptor::new(res, req, Arc::clone(config));
                self.dispatch(req, &mut res).await
            }
            None => self.dispatch(req, res).await,
        }
    }
}

/// A dev server ready to listen.
///
/// ```no_run
/// # async fn run() -> Result<(), trs_dev::DevError> {
/// use trs_dev::{DevOptions, DevServer};
///
/// let handle = DevServer::new(DevOptions::for_dir(".")).listen().await?;
/// println!("listening on {}", handle.local_addr());
/// handle.close().await
/// # }
/// ```
pub struct DevServer {
    options: DevOptions,
    middleware: Vec<Box<dyn Middleware>>,
}

impl DevServer {
    pub fn new(options: DevOptions) -> Self {
        Self { options, middleware: Vec::new() }
    }

    /// Adds a middleware that runs before the built-in ones.
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    pub fn options(&self) -> &DevOptions {
        &self.options
    }

    fn pipeline(options: &DevOptions, mut middleware: Vec<Box<dyn Middleware>>) -> Vec<Box<dyn Middleware>> {
        middleware.push(Box::new(IndexBootstrap::new(&options.root)));
        middleware.push(Box::new(SourcemapRedirect));
        if let Some(overlay) = &options.overlay_dir {
            middleware.push(Box::new(StaticFiles::new(overlay)));
        }
        middleware.push(Box::new(StaticFiles::new(&options.root).single(true).ignore(SPA_IGNORE)));
        middleware
    }

    /// Binds the port and starts accepting connections in the background.
    ///
    /// The port comes from [`get_port`]: an explicitly requested port that is taken
    /// fails with [`DevError::PortInUse`].
    pub async fn listen(self) -> Result<DevServerHandle, DevError> {
        let DevServer { options, middleware } = self;

        if !tokio::fs::try_exists(options.root.join("index.html")).await.unwrap_or(false) {
            warn!(root = %options.root.display(), "no index.html found in the root directory");
        }

        let port = get_port(options.port).await?;
        let listener = TcpListener::bind((options.host.as_str(), port)).await.map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse { DevError::port_in_use(port) } else { DevError::from(e) }
        })?;
        let local_addr = listener.local_addr()?;

        let app = Arc::new(DevApp {
            compression: options.compression().map(Arc::new),
            middleware: Self::pipeline(&options, middleware),
            date: DateService::start(),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, app, shutdown_rx));
        info!(%local_addr, root = %options.root.display(), "dev server listening");

        Ok(DevServerHandle { host: options.host, local_addr, shutdown: Some(shutdown_tx), task })
    }
}

impl std::fmt::Debug for DevServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServer")
            .field("options", &self.options)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

async fn serve(listener: TcpListener, app: Arc<DevApp>, mut shutdown: oneshot::Receiver<()>) -> Result<(), DevError> {
    let mut drainer = ConnectionDrainer::new();
    drainer.mark_listening();

    loop {
        select! {
            _ = &mut shutdown => break,

            accepted = listener.accept() => {
                let (tcp_stream, remote_addr) = match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                };

                let app = Arc::clone(&app);
                drainer.track(async move {
                    let (reader, writer) = tcp_stream.into_split();
                    match HttpConnection::new(reader, writer).process(app).await {
                        Ok(()) => debug!(%remote_addr, "connection finished"),
                        Err(e) => warn!(%remote_addr, cause = %e, "connection aborted"),
                    }
                });
            }

            Some(()) = drainer.next_finished(), if !drainer.is_empty() => {}
        }
    }

    drainer
        .close(|| async move {
            drop(listener);
            info!("dev server closed");
            Ok::<(), DevError>(())
        })
        .await
}

/// A running dev server.
#[derive(Debug)]
pub struct DevServerHandle {
    host: String,
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), DevError>>,
}

impl DevServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Addresses to show to the user.
    pub fn addresses(&self) -> Vec<String> {
        server_addresses(&self.host, self.port())
    }

    /// Stops accepting, cuts every open connection and waits for both.
    pub async fn close(mut self) -> Result<(), DevError> {
        if let Some(shutdown) = self.shutdown.take()
            && shutdown.send(()).is_err()
        {
            debug!("server task already stopped");
        }

        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::other(e).into()),
        }
    }
}
