//! The trs development server
//!
//! Serves a project directory over HTTP for local development. Every response
//! goes through a compressing [`ResponseInterceptor`] that decides per response,
//! once the head is known, whether to encode the body with brotli or gzip, and
//! streams the encoded bytes out while honoring the socket's backpressure.
//!
//! Around that sit the pieces a dev server needs:
//!
//! - [`net`]: port selection ([`get_port`], [`get_free_port`]) and the
//!   [`ConnectionDrainer`] that cuts open connections on shutdown
//! - [`middleware`]: static files with a single-page-app fallback, `index.html`
//!   bootstrap injection and sourcemap redirects
//! - [`config`]: [`DevOptions`], `.env` files, the config file and plugins
//! - [`server`]: [`DevServer`], wiring all of the above onto a listener
//!
//! HTTP/1.1 parsing and the streaming response writer live in `trs-http`.

pub mod compression;
pub mod config;
pub mod date;
pub mod html;
pub mod logging;
pub mod middleware;
pub mod net;
pub mod server;

mod error;

pub use compression::{CompressionConfig, EncodingChoice, ResponseInterceptor};
pub use config::{DevOptions, normalize_options};
pub use error::DevError;
pub use net::{ConnectionDrainer, PortProbeResult, get_free_port, get_port};
pub use server::{DevServer, DevServerHandle};
