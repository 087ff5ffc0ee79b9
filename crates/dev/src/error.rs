use std::io;
use std::path::PathBuf;

use thiserror::Error;
use trs_http::protocol::HttpError;

#[derive(Debug, Error)]
pub enum DevError {
    #[error("Another process is already running on port {port}. Please choose a different port.")]
    PortInUse { port: u16 },

    #[error("can't probe port {port}: {source}")]
    Probe { port: u16, source: io::Error },

    #[error("can't load config {}: {reason}", path.display())]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("http error: {source}")]
    Http {
        #[from]
        source: HttpError,
    },
}

impl DevError {
    pub fn port_in_use(port: u16) -> Self {
        Self::PortInUse { port }
    }

    pub fn probe(port: u16, source: io::Error) -> Self {
        Self::Probe { port, source }
    }

    pub fn config_load<P: Into<PathBuf>, S: ToString>(path: P, reason: S) -> Self {
        Self::ConfigLoad { path: path.into(), reason: reason.to_string() }
    }
}
