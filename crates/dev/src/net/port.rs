//! Free-port probing.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::DevError;

/// Port tried first when none is requested.
pub const DEFAULT_PORT: u16 = 8080;

/// Upper bound on probes made by [`get_free_port`].
pub const MAX_PROBES: u32 = 20;

const PORT_ENV: &str = "PORT";

const UNSPECIFIED_HOST: &str = "0.0.0.0";

/// Outcome of [`get_free_port`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortProbeResult {
    pub port: u16,
    pub attempts_used: u32,
}

/// Binds `port` on all interfaces and releases it at once.
///
/// Returns `false` when the port is taken. Any other bind failure, such as a
/// privileged port, is an error.
pub async fn is_port_free(port: u16) -> Result<bool, DevError> {
    match TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await {
        Ok(listener) => {
            drop(listener);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(false),
        Err(e) => Err(DevError::probe(port, e)),
    }
}

/// Probes `start`, `start + 1`, ... for a free port, at most [`MAX_PROBES`] times.
///
/// When every probed port is busy the port after the last one probed is
/// returned unchecked, so `8080` with `8080..=8099` taken yields `8100`; the
/// caller finds out when it binds.
pub async fn get_free_port(start: u16) -> Result<PortProbeResult, DevError> {
    let mut port = start;
    for attempt in 1..=MAX_PROBES {
        if is_port_free(port).await? {
            debug!(port, attempt, "found free port");
            return Ok(PortProbeResult { port, attempts_used: attempt });
        }
        port = port.saturating_add(1);
    }

    warn!(start, port, "no free port found, using the next one unchecked");
    Ok(PortProbeResult { port, attempts_used: MAX_PROBES })
}

/// Resolves the port to listen on.
///
/// An explicit `requested` port, or else the `PORT` environment variable, must be
/// free; `0` is passed through and lets the OS pick. Without either, the first
/// free port from [`DEFAULT_PORT`] on is used.
pub async fn get_port(requested: Option<u16>) -> Result<u16, DevError> {
    let from_env = std::env::var(PORT_ENV).ok();
    resolve_port(requested, from_env.as_deref()).await
}

pub(crate) async fn resolve_port(requested: Option<u16>, from_env: Option<&str>) -> Result<u16, DevError> {
    let explicit = match (requested, from_env) {
        (Some(port), _) => Some(port),
        (None, Some(value)) => {
            let port = value.trim().parse().map_err(|e| DevError::config_load(PORT_ENV, format!("invalid port {value:?}: {e}")))?;
            Some(port)
        }
        (None, None) => None,
    };

    match explicit {
        Some(port) => {
            if is_port_free(port).await? {
                Ok(port)
            } else {
                Err(DevError::port_in_use(port))
            }
        }
        None => {
            let result = get_free_port(DEFAULT_PORT).await?;
            if result.port != DEFAULT_PORT {
                info!(port = result.port, attempts = result.attempts_used, "default port busy, moved on");
            }
            Ok(result.port)
        }
    }
}

/// Addresses to print for a server listening on `host:port`.
///
/// An explicit host is shown as given. `0.0.0.0` is not reachable as such: it is
/// shown as `localhost`, followed by every external IPv4 interface address.
pub fn server_addresses(host: &str, port: u16) -> Vec<String> {
    if host != UNSPECIFIED_HOST {
        return vec![format!("http://{host}:{port}")];
    }

    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!(cause = %e, "can't list network interfaces");
            Vec::new()
        }
    };
    let external = interfaces.iter().filter(|iface| !iface.is_loopback()).filter_map(|iface| match iface.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    });
    exposed_addresses(port, external)
}

fn exposed_addresses(port: u16, interfaces: impl IntoIterator<Item = Ipv4Addr>) -> Vec<String> {
    let mut addresses = vec![format!("http://localhost:{port}")];
    addresses.extend(
        interfaces.into_iter().filter(|ip| !ip.is_unspecified() && !ip.is_loopback()).map(|ip| format!("http://{ip}:{port}")),
    );
    addresses
}
