//! Server lifecycle plumbing: picking a port and tearing connections down.

mod drain;
mod port;

pub use drain::ConnectionDrainer;
pub use port::{DEFAULT_PORT, MAX_PROBES, PortProbeResult, get_free_port, get_port, is_port_free, server_addresses};
