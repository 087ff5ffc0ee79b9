//! Log output of the `trs` binary.

use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` selects `DEBUG`, else `INFO`.
pub fn init(debug: bool) -> Result<(), SetGlobalDefaultError> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).with_target(debug).finish();
    tracing::subscriber::set_global_default(subscriber)
}
