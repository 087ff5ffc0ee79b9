use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use trs_dev::config::{Compress, JsonConfigLoader, debug_from_env};
use trs_dev::{DevError, DevOptions, DevServer, logging, normalize_options};

/// Serve a project directory for local development.
#[derive(Debug, Parser)]
#[command(name = "trs", version, about, long_about = None)]
struct Cli {
    /// Project directory.
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Host to listen on; `0.0.0.0` exposes the server to the network.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on. Fails if the port is taken.
    #[arg(short, long)]
    port: Option<u16>,

    /// Public directory, relative to the project directory.
    #[arg(long)]
    public: Option<String>,

    /// Directory of generated files served before the public directory.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Turn response compression off.
    #[arg(long)]
    no_compress: bool,

    /// Smallest body, in bytes, worth compressing.
    #[arg(long, conflicts_with = "no_compress")]
    threshold: Option<u64>,

    /// Verbose logging.
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn into_options(self) -> Result<DevOptions, DevError> {
        let cwd = std::path::absolute(&self.dir)?;
        let mut options = DevOptions::for_dir(cwd);

        if let Some(host) = self.host {
            options.host = host;
        }
        options.port = self.port;
        if let Some(public) = self.public {
            options.public = public;
        }
        if let Some(out) = self.out {
            options.overlay_dir = Some(options.cwd.join(out));
        }
        if self.no_compress {
            options.compress = Compress::Enabled(false);
        } else if let Some(threshold) = self.threshold {
            options.compress = Compress::Threshold(threshold);
        }
        options.debug = self.debug;
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(cause = %e, "dev server failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), DevError> {
    if let Err(e) = logging::init(cli.debug || debug_from_env(std::env::var("DEBUG").ok().as_deref())) {
        eprintln!("can't install the log subscriber: {e}");
    }

    let options = cli.into_options()?;
    let options = normalize_options(options, &JsonConfigLoader, |key| std::env::var(key).ok()).await?;

    let server = DevServer::new(options).listen().await?;
    print!("{}", boot_message("dev server running at:", &server.addresses()));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.close().await
}

/// The first address is the local one, the rest are network addresses.
fn boot_message(message: &str, addresses: &[String]) -> String {
    let mut out = format!("\n  {message}\n\n");
    if let Some((local, network)) = addresses.split_first() {
        out.push_str(&format!("  > Local:   {local}\n"));
        if network.is_empty() {
            out.push_str("  > Network: (disabled, see --host)\n");
        }
        for address in network {
            out.push_str(&format!("  > Network: {address}\n"));
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_message_lists_network_addresses() {
        let addresses = ["http://localhost:8080".to_string(), "http://192.168.1.20:8080".to_string()];
        let message = boot_message("dev server running at:", &addresses);
        assert_eq!(
            message,
            "\n  dev server running at:\n\n  > Local:   http://localhost:8080\n  > Network: http://192.168.1.20:8080\n\n"
        );
    }

    #[test]
    fn boot_message_without_network() {
        let message = boot_message("dev server running at:", &["http://127.0.0.1:8080".to_string()]);
        assert!(message.contains("  > Local:   http://127.0.0.1:8080\n  > Network: (disabled, see --host)\n"));
    }
}
