//! Secrets-store CSI driver provider.

use std::path::PathBuf;

use clap::Parser;
use kubebao::config::load_dotenv;
use kubebao::csi::{CsiConfig, CsiProvider};
use kubebao::observability::{init_logging, LogFormat};
use kubebao::transport::{install_crypto_provider, shutdown_signal};
use kubebao::VERSION;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kubebao-csi")]
#[command(about = "KubeBao provider for the Secrets Store CSI driver")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to a YAML configuration file; environment variables are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the socket path from the configuration
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_crypto_provider();
    load_dotenv();

    let args = Args::parse();
    init_logging(&args.log_level, args.log_format)?;
    info!(version = VERSION, "Starting kubebao-csi");

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from file");
            CsiConfig::load(path)?
        }
        None => {
            info!("Loading configuration from environment variables");
            CsiConfig::from_env()
        }
    };
    if let Some(socket_path) = args.socket_path {
        config.socket_path = socket_path;
    }
    config.validate()?;

    CsiProvider::new(config).run(shutdown_signal()).await?;

    info!("kubebao-csi stopped");
    Ok(())
}
