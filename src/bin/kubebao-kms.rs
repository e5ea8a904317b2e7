//! KMS v2 plugin for the Kubernetes API server.
//!
//! Serves envelope encryption on a Unix socket using an OpenBao transit key.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kubebao::backend::OpenBaoClient;
use kubebao::config::load_dotenv;
use kubebao::kms::{KmsConfig, KmsPlugin};
use kubebao::observability::{init_logging, LogFormat};
use kubebao::transport::{install_crypto_provider, shutdown_signal};
use kubebao::VERSION;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kubebao-kms")]
#[command(about = "KubeBao KMS v2 plugin backed by OpenBao transit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to a YAML configuration file; environment variables are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

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
    info!(version = VERSION, "Starting kubebao-kms");

    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from file");
            KmsConfig::load(path)?
        }
        None => {
            info!("Loading configuration from environment variables");
            let config = KmsConfig::from_env();
            config.validate()?;
            config
        }
    };

    let backend = OpenBaoClient::connect(config.openbao.clone())
        .await
        .context("failed to connect to OpenBao")?;
    info!(address = %config.openbao.address, "Connected to OpenBao");

    let plugin = KmsPlugin::new(config, Arc::new(backend));
    plugin.initialize().await.context("failed to initialize KMS plugin")?;
    plugin.run(shutdown_signal()).await?;

    info!("kubebao-kms stopped");
    Ok(())
}
