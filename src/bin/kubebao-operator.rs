//! Operator that syncs BaoSecret and BaoPolicy resources with OpenBao.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kubebao::backend::{BackendClient, BackendConfig, OpenBaoClient};
use kubebao::config::{load_dotenv, load_yaml_file};
use kubebao::controller::run_controllers;
use kubebao::crd::crd_manifests;
use kubebao::observability::{init_logging, init_metrics, serve_health, HealthChecker, LogFormat};
use kubebao::transport::{install_crypto_provider, shutdown_signal};
use kubebao::VERSION;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kubebao-operator")]
#[command(about = "KubeBao operator for BaoSecret and BaoPolicy resources")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a YAML file with the OpenBao connection settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the Prometheus exporter binds to
    #[arg(long, default_value = "0.0.0.0:8080")]
    metrics_bind_address: String,

    /// Address the liveness and readiness endpoints bind to
    #[arg(long, default_value = "0.0.0.0:8081")]
    health_bind_address: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the CustomResourceDefinition manifests and exit
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_crypto_provider();
    load_dotenv();

    let args = Args::parse();

    if let Some(Command::Crd) = args.command {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    init_logging(&args.log_level, args.log_format)?;
    info!(version = VERSION, "Starting kubebao-operator");

    let backend_config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading OpenBao settings from file");
            let mut config: BackendConfig = load_yaml_file(path)?;
            config.merge_env();
            config
        }
        None => BackendConfig::from_env(),
    };
    backend_config.validate()?;

    let backend = OpenBaoClient::connect(backend_config)
        .await
        .context("failed to connect to OpenBao")?;
    let backend: Arc<dyn BackendClient> = Arc::new(backend);

    init_metrics(&args.metrics_bind_address, "kubebao-operator")?;

    let checker = HealthChecker::new(Some(backend.clone()));
    let health_address = args.health_bind_address.clone();
    let health = tokio::spawn(async move {
        if let Err(e) = serve_health(&health_address, checker, shutdown_signal()).await {
            error!(error = %e, "Health server failed");
        }
    });

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    run_controllers(client, backend).await;

    health.abort();
    info!("kubebao-operator stopped");
    Ok(())
}
