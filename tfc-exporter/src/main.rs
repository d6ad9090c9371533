//! Prometheus exporter for Terraform Cloud/Enterprise workspaces.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use tfc_api::{Client, ClientConfig};
use tfc_exporter::{ExporterConfig, ExporterMetrics, HttpServer, ScraperRegistry};

/// Prometheus exporter for Terraform Cloud/Enterprise workspaces.
#[derive(Parser, Debug)]
#[command(name = "tfc-exporter")]
#[command(about = "Export Terraform Cloud/Enterprise workspace information as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Organization names to scrape from, comma separated (overrides config).
    #[arg(short, long, env = "TF_ORGANIZATIONS", value_delimiter = ',')]
    organizations: Option<Vec<String>>,

    /// User token for authenticating with the API (overrides config).
    #[arg(short = 't', long, env = "TF_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// File containing the API token; its first line is used.
    #[arg(long)]
    api_token_file: Option<PathBuf>,

    /// API address to scrape metrics from (overrides config).
    #[arg(long)]
    api_address: Option<String>,

    /// Accept any certificate presented by the API.
    #[arg(long)]
    insecure_skip_verify: bool,

    /// Log level (trace, debug, info, warn, error). Overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // Override from CLI
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(organizations) = args.organizations {
        config.api.organizations = organizations;
    }
    if let Some(token) = args.api_token {
        config.api.token = token;
    }
    if let Some(token_file) = args.api_token_file {
        config.api.token_file = Some(token_file);
    }
    if let Some(address) = args.api_address {
        config.api.address = address;
    }
    if args.insecure_skip_verify {
        config.api.insecure_skip_verify = true;
    }
    config.validate()?;

    // Initialize logging
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level)
        .parse()
        .unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("tfc_exporter={}", log_level).parse()?)
        .add_directive(format!("tfc_api={}", log_level).parse()?)
        .add_directive(format!("hyper={}", Level::WARN).parse()?);

    match config.logging.format {
        tfc_exporter::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        tfc_exporter::config::LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Terraform Cloud/Enterprise exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Process-wide metrics, shared between the HTTP layer and the API client
    let metrics = ExporterMetrics::new();

    let token = config.api.resolve_token()?;
    let client = Client::new(ClientConfig {
        address: config.api.address.clone(),
        token,
        insecure_skip_verify: config.api.insecure_skip_verify,
    })?
    .with_observer(Arc::new(metrics.api.clone()));

    let registry = Arc::new(ScraperRegistry::with_defaults());

    if config.api.organizations.is_empty() {
        info!("No organizations configured, scraping every organization visible to the token");
    } else {
        info!(organizations = ?config.api.organizations, "Scraping configured organizations");
    }

    // Parse listen address
    let listen_addr = config
        .server
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let http_server = HttpServer::new(
        client,
        registry,
        config.api.organizations.clone(),
        metrics.clone(),
        listen_addr,
    );

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).unwrap();
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = http_task.await;
    })
    .await;

    // Print final stats
    info!(scrapes = metrics.scrapes.get(), "Final statistics");

    info!("Exporter stopped");
    Ok(())
}
