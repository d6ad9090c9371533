//! HTTP server for the metrics endpoint.
//!
//! Every `/metrics` request runs a fresh collection against the Terraform
//! API, scoped to the request: a per-request cancellation token is armed
//! with the scrape timeout Prometheus announces in its request header, and
//! is cancelled when the request is abandoned.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use prometheus_client::encoding::text;
use prometheus_client::registry::Registry;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use tfc_api::Client;

use crate::collector::{CollectedSamples, collect};
use crate::metrics::{ExporterMetrics, StatusLabels};
use crate::scraper::ScraperRegistry;

/// Timeout announced by the Prometheus scraper, in (fractional) seconds.
const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

const LANDING_PAGE: &str = r#"<html>
    <head><title>Terraform Cloud/Enterprise Exporter</title></head>
    <body>
    <h1>Terraform Cloud/Enterprise Exporter</h1>
    <p><a href="/metrics">Metrics</a></p>
    </body>
</html>
"#;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    client: Client,
    registry: Arc<ScraperRegistry>,
    organizations: Arc<Vec<String>>,
    metrics: ExporterMetrics,
}

/// Create the HTTP router.
pub fn create_router(
    client: Client,
    registry: Arc<ScraperRegistry>,
    organizations: Vec<String>,
    metrics: ExporterMetrics,
) -> Router {
    let state = AppState {
        client,
        registry,
        organizations: Arc::new(organizations),
        metrics,
    };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .route("/", get(index_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let timeout = parse_scrape_timeout(&headers);
    let cancel = CancellationToken::new();

    let collection = collect(
        &state.client,
        &state.registry,
        &state.organizations,
        cancel.clone(),
        &state.metrics,
    );
    tokio::pin!(collection);

    let result = match timeout {
        Some(limit) => {
            tokio::select! {
                result = &mut collection => result,
                _ = sleep(limit) => {
                    // Deadline hit: cancel, then wait for the scraper tasks
                    // to unwind cooperatively.
                    cancel.cancel();
                    collection.await
                }
            }
        }
        None => collection.await,
    };

    state.metrics.scrapes.inc();
    state
        .metrics
        .scrape_duration
        .observe(started.elapsed().as_secs_f64());

    let samples = match result {
        Ok(samples) => samples,
        Err(err) => {
            error!(error = %err, "Collection failed");
            state
                .metrics
                .http_requests
                .get_or_create(&StatusLabels { code: 500 })
                .inc();
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("collecting metrics failed: {err}\n"),
            )
                .into_response();
        }
    };
    debug!(
        samples = samples.len(),
        elapsed = ?started.elapsed(),
        "Collection finished"
    );

    // Expose through a fresh registry: the collected samples next to clones
    // of the process-wide self-metric handles.
    let mut registry = Registry::default();
    state.metrics.register_into(&mut registry);
    registry.register_collector(Box::new(CollectedSamples::new(samples)));

    let mut body = String::new();
    if let Err(err) = text::encode(&mut body, &registry) {
        error!(error = %err, "Failed to encode metrics");
        state
            .metrics
            .http_requests
            .get_or_create(&StatusLabels { code: 500 })
            .inc();
        return (StatusCode::INTERNAL_SERVER_ERROR, "encoding metrics failed\n").into_response();
    }

    state
        .metrics
        .http_requests
        .get_or_create(&StatusLabels { code: 200 })
        .inc();
    (
        StatusCode::OK,
        [("content-type", OPENMETRICS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Handler for the /status endpoint.
async fn status_handler() -> Response {
    (StatusCode::OK, "ok").into_response()
}

/// Handler for the landing page.
async fn index_handler() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

/// A malformed header is logged and ignored; the scrape proceeds without a
/// deadline.
fn parse_scrape_timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(SCRAPE_TIMEOUT_HEADER)?;

    let parsed = value
        .to_str()
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());

    if parsed.is_none() {
        warn!(
            header = ?value,
            "Failed to parse timeout from Prometheus header"
        );
    }
    parsed
}

/// HTTP server configuration.
pub struct HttpServer {
    client: Client,
    registry: Arc<ScraperRegistry>,
    organizations: Vec<String>,
    metrics: ExporterMetrics,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        client: Client,
        registry: Arc<ScraperRegistry>,
        organizations: Vec<String>,
        metrics: ExporterMetrics,
        listen_addr: SocketAddr,
    ) -> Self {
        Self {
            client,
            registry,
            organizations,
            metrics,
            listen_addr,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(
            self.client,
            self.registry,
            self.organizations,
            self.metrics,
        );

        info!(addr = %self.listen_addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
