//! Exporter self-metrics.
//!
//! The handles here are process-wide and shared by cloning; prometheus
//! metric handles share their state through an internal Arc, so registering
//! clones into a request-scoped registry exposes the same series.

use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use tfc_api::RequestObserver;

/// Histogram buckets for request and scrape durations, in seconds.
const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ScraperLabels {
    pub scraper: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    pub code: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub code: u16,
    pub method: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MethodLabels {
    pub method: String,
}

/// Operational metrics of the exporter itself.
#[derive(Clone, Debug)]
pub struct ExporterMetrics {
    /// Total number of scrapes served.
    pub scrapes: Counter,
    /// Failed scrapes per scraper.
    pub scrape_errors: Family<ScraperLabels, Counter>,
    /// Wall-clock duration of whole collections.
    pub scrape_duration: Histogram,
    /// Responses of the metrics endpoint by status code.
    pub http_requests: Family<StatusLabels, Counter>,
    /// Instrumentation of the upstream API client.
    pub api: ApiClientMetrics,
}

impl ExporterMetrics {
    pub fn new() -> Self {
        Self {
            scrapes: Counter::default(),
            scrape_errors: Family::default(),
            scrape_duration: Histogram::new(DURATION_BUCKETS.iter().copied()),
            http_requests: Family::default(),
            api: ApiClientMetrics::new(),
        }
    }

    /// Register clones of all handles into a registry.
    pub fn register_into(&self, registry: &mut Registry) {
        registry.register(
            "tf_exporter_scrapes",
            "Total number of scrapes served by this exporter",
            self.scrapes.clone(),
        );
        registry.register(
            "tf_exporter_scrape_errors",
            "Number of failed scrapes per scraper",
            self.scrape_errors.clone(),
        );
        registry.register(
            "tf_exporter_scrape_duration_seconds",
            "Time spent collecting data from the Terraform API",
            self.scrape_duration.clone(),
        );
        registry.register(
            "tf_exporter_http_requests",
            "Responses of the metrics endpoint by status code",
            self.http_requests.clone(),
        );
        self.api.register_into(registry);
    }
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for the instrumented Terraform API client, fed through the
/// [`RequestObserver`] seam.
#[derive(Clone, Debug)]
pub struct ApiClientMetrics {
    /// In-flight requests of the wrapped client.
    pub in_flight: Gauge,
    /// Completed requests by status code and method.
    pub requests: Family<RequestLabels, Counter>,
    /// Request latencies by method.
    pub request_duration: Family<MethodLabels, Histogram>,
}

impl ApiClientMetrics {
    pub fn new() -> Self {
        Self {
            in_flight: Gauge::default(),
            requests: Family::default(),
            request_duration: Family::new_with_constructor(
                duration_histogram as fn() -> Histogram,
            ),
        }
    }

    pub fn register_into(&self, registry: &mut Registry) {
        registry.register(
            "client_api_in_flight_requests",
            "A gauge of in-flight requests for the wrapped client",
            self.in_flight.clone(),
        );
        registry.register(
            "client_api_requests",
            "A counter for requests from the wrapped client",
            self.requests.clone(),
        );
        registry.register(
            "client_api_request_duration_seconds",
            "A histogram of request latencies",
            self.request_duration.clone(),
        );
    }
}

impl Default for ApiClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_histogram() -> Histogram {
    Histogram::new(DURATION_BUCKETS.iter().copied())
}

impl RequestObserver for ApiClientMetrics {
    fn on_request_start(&self) {
        self.in_flight.inc();
    }

    fn on_request_end(&self, method: &str, status: Option<u16>, elapsed: Duration) {
        self.in_flight.dec();

        // Requests that died before a response carry no status; only the
        // in-flight gauge observes them.
        if let Some(code) = status {
            self.requests
                .get_or_create(&RequestLabels {
                    code,
                    method: method.to_string(),
                })
                .inc();
            self.request_duration
                .get_or_create(&MethodLabels {
                    method: method.to_string(),
                })
                .observe(elapsed.as_secs_f64());
        }
    }
}
