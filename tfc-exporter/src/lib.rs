//! Prometheus metrics exporter for Terraform Cloud/Enterprise.
//!
//! This crate exposes workspace information from the Terraform Cloud/Enterprise
//! API as Prometheus metrics via an HTTP `/metrics` endpoint. Data is fetched
//! on every scrape, so the exposed samples always reflect the live state of
//! the API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Terraform API  │────>│    Collector    │────>│   HTTP Server   │
//! │  (JSON:API v2)  │     │ (scraper tasks) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Each registered [`Scraper`] runs as one task per organization. The tasks
//! stream samples into a shared channel and share a cancellation token, so a
//! failure in any of them aborts the whole collection and the scrape returns
//! an error rather than a partial result.
//!
//! # Usage
//!
//! Run the exporter binary with a configuration file:
//!
//! ```bash
//! tfc-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod http;
pub mod metric;
pub mod metrics;
pub mod scraper;
pub mod workspaces;

pub use collector::{CollectedSamples, collect};
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use metric::{MetricDesc, MetricSample, SampleKind};
pub use metrics::ExporterMetrics;
pub use scraper::{SampleSink, ScrapeError, Scraper, ScraperRegistry};
pub use workspaces::Workspaces;
