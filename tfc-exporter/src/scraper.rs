//! Scraper trait and registry.
//!
//! A scraper turns one upstream API resource into metric samples. Scrapers
//! are registered once at startup; on every exposition request the collector
//! runs each of them against each configured organization.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tfc_api::Client;

use crate::metric::MetricSample;
use crate::workspaces::Workspaces;

/// Errors produced while collecting samples.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("{scraper} scrape failed: {source} (organization={organization}, page={page})")]
    Upstream {
        scraper: &'static str,
        organization: String,
        page: u32,
        #[source]
        source: tfc_api::Error,
    },

    #[error("Organization discovery failed: {0}")]
    Discovery(#[source] tfc_api::Error),

    #[error("Scrape cancelled")]
    Cancelled,

    #[error("Scrape task failed: {0}")]
    Task(String),
}

impl ScrapeError {
    /// Whether this error is the cooperative-cancellation signal rather than
    /// a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScrapeError::Cancelled)
    }
}

/// Destination for samples produced by a scraper.
///
/// Sends race cancellation, so a scraper blocked on a full channel unwinds
/// as soon as the collection is cancelled.
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: mpsc::Sender<MetricSample>,
    cancel: CancellationToken,
}

impl SampleSink {
    pub(crate) fn new(tx: mpsc::Sender<MetricSample>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Send one sample to the collector.
    ///
    /// Returns [`ScrapeError::Cancelled`] if the collection was cancelled
    /// before the sample could be handed over.
    pub async fn send(&self, sample: MetricSample) -> Result<(), ScrapeError> {
        tokio::select! {
            result = self.tx.send(sample) => result.map_err(|_| ScrapeError::Cancelled),
            _ = self.cancel.cancelled() => Err(ScrapeError::Cancelled),
        }
    }

    /// Resolves once the collection is cancelled. Scrapers race their
    /// upstream requests against this.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// A source of metric samples backed by one upstream API resource.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Name of the scraper. Should be unique.
    fn name(&self) -> &'static str;

    /// Help describes the role of the scraper.
    fn help(&self) -> &'static str;

    /// Version of the Terraform Cloud/Enterprise API from which the scraper
    /// is available.
    fn api_version(&self) -> &'static str;

    /// Collect data for one organization and send it through the sink.
    async fn scrape(
        &self,
        client: &Client,
        organization: &str,
        sink: &SampleSink,
    ) -> Result<(), ScrapeError>;
}

/// Append-only registry of scrapers.
///
/// Built once at startup and shared read-only with the HTTP handlers.
#[derive(Default)]
pub struct ScraperRegistry {
    scrapers: Vec<Arc<dyn Scraper>>,
}

impl ScraperRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in scrapers registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Workspaces));
        registry
    }

    /// Register a scraper. A scraper whose name is already registered is
    /// ignored with a warning.
    pub fn register(&mut self, scraper: Arc<dyn Scraper>) {
        if self.scrapers.iter().any(|s| s.name() == scraper.name()) {
            warn!(
                scraper = scraper.name(),
                "Ignoring duplicate scraper registration"
            );
            return;
        }
        self.scrapers.push(scraper);
    }

    /// All registered scrapers.
    pub fn scrapers(&self) -> &[Arc<dyn Scraper>] {
        &self.scrapers
    }

    pub fn len(&self) -> usize {
        self.scrapers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scrapers.is_empty()
    }
}
