//! Collection coordinator.
//!
//! Fans out one task per (scraper, organization) pair, funnels their samples
//! through a bounded channel and joins the tasks. A failing task cancels the
//! shared token so its siblings unwind instead of finishing their pagination;
//! any failure discards every collected sample.

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::metrics::gauge::ConstGauge;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tfc_api::{Client, ListOptions};

use crate::metric::{MetricDesc, MetricSample, SampleKind};
use crate::metrics::{ExporterMetrics, ScraperLabels};
use crate::scraper::{SampleSink, ScrapeError, ScraperRegistry};

/// Capacity of the sample channel between scraper tasks and the collector.
const SAMPLE_CHANNEL_CAPACITY: usize = 64;

const ORGANIZATION_PAGE_SIZE: u32 = 40;

/// Cancels the token when dropped, so producer tasks never outlive an
/// abandoned collection (e.g. the scraping client disconnected).
struct CancelOnDrop {
    token: CancellationToken,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Run every registered scraper against every organization and return the
/// full sample set.
///
/// All-or-nothing: if any task fails, the collected samples are discarded
/// and the first real error is returned. Cancellation is only reported when
/// no task failed for another reason.
pub async fn collect(
    client: &Client,
    registry: &ScraperRegistry,
    organizations: &[String],
    cancel: CancellationToken,
    metrics: &ExporterMetrics,
) -> Result<Vec<MetricSample>, ScrapeError> {
    let _cancel_guard = CancelOnDrop {
        token: cancel.clone(),
    };

    let organizations = resolve_organizations(client, organizations, &cancel).await?;
    debug!(
        organizations = organizations.len(),
        scrapers = registry.len(),
        "Starting collection"
    );

    let (tx, mut rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);

    let mut tasks = Vec::with_capacity(registry.len() * organizations.len());
    for scraper in registry.scrapers() {
        for organization in &organizations {
            let scraper = scraper.clone();
            let client = client.clone();
            let organization = organization.clone();
            let sink = SampleSink::new(tx.clone(), cancel.clone());
            let cancel = cancel.clone();

            let name = scraper.name();
            let handle = tokio::spawn(async move {
                let result = scraper.scrape(&client, &organization, &sink).await;
                if let Err(e) = &result {
                    // The first real failure cancels all sibling tasks.
                    if !e.is_cancelled() {
                        cancel.cancel();
                    }
                }
                result
            });
            tasks.push((name, handle));
        }
    }
    // Only scraper tasks hold senders now; the drain below ends once all of
    // them returned.
    drop(tx);

    let mut samples = Vec::new();
    while let Some(sample) = rx.recv().await {
        samples.push(sample);
    }

    let mut first_error: Option<ScrapeError> = None;
    for (name, task) in tasks {
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                cancel.cancel();
                Err(ScrapeError::Task(e.to_string()))
            }
        };

        if let Err(e) = result {
            debug!(scraper = name, error = %e, "Scraper task failed");
            if !e.is_cancelled() {
                metrics
                    .scrape_errors
                    .get_or_create(&ScraperLabels {
                        scraper: name.to_string(),
                    })
                    .inc();
            }

            // Keep the first real error; cancellation only wins when it is
            // all there is.
            match &first_error {
                None => first_error = Some(e),
                Some(existing) if existing.is_cancelled() && !e.is_cancelled() => {
                    first_error = Some(e)
                }
                Some(_) => {}
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(samples),
    }
}

/// The organizations to scrape: the configured list, or every organization
/// visible to the token when none are configured.
async fn resolve_organizations(
    client: &Client,
    configured: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<String>, ScrapeError> {
    if !configured.is_empty() {
        return Ok(configured.to_vec());
    }

    let mut names = Vec::new();
    let mut page = 1;
    loop {
        let options = ListOptions {
            page_number: page,
            page_size: ORGANIZATION_PAGE_SIZE,
        };

        let list = tokio::select! {
            result = client.list_organizations(&options) => {
                result.map_err(ScrapeError::Discovery)?
            }
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
        };

        names.extend(list.items.into_iter().map(|org| org.name));

        match list.pagination.as_ref().and_then(|p| p.next_page) {
            Some(next) if next > 0 => page = next,
            _ => break,
        }
    }

    debug!(organizations = names.len(), "Discovered organizations");
    Ok(names)
}

/// The buffered result of one collection, exposable through a
/// request-scoped prometheus registry.
#[derive(Debug)]
pub struct CollectedSamples {
    samples: Vec<MetricSample>,
}

impl CollectedSamples {
    pub fn new(samples: Vec<MetricSample>) -> Self {
        Self { samples }
    }
}

impl Collector for CollectedSamples {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        // Group samples by descriptor, preserving first-seen order.
        let mut groups: Vec<(&'static MetricDesc, SampleKind, Vec<&MetricSample>)> = Vec::new();
        for sample in &self.samples {
            match groups
                .iter_mut()
                .find(|(desc, _, _)| std::ptr::eq(*desc, sample.desc))
            {
                Some((_, _, members)) => members.push(sample),
                None => groups.push((sample.desc, sample.kind, vec![sample])),
            }
        }

        for (desc, kind, members) in groups {
            let metric_type = match kind {
                SampleKind::Gauge => MetricType::Gauge,
                SampleKind::Counter => MetricType::Counter,
            };
            let mut family = encoder.encode_descriptor(desc.name, desc.help, None, metric_type)?;

            for sample in members {
                let labels: Vec<(&str, &str)> = desc
                    .labels
                    .iter()
                    .copied()
                    .zip(sample.label_values.iter().map(String::as_str))
                    .collect();
                let metric = family.encode_family(&labels)?;

                match sample.kind {
                    SampleKind::Gauge => ConstGauge::new(sample.value).encode(metric)?,
                    SampleKind::Counter => ConstCounter::new(sample.value).encode(metric)?,
                }
            }
        }

        Ok(())
    }
}
