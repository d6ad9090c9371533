//! Workspace scraper.
//!
//! Walks the paginated workspaces listing of one organization and emits one
//! info sample per workspace.

use async_trait::async_trait;

use tfc_api::{Client, ListOptions, Run, Workspace, WorkspaceList, WorkspaceListOptions};

use crate::metric::{MetricDesc, MetricSample};
use crate::scraper::{SampleSink, ScrapeError, Scraper};

// TODO: We might want to allow the user to control the page size via cli/config.
//       This could be handy for users hitting API rate limits (30 per sec).
pub const PAGE_SIZE: u32 = 40;

/// Label value used when a workspace has no current run.
const NA: &str = "na";

/// Descriptor of the workspace info metric.
pub static WORKSPACES_INFO: MetricDesc = MetricDesc {
    name: "tf_workspaces_info",
    help: "Information about existing workspaces",
    labels: &[
        "id",
        "name",
        "organization",
        "terraform_version",
        "created_at",
        "environment",
        "current_run",
        "current_run_status",
        "current_run_created_at",
    ],
};

/// Scrapes metrics about the workspaces of an organization.
pub struct Workspaces;

#[async_trait]
impl Scraper for Workspaces {
    fn name(&self) -> &'static str {
        "workspaces"
    }

    fn help(&self) -> &'static str {
        "Scrape information from the Workspaces API: https://www.terraform.io/docs/cloud/api/workspaces.html"
    }

    fn api_version(&self) -> &'static str {
        "v2"
    }

    async fn scrape(
        &self,
        client: &Client,
        organization: &str,
        sink: &SampleSink,
    ) -> Result<(), ScrapeError> {
        let mut page = 1;
        loop {
            let list = self.fetch_page(client, organization, page, sink).await?;

            // Some APIs report the last page as next-page 0 instead of null.
            match list.pagination.as_ref().and_then(|p| p.next_page) {
                Some(next) if next > 0 => page = next,
                _ => return Ok(()),
            }
        }
    }
}

impl Workspaces {
    /// Fetch one page of workspaces and emit a sample per record. The
    /// upstream request and every emission race cancellation.
    async fn fetch_page(
        &self,
        client: &Client,
        organization: &str,
        page: u32,
        sink: &SampleSink,
    ) -> Result<WorkspaceList, ScrapeError> {
        let options = WorkspaceListOptions {
            list: ListOptions {
                page_number: page,
                page_size: PAGE_SIZE,
            },
            include: vec!["current_run".to_string()],
        };

        let list = tokio::select! {
            result = client.list_workspaces(organization, &options) => {
                result.map_err(|source| ScrapeError::Upstream {
                    scraper: self.name(),
                    organization: organization.to_string(),
                    page,
                    source,
                })?
            }
            _ = sink.cancelled() => return Err(ScrapeError::Cancelled),
        };

        for workspace in &list.items {
            sink.send(workspace_sample(workspace)).await?;
        }

        Ok(list)
    }
}

/// Build the info sample for one workspace.
fn workspace_sample(workspace: &Workspace) -> MetricSample {
    let run = workspace.current_run.as_ref();

    MetricSample::gauge(
        &WORKSPACES_INFO,
        1.0,
        vec![
            workspace.id.clone(),
            workspace.name.clone(),
            workspace.organization.clone(),
            workspace.terraform_version.clone(),
            workspace.created_at.clone(),
            workspace.environment.clone(),
            current_run_id(run),
            current_run_status(run),
            current_run_created_at(run),
        ],
    )
}

fn current_run_id(run: Option<&Run>) -> String {
    run.map_or_else(|| NA.to_string(), |r| r.id.clone())
}

fn current_run_status(run: Option<&Run>) -> String {
    run.map_or_else(|| NA.to_string(), |r| r.status.clone())
}

fn current_run_created_at(run: Option<&Run>) -> String {
    run.map_or_else(|| NA.to_string(), |r| r.created_at.clone())
}
