//! HTTP client for the Terraform Cloud/Enterprise v2 API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{
    ListOptions, OrganizationDocument, OrganizationList, WorkspaceDocument, WorkspaceList,
    WorkspaceListOptions,
};

/// Default API address, the hosted Terraform Cloud service.
pub const DEFAULT_ADDRESS: &str = "https://app.terraform.io/";

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";
const USER_AGENT: &str = concat!("tfc-api/", env!("CARGO_PKG_VERSION"));

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address of the API, e.g. `https://app.terraform.io/`.
    pub address: String,
    /// User token for authenticating with the API.
    pub token: String,
    /// Accept any certificate presented by the API.
    pub insecure_skip_verify: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            token: String::new(),
            insecure_skip_verify: false,
        }
    }
}

/// Observer notified around every API request.
///
/// `on_request_start` is called just before the request is sent and
/// `on_request_end` once it finished. `status` is `None` when the request
/// failed before a response status was available.
pub trait RequestObserver: Send + Sync {
    fn on_request_start(&self);
    fn on_request_end(&self, method: &str, status: Option<u16>, elapsed: Duration);
}

/// Client for the Terraform Cloud/Enterprise v2 API.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base: Url,
    observer: Option<Arc<dyn RequestObserver>>,
}

impl Client {
    /// Create a new API client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut address = config.address;
        if address.is_empty() {
            address = DEFAULT_ADDRESS.to_string();
        }
        // Url::join treats the base as a directory only with a trailing slash.
        if !address.ends_with('/') {
            address.push('/');
        }
        let base = Url::parse(&address)
            .map_err(|e| Error::Config(format!("Invalid API address {}: {}", address, e)))?;

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|e| Error::Config(format!("Invalid API token: {}", e)))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_API_CONTENT_TYPE));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()?;

        Ok(Self {
            http,
            base,
            observer: None,
        })
    }

    /// Attach an observer that is notified around every API request.
    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// List the workspaces of an organization.
    pub async fn list_workspaces(
        &self,
        organization: &str,
        options: &WorkspaceListOptions,
    ) -> Result<WorkspaceList> {
        let url = self.endpoint(&format!("organizations/{}/workspaces", organization))?;

        let mut query = page_query(&options.list);
        if !options.include.is_empty() {
            query.push(("include", options.include.join(",")));
        }

        let document: WorkspaceDocument = self.get_json(url, &query).await?;
        Ok(document.into_list())
    }

    /// List the organizations visible to the authenticated token.
    pub async fn list_organizations(&self, options: &ListOptions) -> Result<OrganizationList> {
        let url = self.endpoint("organizations")?;
        let query = page_query(options);

        let document: OrganizationDocument = self.get_json(url, &query).await?;
        Ok(document.into_list())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("api/v2/{}", path))
            .map_err(|e| Error::Config(format!("Invalid request URL for {}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        debug!(url = %url, "API request");

        if let Some(observer) = &self.observer {
            observer.on_request_start();
        }
        let started = Instant::now();

        let result = self.http.get(url.clone()).query(query).send().await;

        let response = match result {
            Ok(response) => {
                if let Some(observer) = &self.observer {
                    observer.on_request_end(
                        "GET",
                        Some(response.status().as_u16()),
                        started.elapsed(),
                    );
                }
                response
            }
            Err(e) => {
                if let Some(observer) = &self.observer {
                    observer.on_request_end("GET", None, started.elapsed());
                }
                return Err(Error::Http(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
                message: read_error_message(response, status).await,
            });
        }

        Ok(response.json().await?)
    }
}

fn page_query(options: &ListOptions) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if options.page_number > 0 {
        query.push(("page[number]", options.page_number.to_string()));
    }
    if options.page_size > 0 {
        query.push(("page[size]", options.page_size.to_string()));
    }
    query
}

/// Extract a readable message from a JSON:API `errors` body.
async fn read_error_message(response: reqwest::Response, status: StatusCode) -> String {
    #[derive(Debug, Default, Deserialize)]
    struct ErrorDocument {
        #[serde(default)]
        errors: Vec<ApiError>,
    }

    #[derive(Debug, Deserialize)]
    struct ApiError {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    }

    let body = response.text().await.unwrap_or_default();
    let document: ErrorDocument = serde_json::from_str(&body).unwrap_or_default();

    match document.errors.first() {
        Some(ApiError {
            title: Some(title),
            detail: Some(detail),
        }) => format!("{}: {}", title, detail),
        Some(ApiError {
            title: Some(title), ..
        }) => title.clone(),
        Some(ApiError {
            detail: Some(detail),
            ..
        }) => detail.clone(),
        _ => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    }
}
