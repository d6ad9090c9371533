//! Domain types for the Terraform Cloud/Enterprise v2 API.
//!
//! The API speaks JSON:API: list responses carry resources under `data`,
//! side-loaded resources under `included` and pagination metadata under
//! `meta.pagination`. The wire structs here decode those documents and
//! flatten them into the plain types the rest of the crate works with.

use std::collections::HashMap;

use serde::Deserialize;

/// A Terraform workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Workspace external id (`ws-...`).
    pub id: String,
    /// Workspace name, unique within its organization.
    pub name: String,
    /// Name of the owning organization.
    pub organization: String,
    /// Terraform version the workspace is pinned to.
    pub terraform_version: String,
    /// Creation timestamp as reported by the API (RFC 3339).
    pub created_at: String,
    /// Execution environment reported by the API.
    pub environment: String,
    /// The workspace's current run, if it ever had one.
    pub current_run: Option<Run>,
}

/// A Terraform run attached to a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    /// Run external id (`run-...`).
    pub id: String,
    /// Run status (`applied`, `errored`, ...).
    pub status: String,
    /// Creation timestamp as reported by the API (RFC 3339).
    pub created_at: String,
}

/// An organization visible to the authenticated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    /// Organization name. JSON:API uses the name as the resource id.
    pub name: String,
    /// Organization external id (`org-...`).
    pub external_id: Option<String>,
}

/// Pagination metadata reported by list endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Pagination {
    pub current_page: u32,
    /// `None` when the current page is the last one.
    #[serde(default)]
    pub next_page: Option<u32>,
    pub total_pages: u32,
    pub total_count: u32,
}

/// One page of workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceList {
    pub items: Vec<Workspace>,
    pub pagination: Option<Pagination>,
}

/// One page of organizations.
#[derive(Debug, Clone)]
pub struct OrganizationList {
    pub items: Vec<Organization>,
    pub pagination: Option<Pagination>,
}

/// Pagination parameters common to all list endpoints.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Page number to request, starting at 1. 0 lets the API pick.
    pub page_number: u32,
    /// Number of records per page. 0 lets the API pick.
    pub page_size: u32,
}

/// Parameters for listing workspaces.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceListOptions {
    pub list: ListOptions,
    /// Related resources to side-load, e.g. `current_run`.
    pub include: Vec<String>,
}

// ---------------------------------------------------------------------------
// JSON:API wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct WorkspaceDocument {
    data: Vec<WorkspaceResource>,
    #[serde(default)]
    included: Vec<IncludedResource>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceResource {
    id: String,
    attributes: WorkspaceAttributes,
    #[serde(default)]
    relationships: WorkspaceRelationships,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WorkspaceAttributes {
    name: String,
    #[serde(default)]
    terraform_version: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    environment: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WorkspaceRelationships {
    #[serde(default)]
    organization: Option<Relationship>,
    #[serde(default)]
    current_run: Option<Relationship>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(default)]
    data: Option<ResourceIdentifier>,
}

#[derive(Debug, Deserialize)]
struct ResourceIdentifier {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IncludedResource {
    id: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    attributes: RunAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunAttributes {
    #[serde(default)]
    status: String,
    #[serde(default)]
    created_at: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrganizationDocument {
    data: Vec<OrganizationResource>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct OrganizationResource {
    id: String,
    #[serde(default)]
    attributes: OrganizationAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OrganizationAttributes {
    #[serde(default)]
    external_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

impl WorkspaceDocument {
    /// Flatten the document into workspaces, resolving side-loaded runs.
    pub(crate) fn into_list(self) -> WorkspaceList {
        let runs: HashMap<String, Run> = self
            .included
            .into_iter()
            .filter(|resource| resource.resource_type == "runs")
            .map(|resource| {
                (
                    resource.id.clone(),
                    Run {
                        id: resource.id,
                        status: resource.attributes.status,
                        created_at: resource.attributes.created_at,
                    },
                )
            })
            .collect();

        let items = self
            .data
            .into_iter()
            .map(|resource| {
                let organization = resource
                    .relationships
                    .organization
                    .and_then(|rel| rel.data)
                    .map(|identifier| identifier.id)
                    .unwrap_or_default();

                // A relationship without a matching included resource still
                // identifies the run; only its id is known then.
                let current_run = resource
                    .relationships
                    .current_run
                    .and_then(|rel| rel.data)
                    .map(|identifier| {
                        runs.get(&identifier.id).cloned().unwrap_or(Run {
                            id: identifier.id,
                            status: String::new(),
                            created_at: String::new(),
                        })
                    });

                Workspace {
                    id: resource.id,
                    name: resource.attributes.name,
                    organization,
                    terraform_version: resource.attributes.terraform_version,
                    created_at: resource.attributes.created_at,
                    environment: resource.attributes.environment,
                    current_run,
                }
            })
            .collect();

        WorkspaceList {
            items,
            pagination: self.meta.and_then(|meta| meta.pagination),
        }
    }
}

impl OrganizationDocument {
    pub(crate) fn into_list(self) -> OrganizationList {
        let items = self
            .data
            .into_iter()
            .map(|resource| Organization {
                name: resource.id,
                external_id: resource.attributes.external_id,
            })
            .collect();

        OrganizationList {
            items,
            pagination: self.meta.and_then(|meta| meta.pagination),
        }
    }
}
