//! Client library for the Terraform Cloud/Enterprise v2 API.
//!
//! This crate provides a small typed client for the parts of the API the
//! exporter scrapes:
//!
//! - [`client`] - HTTP client with bearer-token auth and request instrumentation
//! - [`types`] - Domain types and JSON:API document decoding
//! - [`error`] - Error types
//!
//! # Usage
//!
//! ```ignore
//! use tfc_api::{Client, ClientConfig, WorkspaceListOptions};
//!
//! let client = Client::new(ClientConfig {
//!     token: "...".to_string(),
//!     ..ClientConfig::default()
//! })?;
//! let page = client.list_workspaces("my-org", &WorkspaceListOptions::default()).await?;
//! ```

pub mod client;
pub mod error;
pub mod types;

// Re-export commonly used types at the crate root
pub use client::{Client, ClientConfig, DEFAULT_ADDRESS, RequestObserver};
pub use error::{Error, Result};
pub use types::{
    ListOptions, Organization, OrganizationList, Pagination, Run, Workspace, WorkspaceList,
    WorkspaceListOptions,
};
