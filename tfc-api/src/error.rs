use thiserror::Error;

/// Error type for Terraform Cloud/Enterprise API operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },
}

/// Result type alias using the API client's Error.
pub type Result<T> = std::result::Result<T, Error>;
