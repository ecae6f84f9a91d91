//! Error types for catalogue queries.

use snafu::Snafu;

/// Errors that can occur while querying the catalogue.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CatalogueError {
    /// The configured search endpoint is not a valid URL.
    #[snafu(display("invalid search endpoint '{endpoint}': {source}"))]
    InvalidEndpoint { endpoint: String, source: url::ParseError },

    /// Failed to build the runtime backing the blocking client.
    #[snafu(display("failed to build search runtime: {source}"))]
    Runtime { source: std::io::Error },

    /// Failed to build the HTTP client.
    #[snafu(display("failed to build HTTP client: {source}"))]
    HttpClient { source: reqwest::Error },

    /// The HTTP request failed at the transport level.
    #[snafu(display("search request to {url} failed: {source}"))]
    Request { url: String, source: reqwest::Error },

    /// The endpoint answered with a non-success status.
    #[snafu(display("search endpoint returned HTTP {status} for {url}"))]
    Status { status: u16, url: String },

    /// The response body was not a valid search response.
    #[snafu(display("failed to decode search response from {url}: {source}"))]
    Decode { url: String, source: reqwest::Error },

    /// Every attempt timed out.
    #[snafu(display("search request timed out after {attempts} attempts"))]
    Timeout { attempts: u32 },
}

impl CatalogueError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogueError::Request { .. } | CatalogueError::Timeout { .. } => true,
            CatalogueError::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            CatalogueError::InvalidEndpoint { .. }
            | CatalogueError::Runtime { .. }
            | CatalogueError::HttpClient { .. }
            | CatalogueError::Decode { .. } => false,
        }
    }
}

pub type Result<T, E = CatalogueError> = std::result::Result<T, E>;
