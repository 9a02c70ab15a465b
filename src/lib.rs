//! Ripple Crawler: a polite, extensible web crawler
//!
//! Given a seed URL, this crate discovers and fetches linked pages within
//! configurable limits, respecting robots.txt and per-domain crawl delays,
//! while exposing lifecycle events for page-level processing.

pub mod config;
pub mod crawler;
pub mod memory;
pub mod robots;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for crawl operations
///
/// Decision-level denials are never errors; they travel as
/// [`state::CrawlDecision`] values. Only conditions that end a crawl early
/// surface here, through [`crawler::CrawlResult::error`].
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(
        "Process does not have the required {required_mb}mb of available memory \
         to crawl {root} (available: {available_mb}mb)"
    )]
    InsufficientMemory {
        root: String,
        required_mb: u64,
        available_mb: u64,
    },

    #[error(
        "Process is using {usage_mb}mb of memory which is above the max configured \
         of {max_mb}mb for {root}"
    )]
    MemoryCeilingExceeded {
        root: String,
        usage_mb: u64,
        max_mb: u64,
    },

    #[error("Crawl cancellation requested for {root}")]
    Cancelled { root: String },

    #[error("Error occurred during processing of page {url}: {message}")]
    Processing { url: String, message: String },

    #[error("Page processing task panicked: {0}")]
    TaskPanicked(String),

    #[error("Link parse error for {url}: {message}")]
    LinkParse { url: String, message: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Network or HTTP transport failure recorded on a crawled page
///
/// Fetchers never return these through `Err`; they are stored on the
/// [`state::CrawledPage`] and drive the retry decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Redirect error: {0}")]
    Redirect(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Failed to read response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Classifies a reqwest error into a transport error
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_redirect() {
            TransportError::Redirect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlResult, Crawler, CrawlerBuilder};
pub use state::{CrawlContext, CrawlDecision, CrawledPage, PageBag, PageToCrawl};
