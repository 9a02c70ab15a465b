//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Redirect policy (followed by the transport or surfaced to the crawler)
//! - Deciding whether to download the body once headers have arrived
//! - Classifying transport failures
//!
//! Fetchers never fail: network problems are recorded on the returned
//! [`CrawledPage`] as a [`TransportError`].

use crate::config::Config;
use crate::state::{CrawlDecision, CrawledPage, HttpResponse, PageContent};
use crate::TransportError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use url::Url;

/// Callback deciding whether the body of a response is downloaded
///
/// It receives the page with its response metadata filled in.
pub type DownloadDecision<'a> = &'a (dyn Fn(&CrawledPage) -> CrawlDecision + Send + Sync);

/// Fetches a single URI
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Requests `uri` and returns the crawled page
    ///
    /// The body is only read when `should_download` allows it. Transport
    /// failures are stored in [`CrawledPage::error`].
    async fn fetch(&self, uri: &Url, should_download: DownloadDecision<'_>) -> CrawledPage;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The crawl configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use ripple_crawler::config::Config;
/// use ripple_crawler::crawler::build_http_client;
///
/// let client = build_http_client(&Config::default()).unwrap();
/// ```
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    let crawler = &config.crawler;

    let redirect = if crawler.auto_redirects {
        Policy::limited(crawler.max_auto_redirects as usize)
    } else {
        // Redirects are handed back to the crawler as ordinary 3xx pages
        Policy::none()
    };

    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(Duration::from_secs(crawler.http_request_timeout_seconds))
        .connect_timeout(Duration::from_secs(
            crawler.http_request_timeout_seconds.min(10),
        ))
        .redirect(redirect)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Extracts the `charset` parameter of a Content-Type value
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_lowercase())
        } else {
            None
        }
    })
}

/// Default [`PageFetcher`] backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a client built from the configuration
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
        })
    }

    /// Creates a fetcher around an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, uri: &Url, should_download: DownloadDecision<'_>) -> CrawledPage {
        let mut page = CrawledPage::new(uri.clone());
        page.request_started = Some(Utc::now());

        let response = match self.client.get(uri.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                page.request_completed = Some(Utc::now());
                let error = TransportError::from_reqwest(&e);
                tracing::debug!("Request to {} failed: {}", uri, error);
                page.error = Some(error);
                return page;
            }
        };
        page.request_completed = Some(Utc::now());

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        page.response = Some(HttpResponse {
            status: response.status(),
            headers: response.headers().clone(),
            response_uri: response.url().clone(),
            content_length: response.content_length(),
            content_type,
        });

        let decision = should_download(&page);
        if !decision.allow {
            tracing::debug!("Page {} content not downloaded: {}", uri, decision.reason);
            return page;
        }

        page.download_started = Some(Utc::now());
        match response.bytes().await {
            Ok(bytes) => {
                let charset = page
                    .response
                    .as_ref()
                    .and_then(|r| charset_from_content_type(&r.content_type));
                page.content = PageContent {
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                    bytes: bytes.to_vec(),
                    charset,
                };
            }
            Err(e) => {
                let error = TransportError::from_reqwest(&e);
                tracing::debug!("Reading body of {} failed: {}", uri, error);
                page.error = Some(error);
            }
        }
        page.download_completed = Some(Utc::now());

        page
    }
}
