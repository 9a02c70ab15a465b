//! Page values flowing through the crawl pipeline

use super::PageBag;
use crate::TransportError;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use url::Url;

/// A page waiting to be crawled
///
/// Owned by the frontier until dequeued, then by the worker processing it.
#[derive(Debug, Clone)]
pub struct PageToCrawl {
    /// The URI to fetch
    pub uri: Url,

    /// The page this URI was discovered on
    pub parent_uri: Option<Url>,

    /// Number of link hops from the root page
    pub crawl_depth: u32,

    pub is_root: bool,
    pub is_internal: bool,

    /// True when this page is being fetched again after a transport error
    pub is_retry: bool,

    /// Number of retries already attempted
    pub retry_count: u32,

    /// Seconds to wait before the next attempt, taken from `Retry-After`
    pub retry_after: Option<f64>,

    /// When the last request for this page was sent
    pub last_request_time: Option<DateTime<Utc>>,

    /// Position of this page in a chain of consecutive redirects
    pub redirect_position: u32,

    /// The page whose redirect produced this one
    pub redirected_from: Option<Url>,

    pub page_bag: PageBag,
}

impl PageToCrawl {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            parent_uri: None,
            crawl_depth: 0,
            is_root: false,
            is_internal: false,
            is_retry: false,
            retry_count: 0,
            retry_after: None,
            last_request_time: None,
            redirect_position: 0,
            redirected_from: None,
            page_bag: PageBag::new(),
        }
    }

    /// The seed page of a crawl
    pub fn root(uri: Url) -> Self {
        Self {
            is_root: true,
            is_internal: true,
            ..Self::new(uri)
        }
    }

    /// A page discovered as a link on `parent`, one hop deeper
    pub fn child_of(uri: Url, parent: &PageToCrawl, is_internal: bool) -> Self {
        Self {
            parent_uri: Some(parent.uri.clone()),
            crawl_depth: parent.crawl_depth + 1,
            is_internal,
            ..Self::new(uri)
        }
    }

    /// The next hop of a redirect chain starting at `source`
    ///
    /// The redirect target keeps the source's parent and depth.
    pub fn redirect_of(uri: Url, source: &PageToCrawl, is_internal: bool) -> Self {
        Self {
            parent_uri: source.parent_uri.clone(),
            crawl_depth: source.crawl_depth,
            is_internal,
            redirect_position: source.redirect_position + 1,
            redirected_from: Some(source.uri.clone()),
            ..Self::new(uri)
        }
    }
}

/// Response metadata received for a page
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,

    /// Final URI of the response, after any transport-level redirects
    pub response_uri: Url,

    /// Value of the `Content-Type` header, empty if absent
    pub content_type: String,

    /// Value of the `Content-Length` header, if present
    pub content_length: Option<u64>,
}

impl HttpResponse {
    /// Returns a header value as a string if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Downloaded page content
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub bytes: Vec<u8>,
    pub charset: Option<String>,
    pub text: String,
}

impl PageContent {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The outcome of fetching a [`PageToCrawl`]
///
/// Derefs to the request it was produced from. `content` is only populated
/// when the download decision allowed it; an empty body is not a failure.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub request: PageToCrawl,

    /// Absent when the request failed at the transport level
    pub response: Option<HttpResponse>,

    pub error: Option<TransportError>,
    pub content: PageContent,

    /// Populated only when links were parsed for this page
    pub parsed_links: Option<Vec<Url>>,

    pub request_started: Option<DateTime<Utc>>,
    pub request_completed: Option<DateTime<Utc>>,
    pub download_started: Option<DateTime<Utc>>,
    pub download_completed: Option<DateTime<Utc>>,

    /// The next hop when this page answered with a redirect
    pub redirected_to: Option<Url>,
}

impl CrawledPage {
    pub fn new(uri: Url) -> Self {
        Self::from_request(PageToCrawl::new(uri))
    }

    pub fn from_request(request: PageToCrawl) -> Self {
        Self {
            request,
            response: None,
            error: None,
            content: PageContent::default(),
            parsed_links: None,
            request_started: None,
            request_completed: None,
            download_started: None,
            download_completed: None,
            redirected_to: None,
        }
    }

    /// Copies the crawl metadata of `source` onto this page
    ///
    /// The bag of `source` is merged into the page's own bag, so values set
    /// by the fetcher win over values carried by the request.
    pub fn map_from(&mut self, source: &PageToCrawl) {
        let mut bag = source.page_bag.clone();
        bag.merge(&self.request.page_bag);

        self.request = PageToCrawl {
            page_bag: bag,
            ..source.clone()
        };
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Time between sending the request and receiving the last byte
    pub fn elapsed(&self) -> Duration {
        let end = self.download_completed.or(self.request_completed);
        match (self.request_started, end) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

impl Deref for CrawledPage {
    type Target = PageToCrawl;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}

impl DerefMut for CrawledPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.request
    }
}
