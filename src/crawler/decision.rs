//! Built-in crawl decisions
//!
//! Each predicate is side-effect free and returns a [`CrawlDecision`]. The
//! checks run in a fixed order; later checks assume the earlier ones passed,
//! and the first failing check supplies the reason.

use crate::state::{CrawlContext, CrawlDecision, CrawledPage, PageToCrawl};
use crate::url::{extract_authority, is_http_scheme};
use reqwest::StatusCode;

/// Prefix of the reason returned when the global page limit is hit
///
/// The crawler matches on it to set its sticky "limit reached" flag.
pub const MAX_PAGES_REASON: &str = "MaxPagesToCrawl limit";

/// The decision contract consulted by the crawler
pub trait DecisionMaker: Send + Sync {
    /// Should this page be fetched at all
    fn should_crawl_page(&self, page: &PageToCrawl, ctx: &CrawlContext) -> CrawlDecision;

    /// Should the links found on this page be followed
    fn should_crawl_page_links(&self, page: &CrawledPage, ctx: &CrawlContext) -> CrawlDecision;

    /// Should the body be downloaded, given the response headers
    fn should_download_page_content(
        &self,
        page: &CrawledPage,
        ctx: &CrawlContext,
    ) -> CrawlDecision;

    /// Should a page that failed at the transport level be fetched again
    fn should_recrawl_page(&self, page: &CrawledPage, ctx: &CrawlContext) -> CrawlDecision;
}

/// Default [`DecisionMaker`] driven entirely by the crawl configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlDecisionMaker;

impl CrawlDecisionMaker {
    pub fn new() -> Self {
        Self
    }
}

impl DecisionMaker for CrawlDecisionMaker {
    fn should_crawl_page(&self, page: &PageToCrawl, ctx: &CrawlContext) -> CrawlDecision {
        let config = &ctx.config().crawler;

        if page.redirected_from.is_some() && page.redirect_position > config.max_auto_redirects {
            return CrawlDecision::deny(format!(
                "HttpRequestMaxAutoRedirects limit of [{}] has been reached",
                config.max_auto_redirects
            ));
        }

        if page.crawl_depth > config.max_crawl_depth {
            return CrawlDecision::deny("Crawl depth is above max");
        }

        if !is_http_scheme(&page.uri) {
            return CrawlDecision::deny("Scheme does not begin with http");
        }

        if !page.is_retry
            && config.max_pages_to_crawl > 0
            && ctx.crawled_count() + ctx.frontier().count() as u64 + 1 > config.max_pages_to_crawl
        {
            return CrawlDecision::deny(format!(
                "{} of [{}] has been reached",
                MAX_PAGES_REASON, config.max_pages_to_crawl
            ));
        }

        if !page.is_retry && config.max_pages_to_crawl_per_domain > 0 {
            let authority = extract_authority(&page.uri);
            let used = ctx
                .domain_crawl_count(&authority)
                .max(ctx.domain_scheduled_count(&authority));
            if used >= config.max_pages_to_crawl_per_domain {
                return CrawlDecision::deny(format!(
                    "MaxPagesToCrawlPerDomain limit of [{}] has been reached for domain [{}]",
                    config.max_pages_to_crawl_per_domain, authority
                ));
            }
        }

        if !page.is_internal && !config.allow_external_crawling {
            return CrawlDecision::deny("Link is external");
        }

        CrawlDecision::allow()
    }

    fn should_crawl_page_links(&self, page: &CrawledPage, ctx: &CrawlContext) -> CrawlDecision {
        let config = &ctx.config().crawler;

        if page.content.text.trim().is_empty() {
            return CrawlDecision::deny("Page has no content");
        }

        if !page.is_internal && !config.allow_external_link_crawling {
            return CrawlDecision::deny("Link is external");
        }

        if page.crawl_depth >= config.max_crawl_depth {
            return CrawlDecision::deny("Crawl depth is above max");
        }

        CrawlDecision::allow()
    }

    fn should_download_page_content(
        &self,
        page: &CrawledPage,
        ctx: &CrawlContext,
    ) -> CrawlDecision {
        let config = &ctx.config().crawler;

        let Some(response) = page.response.as_ref() else {
            return CrawlDecision::deny("No response");
        };

        if response.status != StatusCode::OK {
            return CrawlDecision::deny(format!("Status code {}", response.status));
        }

        let allowed = config.downloadable_content_types();
        let content_type = response.content_type.trim().to_lowercase();
        if !allowed.iter().any(|t| content_type.contains(t.as_str())) {
            return CrawlDecision::deny(format!(
                "Content type is not any of the following: {}",
                allowed.join(",")
            ));
        }

        if config.max_page_size_bytes > 0 {
            if let Some(length) = response.content_length {
                if length > config.max_page_size_bytes {
                    return CrawlDecision::deny(format!(
                        "Page size of [{}] bytes is above the max allowable of [{}] bytes",
                        length, config.max_page_size_bytes
                    ));
                }
            }
        }

        CrawlDecision::allow()
    }

    fn should_recrawl_page(&self, page: &CrawledPage, ctx: &CrawlContext) -> CrawlDecision {
        let config = &ctx.config().crawler;

        if page.error.is_none() {
            return CrawlDecision::deny("Transport error did not occur");
        }

        if config.max_retry_count < 1 {
            return CrawlDecision::deny("MaxRetryCount is less than 1");
        }

        if page.retry_count >= config.max_retry_count {
            return CrawlDecision::deny("MaxRetryCount has been reached");
        }

        CrawlDecision::allow()
    }
}
