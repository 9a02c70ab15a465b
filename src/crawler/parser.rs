//! HTML link extraction
//!
//! This module parses fetched pages to extract:
//! - Links to follow (from `<a>`, `<area>` and canonical `<link>` tags)
//! - The `<base href>` used to resolve relative links
//! - No-follow signals from meta robots tags and `X-Robots-Tag` headers

use crate::config::Config;
use crate::state::CrawledPage;
use crate::{CrawlError, Result};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extracts outbound links from a crawled page
pub trait LinkParser: Send + Sync {
    /// Returns the page's links as absolute URIs, deduplicated in order
    /// of first appearance
    fn extract(&self, page: &CrawledPage) -> Result<Vec<Url>>;
}

/// Default [`LinkParser`] backed by scraper
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` and `<area href="...">`
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
/// - `rel="nofollow"` anchors, when respecting rel nofollow
/// - Every link of a page marked nofollow by meta robots or
///   `X-Robots-Tag`, when respecting those signals
#[derive(Debug, Clone, Default)]
pub struct HtmlLinkParser {
    pub respect_meta_robots_nofollow: bool,
    pub respect_rel_nofollow: bool,
    pub respect_x_robots_tag_nofollow: bool,

    /// Keep `#fragment` parts instead of stripping them
    pub respect_url_named_anchor: bool,
}

impl HtmlLinkParser {
    pub fn from_config(config: &Config) -> Self {
        Self {
            respect_meta_robots_nofollow: config.politeness.respect_meta_robots_nofollow,
            respect_rel_nofollow: config.politeness.respect_rel_nofollow,
            respect_x_robots_tag_nofollow: config.politeness.respect_x_robots_tag_nofollow,
            respect_url_named_anchor: config.crawler.respect_url_named_anchor,
        }
    }

    /// True if the response carries `X-Robots-Tag: nofollow` or `none`
    fn has_header_nofollow(&self, page: &CrawledPage) -> bool {
        let Some(response) = page.response.as_ref() else {
            return false;
        };
        response
            .headers
            .get_all("x-robots-tag")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(is_nofollow_directive)
    }
}

impl LinkParser for HtmlLinkParser {
    fn extract(&self, page: &CrawledPage) -> Result<Vec<Url>> {
        let start = std::time::Instant::now();

        if self.respect_x_robots_tag_nofollow && self.has_header_nofollow(page) {
            tracing::debug!("X-Robots-Tag nofollow on {}, skipping its links", page.uri);
            return Ok(Vec::new());
        }

        let document = Html::parse_document(&page.content.text);

        if self.respect_meta_robots_nofollow && has_meta_nofollow(&document) {
            tracing::debug!("Meta robots nofollow on {}, skipping its links", page.uri);
            return Ok(Vec::new());
        }

        // Relative links resolve against the URI that actually responded
        let page_uri = page
            .response
            .as_ref()
            .map(|r| &r.response_uri)
            .unwrap_or(&page.uri);
        let base = base_href(&document, page_uri).unwrap_or_else(|| page_uri.clone());

        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for href in self.href_values(page, &document)? {
            if let Some(url) = resolve_link(href, &base, self.respect_url_named_anchor) {
                if seen.insert(url.as_str().to_string()) {
                    links.push(url);
                }
            }
        }

        tracing::debug!(
            "Parsed {} links from {} in {:?}",
            links.len(),
            page.uri,
            start.elapsed()
        );
        Ok(links)
    }
}

impl HtmlLinkParser {
    fn href_values<'a>(&self, page: &CrawledPage, document: &'a Html) -> Result<Vec<&'a str>> {
        let selector = |css: &str| {
            Selector::parse(css).map_err(|e| CrawlError::LinkParse {
                url: page.uri.to_string(),
                message: e.to_string(),
            })
        };
        let anchors = selector("a[href], area[href]")?;
        let canonical = selector("link[rel='canonical'][href]")?;

        let followed = document
            .select(&anchors)
            .filter(|element| !(self.respect_rel_nofollow && has_rel_nofollow(element)));

        Ok(followed
            .chain(document.select(&canonical))
            .filter_map(|element| element.value().attr("href"))
            .collect())
    }
}

fn is_nofollow_directive(value: &str) -> bool {
    value
        .split(|c| c == ',' || c == ' ')
        .map(|d| d.trim().to_ascii_lowercase())
        .any(|d| d == "nofollow" || d == "none")
}

fn has_meta_nofollow(document: &Html) -> bool {
    let Ok(selector) = Selector::parse("meta[name][content]") else {
        return false;
    };
    document.select(&selector).any(|meta| {
        let element = meta.value();
        element
            .attr("name")
            .map_or(false, |name| name.eq_ignore_ascii_case("robots"))
            && element.attr("content").map_or(false, is_nofollow_directive)
    })
}

fn has_rel_nofollow(element: &ElementRef<'_>) -> bool {
    element
        .value()
        .attr("rel")
        .map_or(false, |rel| {
            rel.split_whitespace()
                .any(|r| r.eq_ignore_ascii_case("nofollow"))
        })
}

/// Reads `<base href>`, resolving protocol-relative values against the page
fn base_href(document: &Html, page_uri: &Url) -> Option<Url> {
    let selector = Selector::parse("base[href]").ok()?;
    let href = document
        .select(&selector)
        .next()?
        .value()
        .attr("href")?
        .trim();

    if href.is_empty() {
        return None;
    }
    if href.starts_with("//") {
        return Url::parse(&format!("{}:{}", page_uri.scheme(), href)).ok();
    }
    page_uri.join(href).ok()
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base: &Url, keep_fragment: bool) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    if !keep_fragment {
        url.set_fragment(None);
    }
    Some(url)
}
