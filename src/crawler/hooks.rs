//! Caller-supplied decision overrides
//!
//! Overrides refine the built-in decisions; they are only consulted after
//! the built-in decision allowed.

use crate::state::{CrawlContext, CrawlDecision, CrawledPage, PageToCrawl};
use std::sync::Arc;
use url::Url;

pub type PageDecisionFn = Arc<dyn Fn(&PageToCrawl, &CrawlContext) -> CrawlDecision + Send + Sync>;
pub type CrawledPageDecisionFn =
    Arc<dyn Fn(&CrawledPage, &CrawlContext) -> CrawlDecision + Send + Sync>;
pub type ScheduleLinkFn = Arc<dyn Fn(&Url, &CrawledPage, &CrawlContext) -> bool + Send + Sync>;
pub type IsInternalFn = Arc<dyn Fn(&Url, &Url) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct DecisionOverrides {
    pub should_crawl_page: Option<PageDecisionFn>,
    pub should_download_page_content: Option<CrawledPageDecisionFn>,
    pub should_crawl_page_links: Option<CrawledPageDecisionFn>,
    pub should_recrawl_page: Option<CrawledPageDecisionFn>,

    /// Per-link filter applied before a discovered link is evaluated
    pub should_schedule_link: Option<ScheduleLinkFn>,

    /// Decides whether a URI belongs to a root; called with `(uri, root)`
    pub is_internal_uri: Option<IsInternalFn>,
}

impl DecisionOverrides {
    /// Combines a built-in page decision with the caller override
    pub(crate) fn refine_page(
        &self,
        decision: CrawlDecision,
        page: &PageToCrawl,
        ctx: &CrawlContext,
    ) -> CrawlDecision {
        match &self.should_crawl_page {
            Some(f) if decision.allow => f(page, ctx),
            _ => decision,
        }
    }

    pub(crate) fn refine_download(
        &self,
        decision: CrawlDecision,
        page: &CrawledPage,
        ctx: &CrawlContext,
    ) -> CrawlDecision {
        refine(&self.should_download_page_content, decision, page, ctx)
    }

    pub(crate) fn refine_links(
        &self,
        decision: CrawlDecision,
        page: &CrawledPage,
        ctx: &CrawlContext,
    ) -> CrawlDecision {
        refine(&self.should_crawl_page_links, decision, page, ctx)
    }

    pub(crate) fn refine_recrawl(
        &self,
        decision: CrawlDecision,
        page: &CrawledPage,
        ctx: &CrawlContext,
    ) -> CrawlDecision {
        refine(&self.should_recrawl_page, decision, page, ctx)
    }

    pub(crate) fn should_schedule_link(
        &self,
        uri: &Url,
        page: &CrawledPage,
        ctx: &CrawlContext,
    ) -> bool {
        self.should_schedule_link
            .as_ref()
            .map_or(true, |f| f(uri, page, ctx))
    }

    /// True when `uri` belongs to the current or the original root
    pub(crate) fn is_internal(&self, uri: &Url, ctx: &CrawlContext) -> bool {
        let check = |root: &Url| match &self.is_internal_uri {
            Some(f) => f(uri, root),
            None => crate::url::is_internal_uri(uri, root),
        };
        check(&ctx.root_uri()) || check(ctx.original_root_uri())
    }
}

fn refine(
    hook: &Option<CrawledPageDecisionFn>,
    decision: CrawlDecision,
    page: &CrawledPage,
    ctx: &CrawlContext,
) -> CrawlDecision {
    match hook {
        Some(f) if decision.allow => f(page, ctx),
        _ => decision,
    }
}

impl std::fmt::Debug for DecisionOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionOverrides")
            .field("should_crawl_page", &self.should_crawl_page.is_some())
            .field(
                "should_download_page_content",
                &self.should_download_page_content.is_some(),
            )
            .field("should_crawl_page_links", &self.should_crawl_page_links.is_some())
            .field("should_recrawl_page", &self.should_recrawl_page.is_some())
            .field("should_schedule_link", &self.should_schedule_link.is_some())
            .field("is_internal_uri", &self.is_internal_uri.is_some())
            .finish()
    }
}
