//! Per-page crawl pipeline
//!
//! Every dequeued page runs through the same steps: fetch, root-redirect
//! validation, manual redirect handling, size gate, link decision, link
//! parsing, child scheduling, completion events and the retry decision.
//! Cancellation is checked between the steps.

use crate::crawler::decision::{DecisionMaker, MAX_PAGES_REASON};
use crate::crawler::events::{
    CrawlEvents, PageCrawlCompletedArgs, PageCrawlDisallowedArgs, PageCrawlStartingArgs,
    PageLinksCrawlDisallowedArgs,
};
use crate::crawler::hooks::DecisionOverrides;
use crate::crawler::limiter::DomainThrottle;
use crate::crawler::parser::LinkParser;
use crate::crawler::{Frontier, PageFetcher};
use crate::robots::RobotsGate;
use crate::state::{CrawlContext, CrawlDecision, CrawledPage, PageToCrawl};
use crate::{CrawlError, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Redirect chains at or past this position are abandoned
const MAX_REDIRECT_CHAIN: u32 = 20;

/// Outcome of the admission check for a page about to be scheduled
#[derive(Debug, PartialEq)]
enum Admission {
    Allowed,

    /// Denied with a reason reported through the disallowed event
    Denied(String),

    /// Denied silently: external page or page limit already reached
    Skipped,
}

/// Runs pages through the crawl pipeline
///
/// One processor is shared by every worker of a crawl.
pub(crate) struct PageProcessor {
    pub(crate) ctx: Arc<CrawlContext>,
    pub(crate) events: Arc<CrawlEvents>,
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) parser: Arc<dyn LinkParser>,
    pub(crate) decisions: Arc<dyn DecisionMaker>,
    pub(crate) throttle: Arc<dyn DomainThrottle>,
    pub(crate) robots: Option<Arc<RobotsGate>>,
    pub(crate) overrides: DecisionOverrides,
}

impl PageProcessor {
    /// Schedules a page after the admission check
    ///
    /// Used for the root page and for manual redirect targets. Returns true
    /// if the page was added to the frontier.
    pub(crate) fn schedule(&self, page: PageToCrawl) -> bool {
        let skip_known = !self.ctx.config().crawler.allow_uri_recrawling;
        match self.try_enqueue(&page, skip_known) {
            Admission::Allowed => true,
            Admission::Denied(reason) => {
                self.fire_page_disallowed(page, reason);
                false
            }
            Admission::Skipped => false,
        }
    }

    /// Dequeues the next page and registers its crawl
    ///
    /// Dequeue and registration happen under the schedule gate so that
    /// `crawled + frontier` never undercounts during admission.
    /// Nothing is handed out once a stop of either kind has been requested.
    pub(crate) fn next_page(&self) -> Option<PageToCrawl> {
        let _gate = self.ctx.schedule_gate();
        if self.ctx.is_stop_requested() || self.ctx.is_hard_stop_requested() {
            return None;
        }
        let mut page = self.ctx.frontier().get_next()?;
        if page.is_retry {
            page.retry_count += 1;
        } else {
            self.ctx.register_crawl(&page.uri);
        }
        Some(page)
    }

    /// Processes one page; failures end the crawl with a hard stop
    pub(crate) async fn process(&self, page: PageToCrawl) {
        let uri = page.uri.clone();
        match self.process_page(page).await {
            Ok(()) => {}
            Err(CrawlError::Cancelled { .. }) => {
                tracing::debug!("Processing of page [{}] was cancelled", uri);
            }
            Err(e) => {
                tracing::error!("Error occurred during processing of page [{}]: {}", uri, e);
                self.ctx.record_error(CrawlError::Processing {
                    url: uri.to_string(),
                    message: e.to_string(),
                });
                self.ctx.request_hard_stop();
            }
        }
    }

    async fn process_page(&self, page: PageToCrawl) -> Result<()> {
        self.check_cancelled()?;

        let mut crawled = self.crawl_the_page(page).await?;

        if crawled.is_root {
            self.validate_root_redirect(&crawled);
        }

        if !self.ctx.config().crawler.auto_redirects && self.is_redirect(&crawled) {
            self.process_redirect(&mut crawled);
        }

        let max_size = self.ctx.config().crawler.max_page_size_bytes;
        let oversized = max_size > 0 && crawled.content.bytes.len() as u64 > max_size;
        if oversized {
            tracing::debug!(
                "Page [{}] has a size of [{}] bytes which is above the max allowable of [{}] bytes",
                crawled.uri,
                crawled.content.bytes.len(),
                max_size
            );
        } else {
            self.check_cancelled()?;

            let links_allowed = self.should_crawl_page_links(&crawled);
            if links_allowed || self.ctx.config().crawler.forced_link_parsing {
                crawled.parsed_links = Some(self.parser.extract(&crawled)?);
            }

            self.check_cancelled()?;

            if links_allowed {
                self.schedule_page_links(&crawled);
            }
        }

        self.check_cancelled()?;

        let crawled = Arc::new(crawled);
        self.fire_page_crawl_completed(&crawled).await;

        if self.should_recrawl_page(&crawled) {
            let mut retry = crawled.request.clone();
            retry.is_retry = true;
            retry.retry_after = retry_after_seconds(&crawled);
            tracing::debug!(
                "Rescheduling page [{}] for retry [{}]",
                retry.uri,
                retry.retry_count + 1
            );
            let _gate = self.ctx.schedule_gate();
            if !self.ctx.is_stop_requested() {
                self.ctx.frontier().add(retry);
            }
        }

        Ok(())
    }

    /// Fires the starting events, waits for politeness and fetches the page
    async fn crawl_the_page(&self, mut page: PageToCrawl) -> Result<CrawledPage> {
        if !self.ctx.is_hard_stop_requested() {
            let args = PageCrawlStartingArgs {
                context: self.ctx.clone(),
                page: page.clone(),
            };
            drop(self.events.page_crawl_starting.fire_async(&args));
            self.events.page_crawl_starting.fire(&args);
        }

        if page.is_retry {
            self.wait_retry_delay(&page).await?;
        }

        self.cancellable(self.throttle.rate_limit(&page.uri)).await?;

        page.last_request_time = Some(Utc::now());

        let download = |candidate: &CrawledPage| self.download_decision(candidate);
        let mut crawled = self
            .cancellable(self.fetcher.fetch(&page.uri, &download))
            .await?;
        crawled.map_from(&page);

        tracing::info!(
            "Page crawl complete, Status:[{}] Url:[{}] Elapsed:[{}ms] Parent:[{}] Retry:[{}]",
            crawled
                .status()
                .map_or_else(|| "NA".to_string(), |s| s.as_u16().to_string()),
            crawled.uri,
            crawled.elapsed().as_millis(),
            crawled.parent_uri.as_ref().map_or("", |p| p.as_str()),
            crawled.retry_count
        );

        Ok(crawled)
    }

    /// Waits before re-fetching a page that failed at the transport level
    ///
    /// Honors the `Retry-After` hint when present, the configured minimum
    /// retry delay otherwise.
    async fn wait_retry_delay(&self, page: &PageToCrawl) -> Result<()> {
        let Some(last_request) = page.last_request_time else {
            tracing::warn!(
                "No last request time for page [{}], retrying without delay",
                page.uri
            );
            return Ok(());
        };

        let elapsed_ms = (Utc::now() - last_request).num_milliseconds().max(0) as f64;
        let wait_ms = match page.retry_after {
            Some(secs) => secs * 1000.0 - elapsed_ms,
            None => self.ctx.config().crawler.min_retry_delay_ms as f64 - elapsed_ms,
        };

        if wait_ms > 0.0 {
            tracing::debug!("Waiting [{:.0}ms] before retrying page [{}]", wait_ms, page.uri);
            self.cancellable(tokio::time::sleep(Duration::from_millis(wait_ms as u64)))
                .await?;
        }
        Ok(())
    }

    fn download_decision(&self, page: &CrawledPage) -> CrawlDecision {
        let decision = self.decisions.should_download_page_content(page, &self.ctx);
        let decision = self.overrides.refine_download(decision, page, &self.ctx);
        self.apply_stop_signals(&decision);

        if !decision.allow {
            tracing::debug!(
                "Download of page [{}] denied, [{}]",
                page.uri,
                decision.reason
            );
        }
        decision
    }

    fn is_redirect(&self, page: &CrawledPage) -> bool {
        let Some(response) = page.response.as_ref() else {
            return false;
        };
        if self.ctx.config().crawler.auto_redirects {
            response.response_uri != page.uri
        } else {
            response.status.is_redirection()
        }
    }

    /// Target of a redirect response
    ///
    /// With transport-level redirects this is the final response URI;
    /// otherwise the `Location` header, resolved against the page URI.
    fn redirect_target(&self, page: &CrawledPage) -> Option<Url> {
        let response = page.response.as_ref()?;
        if self.ctx.config().crawler.auto_redirects {
            (response.response_uri != page.uri).then(|| response.response_uri.clone())
        } else {
            page.uri.join(response.header("location")?).ok()
        }
    }

    fn validate_root_redirect(&self, page: &CrawledPage) {
        if !self.is_redirect(page) {
            return;
        }
        if let Some(target) = self.redirect_target(page) {
            tracing::info!(
                "The root URI [{}] redirected to [{}]. [{}] is the new root.",
                page.uri,
                target,
                target
            );
            self.ctx.set_root_uri(target);
        }
    }

    fn process_redirect(&self, page: &mut CrawledPage) {
        if page.redirect_position >= MAX_REDIRECT_CHAIN {
            tracing::warn!(
                "Page [{}] is part of a chain of {} or more consecutive redirects, \
                 redirects for this chain will now be aborted",
                page.uri,
                MAX_REDIRECT_CHAIN
            );
            return;
        }

        let Some(target) = self.redirect_target(page) else {
            tracing::warn!(
                "Page [{}] answered with a redirect but no usable Location header",
                page.uri
            );
            return;
        };

        let is_internal = self.overrides.is_internal(&target, &self.ctx);
        let next = PageToCrawl::redirect_of(target.clone(), &page.request, is_internal);
        page.redirected_to = Some(target);

        if next.is_internal || self.ctx.config().crawler.allow_external_crawling {
            self.schedule(next);
        }
    }

    fn should_crawl_page_links(&self, page: &CrawledPage) -> bool {
        let decision = self.decisions.should_crawl_page_links(page, &self.ctx);
        let decision = self.overrides.refine_links(decision, page, &self.ctx);
        self.apply_stop_signals(&decision);

        if !decision.allow {
            tracing::debug!(
                "Links on page [{}] not crawled, [{}]",
                page.uri,
                decision.reason
            );
            if !self.ctx.is_hard_stop_requested() {
                let args = PageLinksCrawlDisallowedArgs {
                    context: self.ctx.clone(),
                    page: Arc::new(page.clone()),
                    reason: decision.reason,
                };
                drop(self.events.page_links_crawl_disallowed.fire_async(&args));
                self.events.page_links_crawl_disallowed.fire(&args);
            }
            return false;
        }
        true
    }

    /// Admits and enqueues the parsed links of a page
    ///
    /// Every link looked at is marked known, scheduled or not. Caller
    /// overrides for a link run before the schedule gate is taken.
    fn schedule_page_links(&self, page: &CrawledPage) {
        let Some(links) = page.parsed_links.as_deref() else {
            return;
        };
        let max_links = self.ctx.config().crawler.max_links_per_page;
        let frontier = self.ctx.frontier();
        let mut scheduled = 0usize;

        for uri in links {
            if !frontier.is_uri_known(uri)
                && self.overrides.should_schedule_link(uri, page, &self.ctx)
            {
                let is_internal = self.overrides.is_internal(uri, &self.ctx);
                let child = PageToCrawl::child_of(uri.clone(), &page.request, is_internal);
                match self.try_enqueue(&child, true) {
                    Admission::Allowed => scheduled += 1,
                    Admission::Denied(reason) => self.fire_page_disallowed(child, reason),
                    Admission::Skipped => {}
                }
            }

            frontier.add_known_uri(uri);

            if max_links > 0 && scheduled >= max_links {
                tracing::info!(
                    "MaxLinksPerPage has been reached. No more links will be scheduled \
                     for current page [{}].",
                    page.uri
                );
                break;
            }
        }
    }

    /// Runs the admission checks and enqueues the page when it is allowed
    ///
    /// Only the checks that read the crawl counters, and the enqueue itself,
    /// run under the schedule gate. With `skip_known`, a URI already in the
    /// seen set is skipped.
    fn try_enqueue(&self, page: &PageToCrawl, skip_known: bool) -> Admission {
        let precheck = self.precheck(page);
        if precheck != Admission::Allowed {
            return precheck;
        }

        let _gate = self.ctx.schedule_gate();
        if skip_known && self.ctx.frontier().is_uri_known(&page.uri) {
            return Admission::Skipped;
        }

        let admission = self.admit(page);
        if admission == Admission::Allowed {
            if !page.is_retry {
                self.ctx.reserve_domain_slot(&page.uri);
            }
            self.ctx.frontier().add(page.clone());
        }
        admission
    }

    /// Admission checks that depend only on the page itself
    fn precheck(&self, page: &PageToCrawl) -> Admission {
        if !page.is_internal && !self.ctx.config().crawler.allow_external_crawling {
            return Admission::Skipped;
        }

        if let Some(robots) = &self.robots {
            let decision = robots.check(page);
            if !decision.allow {
                tracing::debug!("Page [{}] not crawled, [{}]", page.uri, decision.reason);
                return Admission::Denied(decision.reason);
            }
        }

        Admission::Allowed
    }

    /// Admission checks against the shared crawl state
    ///
    /// Must be called with the schedule gate held; fires no events.
    fn admit(&self, page: &PageToCrawl) -> Admission {
        if self.ctx.is_stop_requested() || self.ctx.is_hard_stop_requested() {
            return Admission::Skipped;
        }

        if self.ctx.is_max_pages_reached() {
            return Admission::Skipped;
        }

        let decision = self.decisions.should_crawl_page(page, &self.ctx);
        if !decision.allow && decision.reason.contains(MAX_PAGES_REASON) {
            if self.ctx.mark_max_pages_reached() {
                tracing::info!(
                    "MaxPagesToCrawlLimit has been reached or scheduled. No more pages will be scheduled."
                );
            }
            return Admission::Skipped;
        }

        let decision = self.overrides.refine_page(decision, page, &self.ctx);
        self.apply_stop_signals(&decision);

        if decision.allow {
            Admission::Allowed
        } else {
            tracing::debug!("Page [{}] not crawled, [{}]", page.uri, decision.reason);
            Admission::Denied(decision.reason)
        }
    }

    fn should_recrawl_page(&self, page: &CrawledPage) -> bool {
        let decision = self.decisions.should_recrawl_page(page, &self.ctx);
        let decision = self.overrides.refine_recrawl(decision, page, &self.ctx);
        self.apply_stop_signals(&decision);

        if !decision.allow {
            tracing::trace!("Page [{}] not recrawled, [{}]", page.uri, decision.reason);
        }
        decision.allow
    }

    /// Turns a decision's stop flags into a crawl stop request
    fn apply_stop_signals(&self, decision: &CrawlDecision) {
        if decision.should_hard_stop {
            tracing::info!(
                "Decision marked crawl [Hard Stop] for site [{}], [{}]",
                self.ctx.root_uri(),
                decision.reason
            );
            self.ctx.request_hard_stop();
        } else if decision.should_stop {
            tracing::info!(
                "Decision marked crawl [Stop] for site [{}], [{}]",
                self.ctx.root_uri(),
                decision.reason
            );
            self.ctx.request_stop();
        }
    }

    fn fire_page_disallowed(&self, page: PageToCrawl, reason: String) {
        if self.ctx.is_hard_stop_requested() {
            return;
        }
        let args = PageCrawlDisallowedArgs {
            context: self.ctx.clone(),
            page,
            reason,
        };
        drop(self.events.page_crawl_disallowed.fire_async(&args));
        self.events.page_crawl_disallowed.fire(&args);
    }

    /// Fires the completed events, async handlers first
    ///
    /// When the frontier is empty this may be the last page of the crawl,
    /// so the async handlers are awaited before returning.
    async fn fire_page_crawl_completed(&self, page: &Arc<CrawledPage>) {
        if self.ctx.is_hard_stop_requested() {
            return;
        }
        let args = PageCrawlCompletedArgs {
            context: self.ctx.clone(),
            page: page.clone(),
        };
        let handles = self.events.page_crawl_completed.fire_async(&args);
        if self.ctx.frontier().count() == 0 {
            for handle in handles {
                let _ = handle.await;
            }
        }
        self.events.page_crawl_completed.fire(&args);
    }

    fn cancelled(&self) -> CrawlError {
        CrawlError::Cancelled {
            root: self.ctx.root_uri().to_string(),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.ctx.is_cancellation_requested() || self.ctx.is_hard_stop_requested() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    /// Races a future against cancellation and hard stop
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.ctx.cancellation().cancelled() => Err(self.cancelled()),
            _ = self.ctx.hard_stop_token().cancelled() => Err(self.cancelled()),
            out = fut => Ok(out),
        }
    }
}

/// Seconds to wait before retrying, from the page's `Retry-After` header
///
/// Accepts both forms of the header: a delay in seconds, or an HTTP date
/// measured from the time the request was sent.
pub(crate) fn retry_after_seconds(page: &CrawledPage) -> Option<f64> {
    let value = page.response.as_ref()?.header("retry-after")?.trim();

    if let Ok(secs) = value.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then_some(secs);
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let sent = page.last_request_time?;
    Some(((date - sent).num_milliseconds() as f64 / 1000.0).max(0.0))
}
