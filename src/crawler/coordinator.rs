//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the dispatch loop that drives a crawl, including:
//! - Resolving collaborators, with defaults for anything not injected
//! - Loading robots.txt and merging its crawl delay into the rate limiter
//! - Seeding the frontier and checking the memory floor
//! - Running pages concurrently up to the configured limit
//! - Enforcing memory ceiling, cancellation, hard stop, stop and timeout

use crate::config::{validate, Config};
use crate::crawler::decision::{CrawlDecisionMaker, DecisionMaker};
use crate::crawler::events::CrawlEvents;
use crate::crawler::hooks::DecisionOverrides;
use crate::crawler::limiter::{DomainRateLimiter, DomainThrottle};
use crate::crawler::parser::{HtmlLinkParser, LinkParser};
use crate::crawler::processor::PageProcessor;
use crate::crawler::scheduler::{Frontier, Scheduler};
use crate::crawler::{HttpFetcher, PageFetcher};
use crate::memory::{CachedMemoryMonitor, MemoryMonitor, ProcessMemoryMonitor};
use crate::robots::{effective_crawl_delay, RobotsGate, RobotsOracle};
use crate::state::{CrawlContext, CrawlDecision, CrawledPage, PageToCrawl};
use crate::{CrawlError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Builds the frontier used by a single crawl
pub type FrontierFactory = Arc<dyn Fn(&Config) -> Arc<dyn Frontier> + Send + Sync>;

/// Outcome of a crawl
///
/// A crawl never fails through `Err`; the reason a crawl ended early is
/// carried in `error`.
#[derive(Debug)]
pub struct CrawlResult {
    /// The URI the crawl was started from
    pub root_uri: Url,

    pub elapsed: Duration,

    /// Why the crawl ended early, if it did
    pub error: Option<CrawlError>,

    /// Final state of the crawl
    pub context: Arc<CrawlContext>,
}

impl CrawlResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A polite web crawler
///
/// Subscribe to [`Crawler::events`] before calling [`Crawler::crawl`].
/// Subscriptions persist across crawls made with the same crawler.
pub struct Crawler {
    config: Arc<Config>,
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn LinkParser>,
    decisions: Arc<dyn DecisionMaker>,
    throttle: Arc<dyn DomainThrottle>,
    memory: Arc<dyn MemoryMonitor>,
    robots_oracle: Option<Arc<dyn RobotsOracle>>,
    frontier_factory: FrontierFactory,
    overrides: DecisionOverrides,
    events: CrawlEvents,
}

impl Crawler {
    /// Creates a crawler with default collaborators
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Successfully created crawler
    /// * `Err(CrawlError)` - Invalid configuration or HTTP client failure
    pub fn new(config: Config) -> Result<Self> {
        CrawlerBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> CrawlerBuilder {
        CrawlerBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lifecycle events raised during crawls
    pub fn events(&self) -> &CrawlEvents {
        &self.events
    }

    /// The per-authority throttle shared by every crawl of this crawler
    pub fn throttle(&self) -> &Arc<dyn DomainThrottle> {
        &self.throttle
    }

    /// Crawls the site rooted at `root`
    pub async fn crawl(&self, root: Url) -> CrawlResult {
        self.crawl_with_cancellation(root, CancellationToken::new())
            .await
    }

    /// Crawls the site rooted at `root` until done or `cancellation` fires
    ///
    /// A cancelled crawl hard-stops: queued pages are dropped, in-flight
    /// pages are abandoned and the result carries [`CrawlError::Cancelled`].
    pub async fn crawl_with_cancellation(
        &self,
        root: Url,
        cancellation: CancellationToken,
    ) -> CrawlResult {
        let frontier = (self.frontier_factory)(&self.config);
        let ctx = Arc::new(CrawlContext::new(
            root.clone(),
            self.config.clone(),
            frontier,
            cancellation,
        ));

        tracing::info!("About to crawl site [{}]", root);
        log_config_values(&self.config, &root);

        ctx.set_memory_usage_before_mb(self.memory.current_usage_mb());
        tracing::info!(
            "Starting memory usage for site [{}] is [{}mb]",
            root,
            ctx.memory_usage_before_mb()
        );

        let robots = if self.config.politeness.respect_robots_txt {
            Some(self.load_robots(&root).await)
        } else {
            None
        };

        if let Err(e) = self.verify_required_available_memory(&root) {
            tracing::error!("{}", e);
            ctx.record_error(e);
        } else {
            let processor = Arc::new(PageProcessor {
                ctx: ctx.clone(),
                events: Arc::new(self.events.snapshot()),
                fetcher: self.fetcher.clone(),
                parser: self.parser.clone(),
                decisions: self.decisions.clone(),
                throttle: self.throttle.clone(),
                robots,
                overrides: self.overrides.clone(),
            });

            processor.schedule(PageToCrawl::root(root.clone()));
            self.run(processor).await;
        }

        ctx.set_memory_usage_after_mb(self.memory.current_usage_mb());
        tracing::info!(
            "Ending memory usage for site [{}] is [{}mb]",
            root,
            ctx.memory_usage_after_mb()
        );

        let elapsed = ctx.elapsed();
        tracing::info!(
            "Crawl complete for site [{}]: Crawled [{}] pages in [{:?}]",
            ctx.root_uri(),
            ctx.crawled_count(),
            elapsed
        );

        CrawlResult {
            root_uri: root,
            elapsed,
            error: ctx.take_error(),
            context: ctx,
        }
    }

    /// Loads robots.txt for `root` and applies its crawl delay
    async fn load_robots(&self, root: &Url) -> Arc<RobotsGate> {
        let politeness = &self.config.politeness;
        let gate = Arc::new(RobotsGate::new(
            self.config.robots_user_agent(),
            politeness.ignore_robots_if_root_disallowed,
        ));

        match &self.robots_oracle {
            Some(oracle) => gate.set_oracle(oracle.clone()),
            None => {
                gate.load(root, self.fetcher.as_ref()).await;
            }
        }

        let robots_delay = gate.crawl_delay();
        let merged = effective_crawl_delay(
            robots_delay,
            politeness.min_crawl_delay_per_domain_ms,
            politeness.max_robots_crawl_delay_seconds,
        );

        if merged.from_robots {
            if merged.capped {
                tracing::warn!(
                    "[{}] robots.txt crawl delay of [{}] seconds is above the max of [{}] seconds, using the max",
                    root,
                    robots_delay.unwrap_or_default(),
                    politeness.max_robots_crawl_delay_seconds
                );
            }
            tracing::warn!(
                "[{}] robots.txt crawl delay of [{:?}] will be respected",
                root,
                merged.delay
            );
            self.throttle.add_domain(root, merged.delay);
        }

        gate
    }

    /// Fails when less than the configured minimum memory is available
    fn verify_required_available_memory(&self, root: &Url) -> Result<()> {
        let required_mb = self.config.memory.min_available_memory_mb;
        if required_mb == 0 {
            return Ok(());
        }

        match self.memory.available_mb() {
            Some(available_mb) if available_mb < required_mb => {
                Err(CrawlError::InsufficientMemory {
                    root: root.to_string(),
                    required_mb,
                    available_mb,
                })
            }
            Some(_) => Ok(()),
            None => {
                tracing::debug!(
                    "Available memory cannot be determined, skipping the {}mb check",
                    required_mb
                );
                Ok(())
            }
        }
    }

    /// The dispatch loop
    ///
    /// Keeps up to max-concurrency pages in flight and ends once the
    /// frontier is empty with nothing in flight, or on a hard stop.
    async fn run(&self, processor: Arc<PageProcessor>) {
        let ctx = processor.ctx.clone();
        let frontier = ctx.frontier().clone();
        let max_concurrency = self.config.crawler.max_concurrency.max(1);
        let root = ctx.root_uri();

        let finished = CancellationToken::new();
        let timeout = self.spawn_timeout(ctx.clone(), finished.clone());

        let mut tasks = JoinSet::new();
        let mut cancellation_reported = false;
        let mut stop_reported = false;

        loop {
            self.check_memory_usage(&ctx);

            if ctx.is_cancellation_requested() && !cancellation_reported {
                cancellation_reported = true;
                tracing::error!("Crawl cancellation requested for site [{}]!", root);
                ctx.record_error(CrawlError::Cancelled {
                    root: root.to_string(),
                });
                ctx.request_hard_stop();
            }

            if ctx.is_hard_stop_requested() {
                tracing::info!("Hard crawl stop requested for site [{}]!", root);
                frontier.clear();
                tasks.shutdown().await;
                frontier.clear();
                processor.events.clear();
                break;
            }

            if ctx.is_stop_requested() {
                if !stop_reported {
                    stop_reported = true;
                    tracing::info!("Crawl stop requested for site [{}]!", root);
                }
                frontier.clear();
            }

            while tasks.len() < max_concurrency {
                let Some(page) = processor.next_page() else {
                    break;
                };
                let worker = processor.clone();
                tasks.spawn(async move { worker.process(page).await });
            }

            if tasks.is_empty() {
                if frontier.count() == 0 {
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    if let Some(Err(e)) = joined {
                        if e.is_panic() {
                            tracing::error!("Page processing task panicked: {}", e);
                            ctx.record_error(CrawlError::TaskPanicked(e.to_string()));
                            ctx.request_hard_stop();
                        }
                    }
                }
                _ = ctx.hard_stop_token().cancelled() => {}
                _ = ctx.cancellation().cancelled(), if !cancellation_reported => {}
            }
        }

        finished.cancel();
        if let Some(timeout) = timeout {
            timeout.abort();
        }
    }

    /// Hard-stops the crawl once the configured timeout elapses
    fn spawn_timeout(
        &self,
        ctx: Arc<CrawlContext>,
        finished: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let seconds = self.config.crawler.crawl_timeout_seconds;
        if seconds == 0 {
            return None;
        }

        Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                    tracing::info!(
                        "Crawl timeout of [{}] seconds has been reached for [{}]",
                        seconds,
                        ctx.root_uri()
                    );
                    ctx.request_hard_stop();
                }
                _ = finished.cancelled() => {}
            }
        }))
    }

    fn check_memory_usage(&self, ctx: &CrawlContext) {
        let max_mb = self.config.memory.max_memory_usage_mb;
        if max_mb == 0 || ctx.is_hard_stop_requested() {
            return;
        }

        let usage_mb = self.memory.current_usage_mb();
        if usage_mb > max_mb {
            let error = CrawlError::MemoryCeilingExceeded {
                root: ctx.root_uri().to_string(),
                usage_mb,
                max_mb,
            };
            tracing::error!("{}", error);
            ctx.record_error(error);
            ctx.request_hard_stop();
        }
    }
}

/// Logs every effective configuration value at the start of a crawl
fn log_config_values(config: &Config, root: &Url) {
    let crawler = &config.crawler;
    let politeness = &config.politeness;
    let memory = &config.memory;

    let values: Vec<(&str, String)> = vec![
        ("max-concurrency", crawler.max_concurrency.to_string()),
        ("max-pages-to-crawl", crawler.max_pages_to_crawl.to_string()),
        (
            "max-pages-to-crawl-per-domain",
            crawler.max_pages_to_crawl_per_domain.to_string(),
        ),
        ("max-crawl-depth", crawler.max_crawl_depth.to_string()),
        ("max-page-size-bytes", crawler.max_page_size_bytes.to_string()),
        (
            "downloadable-content-types",
            crawler.downloadable_content_types.clone(),
        ),
        ("crawl-timeout-seconds", crawler.crawl_timeout_seconds.to_string()),
        (
            "http-request-timeout-seconds",
            crawler.http_request_timeout_seconds.to_string(),
        ),
        ("auto-redirects", crawler.auto_redirects.to_string()),
        ("max-auto-redirects", crawler.max_auto_redirects.to_string()),
        (
            "allow-external-crawling",
            crawler.allow_external_crawling.to_string(),
        ),
        (
            "allow-external-link-crawling",
            crawler.allow_external_link_crawling.to_string(),
        ),
        ("max-retry-count", crawler.max_retry_count.to_string()),
        ("min-retry-delay-ms", crawler.min_retry_delay_ms.to_string()),
        ("max-links-per-page", crawler.max_links_per_page.to_string()),
        ("forced-link-parsing", crawler.forced_link_parsing.to_string()),
        ("allow-uri-recrawling", crawler.allow_uri_recrawling.to_string()),
        (
            "respect-url-named-anchor",
            crawler.respect_url_named_anchor.to_string(),
        ),
        ("respect-robots-txt", politeness.respect_robots_txt.to_string()),
        (
            "ignore-robots-if-root-disallowed",
            politeness.ignore_robots_if_root_disallowed.to_string(),
        ),
        (
            "respect-meta-robots-nofollow",
            politeness.respect_meta_robots_nofollow.to_string(),
        ),
        ("respect-rel-nofollow", politeness.respect_rel_nofollow.to_string()),
        (
            "respect-x-robots-tag-nofollow",
            politeness.respect_x_robots_tag_nofollow.to_string(),
        ),
        (
            "min-crawl-delay-per-domain-ms",
            politeness.min_crawl_delay_per_domain_ms.to_string(),
        ),
        (
            "max-robots-crawl-delay-seconds",
            politeness.max_robots_crawl_delay_seconds.to_string(),
        ),
        ("robots-user-agent", config.robots_user_agent().to_string()),
        ("user-agent", config.user_agent.header_value()),
        (
            "min-available-memory-mb",
            memory.min_available_memory_mb.to_string(),
        ),
        ("max-memory-usage-mb", memory.max_memory_usage_mb.to_string()),
        (
            "cache-refresh-seconds",
            memory.cache_refresh_seconds.to_string(),
        ),
    ];

    tracing::info!("Configuration values for crawl of [{}]:", root);
    for (key, value) in values {
        tracing::info!("  {:<34}{}", key, value);
    }
}

/// Builds a [`Crawler`], defaulting every collaborator left unset
pub struct CrawlerBuilder {
    config: Config,
    fetcher: Option<Arc<dyn PageFetcher>>,
    parser: Option<Arc<dyn LinkParser>>,
    decisions: Option<Arc<dyn DecisionMaker>>,
    throttle: Option<Arc<dyn DomainThrottle>>,
    memory: Option<Arc<dyn MemoryMonitor>>,
    robots_oracle: Option<Arc<dyn RobotsOracle>>,
    frontier_factory: Option<FrontierFactory>,
    overrides: DecisionOverrides,
}

impl CrawlerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            fetcher: None,
            parser: None,
            decisions: None,
            throttle: None,
            memory: None,
            robots_oracle: None,
            frontier_factory: None,
            overrides: DecisionOverrides::default(),
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn link_parser(mut self, parser: Arc<dyn LinkParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn decision_maker(mut self, decisions: Arc<dyn DecisionMaker>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn throttle(mut self, throttle: Arc<dyn DomainThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn memory_monitor(mut self, memory: Arc<dyn MemoryMonitor>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Uses `oracle` as the robots.txt ruling instead of fetching robots.txt
    pub fn robots_oracle(mut self, oracle: Arc<dyn RobotsOracle>) -> Self {
        self.robots_oracle = Some(oracle);
        self
    }

    /// Builds a fresh frontier for every crawl
    pub fn frontier<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Config) -> Arc<dyn Frontier> + Send + Sync + 'static,
    {
        self.frontier_factory = Some(Arc::new(factory));
        self
    }

    /// Replaces every decision override at once
    pub fn overrides(mut self, overrides: DecisionOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn should_crawl_page<F>(mut self, f: F) -> Self
    where
        F: Fn(&PageToCrawl, &CrawlContext) -> CrawlDecision + Send + Sync + 'static,
    {
        self.overrides.should_crawl_page = Some(Arc::new(f));
        self
    }

    pub fn should_download_page_content<F>(mut self, f: F) -> Self
    where
        F: Fn(&CrawledPage, &CrawlContext) -> CrawlDecision + Send + Sync + 'static,
    {
        self.overrides.should_download_page_content = Some(Arc::new(f));
        self
    }

    pub fn should_crawl_page_links<F>(mut self, f: F) -> Self
    where
        F: Fn(&CrawledPage, &CrawlContext) -> CrawlDecision + Send + Sync + 'static,
    {
        self.overrides.should_crawl_page_links = Some(Arc::new(f));
        self
    }

    pub fn should_recrawl_page<F>(mut self, f: F) -> Self
    where
        F: Fn(&CrawledPage, &CrawlContext) -> CrawlDecision + Send + Sync + 'static,
    {
        self.overrides.should_recrawl_page = Some(Arc::new(f));
        self
    }

    pub fn should_schedule_link<F>(mut self, f: F) -> Self
    where
        F: Fn(&Url, &CrawledPage, &CrawlContext) -> bool + Send + Sync + 'static,
    {
        self.overrides.should_schedule_link = Some(Arc::new(f));
        self
    }

    /// Decides whether a URI is internal; called with `(uri, root)`
    pub fn is_internal_uri<F>(mut self, f: F) -> Self
    where
        F: Fn(&Url, &Url) -> bool + Send + Sync + 'static,
    {
        self.overrides.is_internal_uri = Some(Arc::new(f));
        self
    }

    /// Validates the configuration and assembles the crawler
    pub fn build(self) -> Result<Crawler> {
        validate(&self.config)?;
        let config = Arc::new(self.config);

        let fetcher: Arc<dyn PageFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&config)?),
        };

        let parser: Arc<dyn LinkParser> = match self.parser {
            Some(parser) => parser,
            None => Arc::new(HtmlLinkParser::from_config(&config)),
        };

        let decisions: Arc<dyn DecisionMaker> = match self.decisions {
            Some(decisions) => decisions,
            None => Arc::new(CrawlDecisionMaker::new()),
        };

        let throttle: Arc<dyn DomainThrottle> = match self.throttle {
            Some(throttle) => throttle,
            None => Arc::new(DomainRateLimiter::new(Duration::from_millis(
                config.politeness.min_crawl_delay_per_domain_ms,
            ))),
        };

        let memory: Arc<dyn MemoryMonitor> = match self.memory {
            Some(memory) => memory,
            None => Arc::new(CachedMemoryMonitor::new(
                Arc::new(ProcessMemoryMonitor::new()),
                Duration::from_secs(config.memory.cache_refresh_seconds),
            )),
        };

        let frontier_factory: FrontierFactory = match self.frontier_factory {
            Some(factory) => factory,
            None => Arc::new(|config: &Config| -> Arc<dyn Frontier> {
                Arc::new(Scheduler::new(config.crawler.allow_uri_recrawling))
            }),
        };

        Ok(Crawler {
            config,
            fetcher,
            parser,
            decisions,
            throttle,
            memory,
            robots_oracle: self.robots_oracle,
            frontier_factory,
            overrides: self.overrides,
            events: CrawlEvents::new(),
        })
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("config", &self.config)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}
