//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - The frontier: FIFO queue plus seen-URI set
//! - Crawl decisions and caller overrides
//! - Per-authority rate limiting
//! - HTTP fetching and HTML link extraction
//! - The per-page pipeline and the concurrent dispatch loop
//! - Lifecycle events

mod coordinator;
mod decision;
pub mod events;
mod fetcher;
mod hooks;
mod limiter;
mod parser;
mod processor;
mod scheduler;

pub use coordinator::{CrawlResult, Crawler, CrawlerBuilder, FrontierFactory};
pub use decision::{CrawlDecisionMaker, DecisionMaker, MAX_PAGES_REASON};
pub use events::CrawlEvents;
pub use fetcher::{
    build_http_client, charset_from_content_type, DownloadDecision, HttpFetcher, PageFetcher,
};
pub use hooks::{
    CrawledPageDecisionFn, DecisionOverrides, IsInternalFn, PageDecisionFn, ScheduleLinkFn,
};
pub use limiter::{DomainRateLimiter, DomainThrottle};
pub use parser::{HtmlLinkParser, LinkParser};
pub use scheduler::{Frontier, Scheduler};
