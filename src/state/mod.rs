//! State module for a single crawl
//!
//! This module provides the values that flow through the crawl pipeline.
//!
//! # Components
//!
//! - `PageToCrawl`: A page waiting in (or pulled from) the frontier
//! - `CrawledPage`: The outcome of fetching a `PageToCrawl`
//! - `CrawlDecision`: The verdict returned by every decision point
//! - `CrawlContext`: Per-crawl shared state mutated by all workers
//! - `PageBag`: Caller-attached data carried alongside a page

mod bag;
mod context;
mod decision;
mod page;

// Re-export main types
pub use bag::PageBag;
pub use context::CrawlContext;
pub use decision::CrawlDecision;
pub use page::{CrawledPage, HttpResponse, PageContent, PageToCrawl};
