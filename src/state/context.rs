//! Per-crawl shared state

use crate::config::Config;
use crate::crawler::Frontier;
use crate::url::extract_authority;
use crate::CrawlError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// State shared by every worker of one crawl
///
/// Exactly one context exists per call to [`crate::Crawler::crawl`]. All
/// mutable fields are atomics, concurrent maps or short-lived locks so the
/// context can be read and updated from many tasks at once.
pub struct CrawlContext {
    root_uri: RwLock<Url>,
    original_root_uri: Url,

    crawled_count: AtomicU64,
    crawl_count_by_domain: DashMap<String, u64>,
    scheduled_count_by_domain: DashMap<String, u64>,

    crawl_start_date: DateTime<Utc>,
    crawl_start: Instant,

    stop_requested: AtomicBool,
    hard_stop: CancellationToken,
    cancellation: CancellationToken,

    memory_usage_before_mb: AtomicU64,
    memory_usage_after_mb: AtomicU64,

    max_pages_reached: AtomicBool,
    schedule_gate: Mutex<()>,
    terminal_error: Mutex<Option<CrawlError>>,

    frontier: Arc<dyn Frontier>,
    config: Arc<Config>,
}

impl CrawlContext {
    pub fn new(
        root_uri: Url,
        config: Arc<Config>,
        frontier: Arc<dyn Frontier>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            original_root_uri: root_uri.clone(),
            root_uri: RwLock::new(root_uri),
            crawled_count: AtomicU64::new(0),
            crawl_count_by_domain: DashMap::new(),
            scheduled_count_by_domain: DashMap::new(),
            crawl_start_date: Utc::now(),
            crawl_start: Instant::now(),
            stop_requested: AtomicBool::new(false),
            hard_stop: CancellationToken::new(),
            cancellation,
            memory_usage_before_mb: AtomicU64::new(0),
            memory_usage_after_mb: AtomicU64::new(0),
            max_pages_reached: AtomicBool::new(false),
            schedule_gate: Mutex::new(()),
            terminal_error: Mutex::new(None),
            frontier,
            config,
        }
    }

    /// The effective root URI, updated when the root page redirects
    pub fn root_uri(&self) -> Url {
        self.root_uri
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_root_uri(&self, uri: Url) {
        *self
            .root_uri
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = uri;
    }

    /// The seed URI the crawl was started with
    pub fn original_root_uri(&self) -> &Url {
        &self.original_root_uri
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn frontier(&self) -> &Arc<dyn Frontier> {
        &self.frontier
    }

    /// Number of distinct page crawls started (retries excluded)
    pub fn crawled_count(&self) -> u64 {
        self.crawled_count.load(Ordering::SeqCst)
    }

    /// Number of page crawls started for an authority (`host[:port]`)
    pub fn domain_crawl_count(&self, authority: &str) -> u64 {
        self.crawl_count_by_domain
            .get(authority)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Number of pages admitted to the frontier for an authority
    ///
    /// Counts every reservation, including pages not yet dequeued.
    pub fn domain_scheduled_count(&self, authority: &str) -> u64 {
        self.scheduled_count_by_domain
            .get(authority)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Reserves one per-domain slot for a page entering the frontier
    pub(crate) fn reserve_domain_slot(&self, uri: &Url) {
        *self
            .scheduled_count_by_domain
            .entry(extract_authority(uri))
            .or_insert(0) += 1;
    }

    /// Records that a page crawl has started
    ///
    /// Retries bump the page's own retry count and leave the crawl
    /// counters untouched.
    pub fn register_crawl(&self, uri: &Url) {
        self.crawled_count.fetch_add(1, Ordering::SeqCst);
        *self
            .crawl_count_by_domain
            .entry(extract_authority(uri))
            .or_insert(0) += 1;
    }

    pub fn crawl_start_date(&self) -> DateTime<Utc> {
        self.crawl_start_date
    }

    pub fn elapsed(&self) -> Duration {
        self.crawl_start.elapsed()
    }

    /// Requests a soft stop; returns true for the first caller only
    pub fn request_stop(&self) -> bool {
        !self.stop_requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Requests a hard stop; returns true for the first caller only
    pub fn request_hard_stop(&self) -> bool {
        if self.hard_stop.is_cancelled() {
            return false;
        }
        self.hard_stop.cancel();
        true
    }

    pub fn is_hard_stop_requested(&self) -> bool {
        self.hard_stop.is_cancelled()
    }

    /// Token cancelled once a hard stop has been requested
    pub fn hard_stop_token(&self) -> &CancellationToken {
        &self.hard_stop
    }

    /// External cancellation signal for this crawl
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn memory_usage_before_mb(&self) -> u64 {
        self.memory_usage_before_mb.load(Ordering::Relaxed)
    }

    pub fn set_memory_usage_before_mb(&self, mb: u64) {
        self.memory_usage_before_mb.store(mb, Ordering::Relaxed);
    }

    pub fn memory_usage_after_mb(&self) -> u64 {
        self.memory_usage_after_mb.load(Ordering::Relaxed)
    }

    pub fn set_memory_usage_after_mb(&self, mb: u64) {
        self.memory_usage_after_mb.store(mb, Ordering::Relaxed);
    }

    /// True once the global page limit has been hit by an admission check
    pub fn is_max_pages_reached(&self) -> bool {
        self.max_pages_reached.load(Ordering::SeqCst)
    }

    /// Sets the sticky page limit flag; returns true for the first caller only
    pub fn mark_max_pages_reached(&self) -> bool {
        !self.max_pages_reached.swap(true, Ordering::SeqCst)
    }

    /// Serializes admission and dequeue so `crawled + frontier` is exact
    ///
    /// Never hold the returned guard across an `.await`.
    pub fn schedule_gate(&self) -> MutexGuard<'_, ()> {
        self.schedule_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the error that ended the crawl; only the first one is kept
    pub fn record_error(&self, error: CrawlError) {
        let mut slot = self
            .terminal_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub fn has_error(&self) -> bool {
        self.terminal_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    pub(crate) fn take_error(&self) -> Option<CrawlError> {
        self.terminal_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl std::fmt::Debug for CrawlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlContext")
            .field("root_uri", &self.root_uri().as_str())
            .field("original_root_uri", &self.original_root_uri.as_str())
            .field("crawled_count", &self.crawled_count())
            .field("frontier_count", &self.frontier.count())
            .field("stop_requested", &self.is_stop_requested())
            .field("hard_stop_requested", &self.is_hard_stop_requested())
            .finish()
    }
}
