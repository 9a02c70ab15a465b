//! Crawl frontier: the queue of pages to crawl plus the seen-URI set
//!
//! This module handles:
//! - FIFO ordering of pages waiting to be fetched
//! - At-most-once scheduling of each URI (unless recrawling is enabled)
//! - Unconditional re-enqueueing of retries
//! - Recording URIs as known without scheduling them

use crate::state::PageToCrawl;
use crate::url::uri_fingerprint;
use dashmap::DashSet;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// The frontier contract used by the crawler
///
/// Implementations must be safe to call from many tasks at once. `add`
/// must test-and-set against the seen set atomically so a URI discovered
/// concurrently on several pages is enqueued at most once.
pub trait Frontier: Send + Sync {
    /// Schedules a page
    ///
    /// Retries, and every page when recrawling is enabled, are enqueued
    /// unconditionally. Other pages are enqueued only if their URI is new.
    fn add(&self, page: PageToCrawl);

    /// Applies [`Frontier::add`] to each page in order
    fn add_batch(&self, pages: Vec<PageToCrawl>) {
        for page in pages {
            self.add(page);
        }
    }

    /// Dequeues the next page; `None` means currently empty, not finished
    fn get_next(&self) -> Option<PageToCrawl>;

    /// Number of queued pages
    fn count(&self) -> usize;

    /// Marks a URI as seen without enqueueing it
    fn add_known_uri(&self, uri: &Url);

    /// Membership test against the seen set only
    fn is_uri_known(&self, uri: &Url) -> bool;

    /// Drops every queued page; the seen set is left untouched
    fn clear(&self);
}

/// Seen-URI storage
///
/// Compact fingerprints bound memory for long crawls. Literal URIs are
/// kept when recrawling is enabled, since duplicates are expected there
/// and a hash collision would silently hide a page.
#[derive(Debug)]
enum SeenSet {
    Hashed(DashSet<u64>),
    Literal(DashSet<String>),
}

impl SeenSet {
    /// Returns true if the URI was not present before
    fn insert(&self, uri: &Url) -> bool {
        match self {
            SeenSet::Hashed(set) => set.insert(uri_fingerprint(uri)),
            SeenSet::Literal(set) => set.insert(uri.as_str().to_string()),
        }
    }

    fn contains(&self, uri: &Url) -> bool {
        match self {
            SeenSet::Hashed(set) => set.contains(&uri_fingerprint(uri)),
            SeenSet::Literal(set) => set.contains(uri.as_str()),
        }
    }

    fn len(&self) -> usize {
        match self {
            SeenSet::Hashed(set) => set.len(),
            SeenSet::Literal(set) => set.len(),
        }
    }
}

/// Default in-memory [`Frontier`]
#[derive(Debug)]
pub struct Scheduler {
    allow_uri_recrawling: bool,

    /// Pages waiting to be fetched, in insertion order
    queue: Mutex<VecDeque<PageToCrawl>>,

    seen: SeenSet,
}

impl Scheduler {
    /// Creates an empty scheduler
    ///
    /// # Arguments
    ///
    /// * `allow_uri_recrawling` - Enqueue every added page, even when its
    ///   URI has been seen before
    pub fn new(allow_uri_recrawling: bool) -> Self {
        let seen = if allow_uri_recrawling {
            SeenSet::Literal(DashSet::new())
        } else {
            SeenSet::Hashed(DashSet::new())
        };

        Self {
            allow_uri_recrawling,
            queue: Mutex::new(VecDeque::new()),
            seen,
        }
    }

    /// Number of URIs recorded as seen
    pub fn known_count(&self) -> usize {
        self.seen.len()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<PageToCrawl>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Frontier for Scheduler {
    fn add(&self, page: PageToCrawl) {
        if self.allow_uri_recrawling || page.is_retry {
            self.queue().push_back(page);
        } else if self.seen.insert(&page.uri) {
            self.queue().push_back(page);
        } else {
            tracing::trace!("Skipping already known URI {}", page.uri);
        }
    }

    fn get_next(&self) -> Option<PageToCrawl> {
        self.queue().pop_front()
    }

    fn count(&self) -> usize {
        self.queue().len()
    }

    fn add_known_uri(&self, uri: &Url) {
        self.seen.insert(uri);
    }

    fn is_uri_known(&self, uri: &Url) -> bool {
        self.seen.contains(uri)
    }

    fn clear(&self) {
        self.queue().clear();
    }
}
