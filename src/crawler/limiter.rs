//! Per-authority rate limiting
//!
//! Every authority (`host[:port]`) gets its own minimum interval between
//! requests. Waits are paid immediately before a fetch, never when a page
//! is queued, so each actual request pays the delay exactly once.

use crate::url::extract_authority;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Throttle consulted before every fetch
#[async_trait]
pub trait DomainThrottle: Send + Sync {
    /// Waits until a request to the authority of `uri` may proceed
    async fn rate_limit(&self, uri: &Url);

    /// Starts rate limiting the authority of `uri`; an existing entry is kept
    fn add_domain(&self, uri: &Url, min_delay: Duration);

    /// Starts rate limiting the authority of `uri`, replacing any existing entry
    fn add_or_update_domain(&self, uri: &Url, min_delay: Duration);

    /// Stops rate limiting the authority of `uri`
    fn remove_domain(&self, uri: &Url);
}

/// Throttle state of one authority
#[derive(Debug)]
struct DomainSlot {
    interval: Duration,

    /// Earliest instant the next request may be sent
    next_allowed: Mutex<Option<Instant>>,
}

impl DomainSlot {
    fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            interval,
            next_allowed: Mutex::new(None),
        })
    }

    /// Waits for this slot's turn and books the next one
    ///
    /// Concurrent callers for the same authority queue on the slot lock, so
    /// consecutive requests are spaced by at least `interval`.
    async fn wait_turn(&self) -> Duration {
        let mut next_allowed = self.next_allowed.lock().await;
        let started = Instant::now();

        if let Some(at) = *next_allowed {
            if at > started {
                tokio::time::sleep_until(at).await;
            }
        }

        let now = Instant::now();
        *next_allowed = Some(now + self.interval);
        now.duration_since(started)
    }
}

/// Default [`DomainThrottle`] backed by a concurrent map of authorities
///
/// Authorities are added lazily on first use with the default interval.
/// A zero default leaves unknown authorities unthrottled.
#[derive(Debug, Default)]
pub struct DomainRateLimiter {
    default_delay: Duration,
    domains: DashMap<String, Arc<DomainSlot>>,
}

impl DomainRateLimiter {
    /// Creates a limiter applying `default_delay` to every authority
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            domains: DashMap::new(),
        }
    }

    /// Configured interval for the authority of `uri`, if it is rate limited
    pub fn delay_for(&self, uri: &Url) -> Option<Duration> {
        self.domains
            .get(&extract_authority(uri))
            .map(|slot| slot.interval)
    }

    fn slot_for(&self, authority: String) -> Option<Arc<DomainSlot>> {
        if let Some(slot) = self.domains.get(&authority) {
            return Some(Arc::clone(slot.value()));
        }

        if self.default_delay.is_zero() {
            return None;
        }

        let slot = self
            .domains
            .entry(authority.clone())
            .or_insert_with(|| {
                tracing::debug!(
                    "Added new domain [{}] with min crawl delay of {:?}",
                    authority,
                    self.default_delay
                );
                DomainSlot::new(self.default_delay)
            });
        Some(Arc::clone(slot.value()))
    }
}

#[async_trait]
impl DomainThrottle for DomainRateLimiter {
    async fn rate_limit(&self, uri: &Url) {
        let Some(slot) = self.slot_for(extract_authority(uri)) else {
            return;
        };

        let waited = slot.wait_turn().await;
        if waited > Duration::from_millis(10) {
            tracing::debug!("Rate limited [{}] {:?}", uri, waited);
        }
    }

    fn add_domain(&self, uri: &Url, min_delay: Duration) {
        let delay = min_delay.max(self.default_delay);
        if delay.is_zero() {
            return;
        }

        let authority = extract_authority(uri);
        self.domains
            .entry(authority.clone())
            .or_insert_with(|| {
                tracing::debug!("Added domain [{}] with min crawl delay of {:?}", authority, delay);
                DomainSlot::new(delay)
            });
    }

    fn add_or_update_domain(&self, uri: &Url, min_delay: Duration) {
        let delay = min_delay.max(self.default_delay);
        if delay.is_zero() {
            return;
        }

        let authority = extract_authority(uri);
        tracing::debug!(
            "Added/updated domain [{}] with min crawl delay of {:?}",
            authority,
            delay
        );
        self.domains.insert(authority, DomainSlot::new(delay));
    }

    fn remove_domain(&self, uri: &Url) {
        self.domains.remove(&extract_authority(uri));
    }
}
