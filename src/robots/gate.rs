use super::{ParsedRobots, RobotsOracle};
use crate::crawler::PageFetcher;
use crate::state::{CrawlDecision, CrawledPage, PageToCrawl};
use crate::url::{robots_txt_url, sub_path_probe};
use std::sync::{Arc, RwLock};
use url::Url;

/// Robots.txt ruling for a single crawl
///
/// Holds the oracle for the crawl's root, if one was found. The ruling can
/// be discarded mid-crawl when the root itself turns out to be disallowed
/// and the crawl is configured to ignore robots.txt in that case.
pub struct RobotsGate {
    oracle: RwLock<Option<Arc<dyn RobotsOracle>>>,
    user_agent: String,
    ignore_if_root_disallowed: bool,
}

impl RobotsGate {
    /// Creates a gate without a ruling; everything is allowed
    pub fn new(user_agent: impl Into<String>, ignore_if_root_disallowed: bool) -> Self {
        Self {
            oracle: RwLock::new(None),
            user_agent: user_agent.into(),
            ignore_if_root_disallowed,
        }
    }

    /// Installs an oracle as the ruling for this crawl
    pub fn set_oracle(&self, oracle: Arc<dyn RobotsOracle>) {
        *self
            .oracle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(oracle);
    }

    /// Drops the ruling; everything is allowed afterwards
    pub fn discard(&self) {
        *self
            .oracle
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub fn has_ruling(&self) -> bool {
        self.oracle().is_some()
    }

    fn oracle(&self) -> Option<Arc<dyn RobotsOracle>> {
        self.oracle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Fetches and parses robots.txt for the authority of `root`
    ///
    /// A missing, empty or failed robots.txt leaves the gate without a
    /// ruling. Returns true if a ruling was installed.
    pub async fn load(&self, root: &Url, fetcher: &dyn PageFetcher) -> bool {
        let Some(robots_url) = robots_txt_url(root) else {
            return false;
        };

        let page = fetcher
            .fetch(&robots_url, &|page: &CrawledPage| match page.status() {
                Some(status) if status.is_success() => CrawlDecision::allow(),
                _ => CrawlDecision::deny("Robots.txt not available"),
            })
            .await;

        let found = page.status().map_or(false, |s| s.is_success())
            && !page.content.text.trim().is_empty();

        if found {
            tracing::info!("Robots.txt was found at {}", robots_url);
            self.set_oracle(Arc::new(ParsedRobots::from_content(&page.content.text)));
        } else {
            tracing::info!("Robots.txt was NOT found at {}", robots_url);
        }
        found
    }

    /// `Crawl-delay` requested for the configured user agent, in seconds
    pub fn crawl_delay(&self) -> Option<f64> {
        self.oracle()?.crawl_delay(&self.user_agent)
    }

    /// Checks a page against the ruling
    ///
    /// For the root page, when configured to ignore robots.txt if the root
    /// is disallowed, a disallowed root (or a root whose sub-paths are all
    /// disallowed) discards the ruling instead of denying the page.
    pub fn check(&self, page: &PageToCrawl) -> CrawlDecision {
        let Some(oracle) = self.oracle() else {
            return CrawlDecision::allow();
        };

        let allowed = oracle.is_allowed(page.uri.as_str(), &self.user_agent);

        if page.is_root && self.ignore_if_root_disallowed {
            if !allowed {
                tracing::debug!(
                    "Page {} is disallowed by robots.txt, ignoring robots.txt for this crawl",
                    page.uri
                );
                self.discard();
            } else if !oracle.is_allowed(&sub_path_probe(&page.uri), &self.user_agent) {
                tracing::debug!(
                    "All pages below {} are disallowed by robots.txt, ignoring robots.txt for this crawl",
                    page.uri
                );
                self.discard();
            }
            return CrawlDecision::allow();
        }

        if !allowed {
            return CrawlDecision::deny(format!(
                "Page [{}] not crawled, [Disallowed by robots.txt file], set \
                 respect-robots-txt = false to ignore robots.txt files",
                page.uri
            ));
        }

        CrawlDecision::allow()
    }
}

impl std::fmt::Debug for RobotsGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotsGate")
            .field("has_ruling", &self.has_ruling())
            .field("user_agent", &self.user_agent)
            .field("ignore_if_root_disallowed", &self.ignore_if_root_disallowed)
            .finish()
    }
}
