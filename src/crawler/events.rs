//! Crawl lifecycle events
//!
//! Four events are raised per crawl: page crawl starting, page crawl
//! completed, page crawl disallowed and page links crawl disallowed. Each
//! supports synchronous handlers, run inline on the worker, and
//! asynchronous handlers, spawned as fire-and-forget tasks.
//!
//! Handler errors and panics are logged and swallowed; they never reach the
//! crawl loop.

use crate::state::{CrawlContext, CrawledPage, PageToCrawl};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type SyncHandler<A> = Arc<dyn Fn(&A) -> anyhow::Result<()> + Send + Sync>;
type AsyncHandler<A> = Arc<dyn Fn(A) -> BoxFuture + Send + Sync>;

/// Raised before a page is fetched
#[derive(Clone)]
pub struct PageCrawlStartingArgs {
    pub context: Arc<CrawlContext>,
    pub page: PageToCrawl,
}

/// Raised once a page has been fetched and processed
#[derive(Clone)]
pub struct PageCrawlCompletedArgs {
    pub context: Arc<CrawlContext>,
    pub page: Arc<CrawledPage>,
}

/// Raised when a page will not be crawled
#[derive(Clone)]
pub struct PageCrawlDisallowedArgs {
    pub context: Arc<CrawlContext>,
    pub page: PageToCrawl,
    pub reason: String,
}

/// Raised when the links of a crawled page will not be followed
#[derive(Clone)]
pub struct PageLinksCrawlDisallowedArgs {
    pub context: Arc<CrawlContext>,
    pub page: Arc<CrawledPage>,
    pub reason: String,
}

/// Subscribers of a single event type
pub struct EventChannel<A> {
    name: &'static str,
    sync_handlers: RwLock<Vec<SyncHandler<A>>>,
    async_handlers: RwLock<Vec<AsyncHandler<A>>>,
}

impl<A> EventChannel<A>
where
    A: Clone + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            sync_handlers: RwLock::new(Vec::new()),
            async_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a handler run inline on the worker that raised the event
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        write(&self.sync_handlers).push(Arc::new(handler));
    }

    /// Registers a handler spawned on its own task for every event
    pub fn subscribe_async<F, Fut>(&self, handler: F)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: AsyncHandler<A> = Arc::new(move |args| Box::pin(handler(args)));
        write(&self.async_handlers).push(handler);
    }

    pub fn has_subscribers(&self) -> bool {
        !read(&self.sync_handlers).is_empty() || !read(&self.async_handlers).is_empty()
    }

    /// Runs every synchronous handler in registration order
    pub fn fire(&self, args: &A) {
        let handlers = read(&self.sync_handlers).clone();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(args))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Error in {} event handler: {:#}", self.name, e);
                }
                Err(_) => {
                    tracing::error!("Panic in {} event handler", self.name);
                }
            }
        }
    }

    /// Spawns every asynchronous handler and returns their task handles
    ///
    /// Dropping the handles detaches the tasks. Awaiting them waits for the
    /// handlers to finish; a failing handler never fails the await.
    pub fn fire_async(&self, args: &A) -> Vec<JoinHandle<()>> {
        let handlers = read(&self.async_handlers).clone();
        handlers
            .into_iter()
            .map(|handler| {
                let name = self.name;
                let inner = tokio::spawn(handler(args.clone()));
                tokio::spawn(async move {
                    match inner.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!("Error in async {} event handler: {:#}", name, e);
                        }
                        Err(e) => {
                            tracing::error!("Async {} event handler failed: {}", name, e);
                        }
                    }
                })
            })
            .collect()
    }

    /// Removes every handler; nothing fires afterwards
    pub fn clear(&self) {
        write(&self.sync_handlers).clear();
        write(&self.async_handlers).clear();
    }

    /// A channel with the same handlers, independent from this one
    fn snapshot(&self) -> Self {
        Self {
            name: self.name,
            sync_handlers: RwLock::new(read(&self.sync_handlers).clone()),
            async_handlers: RwLock::new(read(&self.async_handlers).clone()),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// All crawl events of a crawler
pub struct CrawlEvents {
    pub page_crawl_starting: EventChannel<PageCrawlStartingArgs>,
    pub page_crawl_completed: EventChannel<PageCrawlCompletedArgs>,
    pub page_crawl_disallowed: EventChannel<PageCrawlDisallowedArgs>,
    pub page_links_crawl_disallowed: EventChannel<PageLinksCrawlDisallowedArgs>,
}

impl Default for CrawlEvents {
    fn default() -> Self {
        Self {
            page_crawl_starting: EventChannel::new("page_crawl_starting"),
            page_crawl_completed: EventChannel::new("page_crawl_completed"),
            page_crawl_disallowed: EventChannel::new("page_crawl_disallowed"),
            page_links_crawl_disallowed: EventChannel::new("page_links_crawl_disallowed"),
        }
    }
}

impl CrawlEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current subscriptions for a single crawl
    ///
    /// A hard stop clears the copy, leaving the crawler's own subscriptions
    /// intact for later crawls.
    pub fn snapshot(&self) -> Self {
        Self {
            page_crawl_starting: self.page_crawl_starting.snapshot(),
            page_crawl_completed: self.page_crawl_completed.snapshot(),
            page_crawl_disallowed: self.page_crawl_disallowed.snapshot(),
            page_links_crawl_disallowed: self.page_links_crawl_disallowed.snapshot(),
        }
    }

    /// Removes every subscription of every event
    pub fn clear(&self) {
        self.page_crawl_starting.clear();
        self.page_crawl_completed.clear();
        self.page_crawl_disallowed.clear();
        self.page_links_crawl_disallowed.clear();
    }
}
