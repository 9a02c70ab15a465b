//! End-to-end crawls against in-process mock fetchers

use crate::support::{test_config, url, MockFetcher, MockResponse};
use ripple_crawler::crawler::events::{
    PageCrawlCompletedArgs, PageCrawlDisallowedArgs, PageLinksCrawlDisallowedArgs,
};
use ripple_crawler::crawler::{CrawlDecisionMaker, DecisionMaker, DomainRateLimiter, Frontier};
use ripple_crawler::robots::ParsedRobots;
use ripple_crawler::{CrawlContext, CrawlDecision, CrawlError, CrawledPage, Crawler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Every page links to two new pages one level below it
fn branching_site() -> MockFetcher {
    MockFetcher::new(|uri| {
        MockResponse::html(format!(
            r#"<html><body><a href="{0}a/">A</a><a href="{0}b/">B</a></body></html>"#,
            uri
        ))
    })
}

fn count_completed(crawler: &Crawler) -> Arc<AtomicUsize> {
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    crawler
        .events()
        .page_crawl_completed
        .subscribe(move |_: &PageCrawlCompletedArgs| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    completed
}

#[tokio::test]
async fn test_max_pages_is_strict() {
    let mut config = test_config();
    config.crawler.max_pages_to_crawl = 3;
    let fetcher = Arc::new(branching_site());
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();
    let completed = count_completed(&crawler);

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error(), "unexpected error: {:?}", result.error);
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    assert_eq!(fetcher.calls().len(), 3);
    assert_eq!(result.context.crawled_count(), 3);
    assert_eq!(result.context.frontier().count(), 0);
    assert!(result.context.is_max_pages_reached());
}

#[tokio::test]
async fn test_max_pages_strict_under_concurrency() {
    let mut config = test_config();
    config.crawler.max_pages_to_crawl = 25;
    config.crawler.max_concurrency = 16;
    let fetcher = Arc::new(branching_site());
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let result = crawler.crawl(url("http://example.test/")).await;

    assert_eq!(result.context.crawled_count(), 25);
    assert_eq!(fetcher.calls().len(), 25);
}

#[tokio::test]
async fn test_root_redirect_updates_root() {
    let mut config = test_config();
    config.crawler.auto_redirects = false;
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.path() {
        "/" => MockResponse::redirect(301, "http://example.test/home"),
        "/home" => MockResponse::html("<html><body>home</body></html>"),
        _ => MockResponse::not_found(),
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();
    let completed = count_completed(&crawler);

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error());
    assert_eq!(result.root_uri, url("http://example.test/"));
    assert_eq!(result.context.root_uri(), url("http://example.test/home"));
    assert_eq!(result.context.original_root_uri(), &url("http://example.test/"));
    assert_eq!(fetcher.calls_to("/home"), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_redirect_chain_is_bounded() {
    let mut config = test_config();
    config.crawler.auto_redirects = false;
    config.crawler.max_auto_redirects = 3;
    let fetcher = Arc::new(MockFetcher::new(|uri| {
        let hop: u32 = uri.path().trim_start_matches("/r").parse().unwrap_or(0);
        MockResponse::redirect(302, &format!("/r{}", hop + 1))
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    crawler
        .events()
        .page_crawl_disallowed
        .subscribe(move |args: &PageCrawlDisallowedArgs| {
            sink.lock().unwrap().push(args.reason.clone());
            Ok(())
        });

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error());
    // root plus three redirect hops
    assert_eq!(fetcher.calls().len(), 4);
    assert!(reasons.lock().unwrap()[0].contains("HttpRequestMaxAutoRedirects limit of [3]"));
}

#[tokio::test]
async fn test_undownloadable_content_is_not_an_error() {
    let mut config = test_config();
    config.crawler.downloadable_content_types = "text/html".to_string();
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.path() {
        "/" => MockResponse::html(r#"<a href="/report.pdf">report</a>"#),
        "/report.pdf" => {
            MockResponse::html("%PDF-1.4 binary").with_content_type("application/pdf")
        }
        _ => MockResponse::not_found(),
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let captured: Arc<Mutex<Option<(Arc<CrawledPage>, Arc<CrawlContext>)>>> =
        Arc::new(Mutex::new(None));
    let sink = captured.clone();
    crawler
        .events()
        .page_crawl_completed
        .subscribe(move |args: &PageCrawlCompletedArgs| {
            if args.page.uri.path() == "/report.pdf" {
                *sink.lock().unwrap() = Some((args.page.clone(), args.context.clone()));
            }
            Ok(())
        });

    let result = crawler.crawl(url("http://example.test/")).await;
    assert!(!result.is_error());

    let (page, ctx) = captured.lock().unwrap().take().expect("pdf page completed");
    assert!(page.content.is_empty());
    assert!(page.content.text.is_empty());
    assert!(page.error.is_none());
    assert_eq!(page.status().map(|s| s.as_u16()), Some(200));

    let decision = CrawlDecisionMaker::new().should_download_page_content(&page, &ctx);
    assert!(!decision.allow);
    assert!(decision.reason.contains("Content type"));
}

#[tokio::test]
async fn test_transport_errors_are_retried_up_to_max() {
    let mut config = test_config();
    config.crawler.max_retry_count = 2;
    let fetcher = Arc::new(MockFetcher::new(|_| MockResponse::transport_error()));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let retry_counts = Arc::new(Mutex::new(Vec::new()));
    let sink = retry_counts.clone();
    crawler
        .events()
        .page_crawl_completed
        .subscribe(move |args: &PageCrawlCompletedArgs| {
            sink.lock().unwrap().push((args.page.is_retry, args.page.retry_count));
            Ok(())
        });

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error());
    assert_eq!(fetcher.calls_to("/"), 3);
    assert_eq!(
        *retry_counts.lock().unwrap(),
        vec![(false, 0), (true, 1), (true, 2)]
    );
    assert_eq!(result.context.crawled_count(), 1);
    assert_eq!(result.context.frontier().count(), 0);
}

#[tokio::test]
async fn test_retries_disabled_by_default() {
    let fetcher = Arc::new(MockFetcher::new(|_| MockResponse::transport_error()));
    let crawler = Crawler::builder(test_config())
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error());
    assert_eq!(fetcher.calls().len(), 1);
}

#[tokio::test]
async fn test_depth_limit() {
    let mut config = test_config();
    config.crawler.max_crawl_depth = 1;
    let fetcher = Arc::new(branching_site());
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let link_denials = Arc::new(AtomicUsize::new(0));
    let counter = link_denials.clone();
    crawler
        .events()
        .page_links_crawl_disallowed
        .subscribe(move |args: &PageLinksCrawlDisallowedArgs| {
            assert_eq!(args.reason, "Crawl depth is above max");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error());
    // root plus its two children; grandchildren are never parsed
    assert_eq!(fetcher.calls().len(), 3);
    assert_eq!(link_denials.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_external_links_are_not_crawled() {
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.host_str() {
        Some("example.test") if uri.path() == "/" => MockResponse::html(
            r#"<a href="http://other.test/">other</a><a href="/local">local</a>"#,
        ),
        _ => MockResponse::html("leaf"),
    }));
    let crawler = Crawler::builder(test_config())
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    crawler.crawl(url("http://example.test/")).await;

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|u| u.host_str() == Some("example.test")));
}

#[tokio::test]
async fn test_hard_stop_from_event_handler() {
    let fetcher = Arc::new(branching_site());
    let crawler = Crawler::builder(test_config())
        .fetcher(fetcher.clone())
        .build()
        .unwrap();
    let completed = count_completed(&crawler);
    crawler
        .events()
        .page_crawl_completed
        .subscribe(|args: &PageCrawlCompletedArgs| {
            args.context.request_hard_stop();
            Ok(())
        });

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error());
    assert!(result.context.is_hard_stop_requested());
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(result.context.crawled_count(), 1);
    assert_eq!(result.context.frontier().count(), 0);

    // The crawler's own subscriptions survive the hard stop
    assert!(crawler.events().page_crawl_completed.has_subscribers());
}

#[tokio::test]
async fn test_stop_decision_drains_in_flight_work() {
    let fetcher = Arc::new(branching_site());
    let crawler = Crawler::builder(test_config())
        .fetcher(fetcher.clone())
        .should_crawl_page_links(|_: &CrawledPage, _: &CrawlContext| {
            CrawlDecision::allow().with_stop()
        })
        .build()
        .unwrap();
    let completed = count_completed(&crawler);

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error());
    assert!(result.context.is_stop_requested());
    assert!(!result.context.is_hard_stop_requested());
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(result.context.frontier().count(), 0);
}

#[tokio::test]
async fn test_should_crawl_page_override() {
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.path() {
        "/" => MockResponse::html(r#"<a href="/keep">k</a><a href="/skip">s</a>"#),
        _ => MockResponse::html("leaf"),
    }));
    let crawler = Crawler::builder(test_config())
        .fetcher(fetcher.clone())
        .should_crawl_page(|page, _| {
            if page.uri.path() == "/skip" {
                CrawlDecision::deny("skipped by caller")
            } else {
                CrawlDecision::allow()
            }
        })
        .build()
        .unwrap();

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    crawler
        .events()
        .page_crawl_disallowed
        .subscribe(move |args: &PageCrawlDisallowedArgs| {
            sink.lock().unwrap().push(args.reason.clone());
            Ok(())
        });

    crawler.crawl(url("http://example.test/")).await;

    assert_eq!(fetcher.calls_to("/keep"), 1);
    assert_eq!(fetcher.calls_to("/skip"), 0);
    assert_eq!(*reasons.lock().unwrap(), vec!["skipped by caller"]);
}

#[tokio::test]
async fn test_page_bag_travels_to_completion() {
    let fetcher = Arc::new(MockFetcher::new(|_| MockResponse::html("leaf")));
    let crawler = Crawler::builder(test_config())
        .fetcher(fetcher)
        .build()
        .unwrap();

    crawler
        .events()
        .page_crawl_starting
        .subscribe(|args: &ripple_crawler::crawler::events::PageCrawlStartingArgs| {
            assert!(args.page.is_root);
            Ok(())
        });

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    crawler
        .events()
        .page_crawl_completed
        .subscribe(move |args: &PageCrawlCompletedArgs| {
            assert!(args.page.page_bag.is_empty());
            assert!(args.page.last_request_time.is_some());
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    crawler.crawl(url("http://example.test/")).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failing_subscribers_do_not_abort_crawl() {
    let fetcher = Arc::new(branching_site());
    let mut config = test_config();
    config.crawler.max_pages_to_crawl = 5;
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();
    crawler
        .events()
        .page_crawl_completed
        .subscribe(|_: &PageCrawlCompletedArgs| Err(anyhow::anyhow!("subscriber failed")));
    crawler
        .events()
        .page_crawl_completed
        .subscribe_async(|_: PageCrawlCompletedArgs| async {
            Err::<(), _>(anyhow::anyhow!("async subscriber failed"))
        });

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(!result.is_error());
    assert_eq!(fetcher.calls().len(), 5);
}

#[tokio::test]
async fn test_async_completion_delivered_for_last_page() {
    let fetcher = Arc::new(MockFetcher::new(|_| MockResponse::html("leaf")));
    let crawler = Crawler::builder(test_config())
        .fetcher(fetcher)
        .build()
        .unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    crawler
        .events()
        .page_crawl_completed
        .subscribe_async(move |_: PageCrawlCompletedArgs| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });

    crawler.crawl(url("http://example.test/")).await;

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_mid_crawl() {
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.path() {
        "/" => MockResponse::html(r#"<a href="/slow">slow</a>"#),
        _ => MockResponse::html("slow").with_delay(Duration::from_secs(30)),
    }));
    let crawler = Crawler::builder(test_config())
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = crawler
        .crawl_with_cancellation(url("http://example.test/"), token)
        .await;

    assert!(matches!(result.error, Some(CrawlError::Cancelled { .. })));
    assert!(result.elapsed < Duration::from_secs(10));
    assert_eq!(fetcher.calls_to("/slow"), 1);
}

#[tokio::test]
async fn test_crawl_timeout_hard_stops() {
    let mut config = test_config();
    config.crawler.crawl_timeout_seconds = 1;
    let fetcher = Arc::new(MockFetcher::new(|_| {
        MockResponse::html("slow").with_delay(Duration::from_secs(30))
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher)
        .build()
        .unwrap();
    let completed = count_completed(&crawler);

    let result = crawler.crawl(url("http://example.test/")).await;

    assert!(result.context.is_hard_stop_requested());
    assert!(result.elapsed < Duration::from_secs(10));
    assert_eq!(completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_per_domain_limit() {
    let mut config = test_config();
    config.crawler.max_pages_to_crawl_per_domain = 2;
    // a chain: every page links to exactly one deeper page
    let fetcher = Arc::new(MockFetcher::new(|uri| {
        MockResponse::html(format!(r#"<a href="{}next/">next</a>"#, uri))
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let result = crawler.crawl(url("http://example.test/")).await;

    assert_eq!(result.context.domain_crawl_count("example.test"), 2);
    assert_eq!(fetcher.calls().len(), 2);
}

#[tokio::test]
async fn test_per_domain_limit_with_branching_links() {
    let mut config = test_config();
    config.crawler.max_pages_to_crawl_per_domain = 2;
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.path() {
        "/" => MockResponse::html(
            r#"<a href="/1">1</a><a href="/2">2</a><a href="/3">3</a><a href="/4">4</a><a href="/5">5</a>"#,
        ),
        _ => MockResponse::html("leaf"),
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let result = crawler.crawl(url("http://example.test/")).await;

    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(fetcher.calls_to("/1"), 1);
    assert_eq!(result.context.domain_crawl_count("example.test"), 2);
}

#[tokio::test]
async fn test_hard_stop_silences_remaining_disallowed_events() {
    let mut config = test_config();
    config.politeness.respect_robots_txt = true;
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.path() {
        "/" => MockResponse::html(r#"<a href="/p/1">1</a><a href="/p/2">2</a><a href="/p/3">3</a>"#),
        _ => MockResponse::html("leaf"),
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .robots_oracle(Arc::new(ParsedRobots::from_content(
            "User-agent: *\nDisallow: /p\n",
        )))
        .build()
        .unwrap();

    let fired = Arc::new(Mutex::new(0usize));
    let counter = fired.clone();
    crawler
        .events()
        .page_crawl_disallowed
        .subscribe(move |args: &PageCrawlDisallowedArgs| {
            *counter.lock().unwrap() += 1;
            args.context.request_hard_stop();
            Ok(())
        });

    crawler.crawl(url("http://example.test/")).await;

    assert_eq!(*fired.lock().unwrap(), 1);
    assert_eq!(fetcher.calls().len(), 1);
}

#[tokio::test]
async fn test_robots_disallow_fires_event() {
    let mut config = test_config();
    config.politeness.respect_robots_txt = true;
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.path() {
        "/" => MockResponse::html(r#"<a href="/private/x">p</a><a href="/public">q</a>"#),
        _ => MockResponse::html("leaf"),
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .robots_oracle(Arc::new(ParsedRobots::from_content(
            "User-agent: *\nDisallow: /private\n",
        )))
        .build()
        .unwrap();

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    crawler
        .events()
        .page_crawl_disallowed
        .subscribe(move |args: &PageCrawlDisallowedArgs| {
            sink.lock().unwrap().push(args.reason.clone());
            Ok(())
        });

    crawler.crawl(url("http://example.test/")).await;

    assert_eq!(fetcher.calls_to("/private/x"), 0);
    assert_eq!(fetcher.calls_to("/public"), 1);
    let reasons = reasons.lock().unwrap();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("Disallowed by robots.txt"));
}

#[tokio::test]
async fn test_robots_disallowed_root_is_ignored_when_configured() {
    let mut config = test_config();
    config.politeness.respect_robots_txt = true;
    config.politeness.ignore_robots_if_root_disallowed = true;
    let fetcher = Arc::new(MockFetcher::new(|uri| match uri.path() {
        "/" => MockResponse::html(r#"<a href="/page">p</a>"#),
        _ => MockResponse::html("leaf"),
    }));
    let crawler = Crawler::builder(config)
        .fetcher(fetcher.clone())
        .robots_oracle(Arc::new(ParsedRobots::from_content(
            "User-agent: *\nDisallow: /\n",
        )))
        .build()
        .unwrap();

    crawler.crawl(url("http://example.test/")).await;

    assert_eq!(fetcher.calls().len(), 2);
}

#[tokio::test]
async fn test_robots_crawl_delay_is_capped() {
    let mut config = test_config();
    config.politeness.respect_robots_txt = true;
    config.politeness.min_crawl_delay_per_domain_ms = 2000;
    config.politeness.max_robots_crawl_delay_seconds = 5;
    let limiter = Arc::new(DomainRateLimiter::new(Duration::from_millis(2000)));
    let crawler = Crawler::builder(config)
        .fetcher(Arc::new(MockFetcher::new(|_| MockResponse::html("leaf"))))
        .throttle(limiter.clone())
        .robots_oracle(Arc::new(ParsedRobots::from_content(
            "User-agent: *\nCrawl-delay: 8\nAllow: /\n",
        )))
        .build()
        .unwrap();

    let root = url("http://example.test/");
    crawler.crawl(root.clone()).await;

    assert_eq!(limiter.delay_for(&root), Some(Duration::from_secs(5)));
}
