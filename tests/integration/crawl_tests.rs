//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end through the real HTTP fetcher.

use ripple_crawler::config::Config;
use ripple_crawler::crawler::events::PageCrawlCompletedArgs;
use ripple_crawler::crawler::{HttpFetcher, PageFetcher};
use ripple_crawler::state::CrawlDecision;
use ripple_crawler::{CrawledPage, Crawler, TransportError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration suitable for a local mock server
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.crawler.max_concurrency = 4;
    config.crawler.max_crawl_depth = 2;
    config.crawler.http_request_timeout_seconds = 5;
    config.user_agent.crawler_name = "TestBot".to_string();
    config.user_agent.crawler_version = "1.0.0".to_string();
    config
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect()
}

fn collect_completed(crawler: &Crawler) -> Arc<Mutex<Vec<(String, Option<u16>)>>> {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let sink = completed.clone();
    crawler
        .events()
        .page_crawl_completed
        .subscribe(move |args: &PageCrawlCompletedArgs| {
            sink.lock().unwrap().push((
                args.page.uri.path().to_string(),
                args.page.status().map(|s| s.as_u16()),
            ));
            Ok(())
        });
    completed
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    // Start a mock server
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{}/page1">Page 1</a>
            <a href="/page2">Page 2</a>
            <a href="mailto:someone@example.com">Mail</a>
            </body></html>"#,
            base_url
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html(
            r#"<html><body>Content 1 <a href="/">Home</a></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html(r#"<html><body>Content 2</body></html>"#))
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(create_test_config()).expect("Failed to create crawler");
    let completed = collect_completed(&crawler);

    let root = Url::parse(&format!("{}/", base_url)).unwrap();
    let result = crawler.crawl(root).await;

    assert!(!result.is_error(), "crawl failed: {:?}", result.error);
    assert_eq!(result.context.crawled_count(), 3);

    let mut pages = completed.lock().unwrap().clone();
    pages.sort();
    assert_eq!(
        pages,
        vec![
            ("/".to_string(), Some(200)),
            ("/page1".to_string(), Some(200)),
            ("/page2".to_string(), Some(200)),
        ]
    );

    // Each page is requested once; the back link to / is deduplicated
    let paths = requested_paths(&mock_server).await;
    assert_eq!(paths.iter().filter(|p| p.as_str() == "/").count(), 1);
    assert_eq!(paths.iter().filter(|p| p.as_str() == "/robots.txt").count(), 1);
}

#[tokio::test]
async fn test_robots_txt_respect() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<html><body>
            <a href="{}/allowed">Allowed Page</a>
            <a href="{}/admin">Admin Page</a>
            </body></html>"#,
            base_url, base_url
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/allowed"))
        .respond_with(html("<html><body>Allowed content</body></html>"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(html("<html><body>Admin content</body></html>"))
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(create_test_config()).expect("Failed to create crawler");
    let result = crawler
        .crawl(Url::parse(&format!("{}/", base_url)).unwrap())
        .await;

    assert!(!result.is_error());

    let paths = requested_paths(&mock_server).await;
    assert!(paths.contains(&"/allowed".to_string()));
    assert!(
        !paths.contains(&"/admin".to_string()),
        "/admin should not be fetched: {:?}",
        paths
    );
}

#[tokio::test]
async fn test_missing_robots_txt_allows_everything() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/next">next</a>"#))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(html("done"))
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(create_test_config()).unwrap();
    let result = crawler
        .crawl(Url::parse(&format!("{}/", mock_server.uri())).unwrap())
        .await;

    assert!(!result.is_error());
    assert_eq!(result.context.crawled_count(), 2);
}

#[tokio::test]
async fn test_manual_redirect_through_http() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/home"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/home"))
        .respond_with(html("<html><body>home</body></html>"))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config();
    config.crawler.auto_redirects = false;
    config.politeness.respect_robots_txt = false;
    let crawler = Crawler::new(config).unwrap();
    let completed = collect_completed(&crawler);

    let root = Url::parse(&format!("{}/", mock_server.uri())).unwrap();
    let result = crawler.crawl(root.clone()).await;

    assert!(!result.is_error());
    assert_eq!(result.context.root_uri(), root.join("/home").unwrap());

    let pages = completed.lock().unwrap().clone();
    assert!(pages.contains(&("/".to_string(), Some(301))));
    assert!(pages.contains(&("/home".to_string(), Some(200))));
}

#[tokio::test]
async fn test_fetcher_skips_body_when_download_denied() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/file.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("%PDF-1.4")
                .insert_header("content-type", "application/pdf"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(&create_test_config()).unwrap();
    let uri = Url::parse(&format!("{}/file.pdf", mock_server.uri())).unwrap();

    let page = fetcher
        .fetch(&uri, &|_: &CrawledPage| CrawlDecision::deny("not wanted"))
        .await;

    assert_eq!(page.status().map(|s| s.as_u16()), Some(200));
    assert!(page.content.is_empty());
    assert!(page.error.is_none());
    assert!(page
        .response
        .as_ref()
        .unwrap()
        .content_type
        .contains("application/pdf"));
}

#[tokio::test]
async fn test_fetcher_timeout_is_transport_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html("late").set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config();
    config.crawler.http_request_timeout_seconds = 1;
    let fetcher = HttpFetcher::new(&config).unwrap();
    let uri = Url::parse(&format!("{}/slow", mock_server.uri())).unwrap();

    let page = fetcher
        .fetch(&uri, &|_: &CrawledPage| CrawlDecision::allow())
        .await;

    assert!(page.response.is_none());
    assert!(matches!(page.error, Some(TransportError::Timeout(_))));
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let mock_server = MockServer::start().await;

    // Server errors are not transport errors; the page completes once
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "1"))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config();
    config.crawler.max_retry_count = 3;
    config.politeness.respect_robots_txt = false;
    let crawler = Crawler::new(config).unwrap();

    let result = crawler
        .crawl(Url::parse(&format!("{}/", mock_server.uri())).unwrap())
        .await;

    assert!(!result.is_error());
    assert_eq!(requested_paths(&mock_server).await, vec!["/".to_string()]);
}
