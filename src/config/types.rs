use serde::Deserialize;

/// Main configuration structure for a crawl
///
/// Every section is optional in the TOML document; missing sections and
/// keys fall back to [`Default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub politeness: PolitenessConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub memory: MemoryConfig,
}

/// Crawler behavior configuration
///
/// A value of `0` disables the corresponding limit for max-pages,
/// max-page-size, crawl-timeout and max-links-per-page.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum number of pages processed concurrently
    pub max_concurrency: usize,

    /// Maximum number of pages to crawl in total
    pub max_pages_to_crawl: u64,

    /// Maximum number of pages to crawl per authority
    pub max_pages_to_crawl_per_domain: u64,

    /// Maximum number of link hops from the root page
    pub max_crawl_depth: u32,

    /// Pages larger than this are not processed further
    pub max_page_size_bytes: u64,

    /// Comma-separated list of content types whose body is downloaded
    pub downloadable_content_types: String,

    /// Wall-clock limit for the whole crawl
    pub crawl_timeout_seconds: u64,

    /// Timeout for a single HTTP request
    pub http_request_timeout_seconds: u64,

    /// Let the transport follow redirects itself
    pub auto_redirects: bool,

    /// Maximum number of redirects in one chain
    pub max_auto_redirects: u32,

    pub allow_external_crawling: bool,
    pub allow_external_link_crawling: bool,

    /// Number of times a page with a transport error is retried
    pub max_retry_count: u32,

    /// Minimum wait between two attempts on the same page
    pub min_retry_delay_ms: u64,

    /// Maximum number of links scheduled from a single page
    pub max_links_per_page: usize,

    /// Parse links even when they will not be followed
    pub forced_link_parsing: bool,

    /// Allow the same URI to be scheduled more than once
    pub allow_uri_recrawling: bool,

    /// Keep `#fragment` parts of discovered links
    pub respect_url_named_anchor: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_pages_to_crawl: 1000,
            max_pages_to_crawl_per_domain: 0,
            max_crawl_depth: 100,
            max_page_size_bytes: 0,
            downloadable_content_types: "text/html, text/plain".to_string(),
            crawl_timeout_seconds: 0,
            http_request_timeout_seconds: 15,
            auto_redirects: true,
            max_auto_redirects: 7,
            allow_external_crawling: false,
            allow_external_link_crawling: false,
            max_retry_count: 0,
            min_retry_delay_ms: 0,
            max_links_per_page: 0,
            forced_link_parsing: false,
            allow_uri_recrawling: false,
            respect_url_named_anchor: false,
        }
    }
}

impl CrawlerConfig {
    /// Returns the configured downloadable content types, trimmed and lowercased
    pub fn downloadable_content_types(&self) -> Vec<String> {
        self.downloadable_content_types
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Politeness configuration: robots.txt, nofollow and crawl delays
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolitenessConfig {
    pub respect_robots_txt: bool,

    /// Discard robots.txt for this crawl when it disallows the root
    pub ignore_robots_if_root_disallowed: bool,

    pub respect_meta_robots_nofollow: bool,
    pub respect_rel_nofollow: bool,
    pub respect_x_robots_tag_nofollow: bool,

    /// Minimum time between requests to the same authority (milliseconds)
    pub min_crawl_delay_per_domain_ms: u64,

    /// Upper bound applied to a robots.txt `Crawl-delay` directive
    pub max_robots_crawl_delay_seconds: u64,

    /// User agent matched against robots.txt groups; defaults to the crawler name
    pub robots_user_agent: Option<String>,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            respect_robots_txt: true,
            ignore_robots_if_root_disallowed: false,
            respect_meta_robots_nofollow: false,
            respect_rel_nofollow: false,
            respect_x_robots_tag_nofollow: false,
            min_crawl_delay_per_domain_ms: 0,
            max_robots_crawl_delay_seconds: 5,
            robots_user_agent: None,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "RippleCrawler".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/ripple-crawler".to_string(),
            contact_email: "crawler@example.com".to_string(),
        }
    }
}

impl UserAgentConfig {
    /// Formats the HTTP user agent: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Memory guard configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MemoryConfig {
    /// Memory that must be available before the crawl starts
    pub min_available_memory_mb: u64,

    /// Hard-stop the crawl once the process uses more than this
    pub max_memory_usage_mb: u64,

    /// How often the sampled usage value is refreshed
    pub cache_refresh_seconds: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            min_available_memory_mb: 0,
            max_memory_usage_mb: 0,
            cache_refresh_seconds: 5,
        }
    }
}

impl Config {
    /// The user agent string evaluated against robots.txt rules
    pub fn robots_user_agent(&self) -> &str {
        self.politeness
            .robots_user_agent
            .as_deref()
            .unwrap_or(&self.user_agent.crawler_name)
    }
}
