//! Ripple Crawler main entry point
//!
//! This is the command-line interface for the Ripple web crawler.

use clap::Parser;
use ripple_crawler::config::{load_config_with_hash, validate, Config};
use ripple_crawler::crawler::events::{PageCrawlCompletedArgs, PageCrawlDisallowedArgs};
use ripple_crawler::{CrawlResult, Crawler};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Ripple Crawler: a polite web crawler
///
/// Ripple Crawler crawls a website from a seed URL while respecting
/// robots.txt, per-domain crawl delays and configurable limits.
#[derive(Parser, Debug)]
#[command(name = "ripple-crawler")]
#[command(version)]
#[command(about = "A polite web crawler", long_about = None)]
struct Cli {
    /// URL to start crawling from
    #[arg(value_name = "URL")]
    url: Url,

    /// Path to TOML configuration file (defaults are used when omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            match load_config_with_hash(path) {
                Ok((cfg, hash)) => {
                    tracing::info!("Configuration loaded successfully (hash: {})", hash);
                    cfg
                }
                Err(e) => {
                    tracing::error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => {
            let cfg = Config::default();
            validate(&cfg)?;
            cfg
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, &cli.url);
        return Ok(());
    }

    let result = handle_crawl(config, cli.url).await?;
    print_summary(&result);

    if result.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_crawler=info,warn"),
            1 => EnvFilter::new("ripple_crawler=debug,info"),
            2 => EnvFilter::new("ripple_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, url: &Url) {
    println!("=== Ripple Crawler Dry Run ===\n");

    println!("Seed URL: {}\n", url);

    println!("Crawler Configuration:");
    println!("  Max concurrency: {}", config.crawler.max_concurrency);
    println!("  Max pages: {}", config.crawler.max_pages_to_crawl);
    println!(
        "  Max pages per domain: {}",
        config.crawler.max_pages_to_crawl_per_domain
    );
    println!("  Max depth: {}", config.crawler.max_crawl_depth);
    println!(
        "  Downloadable content types: {}",
        config.crawler.downloadable_content_types
    );
    println!("  Crawl timeout: {}s", config.crawler.crawl_timeout_seconds);
    println!("  Max retries: {}", config.crawler.max_retry_count);

    println!("\nPoliteness:");
    println!("  Respect robots.txt: {}", config.politeness.respect_robots_txt);
    println!(
        "  Min delay per domain: {}ms",
        config.politeness.min_crawl_delay_per_domain_ms
    );
    println!(
        "  Max robots.txt crawl delay: {}s",
        config.politeness.max_robots_crawl_delay_seconds
    );
    println!("  Robots user agent: {}", config.robots_user_agent());

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation; Ctrl-C cancels the crawl
async fn handle_crawl(
    config: Config,
    url: Url,
) -> Result<CrawlResult, Box<dyn std::error::Error>> {
    let crawler = Crawler::new(config)?;

    crawler
        .events()
        .page_crawl_completed
        .subscribe(|args: &PageCrawlCompletedArgs| {
            let status = args
                .page
                .status()
                .map_or_else(|| "error".to_string(), |s| s.as_u16().to_string());
            tracing::debug!(
                "Crawled {} [{}] ({} bytes)",
                args.page.uri,
                status,
                args.page.content.bytes.len()
            );
            Ok(())
        });

    crawler
        .events()
        .page_crawl_disallowed
        .subscribe(|args: &PageCrawlDisallowedArgs| {
            tracing::debug!("Skipped {}: {}", args.page.uri, args.reason);
            Ok(())
        });

    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping crawl");
            on_interrupt.cancel();
        }
    });

    Ok(crawler.crawl_with_cancellation(url, cancellation).await)
}

fn print_summary(result: &CrawlResult) {
    println!("\n=== Crawl Summary ===");
    println!("Root: {}", result.root_uri);
    if result.context.root_uri() != result.root_uri {
        println!("Effective root: {}", result.context.root_uri());
    }
    println!("Pages crawled: {}", result.context.crawled_count());
    println!("Elapsed: {:.2?}", result.elapsed);
    match &result.error {
        Some(e) => println!("Ended early: {}", e),
        None => println!("✓ Crawl completed"),
    }
}
