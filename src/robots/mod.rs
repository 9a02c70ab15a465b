//! Robots.txt handling module
//!
//! This module provides functionality for fetching and parsing robots.txt
//! files, answering allow/deny questions for a crawl, and merging the
//! robots.txt crawl delay with the configured politeness limits.

mod gate;
mod parser;

pub use gate::RobotsGate;
pub use parser::ParsedRobots;

use std::time::Duration;

/// Allow/deny and crawl-delay oracle for one robots.txt file
pub trait RobotsOracle: Send + Sync {
    /// Checks if a URL is allowed for the given user agent
    fn is_allowed(&self, url: &str, user_agent: &str) -> bool;

    /// Crawl delay requested for the user agent, in seconds
    fn crawl_delay(&self, user_agent: &str) -> Option<f64>;
}

/// Per-domain delay resulting from the politeness merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolitenessDelay {
    pub delay: Duration,

    /// True when the robots.txt delay exceeded the allowed maximum
    pub capped: bool,

    /// True when robots.txt asked for more than the configured minimum
    pub from_robots: bool,
}

/// Merges the robots.txt crawl delay with the configured limits
///
/// The effective delay is the larger of the robots.txt delay and the
/// configured per-domain minimum. A robots.txt delay above
/// `max_robots_delay` is replaced by that maximum.
///
/// # Arguments
///
/// * `robots_delay_secs` - `Crawl-delay` found in robots.txt, if any
/// * `min_delay_ms` - Configured minimum delay per domain
/// * `max_robots_delay_secs` - Largest robots.txt delay that is honored
pub fn effective_crawl_delay(
    robots_delay_secs: Option<f64>,
    min_delay_ms: u64,
    max_robots_delay_secs: u64,
) -> PolitenessDelay {
    let min_delay = Duration::from_millis(min_delay_ms);
    let robots_delay = robots_delay_secs
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::ZERO);

    if robots_delay <= min_delay {
        return PolitenessDelay {
            delay: min_delay,
            capped: false,
            from_robots: false,
        };
    }

    let max_delay = Duration::from_secs(max_robots_delay_secs);
    let capped = robots_delay > max_delay;
    let delay = if capped { max_delay } else { robots_delay };

    PolitenessDelay {
        delay: delay.max(min_delay),
        capped,
        from_robots: true,
    }
}
