//! Robots.txt rules for one host
//!
//! Allow/deny matching is delegated to the robotstxt crate. The crate does
//! not expose `Crawl-delay`, so the groups are scanned once when the file
//! is loaded and the delays kept per user-agent token.

use super::RobotsOracle;
use robotstxt::DefaultMatcher;

/// One `User-agent` group and the crawl delay it declares
#[derive(Debug, Clone)]
struct DelayGroup {
    agents: Vec<String>,
    delay: Option<f64>,
}

impl DelayGroup {
    fn is_wildcard(&self) -> bool {
        self.agents.iter().any(|a| a == "*")
    }

    fn names(&self, agent: &str) -> bool {
        self.agents.iter().any(|a| a != "*" && agent.contains(a.as_str()))
    }
}

/// Rules loaded from a robots.txt file
///
/// An empty file, or one that could not be fetched, allows everything.
#[derive(Debug, Clone, Default)]
pub struct ParsedRobots {
    content: String,
    groups: Vec<DelayGroup>,
}

impl ParsedRobots {
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            groups: delay_groups(content),
        }
    }

    /// Rules used when robots.txt is missing or unreadable
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Checks `url` (absolute, or a bare path) against the rules for `user_agent`
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// `Crawl-delay` in seconds for `user_agent`
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let agent = user_agent.to_lowercase();
        let named = self
            .groups
            .iter()
            .filter(|g| g.names(&agent))
            .find_map(|g| g.delay);
        named.or_else(|| {
            self.groups
                .iter()
                .filter(|g| g.is_wildcard())
                .find_map(|g| g.delay)
        })
    }
}

/// Splits the file into `User-agent` groups, keeping each group's delay
///
/// Consecutive `User-agent` lines share a group; any other directive closes
/// the run so the next `User-agent` line opens a new group.
fn delay_groups(content: &str) -> Vec<DelayGroup> {
    let mut groups: Vec<DelayGroup> = Vec::new();
    let mut open = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim().to_ascii_lowercase().as_str() {
            "user-agent" => {
                if !open {
                    groups.push(DelayGroup {
                        agents: Vec::new(),
                        delay: None,
                    });
                    open = true;
                }
                if let Some(group) = groups.last_mut() {
                    group.agents.push(value.to_lowercase());
                }
            }
            "crawl-delay" => {
                open = false;
                let delay = value.parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0);
                if let (Some(group), Some(delay)) = (groups.last_mut(), delay) {
                    group.delay.get_or_insert(delay);
                }
            }
            _ => open = false,
        }
    }

    groups
}

impl RobotsOracle for ParsedRobots {
    fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        ParsedRobots::is_allowed(self, url, user_agent)
    }

    fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        ParsedRobots::crawl_delay(self, user_agent)
    }
}
