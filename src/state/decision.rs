use std::fmt;

/// Verdict returned by every crawl decision point
///
/// A denial is ordinary control flow, never an error. `should_stop` asks the
/// crawler to drain in-flight work and schedule nothing new;
/// `should_hard_stop` asks it to abandon everything immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlDecision {
    pub allow: bool,
    pub reason: String,
    pub should_stop: bool,
    pub should_hard_stop: bool,
}

impl CrawlDecision {
    /// An allowing decision with no reason attached
    pub fn allow() -> Self {
        Self {
            allow: true,
            ..Self::default()
        }
    }

    /// A denying decision with a human readable reason
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
            ..Self::default()
        }
    }

    /// Marks the decision as requesting a soft stop of the crawl
    pub fn with_stop(mut self) -> Self {
        self.should_stop = true;
        self
    }

    /// Marks the decision as requesting a hard stop of the crawl
    pub fn with_hard_stop(mut self) -> Self {
        self.should_hard_stop = true;
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.allow
    }
}

impl fmt::Display for CrawlDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.allow {
            write!(f, "allowed")
        } else {
            write!(f, "denied: {}", self.reason)
        }
    }
}
