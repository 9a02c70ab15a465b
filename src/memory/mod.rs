//! Process memory sampling
//!
//! The crawler checks a minimum-available-memory floor before starting and
//! a maximum-usage ceiling before every dispatch cycle. Sampling can be
//! costly, so the default monitor caches its value for a refresh interval.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Memory sampling contract
pub trait MemoryMonitor: Send + Sync {
    /// Memory currently used by this process, in megabytes
    fn current_usage_mb(&self) -> u64;

    /// Memory available to the system, in megabytes, if it can be determined
    fn available_mb(&self) -> Option<u64> {
        None
    }
}

/// Reads resident set size and available memory from `/proc`
///
/// On systems without `/proc`, usage reads as zero and availability as
/// unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryMonitor;

impl ProcessMemoryMonitor {
    pub fn new() -> Self {
        Self
    }
}

impl MemoryMonitor for ProcessMemoryMonitor {
    fn current_usage_mb(&self) -> u64 {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| read_kb_field(&status, "VmRSS"))
            .map(|kb| kb / 1024)
            .unwrap_or(0)
    }

    fn available_mb(&self) -> Option<u64> {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| read_kb_field(&meminfo, "MemAvailable"))
            .map(|kb| kb / 1024)
    }
}

/// Reads a `Name:   1234 kB` line from a `/proc` file
fn read_kb_field(content: &str, name: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != name {
            return None;
        }
        value.split_whitespace().next()?.parse().ok()
    })
}

/// Caches the usage reported by another monitor
///
/// The wrapped monitor is sampled at most once per refresh interval; the
/// first sample is taken on construction.
pub struct CachedMemoryMonitor {
    inner: Arc<dyn MemoryMonitor>,
    refresh: Duration,
    cached: Mutex<(Instant, u64)>,
}

impl CachedMemoryMonitor {
    /// Wraps `inner`; a zero refresh interval falls back to five seconds
    pub fn new(inner: Arc<dyn MemoryMonitor>, refresh: Duration) -> Self {
        let refresh = if refresh.is_zero() {
            Duration::from_secs(5)
        } else {
            refresh
        };
        let usage = inner.current_usage_mb();
        Self {
            inner,
            refresh,
            cached: Mutex::new((Instant::now(), usage)),
        }
    }
}

impl MemoryMonitor for CachedMemoryMonitor {
    fn current_usage_mb(&self) -> u64 {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if cached.0.elapsed() >= self.refresh {
            let old = cached.1;
            *cached = (Instant::now(), self.inner.current_usage_mb());
            tracing::debug!(
                "Updated cached memory usage value from {}mb to {}mb",
                old,
                cached.1
            );
        }
        cached.1
    }

    fn available_mb(&self) -> Option<u64> {
        self.inner.available_mb()
    }
}

impl std::fmt::Debug for CachedMemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedMemoryMonitor")
            .field("refresh", &self.refresh)
            .finish()
    }
}
