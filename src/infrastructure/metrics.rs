//! Interop counters

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide interop counters
pub struct InteropMetrics {
    calls_made: AtomicU64,
    call_failures: AtomicU64,
    hooks_installed: AtomicU64,
    callbacks_run: AtomicU64,
    libraries_loaded: AtomicU64,

    /// Failures broken down by error name
    failures_by_kind: RwLock<HashMap<&'static str, u64>>,

    start_time: Instant,
}

static INTEROP: Lazy<InteropMetrics> = Lazy::new(InteropMetrics::new);

/// Global interop metrics
pub fn interop() -> &'static InteropMetrics {
    &INTEROP
}

impl InteropMetrics {
    pub fn new() -> Self {
        Self {
            calls_made: AtomicU64::new(0),
            call_failures: AtomicU64::new(0),
            hooks_installed: AtomicU64::new(0),
            callbacks_run: AtomicU64::new(0),
            libraries_loaded: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_call(&self) {
        self.calls_made.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.call_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failure under its error name
    pub fn record_error(&self, name: &'static str) {
        *self.failures_by_kind.write().entry(name).or_default() += 1;
    }

    #[inline]
    pub fn record_hook_installed(&self) {
        self.hooks_installed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_callbacks(&self, count: usize) {
        self.callbacks_run.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_library(&self) {
        self.libraries_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self, name: &str) -> u64 {
        self.failures_by_kind.read().get(name).copied().unwrap_or(0)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> InteropStats {
        InteropStats {
            calls_made: self.calls_made.load(Ordering::Relaxed),
            call_failures: self.call_failures.load(Ordering::Relaxed),
            hooks_installed: self.hooks_installed.load(Ordering::Relaxed),
            callbacks_run: self.callbacks_run.load(Ordering::Relaxed),
            libraries_loaded: self.libraries_loaded.load(Ordering::Relaxed),
        }
    }

    /// Human-readable report
    pub fn report(&self) -> String {
        let stats = self.snapshot();
        let mut lines = vec![
            format!("Uptime: {:.2?}", self.uptime()),
            String::new(),
            "=== Interop ===".to_string(),
            format!("calls_made: {}", stats.calls_made),
            format!("call_failures: {}", stats.call_failures),
            format!("hooks_installed: {}", stats.hooks_installed),
            format!("callbacks_run: {}", stats.callbacks_run),
            format!("libraries_loaded: {}", stats.libraries_loaded),
        ];

        let failures = self.failures_by_kind.read();
        if !failures.is_empty() {
            lines.push(String::new());
            lines.push("=== Failures ===".to_string());
            let mut names: Vec<_> = failures.iter().collect();
            names.sort();
            for (name, count) in names {
                lines.push(format!("{}: {}", name, count));
            }
        }

        lines.join("\n")
    }
}

impl Default for InteropMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the interop counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct InteropStats {
    pub calls_made: u64,
    pub call_failures: u64,
    pub hooks_installed: u64,
    pub callbacks_run: u64,
    pub libraries_loaded: u64,
}
