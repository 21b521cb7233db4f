//! Batch counters and the end-of-run summary.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters for one batch run.
#[derive(Debug)]
pub struct Metrics {
    /// Granules that completed their full lifecycle
    pub granules_clean: AtomicU64,

    /// Granules retained for manual inspection
    pub granules_retained: AtomicU64,

    /// Engine invocations attempted
    pub engine_invocations: AtomicU64,

    /// Engine invocations that failed (spawn, exit, or log signature)
    pub engine_failures: AtomicU64,

    /// Products confirmed on disk
    pub products_verified: AtomicU64,

    /// Expected products that were missing or ambiguous
    pub products_missing: AtomicU64,

    /// Files removed by deferred cleanup
    pub files_removed: AtomicU64,

    /// Ancillary files linked into the batch namespace
    pub ancillary_linked: AtomicU64,

    /// Input archives that failed to unpack
    pub unpack_failures: AtomicU64,

    /// Start time
    start_time: Instant,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            granules_clean: AtomicU64::new(0),
            granules_retained: AtomicU64::new(0),
            engine_invocations: AtomicU64::new(0),
            engine_failures: AtomicU64::new(0),
            products_verified: AtomicU64::new(0),
            products_missing: AtomicU64::new(0),
            files_removed: AtomicU64::new(0),
            ancillary_linked: AtomicU64::new(0),
            unpack_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    /// Record a granule that completed its full lifecycle.
    pub fn add_granule_clean(&self) {
        self.granules_clean.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retained granule.
    pub fn add_granule_retained(&self) {
        self.granules_retained.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an attempted engine invocation.
    pub fn add_engine_invocation(&self) {
        self.engine_invocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed engine invocation.
    pub fn add_engine_failure(&self) {
        self.engine_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record products confirmed on disk.
    pub fn add_products_verified(&self, count: u64) {
        self.products_verified.fetch_add(count, Ordering::Relaxed);
    }

    /// Record expected products that were missing or ambiguous.
    pub fn add_products_missing(&self, count: u64) {
        self.products_missing.fetch_add(count, Ordering::Relaxed);
    }

    /// Record files removed by deferred cleanup.
    pub fn add_files_removed(&self, count: u64) {
        self.files_removed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record ancillary files linked into the batch namespace.
    pub fn add_ancillary_linked(&self, count: u64) {
        self.ancillary_linked.fetch_add(count, Ordering::Relaxed);
    }

    /// Record input archives that failed to unpack.
    pub fn add_unpack_failures(&self, count: u64) {
        self.unpack_failures.fetch_add(count, Ordering::Relaxed);
    }

    /// Elapsed time since the batch started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a serializable snapshot of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            granules_clean: self.granules_clean.load(Ordering::Relaxed),
            granules_retained: self.granules_retained.load(Ordering::Relaxed),
            engine_invocations: self.engine_invocations.load(Ordering::Relaxed),
            engine_failures: self.engine_failures.load(Ordering::Relaxed),
            products_verified: self.products_verified.load(Ordering::Relaxed),
            products_missing: self.products_missing.load(Ordering::Relaxed),
            files_removed: self.files_removed.load(Ordering::Relaxed),
            ancillary_linked: self.ancillary_linked.load(Ordering::Relaxed),
            unpack_failures: self.unpack_failures.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed().as_secs_f64(),
        }
    }
}

/// Point-in-time copy of the batch counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub granules_clean: u64,
    pub granules_retained: u64,
    pub engine_invocations: u64,
    pub engine_failures: u64,
    pub products_verified: u64,
    pub products_missing: u64,
    pub files_removed: u64,
    pub ancillary_linked: u64,
    pub unpack_failures: u64,
    pub elapsed_secs: f64,
}

impl MetricsSnapshot {
    /// Save the snapshot as JSON.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "clean: {}, retained: {}, invocations: {} ({} failed), products: {} ({} missing), removed: {}, linked: {}, elapsed: {:.1}s",
            self.granules_clean,
            self.granules_retained,
            self.engine_invocations,
            self.engine_failures,
            self.products_verified,
            self.products_missing,
            self.files_removed,
            self.ancillary_linked,
            self.elapsed_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.add_engine_invocation();
        metrics.add_engine_invocation();
        metrics.add_engine_invocation();
        metrics.add_engine_failure();
        metrics.add_files_removed(12);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.engine_invocations, 3);
        assert_eq!(snapshot.engine_failures, 1);
        assert_eq!(snapshot.files_removed, 12);
        assert_eq!(snapshot.granules_clean, 0);
    }

    #[test]
    fn test_snapshot_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let metrics = Metrics::new();
        metrics.add_granule_clean();
        metrics.add_granule_clean();

        metrics
            .snapshot()
            .save_to_file(path.to_str().unwrap())
            .unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("\"granules_clean\": 2"));
    }

    #[test]
    fn test_display_summary() {
        let metrics = Metrics::new();
        metrics.add_granule_clean();
        let display = format!("{}", metrics.snapshot());
        assert!(display.contains("clean: 1"));
    }
}
