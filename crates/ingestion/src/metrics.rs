//! Ingestion metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Ingestion metrics, shared by every adapter of a pipeline
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Samples produced by sources
    pub samples_received: AtomicU64,

    /// Samples dropped because the instance worker queue was full
    pub samples_dropped: AtomicU64,

    /// Samples the sync service refused (worker gone, instance unknown)
    pub samples_failed: AtomicU64,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.samples_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            samples_failed: self.samples_failed.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub samples_received: u64,
    pub samples_dropped: u64,
    pub samples_failed: u64,
}

impl MetricsSnapshot {
    /// Samples that made it into a worker queue
    pub fn samples_queued(&self) -> u64 {
        self.samples_received
            .saturating_sub(self.samples_dropped + self.samples_failed)
    }
}
