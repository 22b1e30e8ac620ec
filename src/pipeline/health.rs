//! Bookkeeping counters for a stream sink
//!
//! Drops are a normal outcome of admission, not errors. These counters are
//! the only place they surface.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::admission::DropReason;

/// Health metrics for one stream sink
///
/// All fields use atomic operations so the host can read them while the
/// delivery thread updates them.
#[derive(Debug, Default)]
pub struct SinkHealth {
    /// Samples forwarded downstream
    pub samples_accepted: AtomicU64,

    /// Samples stamped before the run's clock start
    pub drops_before_start: AtomicU64,

    /// Samples whose presentation or decode time went backwards
    pub drops_non_monotonic: AtomicU64,

    /// Samples whose timestamps could not be normalized
    pub drops_out_of_range: AtomicU64,

    /// Samples refused because the stream was not started
    pub rejected_not_started: AtomicU64,

    /// Total bytes delivered downstream
    pub bytes_delivered: AtomicU64,

    /// Pull requests emitted to the producer
    pub requests_issued: AtomicU64,

    pub markers_placed: AtomicU64,

    pub flushes: AtomicU64,
}

impl SinkHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample forwarded downstream
    pub fn record_accepted(&self, size: usize) {
        self.samples_accepted.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record a dropped sample
    pub fn record_drop(&self, reason: DropReason) {
        match reason {
            DropReason::PredatesClockStart => {
                self.drops_before_start.fetch_add(1, Ordering::Relaxed);
            }
            DropReason::NonMonotonicPresentation | DropReason::NonMonotonicDecode => {
                self.drops_non_monotonic.fetch_add(1, Ordering::Relaxed);
            }
            DropReason::TimestampOutOfRange => {
                self.drops_out_of_range.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_rejected(&self) {
        self.rejected_not_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requests(&self, count: u8) {
        self.requests_issued
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_marker(&self) {
        self.markers_placed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Total samples dropped by admission
    pub fn samples_dropped(&self) -> u64 {
        self.drops_before_start.load(Ordering::Relaxed)
            + self.drops_non_monotonic.load(Ordering::Relaxed)
            + self.drops_out_of_range.load(Ordering::Relaxed)
    }

    /// Drop rate as a percentage of samples that reached admission
    pub fn drop_rate(&self) -> f64 {
        let drops = self.samples_dropped();
        let total = drops + self.samples_accepted.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (drops as f64 / total as f64) * 100.0
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            drops_before_start: self.drops_before_start.load(Ordering::Relaxed),
            drops_non_monotonic: self.drops_non_monotonic.load(Ordering::Relaxed),
            drops_out_of_range: self.drops_out_of_range.load(Ordering::Relaxed),
            rejected_not_started: self.rejected_not_started.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            markers_placed: self.markers_placed.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            drop_rate: self.drop_rate(),
        }
    }
}

/// Snapshot of sink counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub samples_accepted: u64,
    pub drops_before_start: u64,
    pub drops_non_monotonic: u64,
    pub drops_out_of_range: u64,
    pub rejected_not_started: u64,
    pub bytes_delivered: u64,
    pub requests_issued: u64,
    pub markers_placed: u64,
    pub flushes: u64,
    pub drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} samples ({} early drops, {} out-of-order drops, {} out-of-range drops, {:.2}%), {} rejected, {} bytes, {} requests, {} markers, {} flushes",
            self.samples_accepted,
            self.drops_before_start,
            self.drops_non_monotonic,
            self.drops_out_of_range,
            self.drop_rate,
            self.rejected_not_started,
            self.bytes_delivered,
            self.requests_issued,
            self.markers_placed,
            self.flushes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_counters() {
        let health = SinkHealth::new();

        health.record_accepted(1000);
        health.record_accepted(500);
        health.record_drop(DropReason::PredatesClockStart);
        health.record_drop(DropReason::NonMonotonicDecode);
        health.record_drop(DropReason::NonMonotonicPresentation);
        health.record_drop(DropReason::TimestampOutOfRange);
        health.record_requests(2);

        let summary = health.summary();
        assert_eq!(summary.samples_accepted, 2);
        assert_eq!(summary.bytes_delivered, 1500);
        assert_eq!(summary.drops_before_start, 1);
        assert_eq!(summary.drops_non_monotonic, 2);
        assert_eq!(summary.drops_out_of_range, 1);
        assert_eq!(summary.requests_issued, 2);
        assert_eq!(health.samples_dropped(), 4);
        assert!((summary.drop_rate - 4.0 / 6.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_drop_rate() {
        let health = SinkHealth::new();
        assert_eq!(health.drop_rate(), 0.0);
        assert!(health.summary().to_string().starts_with("Health: 0 samples"));
    }
}
