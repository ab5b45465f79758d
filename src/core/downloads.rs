//! Download progress records and the active-downloads map.
//!
//! Each `DownloadProgress` is shared between its owning download task
//! (the only writer of `downloaded_size`) and query callers. The two
//! terminal flags are atomic and exactly one terminal transition ever
//! succeeds; both flags are sticky afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::utils::sos::SignalOfStop;

/// Live progress of a single download.
#[derive(Debug)]
pub struct DownloadProgress {
    pub filename: String,
    total_size: AtomicU64,
    downloaded_size: AtomicU64,
    /// f64 bit pattern of the current MB/s estimate.
    speed_bits: AtomicU64,
    start_time: Instant,
    completed: AtomicBool,
    failed: AtomicBool,
    error_message: Mutex<String>,
    cancel: SignalOfStop,
}

impl DownloadProgress {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            total_size: AtomicU64::new(0),
            downloaded_size: AtomicU64::new(0),
            speed_bits: AtomicU64::new(0f64.to_bits()),
            start_time: Instant::now(),
            completed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            error_message: Mutex::new(String::new()),
            cancel: SignalOfStop::new(),
        }
    }

    /// Record received bytes. Only the owning download task calls this,
    /// so `downloaded_size` is monotonically non-decreasing.
    pub fn record_bytes(&self, n: u64) {
        self.downloaded_size.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_speed(&self, mbps: f64) {
        self.speed_bits.store(mbps.to_bits(), Ordering::Relaxed);
    }

    pub fn downloaded_size(&self) -> u64 {
        self.downloaded_size.load(Ordering::Relaxed)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    pub fn speed_mbps(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_failed()
    }

    pub fn error_message(&self) -> String {
        self.error_message.lock().unwrap().clone()
    }

    /// Terminal success. A no-op when the record already failed or
    /// completed; returns whether this call won the transition.
    pub fn complete(&self) -> bool {
        if self.is_failed() {
            return false;
        }
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.total_size
                .store(self.downloaded_size(), Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Terminal failure with a human-readable message. A no-op when a
    /// terminal state was already reached.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        if self.is_completed() {
            return false;
        }
        if self
            .failed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.error_message.lock().unwrap() = message.into();
            true
        } else {
            false
        }
    }

    /// Request cancellation; the owning task observes this and fails the
    /// download with message "cancelled".
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &SignalOfStop {
        &self.cancel
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot {
            filename: self.filename.clone(),
            total_size: self.total_size(),
            downloaded_size: self.downloaded_size(),
            speed_mbps: self.speed_mbps(),
            completed: self.is_completed(),
            failed: self.is_failed(),
            error_message: self.error_message(),
        }
    }
}

/// Point-in-time copy of a progress record, for query callers.
#[derive(Debug, Clone)]
pub struct DownloadSnapshot {
    pub filename: String,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub speed_mbps: f64,
    pub completed: bool,
    pub failed: bool,
    pub error_message: String,
}

/// Map of downloads keyed by filename, shared between download tasks
/// and query callers.
#[derive(Debug, Default)]
pub struct DownloadTracker {
    active: Mutex<HashMap<String, Arc<DownloadProgress>>>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh progress record under `filename`, replacing any
    /// previous record with that name.
    pub fn register(&self, filename: &str) -> Arc<DownloadProgress> {
        let progress = Arc::new(DownloadProgress::new(filename));
        self.active
            .lock()
            .unwrap()
            .insert(filename.to_string(), progress.clone());
        progress
    }

    pub fn get(&self, filename: &str) -> Option<Arc<DownloadProgress>> {
        self.active.lock().unwrap().get(filename).cloned()
    }

    pub fn all(&self) -> Vec<Arc<DownloadProgress>> {
        self.active.lock().unwrap().values().cloned().collect()
    }

    pub fn snapshots(&self) -> Vec<DownloadSnapshot> {
        self.all().iter().map(|p| p.snapshot()).collect()
    }

    /// Number of downloads that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.active
            .lock()
            .unwrap()
            .values()
            .filter(|p| !p.is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_exclusive_and_sticky() {
        let progress = DownloadProgress::new("a.bin");
        progress.record_bytes(100);

        assert!(progress.complete());
        assert!(!progress.complete());
        assert!(!progress.fail("too late"));

        assert!(progress.is_completed());
        assert!(!progress.is_failed());
        assert_eq!(progress.total_size(), 100);
    }

    #[test]
    fn failure_is_exclusive_and_sticky() {
        let progress = DownloadProgress::new("a.bin");

        assert!(progress.fail("connection reset"));
        assert!(!progress.fail("second failure"));
        assert!(!progress.complete());

        assert!(progress.is_failed());
        assert!(!progress.is_completed());
        assert_eq!(progress.error_message(), "connection reset");
    }

    #[test]
    fn downloaded_size_is_monotonic() {
        let progress = DownloadProgress::new("a.bin");
        let mut last = 0;
        for n in [10u64, 0, 4096, 1] {
            progress.record_bytes(n);
            let now = progress.downloaded_size();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 4107);
    }

    #[test]
    fn tracker_register_replaces() {
        let tracker = DownloadTracker::new();
        let first = tracker.register("a.bin");
        first.fail("old attempt");

        let second = tracker.register("a.bin");
        assert!(!second.is_terminal());
        assert_eq!(tracker.all().len(), 1);
        assert!(!tracker.get("a.bin").unwrap().is_failed());
    }

    #[test]
    fn in_flight_counts_only_non_terminal() {
        let tracker = DownloadTracker::new();
        tracker.register("a.bin");
        tracker.register("b.bin").complete();
        tracker.register("c.bin").fail("nope");
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn cancel_signals_token() {
        let progress = DownloadProgress::new("a.bin");
        assert!(!progress.cancel_token().cancelled());
        progress.cancel();
        assert!(progress.cancel_token().cancelled());
    }
}
