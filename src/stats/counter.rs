//! Rate-limited error counter
//!
//! Per-packet failures can happen thousands of times per second on a broken
//! stream. Each failure is counted, but the log only gets one line per
//! report interval with the number of failures since the previous line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counts failures and reports them to the log at most once per interval
#[derive(Debug)]
pub struct ErrorCounter {
    /// Log message, e.g. "processing errors"
    label: &'static str,
    /// Context attached to every report (stream or reader name)
    scope: String,
    total: AtomicU64,
    pending: AtomicU64,
    last_report: Mutex<Option<Instant>>,
    interval: Duration,
}

impl ErrorCounter {
    pub fn new(label: &'static str, scope: impl Into<String>, interval: Duration) -> Self {
        Self {
            label,
            scope: scope.into(),
            total: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            last_report: Mutex::new(None),
            interval,
        }
    }

    /// Count one failure
    pub fn increment(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.maybe_report();
    }

    /// Failures counted since creation
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Report whatever is pending, regardless of the interval
    pub fn flush(&self) {
        let mut last = self.last_report.lock().unwrap_or_else(|e| e.into_inner());
        self.report();
        *last = Some(Instant::now());
    }

    fn maybe_report(&self) {
        // a contended lock means someone else is reporting right now
        let Ok(mut last) = self.last_report.try_lock() else {
            return;
        };

        let now = Instant::now();
        let due = match *last {
            Some(at) => now.duration_since(at) >= self.interval,
            None => true,
        };

        if due {
            self.report();
            *last = Some(now);
        }
    }

    fn report(&self) {
        let count = self.pending.swap(0, Ordering::Relaxed);
        if count > 0 {
            tracing::warn!(
                scope = %self.scope,
                count = count,
                total = self.total(),
                "{}",
                self.label
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_every_increment() {
        let counter = ErrorCounter::new("processing errors", "test", Duration::from_secs(3600));

        for _ in 0..10 {
            counter.increment();
        }

        assert_eq!(counter.total(), 10);
        // first increment reported immediately, the rest are held back
        assert_eq!(counter.pending.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn test_flush_clears_pending() {
        let counter = ErrorCounter::new("processing errors", "test", Duration::from_secs(3600));
        counter.increment();
        counter.increment();

        counter.flush();
        assert_eq!(counter.pending.load(Ordering::Relaxed), 0);
        assert_eq!(counter.total(), 2);
    }

    #[test]
    fn test_zero_interval_reports_each_time() {
        let counter = ErrorCounter::new("processing errors", "test", Duration::ZERO);
        counter.increment();
        counter.increment();
        assert_eq!(counter.pending.load(Ordering::Relaxed), 0);
    }
}
