use crate::utils::format::{format_bytes, format_rate};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one engine run, updated concurrently by file and
/// directory workers.
#[derive(Debug)]
pub struct RunStatistics {
    files_copied: AtomicU64,
    files_skipped: AtomicU64,
    items_ignored: AtomicU64,
    items_deleted: AtomicU64,
    errors: AtomicU64,
    total_bytes_copied: AtomicU64,
    bytes_saved: AtomicU64,
    started: Mutex<(Instant, DateTime<Utc>)>,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            files_copied: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            items_ignored: AtomicU64::new(0),
            items_deleted: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_bytes_copied: AtomicU64::new(0),
            bytes_saved: AtomicU64::new(0),
            started: Mutex::new((Instant::now(), Utc::now())),
        }
    }

    /// Zero every counter and restart the clock
    pub fn reset(&self) {
        for counter in [
            &self.files_copied,
            &self.files_skipped,
            &self.items_ignored,
            &self.items_deleted,
            &self.errors,
            &self.total_bytes_copied,
            &self.bytes_saved,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started.lock() = (Instant::now(), Utc::now());
    }

    pub fn record_copy(&self, bytes: u64) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skip(&self, bytes_saved: Option<u64>) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
        if let Some(bytes) = bytes_saved {
            self.bytes_saved.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn record_ignored(&self) {
        self.items_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.items_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RunSummary {
        let (started, started_at) = *self.started.lock();
        RunSummary {
            files_copied: self.files_copied.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            items_ignored: self.items_ignored.load(Ordering::Relaxed),
            items_deleted: self.items_deleted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_bytes_copied: self.total_bytes_copied.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            started_at,
            elapsed: started.elapsed(),
        }
    }
}

/// Point-in-time copy of [`RunStatistics`], for presentation
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub files_copied: u64,
    pub files_skipped: u64,
    pub items_ignored: u64,
    pub items_deleted: u64,
    pub errors: u64,
    pub total_bytes_copied: u64,
    pub bytes_saved: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Bytes copied per second of wall time
    pub fn transfer_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_bytes_copied as f64 / secs
        } else {
            0.0
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = Duration::from_millis(self.elapsed.as_millis() as u64);
        writeln!(
            f,
            "Run finished in {} ({})",
            humantime::format_duration(elapsed),
            format_rate(self.transfer_rate())
        )?;
        writeln!(
            f,
            "  copied:  {} files, {}",
            self.files_copied,
            format_bytes(self.total_bytes_copied)
        )?;
        writeln!(
            f,
            "  skipped: {} files, {} saved",
            self.files_skipped,
            format_bytes(self.bytes_saved)
        )?;
        writeln!(f, "  ignored: {}", self.items_ignored)?;
        writeln!(f, "  deleted: {}", self.items_deleted)?;
        write!(f, "  errors:  {}", self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_accumulate_and_reset() {
        let stats = RunStatistics::new();
        stats.record_copy(100);
        stats.record_copy(50);
        stats.record_skip(Some(10));
        stats.record_skip(None);
        stats.record_ignored();
        stats.record_deleted();
        stats.record_error();

        let summary = stats.snapshot();
        assert_eq!(summary.files_copied, 2);
        assert_eq!(summary.total_bytes_copied, 150);
        assert_eq!(summary.files_skipped, 2);
        assert_eq!(summary.bytes_saved, 10);
        assert_eq!(summary.items_ignored, 1);
        assert_eq!(summary.items_deleted, 1);
        assert_eq!(summary.errors, 1);

        stats.reset();
        let summary = stats.snapshot();
        assert_eq!(summary.files_copied, 0);
        assert_eq!(summary.total_bytes_copied, 0);
        assert!(!summary.has_errors());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(RunStatistics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_copy(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().files_copied, 8000);
        assert_eq!(stats.snapshot().total_bytes_copied, 8000);
    }

    #[test]
    fn transfer_rate_uses_elapsed_seconds() {
        let summary = RunSummary {
            files_copied: 1,
            files_skipped: 0,
            items_ignored: 0,
            items_deleted: 0,
            errors: 0,
            total_bytes_copied: 4096,
            bytes_saved: 0,
            started_at: Utc::now(),
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(summary.transfer_rate(), 2048.0);

        let instant = RunSummary {
            elapsed: Duration::ZERO,
            ..summary
        };
        assert_eq!(instant.transfer_rate(), 0.0);
    }

    #[test]
    fn summary_renders_counts() {
        let stats = RunStatistics::new();
        stats.record_copy(2048);
        let text = stats.snapshot().to_string();
        assert!(text.contains("copied:  1 files, 2.00 KB"));
        assert!(text.contains("errors:  0"));
    }
}
