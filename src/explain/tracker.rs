//! Runtime counters embedded in the plan for ANALYZE output.
//!
//! Trackers are plain counters owned by the statement's executing thread. They
//! are updated on the row hot path, so they never allocate, lock, or fail.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Counts scans, rows read, and rows left after the attached filter.
///
/// Not tied to a physical table: it can also track reads from temporary
/// tables or join buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTracker {
    scans: u64,
    rows: u64,
    rows_after_filter: u64,
}

impl AccessTracker {
    /// Creates a tracker with all counters at zero.
    pub const fn new() -> Self {
        Self {
            scans: 0,
            rows: 0,
            rows_after_filter: 0,
        }
    }

    /// Records that the access path was (re-)initialized.
    #[inline]
    pub fn on_scan_init(&mut self) {
        self.scans += 1;
    }

    /// Records one row read from the access path.
    #[inline]
    pub fn on_record_read(&mut self) {
        self.rows += 1;
    }

    /// Records one row that survived the attached filter.
    #[inline]
    pub fn on_record_after_filter(&mut self) {
        self.rows_after_filter += 1;
    }

    /// Number of scans started.
    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Alias for [`AccessTracker::scans`], reported as `r_loops`.
    pub fn loops(&self) -> u64 {
        self.scans
    }

    /// Total rows read across all scans.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Total rows surviving the filter across all scans.
    pub fn rows_after_filter(&self) -> u64 {
        self.rows_after_filter
    }

    /// Whether any scan was recorded.
    pub fn has_scans(&self) -> bool {
        self.scans != 0
    }

    /// Average rows per scan, `0.0` when nothing was scanned.
    pub fn avg_rows(&self) -> f64 {
        if self.scans == 0 {
            0.0
        } else {
            self.rows as f64 / self.scans as f64
        }
    }

    /// Fraction of read rows that passed the filter.
    ///
    /// Reading nothing filters nothing out, so the fraction is `1.0` when no
    /// rows were read.
    pub fn filtered_fraction(&self) -> f64 {
        if self.rows > 0 {
            self.rows_after_filter as f64 / self.rows as f64
        } else {
            1.0
        }
    }
}

/// Measures invocation count and wall time of a guarded region.
///
/// Reentrant starts only bump a depth counter; the outermost start/stop pair
/// is the one that measures time and counts an invocation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimeTracker {
    count: u64,
    elapsed: Duration,
    #[serde(skip)]
    depth: u32,
    #[serde(skip)]
    started: Option<Instant>,
}

impl TimeTracker {
    /// Creates an idle tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the tracked region.
    #[inline]
    pub fn start(&mut self) {
        if self.depth == 0 {
            self.started = Some(Instant::now());
        }
        self.depth += 1;
    }

    /// Leaves the tracked region. Unbalanced stops are ignored.
    #[inline]
    pub fn stop(&mut self) {
        match self.depth {
            0 => {}
            1 => {
                self.depth = 0;
                if let Some(start) = self.started.take() {
                    self.elapsed += start.elapsed();
                }
                self.count += 1;
            }
            _ => self.depth -= 1,
        }
    }

    /// Runs `f` inside a start/stop pair.
    pub fn track<T>(&mut self, f: impl FnOnce() -> T) -> T {
        self.start();
        let out = f();
        self.stop();
        out
    }

    /// Whether a region is currently open.
    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Completed outermost invocations.
    pub fn loops(&self) -> u64 {
        self.count
    }

    /// Accumulated wall time of completed invocations.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Accumulated wall time in milliseconds.
    pub fn time_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// Adds externally measured time, counting it as one invocation.
    pub fn record(&mut self, elapsed: Duration) {
        self.elapsed += elapsed;
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_scans_report_zero_average() {
        let tracker = AccessTracker::new();
        assert!(!tracker.has_scans());
        assert_eq!(tracker.avg_rows(), 0.0);
        assert_eq!(tracker.loops(), 0);
    }

    #[test]
    fn average_rows_per_scan() {
        let mut tracker = AccessTracker::new();
        for _ in 0..4 {
            tracker.on_scan_init();
        }
        for _ in 0..10 {
            tracker.on_record_read();
        }
        assert_eq!(tracker.avg_rows(), 2.5);
    }

    #[test]
    fn filtered_fraction_defaults_to_one_without_rows() {
        let mut tracker = AccessTracker::new();
        tracker.on_record_after_filter();
        assert_eq!(tracker.filtered_fraction(), 1.0);
    }

    #[test]
    fn filtered_fraction_uses_rows_read() {
        let mut tracker = AccessTracker::new();
        tracker.on_scan_init();
        for _ in 0..10 {
            tracker.on_record_read();
        }
        for _ in 0..3 {
            tracker.on_record_after_filter();
        }
        assert!((tracker.filtered_fraction() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn nested_starts_count_once() {
        let mut tracker = TimeTracker::new();
        tracker.start();
        tracker.start();
        std::thread::sleep(Duration::from_millis(2));
        tracker.stop();
        assert!(tracker.is_active());
        assert_eq!(tracker.loops(), 0);
        tracker.stop();
        assert!(!tracker.is_active());
        assert_eq!(tracker.loops(), 1);
        assert!(tracker.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn unbalanced_stop_is_ignored() {
        let mut tracker = TimeTracker::new();
        tracker.stop();
        assert_eq!(tracker.loops(), 0);
        assert_eq!(tracker.elapsed(), Duration::ZERO);
    }

    #[test]
    fn track_wraps_closure() {
        let mut tracker = TimeTracker::new();
        let value = tracker.track(|| 7);
        assert_eq!(value, 7);
        assert_eq!(tracker.loops(), 1);
    }
}
