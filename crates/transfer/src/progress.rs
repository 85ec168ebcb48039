//! Session progress tracking.
//!
//! [`ProgressReader`] is the one contract the session, executor and status
//! poller share. [`Accounter`] only keeps counters; [`ProgressBar`] keeps
//! the same counters and also renders a live line on stderr.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Minimum delay between two interactive redraws.
const RENDER_INTERVAL: Duration = Duration::from_millis(500);

/// Point-in-time copy of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// Expected bytes; grows while the producer is still resolving.
    pub total: u64,
    pub transferred: u64,
    pub completed_objects: u64,
    /// Bytes per second over the sliding window; 0 once finished.
    pub speed: u64,
    pub finished: bool,
}

/// Read/update contract shared by both tracker variants.
pub trait ProgressReader: Send + Sync {
    fn set_total(&self, bytes: u64);

    /// Grows the expected total as new descriptors are discovered.
    fn add_total(&self, bytes: u64);

    /// Records `bytes` moved by the executor.
    fn add(&self, bytes: u64);

    /// Credits bytes that were skipped rather than moved. They count as
    /// transferred but never feed the speed window.
    fn add_skipped(&self, bytes: u64);

    fn complete_object(&self);

    /// Cumulative transferred bytes.
    fn get(&self) -> u64;

    fn speed(&self) -> u64;

    fn is_finished(&self) -> bool;

    /// Marks the session's work as exhausted. Idempotent.
    fn finish(&self);

    fn snapshot(&self) -> ProgressState;
}

/// Which tracker variant a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressMode {
    Interactive,
    #[default]
    Silent,
}

impl ProgressMode {
    pub fn tracker(self) -> Arc<dyn ProgressReader> {
        match self {
            ProgressMode::Interactive => Arc::new(ProgressBar::new()),
            ProgressMode::Silent => Arc::new(Accounter::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Accounter
// ---------------------------------------------------------------------------

/// Silent tracker: counters only.
pub struct Accounter {
    total: AtomicU64,
    transferred: AtomicU64,
    completed: AtomicU64,
    finished: AtomicBool,
    speed: SpeedCalculator,
}

impl Accounter {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            transferred: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            speed: SpeedCalculator::new(None, None),
        }
    }
}

impl Default for Accounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReader for Accounter {
    fn set_total(&self, bytes: u64) {
        self.total.store(bytes, Ordering::SeqCst);
    }

    fn add_total(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::SeqCst);
    }

    fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::SeqCst);
        self.speed.add_sample(bytes);
    }

    fn add_skipped(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::SeqCst);
    }

    fn complete_object(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn get(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }

    fn speed(&self) -> u64 {
        if self.is_finished() {
            return 0;
        }
        self.speed.bytes_per_second().round() as u64
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn snapshot(&self) -> ProgressState {
        ProgressState {
            total: self.total.load(Ordering::SeqCst),
            transferred: self.get(),
            completed_objects: self.completed.load(Ordering::SeqCst),
            speed: self.speed(),
            finished: self.is_finished(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressBar
// ---------------------------------------------------------------------------

/// Interactive tracker: same counters, plus a throttled stderr line.
pub struct ProgressBar {
    counters: Accounter,
    last_render: Mutex<Option<Instant>>,
}

impl ProgressBar {
    pub fn new() -> Self {
        Self {
            counters: Accounter::new(),
            last_render: Mutex::new(None),
        }
    }

    fn render(&self, force: bool) {
        {
            let mut last = self.last_render.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if !force && last.is_some_and(|t| now.duration_since(t) < RENDER_INTERVAL) {
                return;
            }
            *last = Some(now);
        }

        let s = self.counters.snapshot();
        let mut line = format!(
            "\r{} / {} ({} objects) {}/s",
            format_bytes(s.transferred),
            format_bytes(s.total),
            s.completed_objects,
            format_bytes(s.speed),
        );
        if s.finished {
            line.push('\n');
        }
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

impl Default for ProgressBar {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReader for ProgressBar {
    fn set_total(&self, bytes: u64) {
        self.counters.set_total(bytes);
        self.render(false);
    }

    fn add_total(&self, bytes: u64) {
        self.counters.add_total(bytes);
    }

    fn add(&self, bytes: u64) {
        self.counters.add(bytes);
        self.render(false);
    }

    fn add_skipped(&self, bytes: u64) {
        self.counters.add_skipped(bytes);
        self.render(false);
    }

    fn complete_object(&self) {
        self.counters.complete_object();
    }

    fn get(&self) -> u64 {
        self.counters.get()
    }

    fn speed(&self) -> u64 {
        self.counters.speed()
    }

    fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }

    fn finish(&self) {
        if !self.counters.finished.swap(true, Ordering::SeqCst) {
            self.render(true);
        }
    }

    fn snapshot(&self) -> ProgressState {
        self.counters.snapshot()
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounter_tracks_counters() {
        let acc = Accounter::new();
        acc.set_total(100);
        acc.add_total(50);
        acc.add(40);
        acc.add(60);
        acc.complete_object();

        let s = acc.snapshot();
        assert_eq!(s.total, 150);
        assert_eq!(s.transferred, 100);
        assert_eq!(s.completed_objects, 1);
        assert!(!s.finished);
    }

    #[test]
    fn finished_reports_zero_speed() {
        let acc = Accounter::new();
        acc.add(500);
        std::thread::sleep(Duration::from_millis(20));
        acc.add(500);
        acc.finish();
        acc.finish();
        assert!(acc.is_finished());
        assert_eq!(acc.speed(), 0);
        assert_eq!(acc.get(), 1000);
    }

    #[test]
    fn both_variants_share_contract() {
        for mode in [ProgressMode::Silent, ProgressMode::Interactive] {
            let tracker = mode.tracker();
            tracker.set_total(10);
            tracker.add(10);
            tracker.complete_object();
            tracker.finish();
            assert_eq!(
                tracker.snapshot(),
                ProgressState {
                    total: 10,
                    transferred: 10,
                    completed_objects: 1,
                    speed: 0,
                    finished: true,
                }
            );
        }
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(16 * 1024 * 1024), "16.0 MiB");
    }

    #[test]
    fn speed_calculator_needs_two_samples() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_multiple_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(50));
        calc.add_sample(500);
        assert!(calc.bytes_per_second() > 0.0);
    }

    #[test]
    fn skipped_bytes_do_not_move_speed() {
        let acc = Accounter::new();
        acc.add_skipped(1 << 30);
        std::thread::sleep(Duration::from_millis(20));
        acc.add_skipped(1 << 30);
        assert_eq!(acc.get(), 2 << 30);
        assert_eq!(acc.speed(), 0);

        acc.add(10);
        std::thread::sleep(Duration::from_millis(20));
        acc.add(10);
        assert!(acc.speed() < 1 << 20);
    }

    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        let s = calc.inner.lock().unwrap();
        assert!(s.samples.len() <= 5);
    }

    #[test]
    fn concurrent_updates_are_counted() {
        let acc = Arc::new(Accounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let a = Arc::clone(&acc);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        a.add(1);
                        let _ = a.speed();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(acc.get(), 800);
    }
}
