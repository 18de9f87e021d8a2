use serde::{Deserialize, Serialize};

/// Milliseconds since Unix epoch.
pub type Timestamp = i64;

/// Number of milliseconds in common units.
pub const MS: i64 = 1_000;
pub const MINUTE_MS: i64 = 60 * MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// One OHLCV row at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(time: Timestamp, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Typical price: (high + low + close) / 3.
    pub fn hlc3(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Average price: (open + high + low + close) / 4.
    pub fn ohlc4(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }
}

/// Hard cap on retained samples in any rolling history.
pub const MAX_HISTORY: usize = 5000;
/// Samples kept beyond the active window when a trim fires.
pub const TRIM_MARGIN: usize = 500;

/// Append-only sample history with a bounded tail.
///
/// Rolling indicators address samples by *global* index (the index a sample
/// had when it was pushed), which stays valid across trims: trimming only
/// advances `dropped`, it never renumbers the survivors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleHistory {
    values: Vec<f64>,
    dropped: usize,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample; returns its global index.
    pub fn push(&mut self, value: f64) -> usize {
        self.values.push(value);
        self.dropped + self.values.len() - 1
    }

    /// Total samples ever pushed, including trimmed ones.
    pub fn total(&self) -> usize {
        self.dropped + self.values.len()
    }

    /// Samples still retained in memory.
    pub fn retained(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Sample at a global index, if it has not been trimmed away.
    pub fn get(&self, global_idx: usize) -> Option<f64> {
        if global_idx < self.dropped {
            return None;
        }
        self.values.get(global_idx - self.dropped).copied()
    }

    /// The last `n` samples, oldest first. Shorter if fewer are retained.
    pub fn tail(&self, n: usize) -> &[f64] {
        let len = self.values.len();
        &self.values[len - n.min(len)..]
    }

    /// Last pushed sample.
    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Drop all but the last `keep` samples.
    pub fn trim_to(&mut self, keep: usize) {
        if self.values.len() > keep {
            let excess = self.values.len() - keep;
            self.values.drain(..excess);
            self.dropped += excess;
        }
    }

    /// Apply the standard memory rule: once retention exceeds
    /// [`MAX_HISTORY`], keep only `window + TRIM_MARGIN` trailing samples.
    /// Returns true when a trim actually fired.
    pub fn enforce_cap(&mut self, window: usize) -> bool {
        if self.values.len() > MAX_HISTORY {
            self.trim_to(window + TRIM_MARGIN);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields() {
        let bar = Bar::new(0, 10.0, 14.0, 6.0, 12.0, 100.0);
        assert!((bar.hlc3() - 32.0 / 3.0).abs() < 1e-12);
        assert!((bar.ohlc4() - 10.5).abs() < 1e-12);
    }

    #[test]
    fn history_survives_trim() {
        let mut hist = SampleHistory::new();
        for i in 0..100 {
            hist.push(i as f64);
        }
        hist.trim_to(10);
        assert_eq!(hist.total(), 100);
        assert_eq!(hist.retained(), 10);
        assert_eq!(hist.get(89), None);
        assert_eq!(hist.get(90), Some(90.0));
        assert_eq!(hist.get(99), Some(99.0));
        assert_eq!(hist.tail(5), &[95.0, 96.0, 97.0, 98.0, 99.0]);
        // Global indices keep counting after a trim.
        assert_eq!(hist.push(100.0), 100);
    }

    #[test]
    fn cap_keeps_window_plus_margin() {
        let mut hist = SampleHistory::new();
        for i in 0..(MAX_HISTORY + 1) {
            hist.push(i as f64);
            hist.enforce_cap(20);
        }
        assert_eq!(hist.retained(), 20 + TRIM_MARGIN);
        assert_eq!(hist.total(), MAX_HISTORY + 1);
    }

    #[test]
    fn tail_shorter_than_request() {
        let mut hist = SampleHistory::new();
        hist.push(1.0);
        hist.push(2.0);
        assert_eq!(hist.tail(10), &[1.0, 2.0]);
    }
}
