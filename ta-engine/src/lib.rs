//! Streaming technical-analysis indicator states.
//!
//! Every state here follows the same dynamic-length discipline: an indicator
//! may be called with a different window length on every update. Incremental
//! O(1) paths are only taken when the window is full and the length is
//! unchanged; any other situation falls back to an O(length) recomputation
//! over the trailing window, which is always safe. Incrementally maintained
//! sums additionally get a scheduled full recomputation ("healing") to cancel
//! accumulated floating-point drift.
//!
//! All states answer with NaN while warming up, and treat a non-positive
//! length as "no value this bar" without corrupting their history.

use std::collections::VecDeque;

use bar_core::SampleHistory;
use serde::{Deserialize, Serialize};

/// Default healing interval for running sums.
pub const SUM_HEAL_INTERVAL: usize = 200;
/// Default healing interval for running variance (more drift-sensitive).
pub const VARIANCE_HEAL_INTERVAL: usize = 50;

fn weight_norm(length: usize) -> f64 {
    (length * (length + 1)) as f64 / 2.0
}

// ---------- simple moving average ------------------------------------------

/// Rolling arithmetic mean with O(1) steady-state updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmaState {
    history: SampleHistory,
    sum: f64,
    prev_length: usize,
    updates_since_heal: usize,
    pub heal_every: usize,
}

impl Default for SmaState {
    fn default() -> Self {
        Self::new()
    }
}

impl SmaState {
    pub fn new() -> Self {
        Self {
            history: SampleHistory::new(),
            sum: 0.0,
            prev_length: 0,
            updates_since_heal: 0,
            heal_every: SUM_HEAL_INTERVAL,
        }
    }

    fn recompute(&mut self, length: usize) {
        self.sum = self.history.tail(length).iter().sum();
    }

    /// Mean of the last `length` samples after absorbing `source`.
    pub fn update(&mut self, source: f64, length: usize) -> f64 {
        self.history.push(source);
        if length == 0 {
            self.prev_length = 0;
            return f64::NAN;
        }

        if length != self.prev_length {
            self.recompute(length);
            self.prev_length = length;
            self.updates_since_heal = 0;
        } else {
            self.sum += source;
            if self.history.total() > length {
                let exiting = self.history.total() - 1 - length;
                match self.history.get(exiting) {
                    Some(v) => self.sum -= v,
                    None => self.recompute(length),
                }
            }
            self.updates_since_heal += 1;
            if self.updates_since_heal >= self.heal_every {
                tracing::debug!(length, "healing sma running sum");
                self.recompute(length);
                self.updates_since_heal = 0;
            }
        }

        if self.history.enforce_cap(length) {
            tracing::debug!(length, "trimmed sma history");
        }
        if self.history.total() < length {
            f64::NAN
        } else {
            self.sum / length as f64
        }
    }

    /// Trailing window, oldest first. Shorter than `length` during warm-up.
    pub fn window(&self, length: usize) -> &[f64] {
        self.history.tail(length)
    }

    pub fn samples_seen(&self) -> usize {
        self.history.total()
    }
}

// ---------- running variance / Bollinger ------------------------------------

/// Rolling mean and population variance via sum and sum of squares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BollingerState {
    history: SampleHistory,
    sum: f64,
    sum_sq: f64,
    prev_length: usize,
    updates_since_heal: usize,
    pub heal_every: usize,
}

impl Default for BollingerState {
    fn default() -> Self {
        Self::new()
    }
}

impl BollingerState {
    pub fn new() -> Self {
        Self {
            history: SampleHistory::new(),
            sum: 0.0,
            sum_sq: 0.0,
            prev_length: 0,
            updates_since_heal: 0,
            heal_every: VARIANCE_HEAL_INTERVAL,
        }
    }

    fn recompute(&mut self, length: usize) {
        let win = self.history.tail(length);
        self.sum = win.iter().sum();
        self.sum_sq = win.iter().map(|v| v * v).sum();
    }

    /// Returns `(mean, variance)`; both NaN during warm-up. The variance is
    /// clamped at zero to absorb catastrophic cancellation.
    pub fn update(&mut self, source: f64, length: usize) -> (f64, f64) {
        self.history.push(source);
        if length == 0 {
            self.prev_length = 0;
            return (f64::NAN, f64::NAN);
        }

        if length != self.prev_length {
            self.recompute(length);
            self.prev_length = length;
            self.updates_since_heal = 0;
        } else {
            self.sum += source;
            self.sum_sq += source * source;
            if self.history.total() > length {
                let exiting = self.history.total() - 1 - length;
                match self.history.get(exiting) {
                    Some(v) => {
                        self.sum -= v;
                        self.sum_sq -= v * v;
                    }
                    None => self.recompute(length),
                }
            }
            self.updates_since_heal += 1;
            if self.updates_since_heal >= self.heal_every {
                tracing::debug!(length, "healing variance sums");
                self.recompute(length);
                self.updates_since_heal = 0;
            }
        }

        self.history.enforce_cap(length);
        if self.history.total() < length {
            return (f64::NAN, f64::NAN);
        }
        let mean = self.sum / length as f64;
        let variance = (self.sum_sq / length as f64 - mean * mean).max(0.0);
        (mean, variance)
    }

    /// Standard deviation of the trailing window.
    pub fn stdev(&mut self, source: f64, length: usize) -> f64 {
        self.update(source, length).1.sqrt()
    }

    /// `[basis, upper, lower]` Bollinger bands at `mult` standard deviations.
    pub fn bands(&mut self, source: f64, length: usize, mult: f64) -> [f64; 3] {
        let (mean, variance) = self.update(source, length);
        let sd = variance.sqrt();
        [mean, mean + mult * sd, mean - mult * sd]
    }
}

// ---------- weighted moving average -----------------------------------------

/// Linearly weighted mean (weights 1..length, newest heaviest).
///
/// The O(1) recurrence is only sound once the window is full and the length
/// is unchanged; during warm-up the "exiting value" has no defined meaning,
/// so every other update recomputes from the trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WmaState {
    history: SampleHistory,
    sum: f64,
    numerator: f64,
    prev_length: usize,
    updates_since_heal: usize,
    pub heal_every: usize,
}

impl Default for WmaState {
    fn default() -> Self {
        Self::new()
    }
}

impl WmaState {
    pub fn new() -> Self {
        Self {
            history: SampleHistory::new(),
            sum: 0.0,
            numerator: 0.0,
            prev_length: 0,
            updates_since_heal: 0,
            heal_every: SUM_HEAL_INTERVAL,
        }
    }

    fn recompute(&mut self, length: usize) {
        let win = self.history.tail(length);
        self.sum = win.iter().sum();
        self.numerator = win
            .iter()
            .enumerate()
            .map(|(i, v)| (i + 1) as f64 * v)
            .sum();
    }

    pub fn update(&mut self, source: f64, length: usize) -> f64 {
        self.history.push(source);
        if length == 0 {
            self.prev_length = 0;
            return f64::NAN;
        }

        let total = self.history.total();
        let was_full = total - 1 >= length;
        if length == self.prev_length && was_full {
            let exiting = self.history.get(total - 1 - length);
            match exiting {
                Some(oldest) => {
                    self.numerator = self.numerator + length as f64 * source - self.sum;
                    self.sum = self.sum + source - oldest;
                }
                None => self.recompute(length),
            }
            self.updates_since_heal += 1;
            if self.updates_since_heal >= self.heal_every {
                tracing::debug!(length, "healing wma numerator");
                self.recompute(length);
                self.updates_since_heal = 0;
            }
        } else {
            self.recompute(length);
            self.prev_length = length;
            self.updates_since_heal = 0;
        }

        self.history.enforce_cap(length);
        if total < length {
            f64::NAN
        } else {
            self.numerator / weight_norm(length)
        }
    }
}

// ---------- exponential smoothing -------------------------------------------

/// EMA with `alpha = 2 / (length + 1)`. Seeded by the first sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmaState {
    prev: Option<f64>,
}

impl EmaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, source: f64, length: usize) -> f64 {
        if length == 0 {
            return f64::NAN;
        }
        let alpha = 2.0 / (length as f64 + 1.0);
        self.smooth(source, alpha)
    }

    fn smooth(&mut self, source: f64, alpha: f64) -> f64 {
        let next = match self.prev {
            None => source,
            Some(prev) => alpha * source + (1.0 - alpha) * prev,
        };
        self.prev = Some(next);
        next
    }
}

/// Wilder smoothing: EMA with `alpha = 1 / length`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RmaState {
    inner: EmaState,
}

impl RmaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, source: f64, length: usize) -> f64 {
        if length == 0 {
            return f64::NAN;
        }
        self.inner.smooth(source, 1.0 / length as f64)
    }
}

// ---------- rolling extremes ------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtremeKind {
    Highest,
    Lowest,
}

/// Sliding-window extremum via a monotonic deque keyed by global sample
/// index. Length changes force a rebuild from the trailing history: a
/// shrinking window may need values the deque already discarded as
/// dominated, so patching the deque in place is never safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtremaState {
    kind: ExtremeKind,
    deque: VecDeque<(usize, f64)>,
    history: SampleHistory,
    prev_length: usize,
}

impl ExtremaState {
    pub fn kind(&self) -> ExtremeKind {
        self.kind
    }

    pub fn new(kind: ExtremeKind) -> Self {
        Self {
            kind,
            deque: VecDeque::new(),
            history: SampleHistory::new(),
            prev_length: 0,
        }
    }

    fn dominated(&self, incumbent: f64, challenger: f64) -> bool {
        match self.kind {
            ExtremeKind::Highest => incumbent <= challenger,
            ExtremeKind::Lowest => incumbent >= challenger,
        }
    }

    fn rebuild(&mut self, length: usize) {
        tracing::debug!(length, kind = ?self.kind, "rebuilding extremum deque");
        self.deque.clear();
        let total = self.history.total();
        let win = self.history.tail(length);
        let start = total - win.len();
        for (i, &v) in win.iter().enumerate() {
            while let Some(&(_, back)) = self.deque.back() {
                if self.dominated(back, v) {
                    self.deque.pop_back();
                } else {
                    break;
                }
            }
            self.deque.push_back((start + i, v));
        }
    }

    /// Returns `(extreme_value, bar_offset)` where `bar_offset` is the
    /// non-positive distance from the current bar to the extreme's bar.
    pub fn update(&mut self, source: f64, length: usize) -> (f64, f64) {
        let idx = self.history.push(source);
        if length == 0 {
            self.prev_length = 0;
            self.deque.clear();
            return (f64::NAN, f64::NAN);
        }

        if length != self.prev_length {
            self.rebuild(length);
            self.prev_length = length;
        } else {
            while let Some(&(_, back)) = self.deque.back() {
                if self.dominated(back, source) {
                    self.deque.pop_back();
                } else {
                    break;
                }
            }
            self.deque.push_back((idx, source));
            while let Some(&(front_idx, _)) = self.deque.front() {
                if front_idx + length <= idx {
                    self.deque.pop_front();
                } else {
                    break;
                }
            }
        }

        self.history.enforce_cap(length);
        if self.history.total() < length {
            return (f64::NAN, f64::NAN);
        }
        match self.deque.front() {
            Some(&(front_idx, value)) => (value, -((idx - front_idx) as f64)),
            None => (f64::NAN, f64::NAN),
        }
    }
}

// ---------- momentum / change -----------------------------------------------

/// `source - source[length bars ago]`; NaN until enough history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MomState {
    history: SampleHistory,
}

impl MomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, source: f64, length: usize) -> f64 {
        self.history.push(source);
        if length == 0 {
            return f64::NAN;
        }
        let total = self.history.total();
        let out = if total > length {
            match self.history.get(total - 1 - length) {
                Some(then) => source - then,
                None => f64::NAN,
            }
        } else {
            f64::NAN
        };
        self.history.enforce_cap(length);
        out
    }
}

/// One-bar difference; NaN on the first sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeState {
    prev: Option<f64>,
}

impl ChangeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, source: f64) -> f64 {
        match self.prev.replace(source) {
            Some(prev) => source - prev,
            None => f64::NAN,
        }
    }
}

// ---------- crossings -------------------------------------------------------

/// Remembers the previous `(x, y)` pair to detect sign changes of `x - y`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossState {
    last: Option<(f64, f64)>,
}

impl CrossState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(crossed_over, crossed_under)` for this bar; both false on the first.
    pub fn update(&mut self, x: f64, y: f64) -> (bool, bool) {
        let prev = self.last.replace((x, y));
        match prev {
            Some((px, py)) => {
                let before = px - py;
                let now = x - y;
                let over = before <= 0.0 && now > 0.0;
                let under = before >= 0.0 && now < 0.0;
                (over, under)
            }
            None => (false, false),
        }
    }
}

// ---------- RSI -------------------------------------------------------------

/// Relative Strength Index: RMA-smoothed gains and losses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RsiState {
    prev: Option<f64>,
    gains: RmaState,
    losses: RmaState,
}

impl RsiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, source: f64, length: usize) -> f64 {
        let prev = match self.prev.replace(source) {
            Some(p) => p,
            None => return f64::NAN,
        };
        if length == 0 {
            return f64::NAN;
        }
        let delta = source - prev;
        let avg_gain = self.gains.update(delta.max(0.0), length);
        let avg_loss = self.losses.update((-delta).max(0.0), length);
        if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        }
    }
}

// ---------- MACD ------------------------------------------------------------

/// MACD line, signal line, and histogram from three EMAs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacdState {
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
}

impl MacdState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, source: f64, fast: usize, slow: usize, signal: usize) -> [f64; 3] {
        let fast_v = self.fast.update(source, fast);
        let slow_v = self.slow.update(source, slow);
        let macd = fast_v - slow_v;
        let signal_v = self.signal.update(macd, signal);
        [macd, signal_v, macd - signal_v]
    }
}

// ---------- mean absolute deviation / CCI ------------------------------------

/// Rolling mean plus mean absolute deviation around it (O(length) per bar).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevState {
    sma: SmaState,
}

impl DevState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(mean, mean_abs_deviation)`; both NaN during warm-up.
    pub fn update(&mut self, source: f64, length: usize) -> (f64, f64) {
        let mean = self.sma.update(source, length);
        if mean.is_nan() {
            return (f64::NAN, f64::NAN);
        }
        let win = self.sma.window(length);
        let mad = win.iter().map(|v| (v - mean).abs()).sum::<f64>() / length as f64;
        (mean, mad)
    }
}

/// Commodity Channel Index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CciState {
    dev: DevState,
}

impl CciState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, source: f64, length: usize, constant: f64) -> f64 {
        let (mean, mad) = self.dev.update(source, length);
        (source - mean) / (constant * mad)
    }
}

// ---------- stochastic -------------------------------------------------------

/// `%K` stochastic over rolling extremes of highs and lows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StochState {
    highest: ExtremaState,
    lowest: ExtremaState,
}

impl Default for StochState {
    fn default() -> Self {
        Self::new()
    }
}

impl StochState {
    pub fn new() -> Self {
        Self {
            highest: ExtremaState::new(ExtremeKind::Highest),
            lowest: ExtremaState::new(ExtremeKind::Lowest),
        }
    }

    pub fn update(&mut self, source: f64, high: f64, low: f64, length: usize) -> f64 {
        let (hh, _) = self.highest.update(high, length);
        let (ll, _) = self.lowest.update(low, length);
        if hh.is_nan() || ll.is_nan() {
            return f64::NAN;
        }
        if hh == ll {
            return 0.0;
        }
        100.0 * (source - ll) / (hh - ll)
    }
}

// ---------- ATR --------------------------------------------------------------

/// True range of the current bar; `high - low` when no previous close exists.
pub fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(pc) => (high - low).max((high - pc).abs()).max((low - pc).abs()),
        None => high - low,
    }
}

/// Bare true range keyed to the previous close.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrState {
    prev_close: Option<f64>,
}

impl TrState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> f64 {
        true_range(high, low, self.prev_close.replace(close))
    }
}

/// Average True Range: RMA of the true range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtrState {
    prev_close: Option<f64>,
    rma: RmaState,
}

impl AtrState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64, length: usize) -> f64 {
        let tr = true_range(high, low, self.prev_close.replace(close));
        self.rma.update(tr, length)
    }
}

// ---------- SWMA -------------------------------------------------------------

/// Symmetric four-tap weighted average, weights 1-2-2-1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwmaState {
    window: VecDeque<f64>,
}

impl SwmaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, source: f64) -> f64 {
        self.window.push_back(source);
        if self.window.len() > 4 {
            self.window.pop_front();
        }
        if self.window.len() < 4 {
            return f64::NAN;
        }
        (self.window[0] + 2.0 * self.window[1] + 2.0 * self.window[2] + self.window[3]) / 6.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPS: f64 = 1e-6;

    fn close_or_both_nan(a: f64, b: f64) -> bool {
        (a.is_nan() && b.is_nan()) || (a - b).abs() <= EPS
    }

    fn naive_mean(data: &[f64], i: usize, length: usize) -> f64 {
        if length == 0 || i + 1 < length {
            return f64::NAN;
        }
        data[i + 1 - length..=i].iter().sum::<f64>() / length as f64
    }

    fn naive_wma(data: &[f64], i: usize, length: usize) -> f64 {
        if length == 0 || i + 1 < length {
            return f64::NAN;
        }
        let win = &data[i + 1 - length..=i];
        let num: f64 = win.iter().enumerate().map(|(k, v)| (k + 1) as f64 * v).sum();
        num / weight_norm(length)
    }

    fn naive_variance(data: &[f64], i: usize, length: usize) -> f64 {
        let mean = naive_mean(data, i, length);
        if mean.is_nan() {
            return f64::NAN;
        }
        let win = &data[i + 1 - length..=i];
        let sq: f64 = win.iter().map(|v| v * v).sum();
        (sq / length as f64 - mean * mean).max(0.0)
    }

    /// Extreme value and offset; ties resolved toward the most recent bar.
    fn naive_extreme(data: &[f64], i: usize, length: usize, kind: ExtremeKind) -> (f64, f64) {
        if length == 0 || i + 1 < length {
            return (f64::NAN, f64::NAN);
        }
        let start = i + 1 - length;
        let mut best_idx = start;
        for j in start..=i {
            let better = match kind {
                ExtremeKind::Highest => data[j] >= data[best_idx],
                ExtremeKind::Lowest => data[j] <= data[best_idx],
            };
            if better {
                best_idx = j;
            }
        }
        (data[best_idx], -((i - best_idx) as f64))
    }

    fn random_walk(seed: u64, n: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut price = 100.0;
        (0..n)
            .map(|_| {
                price += rng.gen_range(-1.0..1.0);
                price
            })
            .collect()
    }

    #[test]
    fn sma_matches_naive_constant_length() {
        let data = random_walk(7, 1200);
        let mut state = SmaState::new();
        for (i, &v) in data.iter().enumerate() {
            let got = state.update(v, 14);
            let want = naive_mean(&data, i, 14);
            assert!(
                close_or_both_nan(got, want),
                "bar {i}: got {got}, want {want}"
            );
        }
    }

    fn length_schedules(n: usize) -> Vec<(&'static str, Vec<usize>)> {
        let mut rng = StdRng::seed_from_u64(99);
        vec![
            ("stable", vec![21; n]),
            ("increasing", (0..n).map(|i| 2 + i / 200).collect()),
            ("decreasing", (0..n).map(|i| (45usize.saturating_sub(i / 200)).max(2)).collect()),
            ("random", (0..n).map(|_| rng.gen_range(2..=45)).collect()),
        ]
    }

    #[test]
    fn dynamic_length_equivalence() {
        const N: usize = 5200;
        const WARMUP: usize = 100;
        let data = random_walk(11, N);

        for (name, lengths) in length_schedules(N) {
            let mut sma = SmaState::new();
            let mut wma = WmaState::new();
            let mut bb = BollingerState::new();
            let mut hi = ExtremaState::new(ExtremeKind::Highest);
            let mut lo = ExtremaState::new(ExtremeKind::Lowest);

            for (i, &v) in data.iter().enumerate() {
                let len = lengths[i];
                let got_sma = sma.update(v, len);
                let got_wma = wma.update(v, len);
                let got_bands = bb.bands(v, len, 2.0);
                let (got_hi, got_hib) = hi.update(v, len);
                let (got_lo, got_lob) = lo.update(v, len);

                if i < WARMUP {
                    continue;
                }

                let want_mean = naive_mean(&data, i, len);
                let want_var = naive_variance(&data, i, len);
                let want_sd = want_var.sqrt();
                let (want_hi, want_hib) = naive_extreme(&data, i, len, ExtremeKind::Highest);
                let (want_lo, want_lob) = naive_extreme(&data, i, len, ExtremeKind::Lowest);

                assert!(
                    close_or_both_nan(got_sma, want_mean),
                    "{name} sma bar {i} len {len}: got {got_sma}, want {want_mean}"
                );
                assert!(
                    close_or_both_nan(got_wma, naive_wma(&data, i, len)),
                    "{name} wma bar {i} len {len}"
                );
                assert!(
                    close_or_both_nan(got_bands[0], want_mean),
                    "{name} bb basis bar {i} len {len}"
                );
                assert!(
                    close_or_both_nan(got_bands[1], want_mean + 2.0 * want_sd),
                    "{name} bb upper bar {i} len {len}"
                );
                assert!(
                    close_or_both_nan(got_bands[2], want_mean - 2.0 * want_sd),
                    "{name} bb lower bar {i} len {len}"
                );
                assert!(
                    close_or_both_nan(got_hi, want_hi),
                    "{name} highest bar {i} len {len}: got {got_hi}, want {want_hi}"
                );
                assert!(
                    close_or_both_nan(got_lo, want_lo),
                    "{name} lowest bar {i} len {len}"
                );
                assert!(
                    close_or_both_nan(got_hib, want_hib),
                    "{name} highestbars bar {i} len {len}: got {got_hib}, want {want_hib}"
                );
                assert!(
                    close_or_both_nan(got_lob, want_lob),
                    "{name} lowestbars bar {i} len {len}"
                );
            }
        }
    }

    #[test]
    fn shrinking_window_matches_rebuild() {
        // A long window hides a local maximum behind the deque front; the
        // shrink must resurface it exactly as a from-scratch rebuild would.
        let data = [9.0, 1.0, 2.0, 3.0, 8.0, 4.0, 5.0, 6.0, 7.0];
        let mut streaming = ExtremaState::new(ExtremeKind::Highest);
        for &v in &data[..8] {
            streaming.update(v, 8);
        }
        let (got, got_bars) = streaming.update(data[8], 3);

        let mut fresh = ExtremaState::new(ExtremeKind::Highest);
        let mut want = (f64::NAN, f64::NAN);
        for &v in &data {
            want = fresh.update(v, 3);
        }
        assert_eq!(got, want.0);
        assert_eq!(got_bars, want.1);
        assert_eq!(got, 7.0);
        assert_eq!(got_bars, 0.0);
    }

    #[test]
    fn variance_never_negative() {
        // Huge offset with tiny jitter invites catastrophic cancellation.
        let mut rng = StdRng::seed_from_u64(3);
        let mut bb = BollingerState::new();
        for _ in 0..2000 {
            let v = 1.0e9 + rng.gen_range(-1.0e-3..1.0e-3);
            let (_, variance) = bb.update(v, 20);
            assert!(variance.is_nan() || variance >= 0.0);
        }
    }

    #[test]
    fn sum_healing_cancels_drift() {
        // Alternate magnitudes that accumulate error in a running sum; the
        // scheduled recomputation keeps the stream glued to the reference.
        let mut rng = StdRng::seed_from_u64(5);
        let data: Vec<f64> = (0..3000)
            .map(|i| {
                if i % 2 == 0 {
                    rng.gen_range(1.0e8..2.0e8)
                } else {
                    rng.gen_range(0.001..0.002)
                }
            })
            .collect();
        let mut state = SmaState::new();
        for (i, &v) in data.iter().enumerate() {
            let got = state.update(v, 10);
            let want = naive_mean(&data, i, 10);
            if !want.is_nan() {
                let rel = ((got - want) / want).abs();
                assert!(rel < 1e-9, "bar {i}: rel err {rel}");
            }
        }
    }

    #[test]
    fn ema_seeds_with_first_sample() {
        let mut ema = EmaState::new();
        assert_eq!(ema.update(42.0, 10), 42.0);
        let second = ema.update(52.0, 10);
        let alpha = 2.0 / 11.0;
        assert!((second - (alpha * 52.0 + (1.0 - alpha) * 42.0)).abs() < 1e-12);
    }

    #[test]
    fn rma_uses_wilder_alpha() {
        let mut rma = RmaState::new();
        assert_eq!(rma.update(10.0, 5), 10.0);
        let second = rma.update(20.0, 5);
        assert!((second - (0.2 * 20.0 + 0.8 * 10.0)).abs() < 1e-12);
    }

    #[test]
    fn rsi_all_gains_is_hundred() {
        let mut rsi = RsiState::new();
        assert!(rsi.update(1.0, 14).is_nan());
        for i in 2..40 {
            let v = rsi.update(i as f64, 14);
            assert_eq!(v, 100.0);
        }
    }

    #[test]
    fn macd_parts_are_consistent() {
        let data = random_walk(13, 200);
        let mut macd = MacdState::new();
        let mut fast = EmaState::new();
        let mut slow = EmaState::new();
        for &v in &data {
            let [line, signal, hist] = macd.update(v, 12, 26, 9);
            let want_line = fast.update(v, 12) - slow.update(v, 26);
            assert!((line - want_line).abs() < 1e-9);
            assert!((hist - (line - signal)).abs() < 1e-9);
        }
    }

    #[test]
    fn stoch_flat_window_is_zero() {
        let mut stoch = StochState::new();
        let mut last = f64::NAN;
        for _ in 0..5 {
            last = stoch.update(10.0, 10.0, 10.0, 3);
        }
        assert_eq!(last, 0.0);
    }

    #[test]
    fn cross_directions() {
        let mut cross = CrossState::new();
        assert_eq!(cross.update(1.0, 2.0), (false, false)); // first bar
        assert_eq!(cross.update(3.0, 2.0), (true, false)); // up through
        assert_eq!(cross.update(1.0, 2.0), (false, true)); // back down
        assert_eq!(cross.update(0.5, 2.0), (false, false)); // stays below
    }

    #[test]
    fn mom_needs_history() {
        let mut mom = MomState::new();
        assert!(mom.update(1.0, 2).is_nan());
        assert!(mom.update(2.0, 2).is_nan());
        assert_eq!(mom.update(5.0, 2), 4.0); // 5 - 1
    }

    #[test]
    fn change_is_one_bar_difference() {
        let mut change = ChangeState::new();
        assert!(change.update(3.0).is_nan());
        assert_eq!(change.update(7.5), 4.5);
    }

    #[test]
    fn swma_four_taps() {
        let mut swma = SwmaState::new();
        assert!(swma.update(1.0).is_nan());
        assert!(swma.update(2.0).is_nan());
        assert!(swma.update(3.0).is_nan());
        let v = swma.update(4.0);
        assert!((v - (1.0 + 4.0 + 6.0 + 4.0) / 6.0).abs() < 1e-12);
    }

    #[test]
    fn atr_first_bar_is_range() {
        let mut atr = AtrState::new();
        assert_eq!(atr.update(12.0, 8.0, 10.0, 14), 4.0);
        // Gap above the prior close widens the true range.
        let second = atr.update(20.0, 19.0, 19.5, 14);
        let tr = (20.0f64 - 19.0)
            .max((20.0f64 - 10.0).abs())
            .max((19.0f64 - 10.0).abs());
        assert!((second - (4.0 + (tr - 4.0) / 14.0)).abs() < 1e-12);
    }

    #[test]
    fn degenerate_window_length_one() {
        let mut sma = SmaState::new();
        let mut hi = ExtremaState::new(ExtremeKind::Highest);
        for &v in &[5.0, 6.0, 7.0] {
            assert_eq!(sma.update(v, 1), v);
            assert_eq!(hi.update(v, 1), (v, 0.0));
        }
    }

    #[test]
    fn non_positive_length_yields_nan_and_recovers() {
        let mut sma = SmaState::new();
        sma.update(1.0, 3);
        assert!(sma.update(2.0, 0).is_nan());
        // History kept counting; a valid length picks up all three samples.
        assert_eq!(sma.update(3.0, 3), 2.0);
    }

    #[test]
    fn extremes_survive_history_trim() {
        let mut hi = ExtremaState::new(ExtremeKind::Highest);
        let data = random_walk(17, 6000);
        for (i, &v) in data.iter().enumerate() {
            let (got, _) = hi.update(v, 30);
            let (want, _) = naive_extreme(&data, i, 30, ExtremeKind::Highest);
            assert!(close_or_both_nan(got, want), "bar {i}");
        }
    }
}
