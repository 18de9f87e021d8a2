//! Plot registry and strategy book: the per-run output side of the Context.

use std::collections::HashMap;

use bar_core::Timestamp;
use serde::{Deserialize, Serialize};

/// Named plot series, one value per finalized bar, NaN for gaps.
///
/// A series registered late is back-filled with NaN from bar 0 so every
/// series stays aligned with the bar index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlotRegistry {
    titles: Vec<String>,
    series: Vec<Vec<f64>>,
    index: HashMap<String, usize>,
}

impl PlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `title` on the current bar. A repeated call on the
    /// same bar overwrites the earlier value.
    pub fn record(&mut self, title: &str, value: f64, bar_index: usize) {
        let idx = match self.index.get(title) {
            Some(&idx) => idx,
            None => {
                let idx = self.series.len();
                self.titles.push(title.to_string());
                self.series.push(vec![f64::NAN; bar_index]);
                self.index.insert(title.to_string(), idx);
                idx
            }
        };
        let series = &mut self.series[idx];
        if series.len() <= bar_index {
            series.resize(bar_index, f64::NAN);
            series.push(value);
        } else {
            series[bar_index] = value;
        }
    }

    /// Pad every series to `bar_index + 1` entries.
    pub fn finalize_bar(&mut self, bar_index: usize) {
        for series in &mut self.series {
            if series.len() <= bar_index {
                series.resize(bar_index + 1, f64::NAN);
            }
        }
    }

    pub fn get(&self, title: &str) -> Option<&[f64]> {
        self.index.get(title).map(|&idx| self.series[idx].as_slice())
    }

    /// Iterate series in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.titles
            .iter()
            .zip(&self.series)
            .map(|(t, s)| (t.as_str(), s.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => f.write_str("long"),
            Direction::Short => f.write_str("short"),
        }
    }
}

/// One closed round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub entry_time: Timestamp,
    pub entry_price: f64,
    pub exit_time: Timestamp,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub direction: Direction,
}

/// Net open position. `size` is signed: positive long, negative short.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub size: f64,
    pub average_price: f64,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }

    pub fn direction(&self) -> Option<Direction> {
        if self.size > 0.0 {
            Some(Direction::Long)
        } else if self.size < 0.0 {
            Some(Direction::Short)
        } else {
            None
        }
    }
}

/// Single-instrument position and trade ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyBook {
    pub position: Position,
    pub cash: f64,
    trades: Vec<Trade>,
    open_id: String,
    open_time: Timestamp,
}

impl StrategyBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Open or extend a position. An entry against an open position in the
    /// opposite direction closes that position first.
    pub fn entry(
        &mut self,
        id: &str,
        direction: Direction,
        quantity: f64,
        price: f64,
        time: Timestamp,
    ) {
        if !quantity.is_finite() || quantity <= 0.0 {
            return;
        }
        let delta = match direction {
            Direction::Long => quantity,
            Direction::Short => -quantity,
        };
        if !self.position.is_flat() && self.position.size.signum() != delta.signum() {
            self.close_all(price, time);
        }
        if self.position.is_flat() {
            self.position = Position {
                size: delta,
                average_price: price,
            };
            self.open_id = id.to_string();
            self.open_time = time;
        } else {
            let held = self.position.size.abs();
            let added = delta.abs();
            self.position.average_price =
                (held * self.position.average_price + added * price) / (held + added);
            self.position.size += delta;
        }
    }

    /// Close the position opened under `id`. With a single net position this
    /// flattens the book; the trade keeps the entry id.
    pub fn close(&mut self, _id: &str, price: f64, time: Timestamp) {
        self.close_all(price, time);
    }

    /// Flatten the position, recording the trade and settling PnL into cash.
    pub fn close_all(&mut self, price: f64, time: Timestamp) {
        let Some(direction) = self.position.direction() else {
            return;
        };
        let quantity = self.position.size.abs();
        let entry = self.position.average_price;
        let pnl = match direction {
            Direction::Long => (price - entry) * quantity,
            Direction::Short => (entry - price) * quantity,
        };
        self.trades.push(Trade {
            id: std::mem::take(&mut self.open_id),
            entry_time: self.open_time,
            entry_price: entry,
            exit_time: time,
            exit_price: price,
            quantity,
            pnl,
            direction,
        });
        self.cash += pnl;
        self.position = Position::default();
    }

    /// Cash plus the open position marked at `price`.
    pub fn equity(&self, price: f64) -> f64 {
        let unrealized = match self.position.direction() {
            Some(Direction::Long) => (price - self.position.average_price) * self.position.size,
            Some(Direction::Short) => {
                (self.position.average_price - price) * self.position.size.abs()
            }
            None => 0.0,
        };
        self.cash + unrealized
    }
}
