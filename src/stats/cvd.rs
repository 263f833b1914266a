//! Cumulative volume delta: a signed running sum of (buy - sell) volume,
//! plus a rate-of-change reading used by the momentum/divergence detector.

use std::collections::VecDeque;

use crate::domain::{Side, Trade};

pub struct CvdTracker {
    cumulative: i64,
    history: VecDeque<i64>,
    history_size: usize,
    roc_period: usize,
}

impl CvdTracker {
    pub fn new(history_size: usize, roc_period: usize) -> Self {
        Self { cumulative: 0, history: VecDeque::with_capacity(history_size), history_size, roc_period }
    }

    pub fn record(&mut self, trade: &Trade) {
        let signed = match trade.side {
            Side::Buy => trade.volume as i64,
            Side::Sell => -(trade.volume as i64),
            Side::Unknown => 0,
        };
        self.cumulative += signed;
        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(self.cumulative);
    }

    pub fn cumulative(&self) -> i64 {
        self.cumulative
    }

    /// Delta accumulated over the last `n` recorded trades.
    pub fn delta_over(&self, n: usize) -> i64 {
        if self.history.len() < 2 {
            return 0;
        }
        let take = n.min(self.history.len() - 1);
        let last = *self.history.back().unwrap();
        let earlier = self.history[self.history.len() - 1 - take];
        last - earlier
    }

    /// Ratio, as a percentage, of the most recent period's delta to the
    /// delta of the window immediately preceding it.
    pub fn rate_of_change(&self) -> f64 {
        let period = self.roc_period;
        if self.history.len() < period * 2 {
            return 0.0;
        }
        let len = self.history.len();
        let last = self.history[len - 1];
        let mid = self.history[len - 1 - period];
        let earlier = self.history[len - 1 - 2 * period];

        let recent_delta = last - mid;
        let prior_delta = mid - earlier;
        if prior_delta == 0 {
            return if recent_delta == 0 { 0.0 } else { 100.0 * recent_delta.signum() as f64 };
        }
        100.0 * (recent_delta as f64) / (prior_delta.abs() as f64)
    }

    /// Reset at the daily boundary (§4.8 daily reset).
    pub fn reset(&mut self) {
        self.cumulative = 0;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn trade(side: Side, volume: u64) -> Trade {
        Trade::new("X", 100.0, volume, side, SystemTime::now(), "t")
    }

    #[test]
    fn accumulates_signed_volume() {
        let mut cvd = CvdTracker::new(100, 5);
        cvd.record(&trade(Side::Buy, 10));
        cvd.record(&trade(Side::Sell, 3));
        assert_eq!(cvd.cumulative(), 7);
    }

    #[test]
    fn reset_clears_state() {
        let mut cvd = CvdTracker::new(100, 5);
        cvd.record(&trade(Side::Buy, 10));
        cvd.reset();
        assert_eq!(cvd.cumulative(), 0);
    }
}
