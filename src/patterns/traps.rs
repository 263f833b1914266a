//! Trap detector: breakout (bull/bear) traps, stop hunts, liquidity traps
//! and squeeze traps.

use std::collections::VecDeque;
use std::time::SystemTime;

use crate::config::TrapDetectionConfig;
use crate::domain::{Candidate, OrderBook, Side, StrengthClass, Trade};
use crate::patterns::{BEAR_TRAP, BULL_TRAP, LIQUIDITY_TRAP, SQUEEZE_TRAP, STOP_HUNT};

struct StopLevel {
    price: f64,
    frequency: u32,
}

pub struct TrapDetector {
    config: TrapDetectionConfig,
    price_levels: VecDeque<f64>,
    stop_levels: Vec<StopLevel>,
}

impl TrapDetector {
    pub fn new(config: TrapDetectionConfig) -> Self {
        Self { config, price_levels: VecDeque::with_capacity(500), stop_levels: Vec::new() }
    }

    pub fn detect(&mut self, instrument: &str, trades: &[Trade], book: Option<&OrderBook>) -> Vec<Candidate> {
        if trades.len() < 20 {
            return Vec::new();
        }
        for t in trades {
            if self.price_levels.len() >= 500 {
                self.price_levels.pop_front();
            }
            self.price_levels.push_back(t.price);
        }
        self.identify_stop_levels();

        let mut out = Vec::new();
        out.extend(self.detect_breakout_traps(instrument, trades));
        out.extend(self.detect_stop_hunts(instrument, trades));
        if let Some(book) = book {
            out.extend(self.detect_liquidity_traps(instrument, trades, book));
        }
        out.extend(self.detect_squeeze_traps(instrument, trades));
        out
    }

    fn identify_stop_levels(&mut self) {
        if self.price_levels.len() < 50 {
            return;
        }
        let prices: Vec<f64> = self.price_levels.iter().copied().collect();
        for w in prices.windows(5) {
            let (a, b, c, d, e) = (w[0], w[1], w[2], w[3], w[4]);
            if c > a && c > b && c > d && c > e {
                let level = (c * 1.001 / 0.5).round() * 0.5;
                self.bump_stop_level(level);
            }
            if c < a && c < b && c < d && c < e {
                let level = (c * 0.999 / 0.5).round() * 0.5;
                self.bump_stop_level(level);
            }
        }
    }

    fn bump_stop_level(&mut self, price: f64) {
        if let Some(existing) = self.stop_levels.iter_mut().find(|l| (l.price - price).abs() < 0.25) {
            existing.frequency += 1;
        } else {
            self.stop_levels.push(StopLevel { price, frequency: 1 });
        }
    }

    fn detect_breakout_traps(&self, instrument: &str, trades: &[Trade]) -> Vec<Candidate> {
        if self.price_levels.len() < 100 {
            return Vec::new();
        }
        let prices: Vec<f64> = self.price_levels.iter().copied().collect();
        let n = prices.len();
        let window = &prices[n - 50..n - 10];
        let price_high = window.iter().cloned().fold(f64::MIN, f64::max);
        let price_low = window.iter().cloned().fold(f64::MAX, f64::min);

        let mut out = Vec::new();
        let tn = trades.len();
        if tn < 25 {
            return out;
        }
        for i in (tn.saturating_sub(20))..(tn.saturating_sub(5)) {
            let trade = &trades[i];
            if trade.price > price_high * (1.0 + self.config.breakout_threshold) {
                let after = &trades[i + 1..(i + 11).min(tn)];
                if let Some(min_after) = after.iter().map(|t| t.price).fold(None, |acc: Option<f64>, v| {
                    Some(acc.map_or(v, |a| a.min(v)))
                }) {
                    let retrace = (trade.price - min_after) / (trade.price - price_high);
                    if retrace > self.config.reversal_threshold {
                        out.push(
                            Candidate::new(
                                BULL_TRAP,
                                instrument,
                                trade.price,
                                trade.volume,
                                trade.timestamp,
                                Candidate::strength_for(StrengthClass::Strong, trade.volume),
                            )
                            .with_direction(Side::Sell)
                            .with_field("retrace_pct", retrace),
                        );
                    }
                }
            }
            if trade.price < price_low * (1.0 - self.config.breakout_threshold) {
                let after = &trades[i + 1..(i + 11).min(tn)];
                if let Some(max_after) = after.iter().map(|t| t.price).fold(None, |acc: Option<f64>, v| {
                    Some(acc.map_or(v, |a| a.max(v)))
                }) {
                    let retrace = (max_after - trade.price) / (price_low - trade.price);
                    if retrace > self.config.reversal_threshold {
                        out.push(
                            Candidate::new(
                                BEAR_TRAP,
                                instrument,
                                trade.price,
                                trade.volume,
                                trade.timestamp,
                                Candidate::strength_for(StrengthClass::Strong, trade.volume),
                            )
                            .with_direction(Side::Buy)
                            .with_field("retrace_pct", retrace),
                        );
                    }
                }
            }
        }
        out
    }

    fn detect_stop_hunts(&self, instrument: &str, trades: &[Trade]) -> Vec<Candidate> {
        let mut out = Vec::new();
        let n = trades.len();
        if n < 30 {
            return out;
        }
        let last_30 = &trades[n - 30..];
        for level in self.stop_levels.iter().filter(|l| l.frequency >= 2) {
            let range = self.config.stop_hunt_range * level.price;
            let hunt_trades: Vec<&Trade> = last_30.iter().filter(|t| (t.price - level.price).abs() <= range).collect();
            if hunt_trades.len() < 2 {
                continue;
            }
            let current_price = trades.last().unwrap().price;
            let price_returned = (current_price - level.price).abs() > range;
            if price_returned {
                out.push(
                    Candidate::new(
                        STOP_HUNT,
                        instrument,
                        level.price,
                        hunt_trades.iter().map(|t| t.volume).sum(),
                        trades.last().unwrap().timestamp,
                        Candidate::strength_for(StrengthClass::Medium, 0),
                    )
                    .with_field("confidence", (level.frequency as f64 * 0.2).min(0.8)),
                );
            }
        }
        out
    }

    fn detect_liquidity_traps(&self, instrument: &str, trades: &[Trade], book: &OrderBook) -> Vec<Candidate> {
        let bid_vol: u64 = book.bids.iter().take(5).map(|l| l.volume).sum();
        let ask_vol: u64 = book.asks.iter().take(5).map(|l| l.volume).sum();
        if bid_vol == 0 || ask_vol == 0 {
            return Vec::new();
        }
        let imbalance_ratio = (bid_vol as f64 / ask_vol as f64).max(ask_vol as f64 / bid_vol as f64);
        if imbalance_ratio <= 3.0 {
            return Vec::new();
        }
        let n = trades.len();
        let last_20 = &trades[n.saturating_sub(20)..];
        let buy_vol: u64 = last_20.iter().filter(|t| t.side == Side::Buy).map(|t| t.volume).sum();
        let sell_vol: u64 = last_20.iter().filter(|t| t.side == Side::Sell).map(|t| t.volume).sum();

        let last = trades.last().unwrap();
        if bid_vol as f64 > ask_vol as f64 * 2.0 && sell_vol as f64 > buy_vol as f64 * 1.5 {
            return vec![Candidate::new(LIQUIDITY_TRAP, instrument, last.price, 0, last.timestamp, Candidate::strength_for(StrengthClass::Strong, 0))
                .with_direction(Side::Sell)
                .with_field("book_imbalance", "BID_HEAVY")
                .with_field("confidence", 0.75)];
        }
        if ask_vol as f64 > bid_vol as f64 * 2.0 && buy_vol as f64 > sell_vol as f64 * 1.5 {
            return vec![Candidate::new(LIQUIDITY_TRAP, instrument, last.price, 0, last.timestamp, Candidate::strength_for(StrengthClass::Strong, 0))
                .with_direction(Side::Buy)
                .with_field("book_imbalance", "ASK_HEAVY")
                .with_field("confidence", 0.75)];
        }
        Vec::new()
    }

    fn detect_squeeze_traps(&self, instrument: &str, trades: &[Trade]) -> Vec<Candidate> {
        let n = trades.len();
        if n < 50 {
            return Vec::new();
        }
        let early = &trades[n - 50..n - 30];
        let late = &trades[n - 20..];
        let range = |slice: &[Trade]| {
            let prices: Vec<f64> = slice.iter().map(|t| t.price).collect();
            prices.iter().cloned().fold(f64::MIN, f64::max) - prices.iter().cloned().fold(f64::MAX, f64::min)
        };
        let range_early = range(early);
        let range_late = range(late);
        let volume_early: u64 = early.iter().map(|t| t.volume).sum();
        let volume_late: u64 = late.iter().map(|t| t.volume).sum();

        if range_late < range_early * 0.3 && volume_late as f64 > volume_early as f64 * self.config.volume_spike_multiplier {
            let up_votes = late.iter().rev().take(5).filter(|t| t.side == Side::Buy).count();
            let side = if up_votes >= 3 { Side::Buy } else { Side::Sell };
            let last = trades.last().unwrap();
            return vec![Candidate::new(
                SQUEEZE_TRAP,
                instrument,
                last.price,
                volume_late,
                last.timestamp,
                Candidate::strength_for(StrengthClass::Strong, volume_late),
            )
            .with_direction(side)
            .with_field("confidence", (volume_late as f64 / volume_early.max(1) as f64 / 3.0).min(0.85))];
        }
        Vec::new()
    }
}
