//! Order-book dynamics: pulling, stacking, flash orders and imbalance
//! shifts between consecutive book snapshots.

use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

use crate::config::BookDynamicsConfig;
use crate::domain::{Candidate, OrderBook, Side, StrengthClass};
use crate::patterns::{BOOK_PULLING, BOOK_STACKING, FLASH_ORDER, IMBALANCE_SHIFT};

#[derive(Clone)]
struct BookSnapshot {
    bids: HashMap<i64, u64>,
    asks: HashMap<i64, u64>,
    best_bid: f64,
    best_ask: f64,
    total_bid_volume: u64,
    total_ask_volume: u64,
}

fn snapshot(book: &OrderBook) -> BookSnapshot {
    let key = |p: f64| (p * 100.0).round() as i64;
    BookSnapshot {
        bids: book.bids.iter().map(|l| (key(l.price), l.volume)).collect(),
        asks: book.asks.iter().map(|l| (key(l.price), l.volume)).collect(),
        best_bid: book.best_bid(),
        best_ask: book.best_ask(),
        total_bid_volume: book.total_bid_volume(),
        total_ask_volume: book.total_ask_volume(),
    }
}

struct FlashTrack {
    first_seen: SystemTime,
}

pub struct BookDynamicsAnalyzer {
    config: BookDynamicsConfig,
    history: HashMap<String, VecDeque<BookSnapshot>>,
    flash_tracking: HashMap<String, HashMap<(bool, i64), FlashTrack>>,
}

impl BookDynamicsAnalyzer {
    pub fn new(config: BookDynamicsConfig) -> Self {
        Self { config, history: HashMap::new(), flash_tracking: HashMap::new() }
    }

    pub fn analyze(&mut self, instrument: &str, book: &OrderBook, now: SystemTime) -> Vec<Candidate> {
        if book.bids.is_empty() || book.asks.is_empty() {
            return Vec::new();
        }
        let curr = snapshot(book);
        let history = self.history.entry(instrument.to_string()).or_insert_with(VecDeque::new);

        let Some(prev) = history.back().cloned() else {
            history.push_back(curr);
            return Vec::new();
        };

        let mut out = Vec::new();
        out.extend(self.detect_pulling(instrument, &prev, &curr, now));
        out.extend(self.detect_stacking(instrument, &prev, &curr, now));
        out.extend(self.detect_flash(instrument, &curr, now));
        out.extend(self.detect_imbalance_shift(instrument, &prev, &curr, now));

        let history = self.history.get_mut(instrument).unwrap();
        if history.len() >= self.config.snapshot_history {
            history.pop_front();
        }
        history.push_back(curr);
        out
    }

    fn detect_pulling(&self, instrument: &str, prev: &BookSnapshot, curr: &BookSnapshot, now: SystemTime) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (is_bid, prev_levels, curr_levels) in
            [(true, &prev.bids, &curr.bids), (false, &prev.asks, &curr.asks)]
        {
            for (&price_key, &prev_vol) in prev_levels {
                if prev_vol <= 100 {
                    continue;
                }
                let curr_vol = curr_levels.get(&price_key).copied().unwrap_or(0);
                let reduction = 1.0 - (curr_vol as f64 / prev_vol as f64);
                if reduction >= self.config.pulling_threshold {
                    let side = if is_bid { Side::Buy } else { Side::Sell };
                    out.push(
                        Candidate::new(
                            BOOK_PULLING,
                            instrument,
                            price_key as f64 / 100.0,
                            prev_vol,
                            now,
                            Candidate::strength_for(StrengthClass::Medium, prev_vol),
                        )
                        .with_direction(side)
                        .with_field("previous_volume", prev_vol)
                        .with_field("current_volume", curr_vol)
                        .with_field("reduction_pct", reduction),
                    );
                }
            }
        }
        out
    }

    fn detect_stacking(&self, instrument: &str, prev: &BookSnapshot, curr: &BookSnapshot, now: SystemTime) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (is_bid, prev_levels, curr_levels, best) in [
            (true, &prev.bids, &curr.bids, curr.best_bid),
            (false, &prev.asks, &curr.asks, curr.best_ask),
        ] {
            for (&price_key, &curr_vol) in curr_levels {
                if curr_vol <= 200 {
                    continue;
                }
                let prev_vol = prev_levels.get(&price_key).copied().unwrap_or(0);
                if prev_vol == 0 {
                    continue;
                }
                let ratio = curr_vol as f64 / prev_vol as f64;
                if ratio >= self.config.stacking_threshold {
                    let side = if is_bid { Side::Buy } else { Side::Sell };
                    let price = price_key as f64 / 100.0;
                    let distance_pct = if best > 0.0 { (price - best).abs() / best } else { 0.0 };
                    out.push(
                        Candidate::new(
                            BOOK_STACKING,
                            instrument,
                            price,
                            curr_vol,
                            now,
                            Candidate::strength_for(StrengthClass::Medium, curr_vol),
                        )
                        .with_direction(side)
                        .with_field("previous_volume", prev_vol)
                        .with_field("current_volume", curr_vol)
                        .with_field("increase_ratio", ratio)
                        .with_field("distance_from_best_pct", distance_pct),
                    );
                }
            }
        }
        out
    }

    fn detect_flash(&mut self, instrument: &str, curr: &BookSnapshot, now: SystemTime) -> Vec<Candidate> {
        let tracking = self.flash_tracking.entry(instrument.to_string()).or_default();
        let mut out = Vec::new();

        for (is_bid, levels) in [(true, &curr.bids), (false, &curr.asks)] {
            for (&price_key, &vol) in levels {
                if vol > 500 {
                    tracking.entry((is_bid, price_key)).or_insert(FlashTrack { first_seen: now });
                }
            }
        }

        let current_keys: std::collections::HashSet<(bool, i64)> = curr
            .bids
            .keys()
            .map(|k| (true, *k))
            .chain(curr.asks.keys().map(|k| (false, *k)))
            .collect();

        let vanished: Vec<(bool, i64)> = tracking
            .keys()
            .filter(|k| !current_keys.contains(*k))
            .copied()
            .collect();

        for key in vanished {
            if let Some(track) = tracking.remove(&key) {
                let lifetime = crate::domain::elapsed_since(track.first_seen, now).as_secs_f64();
                if lifetime <= self.config.flash_order_seconds as f64 {
                    let (is_bid, price_key) = key;
                    out.push(
                        Candidate::new(
                            FLASH_ORDER,
                            instrument,
                            price_key as f64 / 100.0,
                            0,
                            now,
                            Candidate::strength_for(StrengthClass::Strong, 0),
                        )
                        .with_direction(if is_bid { Side::Buy } else { Side::Sell })
                        .with_field("lifetime_seconds", lifetime),
                    );
                }
            }
        }
        out
    }

    fn detect_imbalance_shift(&self, instrument: &str, prev: &BookSnapshot, curr: &BookSnapshot, now: SystemTime) -> Vec<Candidate> {
        let imbalance = |bid: u64, ask: u64| {
            let total = bid + ask;
            if total == 0 {
                0.0
            } else {
                (bid as f64 - ask as f64) / total as f64
            }
        };
        let prev_imb = imbalance(prev.total_bid_volume, prev.total_ask_volume);
        let curr_imb = imbalance(curr.total_bid_volume, curr.total_ask_volume);
        let change = (curr_imb - prev_imb).abs();
        if change < self.config.imbalance_shift_threshold {
            return Vec::new();
        }
        let side = if curr_imb > prev_imb { Side::Buy } else { Side::Sell };
        vec![Candidate::new(
            IMBALANCE_SHIFT,
            instrument,
            curr.best_bid.max(curr.best_ask),
            curr.total_bid_volume + curr.total_ask_volume,
            now,
            Candidate::strength_for(StrengthClass::Medium, curr.total_bid_volume + curr.total_ask_volume),
        )
        .with_direction(side)
        .with_field("previous_imbalance", prev_imb)
        .with_field("current_imbalance", curr_imb)
        .with_field("change", change)]
    }
}
