//! Hidden liquidity detector: three independent methods (excess execution,
//! reload pattern, persistent level) consolidated into a single candidate.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::config::HiddenLiquidityConfig;
use crate::domain::{Candidate, OrderBook, Side, StrengthClass, Trade};
use crate::patterns::HIDDEN_LIQUIDITY;

struct LevelEntry {
    timestamp: SystemTime,
    volume: u64,
}

pub struct HiddenLiquidityDetector {
    config: HiddenLiquidityConfig,
    level_history: HashMap<String, HashMap<i64, Vec<LevelEntry>>>,
}

struct Detection {
    method: &'static str,
    confidence: f64,
    hidden_estimate: f64,
}

impl HiddenLiquidityDetector {
    pub fn new(config: HiddenLiquidityConfig) -> Self {
        Self { config, level_history: HashMap::new() }
    }

    fn key(&self, price: f64) -> i64 {
        (price / self.config.level_tolerance).round() as i64
    }

    pub fn detect(&mut self, instrument: &str, trades: &[Trade], book: &OrderBook) -> Option<Candidate> {
        let mut detections = Vec::new();
        if let Some(d) = self.detect_excess_execution(trades, book) {
            detections.push(d);
        }
        if let Some(d) = self.detect_reload_pattern(trades) {
            detections.push(d);
        }
        if let Some(d) = self.detect_persistent_levels(instrument, trades) {
            detections.push(d);
        }
        if detections.is_empty() {
            return None;
        }

        let confidence = detections.iter().map(|d| d.confidence).fold(0.0_f64, f64::max);
        let avg_hidden = detections.iter().map(|d| d.hidden_estimate).sum::<f64>() / detections.len() as f64;
        let methods: Vec<&str> = detections.iter().map(|d| d.method).collect();

        let last = trades.last()?;
        let buy: u64 = trades.iter().filter(|t| t.side == Side::Buy).map(|t| t.volume).sum();
        let sell: u64 = trades.iter().filter(|t| t.side == Side::Sell).map(|t| t.volume).sum();
        let side = if buy >= sell { Side::Buy } else { Side::Sell };

        Some(
            Candidate::new(
                HIDDEN_LIQUIDITY,
                instrument,
                last.price,
                avg_hidden.round() as u64,
                last.timestamp,
                Candidate::strength_for(StrengthClass::Strong, avg_hidden.round() as u64),
            )
            .with_direction(side)
            .with_field("confidence", confidence)
            .with_field("methods", methods.join(","))
            .with_field("estimated_hidden_volume", avg_hidden),
        )
    }

    fn detect_excess_execution(&self, trades: &[Trade], book: &OrderBook) -> Option<Detection> {
        if trades.is_empty() {
            return None;
        }
        let mut executed: HashMap<i64, u64> = HashMap::new();
        for t in trades.iter().rev().take(20) {
            *executed.entry(self.key(t.price)).or_insert(0) += t.volume;
        }

        let mut max_ratio = 0.0_f64;
        for (&key, &exec_vol) in &executed {
            let visible: u64 = book
                .bids
                .iter()
                .chain(book.asks.iter())
                .filter(|l| self.key(l.price) == key)
                .map(|l| l.volume)
                .sum();
            if visible == 0 {
                continue;
            }
            let ratio = exec_vol as f64 / visible as f64;
            if ratio > self.config.min_excess_ratio {
                max_ratio = max_ratio.max(ratio);
            }
        }
        if max_ratio <= 0.0 {
            return None;
        }
        Some(Detection {
            method: "EXCESS_EXECUTION",
            confidence: (max_ratio / 3.0).min(0.9),
            hidden_estimate: self.config.min_hidden_volume as f64,
        })
    }

    fn detect_reload_pattern(&self, trades: &[Trade]) -> Option<Detection> {
        let mut by_level: HashMap<i64, Vec<SystemTime>> = HashMap::new();
        for t in trades {
            by_level.entry(self.key(t.price)).or_default().push(t.timestamp);
        }
        let mut max_reload = 0;
        for timestamps in by_level.values() {
            if timestamps.len() < 3 {
                continue;
            }
            let mut reload_count = 0;
            for w in timestamps.windows(2) {
                let dt = crate::domain::elapsed_since(w[0], w[1]).as_secs_f64();
                if dt <= self.config.reload_time_seconds as f64 {
                    reload_count += 1;
                }
            }
            max_reload = max_reload.max(reload_count);
        }
        if max_reload < 2 {
            return None;
        }
        Some(Detection {
            method: "RELOAD_PATTERN",
            confidence: (max_reload as f64 * 0.2).min(0.8),
            hidden_estimate: self.config.min_hidden_volume as f64 * (1.0 + max_reload as f64 * 0.5),
        })
    }

    fn detect_persistent_levels(&mut self, instrument: &str, trades: &[Trade]) -> Option<Detection> {
        let tolerance = self.config.level_tolerance;
        let history = self.level_history.entry(instrument.to_string()).or_default();
        for t in trades {
            let key = (t.price / tolerance).round() as i64;
            let entries = history.entry(key).or_default();
            entries.push(LevelEntry { timestamp: t.timestamp, volume: t.volume });
            if entries.len() > 100 {
                entries.remove(0);
            }
        }

        let mut best: Option<Detection> = None;
        for entries in history.values() {
            if entries.len() < 5 {
                continue;
            }
            let span = crate::domain::elapsed_since(entries.first().unwrap().timestamp, entries.last().unwrap().timestamp)
                .as_secs_f64();
            if span < 60.0 {
                continue;
            }
            let total_volume: u64 = entries.iter().map(|e| e.volume).sum();
            let frequency = entries.len() as f64 / (span / 60.0);
            if total_volume >= self.config.min_hidden_volume && frequency > 0.5 {
                best = Some(Detection {
                    method: "PERSISTENT_LEVELS",
                    confidence: 0.7,
                    hidden_estimate: total_volume as f64 * 0.7,
                });
            }
        }
        best
    }
}
