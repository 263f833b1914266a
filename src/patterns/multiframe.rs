//! Multi-timeframe delta analyzer: four rolling windows (micro/short/medium
//! /long) compared for divergence, confluence, an internal weighted-average
//! regime label, and hidden accumulation/distribution.
//!
//! The weighted-average regime label this detector emits
//! (`MULTIFRAME_REGIME_SHIFT`, one of ACCUMULATION/DISTRIBUTION/BALANCED/
//! TRANSITIONING) is distinct from the engine-wide market regime carried on
//! the `REGIME_CHANGE` bus topic (see `crate::regime`) — the two happen to
//! share a name in the system this was distilled from but are not the same
//! concept, so this module uses its own pattern tag to avoid colliding with
//! the bus topic.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use crate::config::MultiframeConfig;
use crate::domain::{Candidate, Side, StrengthClass, Trade};
use crate::patterns::{
    HIDDEN_ACCUMULATION, HIDDEN_DISTRIBUTION, MULTIFRAME_CONFLUENCE, MULTIFRAME_DIVERGENCE,
    MULTIFRAME_REGIME_SHIFT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameRegime {
    Accumulation,
    Distribution,
    Balanced,
    Transitioning,
}

struct FrameStats {
    trade_count: usize,
    delta_pct: f64,
    price_trend: f64,
}

pub struct MultiframeAnalyzer {
    config: MultiframeConfig,
    frames: [VecDeque<Trade>; 4],
    regime_history: VecDeque<FrameRegime>,
}

impl MultiframeAnalyzer {
    pub fn new(config: MultiframeConfig) -> Self {
        Self { config, frames: Default::default(), regime_history: VecDeque::with_capacity(100) }
    }

    fn window_seconds(&self, idx: usize) -> u64 {
        [self.config.micro_seconds, self.config.short_seconds, self.config.medium_seconds, self.config.long_seconds][idx]
    }

    pub fn update(&mut self, instrument: &str, trades: &[Trade], now: SystemTime) -> Vec<Candidate> {
        for frame in self.frames.iter_mut() {
            frame.extend(trades.iter().cloned());
        }
        let cutoffs: Vec<SystemTime> = (0..4)
            .map(|idx| now.checked_sub(Duration::from_secs(self.window_seconds(idx) * 10)).unwrap_or(SystemTime::UNIX_EPOCH))
            .collect();
        for (idx, frame) in self.frames.iter_mut().enumerate() {
            let cutoff = cutoffs[idx];
            while frame.front().map(|t| t.timestamp < cutoff).unwrap_or(false) {
                frame.pop_front();
            }
        }

        let stats: Vec<FrameStats> = (0..4).map(|i| self.frame_stats(i, now)).collect();
        let mut out = Vec::new();
        out.extend(self.detect_divergence(instrument, &stats, now));
        out.extend(self.detect_confluence(instrument, &stats, now));
        out.extend(self.detect_regime_shift(instrument, &stats, now));
        out.extend(self.detect_hidden_flow(instrument, &stats, now));
        out
    }

    fn frame_stats(&self, idx: usize, now: SystemTime) -> FrameStats {
        let window = Duration::from_secs(self.window_seconds(idx));
        let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
        let in_window: Vec<&Trade> = self.frames[idx].iter().filter(|t| t.timestamp > cutoff).collect();
        let trade_count = in_window.len();
        if trade_count == 0 {
            return FrameStats { trade_count: 0, delta_pct: 0.0, price_trend: 0.0 };
        }
        let buy: i64 = in_window.iter().filter(|t| t.side == Side::Buy).map(|t| t.volume as i64).sum();
        let sell: i64 = in_window.iter().filter(|t| t.side == Side::Sell).map(|t| t.volume as i64).sum();
        let total = (buy + sell).max(1);
        let delta_pct = (buy - sell) as f64 / total as f64;

        let price_trend = if trade_count >= 2 {
            let early_n = (trade_count.min(5)).max(1);
            let early: f64 = in_window[..early_n].iter().map(|t| t.price).sum::<f64>() / early_n as f64;
            let late_n = early_n;
            let late: f64 = in_window[trade_count - late_n..].iter().map(|t| t.price).sum::<f64>() / late_n as f64;
            if early != 0.0 { (late - early) / early } else { 0.0 }
        } else {
            0.0
        };

        FrameStats { trade_count, delta_pct, price_trend }
    }

    fn detect_divergence(&self, instrument: &str, stats: &[FrameStats], now: SystemTime) -> Option<Candidate> {
        let (micro, short, medium, long) = (&stats[0], &stats[1], &stats[2], &stats[3]);
        if short.trade_count < 10 || long.trade_count < 20 {
            return None;
        }
        let threshold = self.config.divergence_threshold;

        let (pattern_label, direction, strength_val) =
            if (micro.delta_pct - long.delta_pct).abs() > threshold && micro.delta_pct > 0.2 && long.delta_pct < -0.2 {
                ("BULLISH_DIVERGENCE", Side::Buy, (micro.delta_pct - long.delta_pct).abs())
            } else if (micro.delta_pct - long.delta_pct).abs() > threshold && micro.delta_pct < -0.2 && long.delta_pct > 0.2 {
                ("BEARISH_DIVERGENCE", Side::Sell, (micro.delta_pct - long.delta_pct).abs())
            } else if (short.delta_pct - medium.delta_pct).abs() > threshold * 0.8 && short.delta_pct > 0.1 && medium.delta_pct < -0.1
            {
                ("SHORT_TERM_REVERSAL", Side::Sell, (short.delta_pct - medium.delta_pct).abs())
            } else {
                return None;
            };

        Some(
            Candidate::new(MULTIFRAME_DIVERGENCE, instrument, 0.0, 0, now, Candidate::strength_for(StrengthClass::Strong, 0))
                .with_direction(direction)
                .with_field("sub_pattern", pattern_label)
                .with_field("confidence", (strength_val / 0.5).min(0.9)),
        )
    }

    fn detect_confluence(&self, instrument: &str, stats: &[FrameStats], now: SystemTime) -> Option<Candidate> {
        let values: Vec<f64> = stats.iter().filter(|s| s.trade_count > 5).map(|s| s.delta_pct).collect();
        if values.len() < 3 {
            return None;
        }
        let all_positive = values.iter().all(|&v| v > 0.1);
        let all_negative = values.iter().all(|&v| v < -0.1);
        if !all_positive && !all_negative {
            return None;
        }
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        if avg.abs() <= self.config.confluence_threshold {
            return None;
        }
        let side = if avg > 0.0 { Side::Buy } else { Side::Sell };
        Some(
            Candidate::new(MULTIFRAME_CONFLUENCE, instrument, 0.0, 0, now, Candidate::strength_for(StrengthClass::Strong, 0))
                .with_direction(side)
                .with_field("confidence", avg.abs().min(0.95)),
        )
    }

    fn detect_regime_shift(&mut self, instrument: &str, stats: &[FrameStats], now: SystemTime) -> Option<Candidate> {
        let weights = [0.1, 0.2, 0.3, 0.4];
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (i, s) in stats.iter().enumerate() {
            if s.trade_count > 10 {
                weighted_sum += s.delta_pct * weights[i];
                weight_total += weights[i];
            }
        }
        if weight_total == 0.0 {
            return None;
        }
        let weighted = weighted_sum / weight_total;
        let regime = if weighted > 0.3 {
            FrameRegime::Accumulation
        } else if weighted < -0.3 {
            FrameRegime::Distribution
        } else if weighted.abs() < 0.1 {
            FrameRegime::Balanced
        } else {
            FrameRegime::Transitioning
        };

        if self.regime_history.len() >= 100 {
            self.regime_history.pop_front();
        }
        self.regime_history.push_back(regime);
        if self.regime_history.len() < 5 {
            return None;
        }

        let last5: Vec<FrameRegime> = self.regime_history.iter().rev().take(5).copied().collect();
        let previous = last5[1];
        if previous == regime {
            return None;
        }
        let count_in_last5 = last5.iter().filter(|&&r| r == regime).count();
        if count_in_last5 < 2 {
            return None;
        }

        Some(
            Candidate::new(MULTIFRAME_REGIME_SHIFT, instrument, 0.0, 0, now, Candidate::strength_for(StrengthClass::Medium, 0))
                .with_field("regime", format!("{regime:?}"))
                .with_field("consistency", count_in_last5 as f64 / 5.0),
        )
    }

    fn detect_hidden_flow(&self, instrument: &str, stats: &[FrameStats], now: SystemTime) -> Option<Candidate> {
        let (medium, long) = (&stats[2], &stats[3]);
        if medium.trade_count < 20 || long.trade_count < 30 {
            return None;
        }
        if long.price_trend < -0.001 && long.delta_pct > 0.3 {
            return Some(
                Candidate::new(HIDDEN_ACCUMULATION, instrument, 0.0, 0, now, Candidate::strength_for(StrengthClass::Strong, 0))
                    .with_direction(Side::Buy)
                    .with_field("confidence", long.delta_pct.min(0.85)),
            );
        }
        if long.price_trend > 0.001 && long.delta_pct < -0.3 {
            return Some(
                Candidate::new(HIDDEN_DISTRIBUTION, instrument, 0.0, 0, now, Candidate::strength_for(StrengthClass::Strong, 0))
                    .with_direction(Side::Sell)
                    .with_field("confidence", long.delta_pct.abs().min(0.85)),
            );
        }
        None
    }
}
