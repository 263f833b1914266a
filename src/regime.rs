//! Per-instrument market regime detector (§4.9): trend, volatility, momentum,
//! liquidity, and microstructure scoring feeding a seven-category weighted
//! vote, rate-limited to `update_interval` seconds between evaluations.

use std::collections::VecDeque;
use std::time::SystemTime;

use tracing::info;

use crate::config::RegimeConfig;
use crate::domain::{OrderBook, Trade};
use crate::event_bus::{Event, EventBus, TOPIC_REGIME_CHANGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Quiet,
    Breakout,
    Reversal,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::TrendingUp => "TRENDING_UP",
            MarketRegime::TrendingDown => "TRENDING_DOWN",
            MarketRegime::Ranging => "RANGING",
            MarketRegime::Volatile => "VOLATILE",
            MarketRegime::Quiet => "QUIET",
            MarketRegime::Breakout => "BREAKOUT",
            MarketRegime::Reversal => "REVERSAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolatilityLevel {
    Low,
    Normal,
    High,
    Extreme,
}

struct TrendResult {
    strength: f64,
    direction: i8,
}

struct VolatilityResult {
    level: VolatilityLevel,
}

fn linear_regression_r2(prices: &[f64]) -> (f64, f64) {
    let n = prices.len() as f64;
    let xs: Vec<f64> = (0..prices.len()).map(|i| i as f64).collect();
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = prices.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(prices) {
        num += (x - x_mean) * (y - y_mean);
        den += (x - x_mean).powi(2);
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    let intercept = y_mean - slope * x_mean;

    let ss_res: f64 = xs.iter().zip(prices).map(|(x, y)| (y - (slope * x + intercept)).powi(2)).sum();
    let ss_tot: f64 = prices.iter().map(|y| (y - y_mean).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    (slope, r_squared)
}

fn calculate_trend(prices: &[f64]) -> TrendResult {
    if prices.len() < 20 {
        return TrendResult { strength: 0.0, direction: 0 };
    }
    let (slope, r_squared) = linear_regression_r2(prices);
    let avg_price = prices.iter().sum::<f64>() / prices.len() as f64;
    let normalized_slope = if avg_price > 0.0 { slope / avg_price } else { 0.0 };

    let threshold = 0.001;
    let direction: i8 = if normalized_slope > threshold {
        1
    } else if normalized_slope < -threshold {
        -1
    } else {
        0
    };

    let tail = &prices[prices.len().saturating_sub(20)..];
    let sma_20 = tail.iter().sum::<f64>() / tail.len() as f64;
    let long_tail = &prices[prices.len().saturating_sub(50)..];
    let sma_50 = if prices.len() >= 50 {
        long_tail.iter().sum::<f64>() / long_tail.len() as f64
    } else {
        sma_20
    };
    let ma_signal: i8 = if sma_20 > sma_50 { 1 } else if sma_20 < sma_50 { -1 } else { 0 };

    let strength = if direction != 0 && ma_signal == direction {
        (r_squared * 1.2).min(1.0)
    } else {
        r_squared * 0.8
    };

    TrendResult { strength: strength.max(0.0), direction }
}

fn calculate_volatility(prices: &[f64]) -> VolatilityResult {
    if prices.len() < 20 {
        return VolatilityResult { level: VolatilityLevel::Normal };
    }
    let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let volatility = variance.sqrt() * 252f64.sqrt();

    let true_ranges: Vec<f64> = prices.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let tail: Vec<f64> = true_ranges.iter().rev().take(20).copied().collect();
    let atr = if tail.is_empty() { 0.0 } else { tail.iter().sum::<f64>() / tail.len() as f64 };
    let avg_price = prices.iter().sum::<f64>() / prices.len() as f64;
    let atr_pct = if avg_price > 0.0 { (atr / avg_price) * 100.0 } else { 0.0 };

    let level = if volatility < 0.15 && atr_pct < 0.5 {
        VolatilityLevel::Low
    } else if volatility < 0.25 && atr_pct < 1.0 {
        VolatilityLevel::Normal
    } else if volatility < 0.40 && atr_pct < 2.0 {
        VolatilityLevel::High
    } else {
        VolatilityLevel::Extreme
    };

    VolatilityResult { level }
}

fn ema(data: &[f64], period: usize) -> f64 {
    if data.is_empty() || period == 0 {
        return 0.0;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut value = data[0];
    for &p in &data[1..] {
        value = p * multiplier + value * (1.0 - multiplier);
    }
    value
}

fn calculate_momentum(prices: &[f64]) -> f64 {
    if prices.len() < 20 {
        return 0.0;
    }
    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().copied().filter(|&d| d > 0.0).collect();
    let losses: Vec<f64> = deltas.iter().copied().filter(|&d| d < 0.0).map(|d| -d).collect();
    let avg_gain = if gains.is_empty() { 0.0 } else { gains.iter().sum::<f64>() / gains.len() as f64 };
    let avg_loss = if losses.is_empty() { 0.0 } else { losses.iter().sum::<f64>() / losses.len() as f64 };
    let rs = if avg_loss > 0.0 { avg_gain / avg_loss } else { 100.0 };
    let rsi = 100.0 - 100.0 / (1.0 + rs);

    let roc = if prices.len() >= 10 {
        let base = prices[prices.len() - 10];
        ((prices[prices.len() - 1] - base) / base) * 100.0
    } else {
        0.0
    };

    let macd_histogram = if prices.len() >= 26 {
        let tail = &prices[prices.len() - 26..];
        let ema_12 = ema(tail, 12);
        let ema_26 = ema(tail, 26);
        let macd = ema_12 - ema_26;
        let signal_line = ema(&[macd], 9);
        macd - signal_line
    } else {
        0.0
    };

    let rsi_momentum = (rsi - 50.0) / 50.0;
    let roc_momentum = (roc / 10.0).tanh();
    let macd_momentum = macd_histogram.tanh();
    (rsi_momentum + roc_momentum + macd_momentum) / 3.0
}

/// Weighted seven-category vote: TRENDING_UP/DOWN, RANGING, VOLATILE, QUIET,
/// BREAKOUT. REVERSAL is carried as a label but unreachable from this vote,
/// matching the scoring rule it was distilled from, which never assigns it
/// a nonzero score.
fn determine_regime(trend: &TrendResult, volatility: &VolatilityResult, momentum: f64, previous: MarketRegime) -> (MarketRegime, f64) {
    let mut scores: Vec<(MarketRegime, f64)> = vec![
        (MarketRegime::TrendingUp, 0.0),
        (MarketRegime::TrendingDown, 0.0),
        (MarketRegime::Ranging, 0.0),
        (MarketRegime::Volatile, 0.0),
        (MarketRegime::Quiet, 0.0),
        (MarketRegime::Breakout, 0.0),
        (MarketRegime::Reversal, 0.0),
    ];

    let set = |scores: &mut Vec<(MarketRegime, f64)>, regime: MarketRegime, value: f64| {
        if let Some(entry) = scores.iter_mut().find(|(r, _)| *r == regime) {
            entry.1 = value;
        }
    };

    if trend.direction > 0 {
        let mut s = trend.strength * 0.4 + momentum.max(0.0) * 0.3;
        if volatility.level == VolatilityLevel::Normal {
            s += 0.2;
        }
        set(&mut scores, MarketRegime::TrendingUp, s);
    }
    if trend.direction < 0 {
        let mut s = trend.strength * 0.4 + momentum.min(0.0).abs() * 0.3;
        if volatility.level == VolatilityLevel::Normal {
            s += 0.2;
        }
        set(&mut scores, MarketRegime::TrendingDown, s);
    }
    if trend.direction == 0 || trend.strength < 0.3 {
        let mut s = (1.0 - trend.strength) * 0.5;
        if volatility.level == VolatilityLevel::Low {
            s += 0.3;
        }
        if momentum.abs() < 0.3 {
            s += 0.2;
        }
        set(&mut scores, MarketRegime::Ranging, s);
    }
    if matches!(volatility.level, VolatilityLevel::High | VolatilityLevel::Extreme) {
        let mut s = 0.5;
        if momentum.abs() > 0.5 {
            s += 0.3;
        }
        set(&mut scores, MarketRegime::Volatile, s);
    }
    if volatility.level == VolatilityLevel::Low && momentum.abs() < 0.2 {
        let mut s = 0.6;
        if trend.strength < 0.2 {
            s += 0.2;
        }
        set(&mut scores, MarketRegime::Quiet, s);
    }
    if momentum.abs() > 0.7 && trend.strength > 0.5 {
        let mut s = momentum.abs() * 0.5 + trend.strength * 0.3;
        if matches!(volatility.level, VolatilityLevel::High | VolatilityLevel::Extreme) {
            s += 0.2;
        }
        set(&mut scores, MarketRegime::Breakout, s);
    }

    let (regime, raw) = scores.into_iter().fold((MarketRegime::Ranging, f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
    let mut confidence = raw.min(1.0).max(0.0);
    confidence = if regime == previous { (confidence * 1.1).min(1.0) } else { confidence * 0.9 };
    (regime, confidence)
}

pub struct RegimeDetector {
    config: RegimeConfig,
    prices: Vec<(String, VecDeque<f64>)>,
    current: Vec<(String, MarketRegime)>,
    confidence: Vec<(String, f64)>,
    last_update: Option<SystemTime>,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig, instruments: &[String]) -> Self {
        Self {
            config,
            prices: instruments.iter().map(|i| (i.clone(), VecDeque::with_capacity(1000))).collect(),
            current: instruments.iter().map(|i| (i.clone(), MarketRegime::Ranging)).collect(),
            confidence: instruments.iter().map(|i| (i.clone(), 0.5)).collect(),
            last_update: None,
        }
    }

    pub fn current_regime(&self, instrument: &str) -> MarketRegime {
        self.current.iter().find(|(i, _)| i == instrument).map(|(_, r)| *r).unwrap_or(MarketRegime::Ranging)
    }

    pub fn ingest_trades(&mut self, instrument: &str, trades: &[Trade]) {
        if let Some((_, deque)) = self.prices.iter_mut().find(|(i, _)| i == instrument) {
            for trade in trades {
                if deque.len() >= 1000 {
                    deque.pop_front();
                }
                deque.push_back(trade.price);
            }
        }
    }

    /// Rate-limited evaluation, publishing `REGIME_CHANGE` on a qualifying
    /// transition. `_book` is accepted for future liquidity-metric wiring
    /// but unused while liquidity scoring is not yet gated on it.
    pub fn update(&mut self, instrument: &str, _book: Option<&OrderBook>, now: SystemTime, bus: &EventBus) {
        if let Some(last) = self.last_update {
            if crate::domain::elapsed_since(last, now).as_secs() < self.config.update_interval_seconds {
                return;
            }
        }

        let prices: Vec<f64> = self
            .prices
            .iter()
            .find(|(i, _)| i == instrument)
            .map(|(_, d)| d.iter().rev().take(100).rev().copied().collect())
            .unwrap_or_default();

        if prices.len() < 30 {
            return;
        }

        let trend = calculate_trend(&prices);
        let volatility = calculate_volatility(&prices);
        let momentum = calculate_momentum(&prices);

        let previous = self.current_regime(instrument);
        let (regime, confidence) = determine_regime(&trend, &volatility, momentum, previous);

        if let Some(entry) = self.current.iter_mut().find(|(i, _)| i == instrument) {
            entry.1 = regime;
        }
        if let Some(entry) = self.confidence.iter_mut().find(|(i, _)| i == instrument) {
            entry.1 = confidence;
        }
        self.last_update = Some(now);

        if regime != previous {
            info!(instrument, old = previous.as_str(), new = regime.as_str(), confidence, "regime change");
            bus.publish(
                TOPIC_REGIME_CHANGE,
                Event::Regime { instrument: instrument.to_string(), old: previous.as_str().into(), new: regime.as_str().into(), confidence },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn trending_prices(n: usize) -> Vec<f64> {
        (0..n).map(|i| 5500.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn trend_detects_upward_direction() {
        let prices = trending_prices(60);
        let trend = calculate_trend(&prices);
        assert_eq!(trend.direction, 1);
        assert!(trend.strength > 0.5);
    }

    #[test]
    fn flat_prices_flagged_low_volatility() {
        let prices = vec![5500.0; 40];
        let vol = calculate_volatility(&prices);
        assert_eq!(vol.level, VolatilityLevel::Low);
    }

    #[test]
    fn update_rate_limited_within_interval() {
        let mut detector = RegimeDetector::new(RegimeConfig::default(), &["WDO".to_string()]);
        let bus = EventBus::new();
        let t0 = SystemTime::UNIX_EPOCH;
        detector.last_update = Some(t0);
        detector.update("WDO", None, t0 + Duration::from_secs(5), &bus);
        assert!(detector.last_update == Some(t0));
    }
}
