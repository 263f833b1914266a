//! Institutional footprint detector: four weighted sub-analyses (size
//! repetition, timing rhythm, volume concentration, execution style)
//! combined into a single score.

use std::collections::HashMap;

use crate::config::InstitutionalConfig;
use crate::domain::{Candidate, Side, StrengthClass, Trade};
use crate::patterns::INSTITUTIONAL_FOOTPRINT;

pub struct InstitutionalDetector {
    config: InstitutionalConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizePattern {
    IcebergHeavy,
    Repetitive,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimingPattern {
    HighFrequencyAlgo,
    RegularExecution,
    PatientAccumulation,
    Irregular,
}

impl InstitutionalDetector {
    pub fn new(config: InstitutionalConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, instrument: &str, trades: &[Trade]) -> Option<Candidate> {
        if trades.len() < self.config.min_trades {
            return None;
        }

        let (size_pattern, iceberg_ratio) = self.analyze_sizes(trades);
        let (timing_pattern, rhythm_score) = self.analyze_timing(trades);
        let institutional_pct = self.analyze_volume_distribution(trades);
        let (direction_bias, execution_balanced) = self.analyze_execution(trades);

        let size_score = match size_pattern {
            SizePattern::IcebergHeavy | SizePattern::Repetitive => iceberg_ratio,
            SizePattern::Mixed => 0.0,
        };
        let timing_score = match timing_pattern {
            TimingPattern::RegularExecution | TimingPattern::PatientAccumulation => rhythm_score,
            TimingPattern::HighFrequencyAlgo => 0.8,
            TimingPattern::Irregular => 0.0,
        };
        let execution_score = if execution_balanced { 0.7 } else { 0.0 };

        let weights = (2.0, 1.5, 1.0, 0.5);
        let weighted_sum = size_score * weights.0
            + timing_score * weights.1
            + institutional_pct * weights.2
            + execution_score * weights.3;
        let total_weight = weights.0 + weights.1 + weights.2 + weights.3;
        let score = weighted_sum / total_weight;

        if score < self.config.score_threshold {
            return None;
        }

        let operation_type = self.operation_type(trades, direction_bias);
        let volume: u64 = trades.iter().map(|t| t.volume).sum();
        let side = if direction_bias >= 0.0 { Side::Buy } else { Side::Sell };
        let last = trades.last()?;

        Some(
            Candidate::new(
                INSTITUTIONAL_FOOTPRINT,
                instrument,
                last.price,
                volume,
                last.timestamp,
                Candidate::strength_for(StrengthClass::Strong, volume),
            )
            .with_direction(side)
            .with_field("score", score)
            .with_field("operation_type", operation_type),
        )
    }

    fn analyze_sizes(&self, trades: &[Trade]) -> (SizePattern, f64) {
        let mut counts: HashMap<u64, u32> = HashMap::new();
        for t in trades {
            *counts.entry(t.volume).or_insert(0) += 1;
        }
        let total = trades.len() as f64;
        let iceberg_trades: u32 = counts
            .iter()
            .filter(|(&vol, &count)| {
                count >= 3
                    && self.config.common_iceberg_sizes.iter().any(|&canon| {
                        let tol = canon as f64 * self.config.iceberg_size_tolerance;
                        (vol as f64 - canon as f64).abs() <= tol
                    })
            })
            .map(|(_, &count)| count)
            .sum();
        let iceberg_ratio = iceberg_trades as f64 / total;
        let unique_ratio = counts.len() as f64 / total;

        let pattern = if iceberg_ratio > 0.3 {
            SizePattern::IcebergHeavy
        } else if unique_ratio < 0.3 {
            SizePattern::Repetitive
        } else {
            SizePattern::Mixed
        };
        (pattern, iceberg_ratio)
    }

    fn analyze_timing(&self, trades: &[Trade]) -> (TimingPattern, f64) {
        let mut intervals = Vec::new();
        for w in trades.windows(2) {
            let dt = crate::domain::elapsed_since(w[0].timestamp, w[1].timestamp).as_secs_f64();
            if dt < 60.0 {
                intervals.push(dt);
            }
        }
        if intervals.is_empty() {
            return (TimingPattern::Irregular, 0.0);
        }
        let avg = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let variance = intervals.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / intervals.len() as f64;
        let std = variance.sqrt();
        let cv = if avg > 0.0 { std / avg } else { f64::MAX };
        let rhythm_score = if cv < 2.0 { (1.0 - cv).max(0.0) } else { 0.0 };

        let pattern = if rhythm_score > self.config.rhythm_threshold {
            if avg < 2.0 {
                TimingPattern::HighFrequencyAlgo
            } else if avg < 10.0 {
                TimingPattern::RegularExecution
            } else {
                TimingPattern::PatientAccumulation
            }
        } else {
            TimingPattern::Irregular
        };
        (pattern, rhythm_score)
    }

    fn analyze_volume_distribution(&self, trades: &[Trade]) -> f64 {
        let total: u64 = trades.iter().map(|t| t.volume).sum();
        if total == 0 {
            return 0.0;
        }
        let institutional: u64 = trades.iter().filter(|t| t.volume >= 50 && t.volume <= 1000).map(|t| t.volume).sum();
        institutional as f64 / total as f64
    }

    fn analyze_execution(&self, trades: &[Trade]) -> (f64, bool) {
        let buy: u64 = trades.iter().filter(|t| t.side == Side::Buy).map(|t| t.volume).sum();
        let sell: u64 = trades.iter().filter(|t| t.side == Side::Sell).map(|t| t.volume).sum();
        let total = (buy + sell).max(1);
        let bias = (buy as f64 - sell as f64) / total as f64;
        let balanced = bias.abs() < 0.2 || bias.abs() > 0.2;
        (bias, balanced)
    }

    fn operation_type(&self, trades: &[Trade], bias: f64) -> &'static str {
        let n = trades.len();
        if n < 10 {
            return "POSITION_MAINTENANCE";
        }
        let early: f64 = trades[..5].iter().map(|t| t.price).sum::<f64>() / 5.0;
        let late: f64 = trades[n - 5..].iter().map(|t| t.price).sum::<f64>() / 5.0;
        let trend = (late - early) / early;

        if bias > 0.3 {
            if trend > 0.001 {
                "ACCUMULATION_AGGRESSIVE"
            } else {
                "ACCUMULATION_PATIENT"
            }
        } else if bias < -0.3 {
            if trend < -0.001 {
                "DISTRIBUTION_AGGRESSIVE"
            } else {
                "DISTRIBUTION_PATIENT"
            }
        } else if trend.abs() < 0.0005 {
            "POSITION_MAINTENANCE"
        } else {
            "MARKET_MAKING"
        }
    }
}
