//! Confluence matrix (§4.7): maps (pattern, calculated-level) pairs to a
//! trade direction and confidence, validates the result, and attaches stops
//! and targets from the calculated grid.

use std::collections::HashMap;
use std::time::SystemTime;

use chrono::Timelike;

use crate::config::CalculatedMarketConfig;
use crate::domain::{Candidate, CalculatedGrid, LevelType, Side, Signal, SignalLevel, SignalSource};

struct Rule {
    action: &'static str,
    confidence: f64,
    description: &'static str,
}

pub struct ConfluenceMatrix {
    config: CalculatedMarketConfig,
    rules: HashMap<(&'static str, &'static str), Rule>,
}

impl ConfluenceMatrix {
    pub fn new(config: CalculatedMarketConfig) -> Self {
        Self { config, rules: build_rule_table() }
    }

    pub fn evaluate(
        &self,
        candidate: &Candidate,
        grid: &CalculatedGrid,
        now: SystemTime,
    ) -> Option<Signal> {
        let (level, distance) = grid.nearest(candidate.price)?;
        if distance > self.config.tolerancia_proximidade {
            return None;
        }

        // Confirmation renames the pattern tag to "X_CONFIRMED"; the rule
        // table is keyed on the underlying pattern, confirmed or not.
        let pattern_key = candidate.pattern.strip_suffix("_CONFIRMED").unwrap_or(candidate.pattern.as_str());
        let rule = self.rules.get(&(pattern_key, level.name.as_str())).filter(|r| match candidate.direction {
            Some(Side::Buy) => r.action == "BUY",
            Some(Side::Sell) => r.action == "SELL",
            Some(Side::Unknown) | None => true,
        });

        let (action, mut confidence, description) = match rule {
            Some(r) => (r.action, r.confidence, r.description.to_string()),
            None => {
                if candidate.strength >= self.config.extreme_force_threshold {
                    match level.name.as_str() {
                        "SOFRER_2X" => ("SELL", 0.85, "extreme force override at SOFRER_2X".to_string()),
                        "SOFGRE" => ("BUY", 0.85, "extreme force override at SOFGRE".to_string()),
                        _ => return None,
                    }
                } else {
                    return None;
                }
            }
        };

        if candidate.strength < self.config.minimum_force || confidence < self.config.minimum_confidence {
            return None;
        }

        if self.in_ptax_window(now) {
            confidence = (confidence + self.config.ptax_confidence_bonus).min(self.config.ptax_confidence_cap);
        }

        let (stop, target) = self.stop_and_target(action, candidate.price, grid);

        let mut signal = Signal::new(
            SignalSource::Confluence,
            SignalLevel::Alert,
            format!("{action} confluence: {} at {}", candidate.pattern, level.name),
        )
        .with_detail("pattern", candidate.pattern.clone())
        .with_detail("level", level.name.clone())
        .with_detail("action", action)
        .with_detail("confidence", confidence)
        .with_detail("strength", candidate.strength)
        .with_detail("description", description)
        .with_detail("stop", stop)
        .with_detail("target", target);
        signal.timestamp = now;
        Some(signal)
    }

    fn in_ptax_window(&self, now: SystemTime) -> bool {
        let dt: chrono::DateTime<chrono::Utc> = now.into();
        let minutes = dt.hour() * 60 + dt.minute();
        self.config.janelas_ptax.iter().any(|(start, end)| {
            let parse = |s: &str| -> Option<u32> {
                let mut parts = s.split(':');
                let h: u32 = parts.next()?.parse().ok()?;
                let m: u32 = parts.next()?.parse().ok()?;
                Some(h * 60 + m)
            };
            match (parse(start), parse(end)) {
                (Some(s), Some(e)) => minutes >= s && minutes <= e,
                _ => false,
            }
        })
    }

    fn stop_and_target(&self, action: &str, price: f64, grid: &CalculatedGrid) -> (f64, f64) {
        let margin = self.config.stop_target_margin;
        let fallback = self.config.stop_target_fallback;
        if action == "BUY" {
            let stop = grid
                .supports_below(price)
                .map(|l| l.price)
                .fold(f64::MIN, f64::max);
            let target = grid
                .resistances_above(price)
                .map(|l| l.price)
                .fold(f64::MAX, f64::min);
            (
                if stop.is_finite() && stop > f64::MIN { stop - margin } else { price - fallback },
                if target.is_finite() && target < f64::MAX { target } else { price + fallback },
            )
        } else {
            let stop = grid
                .resistances_above(price)
                .map(|l| l.price)
                .fold(f64::MAX, f64::min);
            let target = grid
                .supports_below(price)
                .map(|l| l.price)
                .fold(f64::MIN, f64::max);
            (
                if stop.is_finite() && stop < f64::MAX { stop + margin } else { price + fallback },
                if target.is_finite() && target > f64::MIN { target } else { price - fallback },
            )
        }
    }
}

fn rule(table: &mut HashMap<(&'static str, &'static str), Rule>, pattern: &'static str, level: &'static str, action: &'static str, confidence: f64, description: &'static str) {
    table.insert((pattern, level), Rule { action, confidence, description });
}

/// The ~28-entry (pattern, level) confluence table.
fn build_rule_table() -> HashMap<(&'static str, &'static str), Rule> {
    let mut t = HashMap::new();
    use crate::patterns::*;

    rule(&mut t, ESCORA_DETECTADA, "SX_SUP", "BUY", 0.75, "absorption at support shelf");
    rule(&mut t, ESCORA_DETECTADA, "SX", "SELL", 0.75, "absorption at resistance shelf");
    rule(&mut t, ESCORA_DETECTADA, "DEFENDO", "BUY", 0.70, "absorption defending the base");
    rule(&mut t, ESCORA_DETECTADA, "PB", "SELL", 0.70, "absorption capping a pullback");
    rule(&mut t, ESCORA_DETECTADA, "DEVENDO", "BUY", 0.85, "absorption at strong support");
    rule(&mut t, ESCORA_DETECTADA, "SOFGRE", "BUY", 0.90, "absorption at extreme support");
    rule(&mut t, ESCORA_DETECTADA, "SOFRER", "SELL", 0.85, "absorption at strong resistance");
    rule(&mut t, ESCORA_DETECTADA, "SOFRER_2X", "SELL", 0.90, "absorption at extreme resistance");

    rule(&mut t, ICEBERG_BUY, "SX_SUP", "BUY", 0.78, "buy iceberg reloading at support");
    rule(&mut t, ICEBERG_SELL, "SX", "SELL", 0.78, "sell iceberg reloading at resistance");
    rule(&mut t, ICEBERG_BUY, "DEVENDO", "BUY", 0.72, "buy iceberg at deep support");
    rule(&mut t, ICEBERG_SELL, "SOFRER", "SELL", 0.72, "sell iceberg at extended resistance");

    rule(&mut t, DIVERGENCIA_ALTA, "SX_SUP", "BUY", 0.80, "bullish divergence confirmed at support");
    rule(&mut t, DIVERGENCIA_BAIXA, "SX", "SELL", 0.80, "bearish divergence confirmed at resistance");
    rule(&mut t, DIVERGENCIA_ALTA, "DEVENDO", "BUY", 0.82, "bullish divergence at extended support");
    rule(&mut t, DIVERGENCIA_BAIXA, "SOFRER", "SELL", 0.82, "bearish divergence at extended resistance");

    rule(&mut t, MOMENTUM_EXTREMO, "SOFRER_2X", "SELL", 0.83, "extreme buying exhaustion at outer band");
    rule(&mut t, MOMENTUM_EXTREMO, "SOFGRE", "BUY", 0.83, "extreme selling exhaustion at outer band");

    rule(&mut t, PRESSAO_COMPRA, "SX_SUP", "BUY", 0.70, "buy pressure at support");
    rule(&mut t, PRESSAO_VENDA, "SX", "SELL", 0.70, "sell pressure at resistance");
    rule(&mut t, PRESSAO_COMPRA, "BASE", "BUY", 0.66, "buy pressure holding fair value");
    rule(&mut t, PRESSAO_VENDA, "BASE", "SELL", 0.66, "sell pressure holding fair value");

    rule(&mut t, VOLUME_SPIKE, "SX_SUP", "BUY", 0.68, "volume spike confirming support");
    rule(&mut t, VOLUME_SPIKE, "SX", "SELL", 0.68, "volume spike confirming resistance");

    rule(&mut t, PACE_ANOMALY, "DEFENDO", "BUY", 0.66, "pace anomaly defending the base");
    rule(&mut t, PACE_ANOMALY, "PB", "SELL", 0.66, "pace anomaly capping a pullback");

    rule(&mut t, BOOK_STACKING, "SX_SUP", "BUY", 0.72, "bid stacking at support");
    rule(&mut t, BOOK_STACKING, "SX", "SELL", 0.72, "ask stacking at resistance");
    rule(&mut t, BOOK_PULLING, "SX", "BUY", 0.69, "ask pulled away near resistance");
    rule(&mut t, BOOK_PULLING, "SX_SUP", "SELL", 0.69, "bid pulled away near support");

    rule(&mut t, INSTITUTIONAL_FOOTPRINT, "DEVENDO", "BUY", 0.80, "institutional accumulation at extended support");
    rule(&mut t, INSTITUTIONAL_FOOTPRINT, "SOFRER", "SELL", 0.80, "institutional distribution at extended resistance");

    rule(&mut t, HIDDEN_LIQUIDITY, "SX_SUP", "BUY", 0.74, "hidden liquidity replenishing support");
    rule(&mut t, HIDDEN_LIQUIDITY, "SX", "SELL", 0.74, "hidden liquidity replenishing resistance");

    rule(&mut t, HIDDEN_ACCUMULATION, "DEVENDO", "BUY", 0.77, "multiframe hidden accumulation");
    rule(&mut t, HIDDEN_DISTRIBUTION, "SOFRER", "SELL", 0.77, "multiframe hidden distribution");

    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CalculatedLevel, Side};
    use crate::patterns::ESCORA_DETECTADA;

    fn grid() -> CalculatedGrid {
        CalculatedGrid {
            base: 5500.0,
            levels: vec![
                CalculatedLevel { name: "SX_SUP".into(), price: 5499.0, level_type: LevelType::Support, strength: 2 },
                CalculatedLevel { name: "SX".into(), price: 5501.5, level_type: LevelType::Resistance, strength: 2 },
            ],
        }
    }

    #[test]
    fn emits_buy_signal_for_absorption_at_support() {
        let matrix = ConfluenceMatrix::new(CalculatedMarketConfig::default());
        let candidate = Candidate::new(ESCORA_DETECTADA, "X", 5499.2, 500, SystemTime::UNIX_EPOCH, 8)
            .with_direction(Side::Buy);
        let signal = matrix.evaluate(&candidate, &grid(), SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(3600 * 20));
        assert!(signal.is_some());
    }
}
