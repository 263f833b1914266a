//! Absorption / exhaustion detector (ESCORA_DETECTADA).
//!
//! Flags when a price level absorbs a concentrated share of recent volume
//! without moving — the signature of a resting order soaking up aggression.

use crate::config::AbsorptionConfig;
use crate::domain::{Candidate, Side, StrengthClass, Trade};
use crate::patterns::ESCORA_DETECTADA;

pub struct AbsorptionDetector {
    config: AbsorptionConfig,
}

impl AbsorptionDetector {
    pub fn new(config: AbsorptionConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, instrument: &str, recent: &[Trade]) -> Option<Candidate> {
        if recent.is_empty() {
            return None;
        }
        let total_volume: u64 = recent.iter().map(|t| t.volume).sum();
        if total_volume < self.config.min_volume_threshold {
            return None;
        }

        let mut by_price: std::collections::HashMap<i64, (u64, u64, u64)> = std::collections::HashMap::new();
        for t in recent {
            let key = (t.price * 100.0).round() as i64;
            let entry = by_price.entry(key).or_insert((0, 0, 0));
            entry.0 += t.volume;
            match t.side {
                Side::Buy => entry.1 += t.volume,
                Side::Sell => entry.2 += t.volume,
                Side::Unknown => {}
            }
        }

        let (level_key, (level_volume, buy_vol, sell_vol)) =
            by_price.iter().max_by_key(|(_, v)| v.0).map(|(k, v)| (*k, *v))?;
        let concentration = level_volume as f64 / total_volume as f64;
        if concentration < self.config.concentration_threshold {
            return None;
        }

        let level_price = level_key as f64 / 100.0;
        let side = if buy_vol >= sell_vol { Side::Sell } else { Side::Buy };
        let strength_class = if level_volume >= self.config.exhaustion_volume {
            StrengthClass::Strong
        } else if concentration >= self.config.concentration_threshold * 1.5 {
            StrengthClass::Medium
        } else {
            StrengthClass::Weak
        };

        let candidate = Candidate::new(
            ESCORA_DETECTADA,
            instrument,
            level_price,
            level_volume,
            recent.last().unwrap().timestamp,
            Candidate::strength_for(strength_class, level_volume),
        )
        .with_direction(side)
        .with_field("concentration", concentration)
        .with_field("exhaustion", level_volume >= self.config.exhaustion_volume);

        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn trade(price: f64, volume: u64, side: Side) -> Trade {
        Trade::new("X", price, volume, side, SystemTime::now(), "t")
    }

    #[test]
    fn fires_on_concentrated_volume_at_one_level() {
        let detector = AbsorptionDetector::new(AbsorptionConfig::default());
        let mut trades = vec![trade(5500.0, 100, Side::Buy); 3];
        trades.extend(vec![trade(5500.5, 5, Side::Sell); 2]);
        for t in trades.iter_mut().take(3) {
            t.volume = 100;
        }
        let candidate = detector.detect("X", &trades);
        assert!(candidate.is_some());
    }

    #[test]
    fn no_signal_below_volume_floor() {
        let detector = AbsorptionDetector::new(AbsorptionConfig::default());
        let trades = vec![trade(5500.0, 10, Side::Buy); 2];
        assert!(detector.detect("X", &trades).is_none());
    }
}
