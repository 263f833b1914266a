//! Buy/sell pressure detector: one side dominating recent traded volume.

use crate::config::PressureConfig;
use crate::domain::{Candidate, Side, StrengthClass, Trade};
use crate::patterns::{PRESSAO_COMPRA, PRESSAO_VENDA};

pub struct PressureDetector {
    config: PressureConfig,
}

impl PressureDetector {
    pub fn new(config: PressureConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, instrument: &str, last_20: &[Trade]) -> Option<Candidate> {
        let total: u64 = last_20.iter().map(|t| t.volume).sum();
        if total < self.config.min_volume {
            return None;
        }
        let buy: u64 = last_20.iter().filter(|t| t.side == Side::Buy).map(|t| t.volume).sum();
        let sell: u64 = last_20.iter().filter(|t| t.side == Side::Sell).map(|t| t.volume).sum();

        let (pattern, side, dominant) = if buy as f64 / total as f64 >= self.config.threshold {
            (PRESSAO_COMPRA, Side::Buy, buy)
        } else if sell as f64 / total as f64 >= self.config.threshold {
            (PRESSAO_VENDA, Side::Sell, sell)
        } else {
            return None;
        };

        let last = last_20.last()?;
        Some(
            Candidate::new(
                pattern,
                instrument,
                last.price,
                total,
                last.timestamp,
                Candidate::strength_for(StrengthClass::Medium, total),
            )
            .with_direction(side)
            .with_field("ratio", dominant as f64 / total as f64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn trade(side: Side) -> Trade {
        Trade::new("X", 5500.0, 10, side, SystemTime::now(), "t")
    }

    #[test]
    fn fires_buy_pressure() {
        let detector = PressureDetector::new(PressureConfig::default());
        let mut trades = vec![trade(Side::Buy); 16];
        trades.extend(vec![trade(Side::Sell); 4]);
        let candidate = detector.detect("X", &trades).expect("pressure");
        assert_eq!(candidate.pattern, PRESSAO_COMPRA);
    }
}
