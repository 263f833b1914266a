//! Momentum / divergence detector: compares recent price trend against CVD
//! rate-of-change. Sign mismatch is a divergence; magnitude alone beyond the
//! extreme threshold is a momentum extreme.

use crate::config::MomentumConfig;
use crate::domain::{Candidate, Side, StrengthClass, Trade};
use crate::patterns::{DIVERGENCIA_ALTA, DIVERGENCIA_BAIXA, MOMENTUM_EXTREMO};

pub struct MomentumAnalyzer {
    config: MomentumConfig,
}

impl MomentumAnalyzer {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, instrument: &str, recent: &[Trade], cvd_roc: f64) -> Option<Candidate> {
        if cvd_roc.abs() < self.config.divergence_threshold || recent.len() < 2 {
            return None;
        }
        let price_trend = recent.last()?.price - recent.first()?.price;
        let volume: u64 = recent.iter().map(|t| t.volume).sum();
        let timestamp = recent.last()?.timestamp;

        if price_trend > 1.0 && cvd_roc < -self.config.divergence_threshold {
            return Some(
                Candidate::new(
                    DIVERGENCIA_BAIXA,
                    instrument,
                    recent.last()?.price,
                    volume,
                    timestamp,
                    Candidate::strength_for(StrengthClass::Strong, volume),
                )
                .with_direction(Side::Sell)
                .with_field("cvd_roc", cvd_roc)
                .with_field("price_trend", price_trend),
            );
        }

        if price_trend < -1.0 && cvd_roc > self.config.divergence_threshold {
            return Some(
                Candidate::new(
                    DIVERGENCIA_ALTA,
                    instrument,
                    recent.last()?.price,
                    volume,
                    timestamp,
                    Candidate::strength_for(StrengthClass::Strong, volume),
                )
                .with_direction(Side::Buy)
                .with_field("cvd_roc", cvd_roc)
                .with_field("price_trend", price_trend),
            );
        }

        if cvd_roc.abs() > self.config.extreme_threshold {
            let side = if cvd_roc > 0.0 { Side::Buy } else { Side::Sell };
            return Some(
                Candidate::new(
                    MOMENTUM_EXTREMO,
                    instrument,
                    recent.last()?.price,
                    volume,
                    timestamp,
                    Candidate::strength_for(StrengthClass::Strong, volume),
                )
                .with_direction(side)
                .with_field("cvd_roc", cvd_roc),
            );
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn trade(price: f64) -> Trade {
        Trade::new("X", price, 10, Side::Buy, SystemTime::now(), "t")
    }

    #[test]
    fn flags_bearish_divergence_on_sign_mismatch() {
        let analyzer = MomentumAnalyzer::new(MomentumConfig::default());
        let trades = vec![trade(5500.0), trade(5502.0)];
        let candidate = analyzer.detect("X", &trades, -80.0).expect("divergence");
        assert_eq!(candidate.pattern, DIVERGENCIA_BAIXA);
    }

    #[test]
    fn flags_momentum_extreme_without_trend_mismatch() {
        let analyzer = MomentumAnalyzer::new(MomentumConfig::default());
        let trades = vec![trade(5500.0), trade(5500.5)];
        let candidate = analyzer.detect("X", &trades, 260.0).expect("extreme");
        assert_eq!(candidate.pattern, MOMENTUM_EXTREMO);
    }
}
