//! Iceberg detector: repeated same-side executions at the same price and
//! size, suggesting a hidden order replenishing after each fill.

use std::collections::HashMap;

use crate::config::IcebergConfig;
use crate::domain::{Candidate, Side, StrengthClass, Trade};
use crate::patterns::{ICEBERG_BUY, ICEBERG_SELL};

pub struct IcebergDetector {
    config: IcebergConfig,
}

impl IcebergDetector {
    pub fn new(config: IcebergConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, instrument: &str, recent: &[Trade]) -> Option<Candidate> {
        let mut groups: HashMap<(i64, u64, bool), (u32, u64)> = HashMap::new();
        for t in recent {
            if t.side == Side::Unknown {
                continue;
            }
            let key = ((t.price * 100.0).round() as i64, t.volume, t.side == Side::Buy);
            let entry = groups.entry(key).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += t.volume;
        }

        let ((price_key, volume, is_buy), (reps, total_volume)) = groups
            .into_iter()
            .filter(|(_, (reps, _))| *reps >= self.config.repetitions)
            .filter(|((_, vol, _), _)| *vol >= self.config.min_volume)
            .max_by_key(|(_, (reps, _))| *reps)?;

        let pattern = if is_buy { ICEBERG_BUY } else { ICEBERG_SELL };
        let side = if is_buy { Side::Buy } else { Side::Sell };
        let strength_class = if reps >= self.config.repetitions * 2 {
            StrengthClass::Strong
        } else {
            StrengthClass::Medium
        };

        Some(
            Candidate::new(
                pattern,
                instrument,
                price_key as f64 / 100.0,
                total_volume,
                recent.last()?.timestamp,
                Candidate::strength_for(strength_class, total_volume),
            )
            .with_direction(side)
            .with_field("repetitions", reps)
            .with_field("unit_volume", volume),
        )
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
    fn detects_repeated_same_size_fills() {
        let detector = IcebergDetector::new(IcebergConfig::default());
        let trades = vec![trade(5500.0, 60, Side::Buy); 5];
        let candidate = detector.detect("X", &trades).expect("iceberg");
        assert_eq!(candidate.pattern, ICEBERG_BUY);
    }
}
