//! Wraps [`crate::stats::PaceAnalyzer`] into a candidate-producing detector,
//! labeled with the dominant side of the trades that drove the anomaly.

use std::time::SystemTime;

use crate::domain::{Candidate, Side, StrengthClass, Trade};
use crate::patterns::PACE_ANOMALY;
use crate::stats::PaceAnalyzer;

pub struct PaceAnomalyDetector {
    analyzer: PaceAnalyzer,
}

impl PaceAnomalyDetector {
    pub fn new(baseline_samples: usize, anomaly_stdev: f64, window_seconds: u64) -> Self {
        Self { analyzer: PaceAnalyzer::new(baseline_samples, anomaly_stdev, window_seconds) }
    }

    pub fn detect(&mut self, instrument: &str, now: SystemTime, recent: &[Trade]) -> Option<Candidate> {
        let anomaly = self.analyzer.update_and_check_anomaly(now)?;
        let last = recent.last()?;
        let buy: u64 = recent.iter().filter(|t| t.side == Side::Buy).map(|t| t.volume).sum();
        let sell: u64 = recent.iter().filter(|t| t.side == Side::Sell).map(|t| t.volume).sum();
        let side = if buy >= sell { Side::Buy } else { Side::Sell };
        let volume: u64 = recent.iter().map(|t| t.volume).sum();

        Some(
            Candidate::new(
                PACE_ANOMALY,
                instrument,
                last.price,
                volume,
                now,
                Candidate::strength_for(StrengthClass::Medium, volume),
            )
            .with_direction(side)
            .with_field("pace", anomaly.pace)
            .with_field("baseline", anomaly.baseline)
            .with_field("deviation", anomaly.deviation),
        )
    }
}
