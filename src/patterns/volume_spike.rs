//! Volume spike detector: the current 10-trade volume sum vs. the median of
//! the 40 prior 10-trade volume sums.

use std::collections::VecDeque;

use crate::config::VolumeSpikeConfig;
use crate::domain::{Candidate, Side, StrengthClass, Trade};
use crate::patterns::VOLUME_SPIKE;

pub struct VolumeSpikeDetector {
    config: VolumeSpikeConfig,
    history: VecDeque<u64>,
}

impl VolumeSpikeDetector {
    pub fn new(config: VolumeSpikeConfig) -> Self {
        let history = VecDeque::with_capacity(config.history_size);
        Self { config, history }
    }

    pub fn detect(&mut self, instrument: &str, recent: &[Trade]) -> Option<Candidate> {
        if recent.len() < 10 {
            return None;
        }
        let last_10 = &recent[recent.len() - 10..];
        let current_volume: u64 = last_10.iter().map(|t| t.volume).sum();

        if self.history.len() >= self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(current_volume);

        if self.history.len() < self.config.baseline_window {
            return None;
        }

        let len = self.history.len();
        let baseline_slice: Vec<u64> = self
            .history
            .iter()
            .copied()
            .skip(len - self.config.baseline_window)
            .take(self.config.baseline_window - 10)
            .collect();
        if baseline_slice.is_empty() {
            return None;
        }
        let mut sorted = baseline_slice.clone();
        sorted.sort_unstable();
        let baseline = sorted[sorted.len() / 2] as f64;

        if baseline <= 0.0 || current_volume as f64 <= baseline * self.config.spike_multiplier {
            return None;
        }

        let buy: u64 = last_10.iter().filter(|t| t.side == Side::Buy).map(|t| t.volume).sum();
        let sell: u64 = last_10.iter().filter(|t| t.side == Side::Sell).map(|t| t.volume).sum();
        let side = if buy >= sell { Side::Buy } else { Side::Sell };
        let last = last_10.last()?;

        Some(
            Candidate::new(
                VOLUME_SPIKE,
                instrument,
                last.price,
                current_volume,
                last.timestamp,
                Candidate::strength_for(StrengthClass::Medium, current_volume),
            )
            .with_direction(side)
            .with_field("baseline", baseline)
            .with_field("multiplier", current_volume as f64 / baseline),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn trade(volume: u64) -> Trade {
        Trade::new("X", 5500.0, volume, Side::Buy, SystemTime::now(), "t")
    }

    #[test]
    fn fires_when_current_exceeds_median_by_multiplier() {
        let mut detector = VolumeSpikeDetector::new(VolumeSpikeConfig::default());
        for _ in 0..40 {
            let batch: Vec<Trade> = (0..10).map(|_| trade(1)).collect();
            detector.detect("X", &batch);
        }
        let spike_batch: Vec<Trade> = (0..10).map(|_| trade(100)).collect();
        let candidate = detector.detect("X", &spike_batch);
        assert!(candidate.is_some());
    }
}
