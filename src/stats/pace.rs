//! Trade pace anomaly detection, grounded in `PaceAnalyzer`: a rolling
//! median + k*stdev check over per-second trade counts.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use statrs::statistics::{Data, Distribution, Median, OrderStatistics};

pub struct PaceAnomaly {
    pub pace: f64,
    pub baseline: f64,
    pub deviation: f64,
}

pub struct PaceAnalyzer {
    trade_timestamps: VecDeque<SystemTime>,
    pace_history: VecDeque<f64>,
    baseline_samples: usize,
    anomaly_stdev: f64,
    window: Duration,
}

impl PaceAnalyzer {
    pub fn new(baseline_samples: usize, anomaly_stdev: f64, window_seconds: u64) -> Self {
        Self {
            trade_timestamps: VecDeque::with_capacity(10_000),
            pace_history: VecDeque::with_capacity(baseline_samples),
            baseline_samples,
            anomaly_stdev,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Record a trade event `now` and check whether the resulting pace is
    /// anomalous relative to the rolling baseline. Requires at least 50
    /// prior pace samples before it will ever flag an anomaly.
    pub fn update_and_check_anomaly(&mut self, now: SystemTime) -> Option<PaceAnomaly> {
        if self.trade_timestamps.len() >= 10_000 {
            self.trade_timestamps.pop_front();
        }
        self.trade_timestamps.push_back(now);

        let cutoff = now.checked_sub(self.window).unwrap_or(SystemTime::UNIX_EPOCH);
        let recent_count = self.trade_timestamps.iter().rev().take_while(|&&t| t > cutoff).count();
        let current_pace = recent_count as f64 / self.window.as_secs_f64();

        if self.pace_history.len() >= self.baseline_samples {
            self.pace_history.pop_front();
        }
        self.pace_history.push_back(current_pace);

        if self.pace_history.len() < 50 {
            return None;
        }

        let values: Vec<f64> = self.pace_history.iter().copied().collect();
        let mut data = Data::new(values.clone());
        let baseline = data.median();
        let std_dev = Data::new(values).std_dev().unwrap_or(0.0);

        if std_dev > 0.0 && current_pace > baseline + self.anomaly_stdev * std_dev {
            Some(PaceAnomaly {
                pace: current_pace,
                baseline,
                deviation: (current_pace - baseline) / std_dev,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_anomaly_before_fifty_samples() {
        let mut analyzer = PaceAnalyzer::new(100, 2.0, 10);
        let base = SystemTime::UNIX_EPOCH;
        for i in 0..40 {
            let r = analyzer.update_and_check_anomaly(base + Duration::from_secs(i));
            assert!(r.is_none());
        }
    }
}
