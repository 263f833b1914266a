//! Composite-signal observability: clusters approved confluence signals on
//! the same instrument within a short window and raises an informational
//! system signal noting the cluster. Additive only — never a gate.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use crate::domain::{Signal, SignalLevel, SignalSource};

pub struct CorrelatorConfig {
    pub window: Duration,
    pub min_cluster_size: usize,
    pub max_history: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self { window: Duration::from_secs(120), min_cluster_size: 2, max_history: 200 }
    }
}

struct Observation {
    instrument: String,
    action: String,
    timestamp: SystemTime,
}

pub struct SignalCorrelator {
    config: CorrelatorConfig,
    history: VecDeque<Observation>,
}

impl SignalCorrelator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self { config, history: VecDeque::new() }
    }

    /// Record an approved confluence signal and, if it completes a cluster
    /// within the window, return an INFO-level composite signal noting it.
    /// Never called for anything but `SignalSource::Confluence` signals.
    pub fn observe(&mut self, signal: &Signal, now: SystemTime) -> Option<Signal> {
        let instrument = signal.details.get("instrument").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let action = signal.details.get("action").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        if self.history.len() >= self.config.max_history {
            self.history.pop_front();
        }
        self.history.push_back(Observation { instrument: instrument.clone(), action: action.clone(), timestamp: now });

        let cutoff = now.checked_sub(self.config.window).unwrap_or(SystemTime::UNIX_EPOCH);
        let cluster: Vec<&Observation> = self
            .history
            .iter()
            .filter(|o| o.instrument == instrument && o.action == action && o.timestamp >= cutoff)
            .collect();

        if cluster.len() < self.config.min_cluster_size {
            return None;
        }

        let boost = ((cluster.len() - 1) as f64 * 0.03).min(0.15);
        let confidence = (0.7 + boost).min(0.99);

        let mut composite = Signal::new(
            SignalSource::System,
            SignalLevel::Info,
            format!("composite cluster: {} {} confluence signals on {instrument} within window", cluster.len(), action),
        )
        .with_detail("instrument", instrument)
        .with_detail("action", action)
        .with_detail("cluster_size", cluster.len() as u64)
        .with_detail("composite_confidence", confidence);
        composite.timestamp = now;
        Some(composite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confluence_signal(instrument: &str, action: &str) -> Signal {
        Signal::new(SignalSource::Confluence, SignalLevel::Alert, "buy confluence")
            .with_detail("instrument", instrument)
            .with_detail("action", action)
    }

    #[test]
    fn clusters_same_instrument_and_action_within_window() {
        let mut correlator = SignalCorrelator::new(CorrelatorConfig::default());
        let t0 = SystemTime::UNIX_EPOCH;
        assert!(correlator.observe(&confluence_signal("WDO", "BUY"), t0).is_none());
        let composite = correlator.observe(&confluence_signal("WDO", "BUY"), t0 + Duration::from_secs(10));
        assert!(composite.is_some());
        assert_eq!(composite.unwrap().level, SignalLevel::Info);
    }

    #[test]
    fn different_instruments_do_not_cluster() {
        let mut correlator = SignalCorrelator::new(CorrelatorConfig::default());
        let t0 = SystemTime::UNIX_EPOCH;
        assert!(correlator.observe(&confluence_signal("WDO", "BUY"), t0).is_none());
        assert!(correlator.observe(&confluence_signal("DOL", "BUY"), t0 + Duration::from_secs(10)).is_none());
    }
}
