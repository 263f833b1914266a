//! Cooldown filter: per-(instrument, pattern) minimum spacing between
//! emitted signals. A key's very first occurrence always passes.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::config::CooldownConfig;

pub struct CooldownFilter {
    config: CooldownConfig,
    last_emission: HashMap<(String, String), SystemTime>,
    blocked_counts: HashMap<(String, String), u64>,
}

impl CooldownFilter {
    pub fn new(config: CooldownConfig) -> Self {
        Self { config, last_emission: HashMap::new(), blocked_counts: HashMap::new() }
    }

    fn cooldown_for(&self, pattern: &str) -> Duration {
        Duration::from_secs(
            self.config.per_pattern.get(pattern).copied().unwrap_or(self.config.default_seconds),
        )
    }

    /// Returns true if the candidate passes (is not on cooldown). Records
    /// the emission timestamp when it passes and the block count otherwise.
    pub fn check_and_record(&mut self, instrument: &str, pattern: &str, now: SystemTime) -> bool {
        let key = (instrument.to_string(), pattern.to_string());
        match self.last_emission.get(&key) {
            None => {
                self.last_emission.insert(key, now);
                true
            }
            Some(&last) => {
                let elapsed = crate::domain::elapsed_since(last, now);
                if elapsed >= self.cooldown_for(pattern) {
                    self.last_emission.insert(key, now);
                    true
                } else {
                    *self.blocked_counts.entry(key).or_insert(0) += 1;
                    false
                }
            }
        }
    }

    pub fn blocked_count(&self, instrument: &str, pattern: &str) -> u64 {
        self.blocked_counts.get(&(instrument.to_string(), pattern.to_string())).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_always_passes() {
        let mut filter = CooldownFilter::new(CooldownConfig::default());
        assert!(filter.check_and_record("X", "PRESSAO_COMPRA", SystemTime::UNIX_EPOCH));
    }

    #[test]
    fn blocks_within_cooldown_window() {
        let mut filter = CooldownFilter::new(CooldownConfig { default_seconds: 15, per_pattern: HashMap::new() });
        let t0 = SystemTime::UNIX_EPOCH;
        assert!(filter.check_and_record("X", "PRESSAO_COMPRA", t0));
        assert!(!filter.check_and_record("X", "PRESSAO_COMPRA", t0 + Duration::from_secs(10)));
        assert_eq!(filter.blocked_count("X", "PRESSAO_COMPRA"), 1);
        assert!(filter.check_and_record("X", "PRESSAO_COMPRA", t0 + Duration::from_secs(16)));
    }
}
