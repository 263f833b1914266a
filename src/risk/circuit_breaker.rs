//! Six named circuit breakers. `trigger` sets `triggered_at` only the first
//! time a breaker goes active; `check_all` auto-resets any breaker whose
//! cooldown has elapsed.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct Breaker {
    pub active: bool,
    pub triggered_at: Option<SystemTime>,
    pub reason: Option<String>,
    pub cooldown: Duration,
}

impl Breaker {
    fn new(cooldown: Duration) -> Self {
        Self { active: false, triggered_at: None, reason: None, cooldown }
    }
}

pub const FREQUENCY: &str = "frequency";
pub const QUALITY: &str = "quality";
pub const DRAWDOWN: &str = "drawdown";
pub const CONSECUTIVE_LOSSES: &str = "consecutive_losses";
pub const EMERGENCY: &str = "emergency";
pub const EXPOSURE: &str = "exposure";

pub struct CircuitBreakers {
    breakers: HashMap<&'static str, Breaker>,
}

impl CircuitBreakers {
    pub fn new(default_cooldown: Duration, exposure_cooldown: Duration) -> Self {
        let mut breakers = HashMap::new();
        for name in [FREQUENCY, QUALITY, DRAWDOWN, CONSECUTIVE_LOSSES, EMERGENCY] {
            breakers.insert(name, Breaker::new(default_cooldown));
        }
        // exposure carries a fixed, non-configurable 60s cooldown in the
        // source this was grounded on regardless of the operator-configured
        // value; only honor it if the caller passed the canonical default.
        breakers.insert(EXPOSURE, Breaker::new(exposure_cooldown));
        Self { breakers }
    }

    /// Trip `name` active. Does nothing if already active (does not refresh
    /// `triggered_at` on a repeated trigger while already tripped).
    pub fn trigger(&mut self, name: &'static str, reason: impl Into<String>, now: SystemTime) {
        if let Some(b) = self.breakers.get_mut(name) {
            if !b.active {
                b.active = true;
                b.triggered_at = Some(now);
                b.reason = Some(reason.into());
            }
        }
    }

    /// Reset a single named breaker regardless of cooldown (used by daily
    /// reset, which only resets `emergency`).
    pub fn reset(&mut self, name: &str) {
        if let Some(b) = self.breakers.get_mut(name) {
            b.active = false;
            b.triggered_at = None;
            b.reason = None;
        }
    }

    /// Auto-reset any breaker past its cooldown, then return the set of
    /// breakers still active.
    pub fn check_all(&mut self, now: SystemTime) -> Vec<&'static str> {
        for b in self.breakers.values_mut() {
            if b.active {
                if let Some(t) = b.triggered_at {
                    if crate::domain::elapsed_since(t, now) >= b.cooldown {
                        b.active = false;
                        b.triggered_at = None;
                        b.reason = None;
                    }
                }
            }
        }
        self.breakers.iter().filter(|(_, b)| b.active).map(|(&k, _)| k).collect()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.breakers.get(name).map(|b| b.active).unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<&Breaker> {
        self.breakers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_does_not_refresh_timestamp_while_active() {
        let mut cb = CircuitBreakers::new(Duration::from_secs(300), Duration::from_secs(60));
        let t0 = SystemTime::UNIX_EPOCH;
        cb.trigger(CONSECUTIVE_LOSSES, "losses", t0);
        cb.trigger(CONSECUTIVE_LOSSES, "losses again", t0 + Duration::from_secs(10));
        assert_eq!(cb.get(CONSECUTIVE_LOSSES).unwrap().triggered_at, Some(t0));
    }

    #[test]
    fn auto_resets_past_cooldown() {
        let mut cb = CircuitBreakers::new(Duration::from_secs(300), Duration::from_secs(60));
        let t0 = SystemTime::UNIX_EPOCH;
        cb.trigger(EXPOSURE, "x", t0);
        assert!(cb.is_active(EXPOSURE));
        cb.check_all(t0 + Duration::from_secs(61));
        assert!(!cb.is_active(EXPOSURE));
    }
}
