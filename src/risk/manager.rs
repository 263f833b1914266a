//! Adaptive risk manager (§4.8): six-step short-circuit gating, per-regime
//! adaptive parameter adjustment, and daily reset.

use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::config::RiskManagementConfig;
use crate::domain::Candidate;
use crate::error::RejectReason;
use crate::risk::circuit_breaker::{CircuitBreakers, CONSECUTIVE_LOSSES, DRAWDOWN, EMERGENCY};
use crate::risk::metrics::MetricsTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

pub struct RiskAssessment {
    pub approved: bool,
    pub risk_level: RiskLevel,
    pub quality: f64,
    pub reasons: Vec<RejectReason>,
}

/// Adaptive multipliers recomputed on regime change (§4.8).
#[derive(Debug, Clone)]
pub struct AdaptiveFactors {
    pub signals_per_minute: f64,
    pub signals_per_hour: f64,
    pub confluence_per_hour: f64,
    pub concurrent_signals: f64,
    pub signal_timeout: f64,
    pub quality_threshold: f64,
    pub circuit_breaker_sensitivity: f64,
}

impl Default for AdaptiveFactors {
    fn default() -> Self {
        Self {
            signals_per_minute: 1.0,
            signals_per_hour: 1.0,
            confluence_per_hour: 1.0,
            concurrent_signals: 1.0,
            signal_timeout: 1.0,
            quality_threshold: 1.0,
            circuit_breaker_sensitivity: 1.0,
        }
    }
}

fn clamp_factor(v: f64) -> f64 {
    v.clamp(0.3, 2.0)
}

/// Per-regime factor deltas from the engine-wide table (freq applies to
/// signals_per_minute, signals_per_hour, and confluence_per_hour alike).
fn regime_factor_table(regime: &str) -> AdaptiveFactors {
    let mut f = AdaptiveFactors::default();
    let mut freq = 1.0;
    match regime {
        "TRENDING_UP" | "TRENDING_DOWN" => {
            freq = 1.2;
            f.quality_threshold = 0.9;
            f.concurrent_signals = 1.3;
        }
        "VOLATILE" => {
            freq = 0.7;
            f.quality_threshold = 1.3;
            f.concurrent_signals = 0.6;
            f.signal_timeout = 0.8;
            f.circuit_breaker_sensitivity = 1.5;
        }
        "QUIET" => {
            freq = 0.5;
            f.quality_threshold = 1.5;
            f.concurrent_signals = 0.5;
        }
        "BREAKOUT" => {
            freq = 1.5;
            f.quality_threshold = 0.8;
            f.concurrent_signals = 1.5;
            f.signal_timeout = 1.2;
        }
        "REVERSAL" => {
            freq = 0.8;
            f.quality_threshold = 1.2;
            f.concurrent_signals = 0.8;
            f.circuit_breaker_sensitivity = 1.3;
        }
        _ => {}
    }
    f.signals_per_minute = freq;
    f.signals_per_hour = freq;
    f.confluence_per_hour = freq;
    f
}

pub struct RiskManager {
    config: RiskManagementConfig,
    breakers: CircuitBreakers,
    metrics: MetricsTracker,
    factors: AdaptiveFactors,
    last_reset_date: Option<chrono::NaiveDate>,
    system_risk: RiskLevel,
}

impl RiskManager {
    pub fn new(config: RiskManagementConfig) -> Self {
        let breakers = CircuitBreakers::new(
            Duration::from_secs(config.circuit_breaker_cooldown_seconds),
            Duration::from_secs(config.exposure_cooldown_seconds),
        );
        Self {
            config,
            breakers,
            metrics: MetricsTracker::new(),
            factors: AdaptiveFactors::default(),
            last_reset_date: None,
            system_risk: RiskLevel::Low,
        }
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut MetricsTracker {
        &mut self.metrics
    }

    /// Recompute adaptive factors on a regime change, including the
    /// cross-symbol divergence adjustment when the two instruments'
    /// regimes disagree.
    pub fn on_regime_change(&mut self, own_regime: &str, other_regime: &str) {
        let mut f = regime_factor_table(own_regime);
        if own_regime != other_regime {
            f.quality_threshold *= 1.1;
            f.concurrent_signals *= 0.9;
        }
        f.signals_per_minute = clamp_factor(f.signals_per_minute);
        f.signals_per_hour = clamp_factor(f.signals_per_hour);
        f.confluence_per_hour = clamp_factor(f.confluence_per_hour);
        f.concurrent_signals = clamp_factor(f.concurrent_signals);
        f.signal_timeout = clamp_factor(f.signal_timeout);
        f.quality_threshold = clamp_factor(f.quality_threshold);
        f.circuit_breaker_sensitivity = clamp_factor(f.circuit_breaker_sensitivity);
        self.factors = f;
    }

    pub fn current_quality_threshold(&self) -> f64 {
        (self.config.signal_quality_threshold * self.factors.quality_threshold).min(0.9)
    }

    fn max_concurrent(&self) -> u32 {
        (self.config.max_concurrent_signals as f64 * self.factors.concurrent_signals).round().max(1.0) as u32
    }

    fn max_per_minute(&self) -> u32 {
        (self.config.max_signals_per_minute as f64 * self.factors.signals_per_minute).round().max(1.0) as u32
    }

    fn max_per_hour(&self) -> u32 {
        (self.config.max_signals_per_hour as f64 * self.factors.signals_per_hour).round().max(1.0) as u32
    }

    fn max_confluence_per_hour(&self) -> u32 {
        (self.config.max_confluence_per_hour as f64 * self.factors.confluence_per_hour).round().max(1.0) as u32
    }

    pub fn signal_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.signal_timeout_seconds as f64 * self.factors.signal_timeout)
    }

    /// Six-step short-circuit evaluation: breakers -> exposure -> frequency
    /// -> quality -> contextual risk -> approve.
    pub fn evaluate(
        &mut self,
        _candidate: &Candidate,
        quality_score: f64,
        is_confluence: bool,
        now: SystemTime,
        cvd_roc: f64,
        hour_of_day: u32,
    ) -> RiskAssessment {
        let active = self.breakers.check_all(now);
        if !active.is_empty() {
            return RiskAssessment {
                approved: false,
                risk_level: RiskLevel::Critical,
                quality: quality_score,
                reasons: active.into_iter().map(|b| RejectReason::CircuitBreaker(b.to_string())).collect(),
            };
        }

        if self.metrics.active_count() as u32 >= self.max_concurrent() {
            return RiskAssessment {
                approved: false,
                risk_level: RiskLevel::High,
                quality: quality_score,
                reasons: vec![RejectReason::ExposureLimit],
            };
        }

        let per_minute = self.metrics.count_since(Duration::from_secs(60), now);
        let per_hour = self.metrics.count_since(Duration::from_secs(3600), now);
        if per_minute > self.max_per_minute() {
            return reject(quality_score, RiskLevel::High, RejectReason::FrequencyLimit("per_minute".into()));
        }
        if per_hour > self.max_per_hour() {
            return reject(quality_score, RiskLevel::High, RejectReason::FrequencyLimit("per_hour".into()));
        }
        if is_confluence {
            let confluence_hour = self.metrics.confluence_count_since(Duration::from_secs(3600), now);
            if confluence_hour > self.max_confluence_per_hour() {
                return reject(quality_score, RiskLevel::High, RejectReason::FrequencyLimit("confluence_per_hour".into()));
            }
        }

        if quality_score < self.current_quality_threshold() {
            return reject(quality_score, RiskLevel::Medium, RejectReason::QualityBelowThreshold);
        }

        let mut points = match self.system_risk {
            RiskLevel::Critical => 3,
            RiskLevel::High => 2,
            RiskLevel::Medium => 1,
            RiskLevel::Low => 0,
        };
        if self.metrics.drawdown_percent() >= self.config.max_drawdown_percent * 0.75 {
            points += 2;
        }
        if !(10..16).contains(&hour_of_day) {
            points += 1;
        }
        if cvd_roc.abs() > 150.0 {
            points += 1;
        }

        let level = match points {
            p if p >= 4 => RiskLevel::Critical,
            p if p >= 3 => RiskLevel::High,
            p if p >= 2 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };
        self.system_risk = level;

        if level >= RiskLevel::High {
            return reject(quality_score, level, RejectReason::ContextualRisk(format!("{level:?}")));
        }

        RiskAssessment { approved: true, risk_level: level, quality: quality_score, reasons: Vec::new() }
    }

    pub fn record_approved(&mut self, signal_id: impl Into<String>, is_confluence: bool, now: SystemTime) {
        self.metrics.record_approval(is_confluence, now);
        self.metrics.record_active(signal_id, now);
    }

    pub fn record_pnl(&mut self, pnl: f64, now: SystemTime) {
        self.metrics.record_pnl(pnl);
        if self.metrics.consecutive_losses() >= self.config.consecutive_losses_limit {
            warn!("consecutive losses breaker tripped");
            self.breakers.trigger(CONSECUTIVE_LOSSES, "consecutive loss limit reached", now);
        }
        if self.metrics.drawdown_percent() >= self.config.max_drawdown_percent {
            self.breakers.trigger(DRAWDOWN, "drawdown limit exceeded", now);
        }
        if self.metrics.daily_pnl() <= self.config.emergency_stop_loss {
            self.breakers.trigger(EMERGENCY, "emergency stop loss breached", now);
        }
    }

    pub fn breaker_active(&self, name: &str) -> bool {
        self.breakers.is_active(name)
    }

    pub fn trigger_breaker(&mut self, name: &'static str, reason: impl Into<String>, now: SystemTime) {
        self.breakers.trigger(name, reason, now);
    }

    /// Daily reset: clears the metrics tracker and resets only the
    /// `emergency` breaker, idempotent past the first crossing of the
    /// configured reset time on a given calendar date.
    pub fn maybe_daily_reset(&mut self, now: SystemTime) -> bool {
        let date: chrono::DateTime<chrono::Utc> = now.into();
        let today = date.date_naive();
        if self.last_reset_date == Some(today) {
            return false;
        }
        self.last_reset_date = Some(today);
        self.metrics.reset_daily(now);
        self.breakers.reset(EMERGENCY);
        info!("daily risk reset applied");
        true
    }

    pub fn clean_expired_active(&mut self, now: SystemTime) {
        self.metrics.clean_expired_active(self.signal_timeout(), now);
    }
}

fn reject(quality: f64, level: RiskLevel, reason: RejectReason) -> RiskAssessment {
    RiskAssessment { approved: false, risk_level: level, quality, reasons: vec![reason] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use std::time::SystemTime;

    fn candidate() -> Candidate {
        Candidate::new("PRESSAO_COMPRA", "X", 5500.0, 200, SystemTime::UNIX_EPOCH, 8).with_direction(Side::Buy)
    }

    #[test]
    fn rejects_while_breaker_active() {
        let mut rm = RiskManager::new(RiskManagementConfig::default());
        let t0 = SystemTime::UNIX_EPOCH;
        rm.trigger_breaker(CONSECUTIVE_LOSSES, "test", t0);
        let outcome = rm.evaluate(&candidate(), 0.9, false, t0, 0.0, 12);
        assert!(!outcome.approved);
    }

    #[test]
    fn adaptive_quality_threshold_clamped_at_point_nine() {
        let mut rm = RiskManager::new(RiskManagementConfig::default());
        rm.on_regime_change("QUIET", "QUIET");
        assert!(rm.current_quality_threshold() <= 0.9);
    }
}
