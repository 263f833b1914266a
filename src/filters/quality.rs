//! Quality filter: pattern-specific weighted scoring, normalized to [0, 1],
//! gated by a threshold the risk manager can raise adaptively.
//!
//! The rolling z-score check uses Welford's online algorithm: it never
//! replaces the weighted score below, only folds in as one more input so an
//! unusually large outlier candidate needs a touch more corroborating
//! strength before it scores as highly as a routine one.

use std::collections::HashMap;

use crate::config::QualityFilterConfig;
use crate::domain::Candidate;
use crate::patterns::ESCORA_DETECTADA;

#[derive(Default)]
struct RollingStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RollingStats {
    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    fn z_score(&self, value: f64) -> f64 {
        let sd = self.std_dev();
        if self.count < 30 || sd == 0.0 {
            0.0
        } else {
            (value - self.mean) / sd
        }
    }
}

pub struct QualityFilter {
    config: QualityFilterConfig,
    volume_stats: HashMap<String, RollingStats>,
}

impl QualityFilter {
    pub fn new(config: QualityFilterConfig) -> Self {
        Self { config, volume_stats: HashMap::new() }
    }

    /// Score a candidate in [0, 1]. `threshold` is the current adaptive
    /// quality threshold from the risk manager.
    pub fn evaluate(&mut self, candidate: &Candidate, threshold: f64) -> (f64, bool) {
        let weight = self.config.weights.get(candidate.pattern.as_str()).copied().unwrap_or(1.0);
        let max_weight = self.config.weights.values().cloned().fold(0.0_f64, f64::max).max(1.0);

        let base_score = if candidate.pattern == ESCORA_DETECTADA {
            let concentration = candidate
                .fields
                .get("concentration")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5);
            let volume_score = (candidate.volume as f64 / 2000.0).min(1.0);
            0.5 * concentration.min(1.0) + 0.5 * volume_score
        } else {
            (candidate.strength as f64 / 10.0).min(1.0)
        };

        let stats = self.volume_stats.entry(candidate.pattern.clone()).or_default();
        let z = stats.z_score(candidate.volume as f64);
        stats.update(candidate.volume as f64);

        // an extreme unexplained outlier nudges the score down slightly;
        // this never zeroes a score on its own.
        let outlier_penalty = if z.abs() > 4.0 { 0.1 } else { 0.0 };

        let normalized_weight = weight / max_weight;
        let score = ((base_score * normalized_weight) - outlier_penalty).clamp(0.0, 1.0);

        (score, score >= threshold)
    }
}
