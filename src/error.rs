//! Error taxonomy for the engine.
//!
//! Every boundary recovers locally; only loop-level fatals propagate up to
//! `main`. `RiskReject` is a first-class outcome, never an `Err`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("detector fault in {detector}: {reason}")]
    DetectorFault { detector: String, reason: String },

    #[error("handler fault for topic {topic}: {reason}")]
    HandlerFault { topic: String, reason: String },

    #[error("validation fault: {0}")]
    ValidationFault(String),
}

/// Reasons a candidate/signal may be rejected by the risk manager. Not an
/// error: a normal, expected outcome of evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    CircuitBreaker(String),
    ExposureLimit,
    FrequencyLimit(String),
    QualityBelowThreshold,
    ContextualRisk(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::CircuitBreaker(name) => write!(f, "circuit_breaker:{name}"),
            RejectReason::ExposureLimit => write!(f, "exposure_limit"),
            RejectReason::FrequencyLimit(window) => write!(f, "frequency_limit:{window}"),
            RejectReason::QualityBelowThreshold => write!(f, "quality_below_threshold"),
            RejectReason::ContextualRisk(level) => write!(f, "contextual_risk:{level}"),
        }
    }
}
