//! Adaptive risk gating: circuit breakers, ambient signal/PnL metrics, and
//! the manager that composes both into the approval pipeline.

pub mod circuit_breaker;
pub mod manager;
pub mod metrics;

pub use manager::{AdaptiveFactors, RiskAssessment, RiskLevel, RiskManager};
