//! Three-stage filter pipeline (§4.6): quality, cooldown, defensive.

pub mod cooldown;
pub mod defensive;
pub mod quality;

pub use cooldown::CooldownFilter;
pub use defensive::{DefensiveFilter, ManipulationVerdict};
pub use quality::QualityFilter;
