//! Defensive filter: layering and spoofing manipulation checks against the
//! current order book. A manipulated verdict drops the candidate outright;
//! `confidence_penalty` and `side` are recorded on the resulting
//! manipulation event for diagnostics, not used to rescue or rescale a
//! surviving signal.

use crate::config::ManipulationDetectionConfig;
use crate::domain::{BookLevel, OrderBook};

pub struct ManipulationVerdict {
    pub manipulated: bool,
    pub types: Vec<&'static str>,
    pub confidence_penalty: f64,
    pub side: Option<&'static str>,
}

pub struct DefensiveFilter {
    config: ManipulationDetectionConfig,
}

impl DefensiveFilter {
    pub fn new(config: ManipulationDetectionConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, book: &OrderBook) -> ManipulationVerdict {
        let mut types = Vec::new();
        let mut penalty = 1.0;
        let mut side = None;

        if self.check_layering(&book.bids) {
            types.push("LAYERING");
            penalty *= 1.0 - self.config.layering_confidence_penalty;
            side = Some("BID");
        } else if self.check_layering(&book.asks) {
            types.push("LAYERING");
            penalty *= 1.0 - self.config.layering_confidence_penalty;
            side = Some("ASK");
        }

        if self.check_spoofing(&book.bids) {
            types.push("SPOOFING");
            penalty *= 1.0 - self.config.spoofing_confidence_penalty;
            side = side.or(Some("BID"));
        } else if self.check_spoofing(&book.asks) {
            types.push("SPOOFING");
            penalty *= 1.0 - self.config.spoofing_confidence_penalty;
            side = side.or(Some("ASK"));
        }

        ManipulationVerdict { manipulated: !types.is_empty(), types, confidence_penalty: penalty, side }
    }

    fn check_layering(&self, levels: &[BookLevel]) -> bool {
        let n = self.config.layering_min_levels as usize;
        if levels.len() < n {
            return false;
        }
        let window = &levels[..n];
        if window.iter().any(|l| l.volume < self.config.layering_min_volume) {
            return false;
        }
        let mean = window.iter().map(|l| l.volume as f64).sum::<f64>() / n as f64;
        window.iter().all(|l| {
            let dev = (l.volume as f64 - mean).abs() / mean.max(1.0);
            dev <= self.config.layering_deviation_pct
        })
    }

    fn check_spoofing(&self, levels: &[BookLevel]) -> bool {
        if levels.len() < 5 {
            return false;
        }
        let top5: u64 = levels[..5].iter().map(|l| l.volume).sum();
        let rest: u64 = levels[5..].iter().map(|l| l.volume).sum();
        if rest == 0 {
            return top5 > 0 && levels.len() > 5;
        }
        (top5 as f64 / rest as f64) >= self.config.spoofing_ratio_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(volume: u64, price: f64) -> BookLevel {
        BookLevel { price, volume }
    }

    #[test]
    fn detects_layering_pattern() {
        let filter = DefensiveFilter::new(ManipulationDetectionConfig::default());
        let book = OrderBook {
            bids: vec![level(250, 100.0), level(255, 99.5), level(248, 99.0), level(252, 98.5), level(251, 98.0)],
            asks: vec![level(10, 101.0)],
        };
        let verdict = filter.check(&book);
        assert!(verdict.manipulated);
        assert!(verdict.types.contains(&"LAYERING"));
    }
}
