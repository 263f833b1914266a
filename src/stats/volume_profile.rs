//! Volume profile: price-bucketed volume histogram, point of control,
//! value area and support/resistance extraction.

use std::collections::HashMap;

use crate::domain::{Side, Trade};

#[derive(Debug, Clone, Copy, Default)]
pub struct LevelVolume {
    pub buy: u64,
    pub sell: u64,
    pub total: u64,
    pub net: i64,
}

pub struct VolumeProfileAnalyzer {
    price_step: f64,
    profile: HashMap<i64, LevelVolume>,
}

impl VolumeProfileAnalyzer {
    pub fn new(price_step: f64) -> Self {
        Self { price_step, profile: HashMap::new() }
    }

    fn bucket_key(&self, price: f64) -> i64 {
        (price / self.price_step).round() as i64
    }

    fn bucket_price(&self, key: i64) -> f64 {
        key as f64 * self.price_step
    }

    pub fn update(&mut self, trades: &[Trade]) {
        for trade in trades {
            let key = self.bucket_key(trade.price);
            let entry = self.profile.entry(key).or_default();
            match trade.side {
                Side::Buy => entry.buy += trade.volume,
                Side::Sell => entry.sell += trade.volume,
                Side::Unknown => {}
            }
            entry.total += trade.volume;
            entry.net = entry.buy as i64 - entry.sell as i64;
        }
    }

    /// Point of control: the price bucket with the most total volume.
    pub fn poc(&self) -> Option<f64> {
        self.profile
            .iter()
            .max_by_key(|(_, v)| v.total)
            .map(|(k, _)| self.bucket_price(*k))
    }

    /// Value area: contiguous price range around the POC covering
    /// `percentage` of total traded volume.
    pub fn value_area(&self, percentage: f64) -> Option<(f64, f64, f64)> {
        if self.profile.is_empty() {
            return None;
        }
        let mut keys: Vec<i64> = self.profile.keys().copied().collect();
        keys.sort_unstable();

        let poc_key = *self.profile.iter().max_by_key(|(_, v)| v.total)?.0;
        let poc_idx = keys.binary_search(&poc_key).ok()?;

        let total_volume: u64 = self.profile.values().map(|v| v.total).sum();
        let target = (total_volume as f64 * percentage).ceil() as u64;

        let mut low_idx = poc_idx;
        let mut high_idx = poc_idx;
        let mut accumulated = self.profile[&keys[poc_idx]].total;

        while accumulated < target && (low_idx > 0 || high_idx < keys.len() - 1) {
            let low_vol = if low_idx > 0 { self.profile[&keys[low_idx - 1]].total } else { 0 };
            let high_vol = if high_idx < keys.len() - 1 { self.profile[&keys[high_idx + 1]].total } else { 0 };

            if high_idx < keys.len() - 1 && high_vol >= low_vol {
                high_idx += 1;
                accumulated += high_vol;
            } else if low_idx > 0 {
                low_idx -= 1;
                accumulated += low_vol;
            } else {
                break;
            }
        }

        Some((
            self.bucket_price(keys[high_idx]),
            self.bucket_price(keys[low_idx]),
            self.bucket_price(poc_key),
        ))
    }

    /// Support/resistance levels within `range_pct` of `current_price`,
    /// filtered by minimum total volume and net-flow direction.
    pub fn support_resistance(&self, current_price: f64, range_pct: f64) -> (Vec<f64>, Vec<f64>) {
        let band = current_price * range_pct;
        let mut supports: Vec<(f64, i64)> = Vec::new();
        let mut resistances: Vec<(f64, i64)> = Vec::new();

        for (key, vol) in &self.profile {
            if vol.total < 100 {
                continue;
            }
            let price = self.bucket_price(*key);
            if (price - current_price).abs() > band {
                continue;
            }
            if price < current_price && vol.net > 50 {
                supports.push((price, vol.net));
            } else if price > current_price && vol.net < -50 {
                resistances.push((price, vol.net));
            }
        }

        supports.sort_by(|a, b| b.0.total_cmp(&a.0));
        resistances.sort_by(|a, b| a.0.total_cmp(&b.0));
        (
            supports.into_iter().take(3).map(|(p, _)| p).collect(),
            resistances.into_iter().take(3).map(|(p, _)| p).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn trade(price: f64, volume: u64, side: Side) -> Trade {
        Trade::new("X", price, volume, side, SystemTime::now(), "t")
    }

    #[test]
    fn poc_is_highest_volume_bucket() {
        let mut vp = VolumeProfileAnalyzer::new(0.5);
        vp.update(&[
            trade(100.0, 10, Side::Buy),
            trade(100.0, 10, Side::Sell),
            trade(101.0, 5, Side::Buy),
        ]);
        assert_eq!(vp.poc(), Some(100.0));
    }
}
