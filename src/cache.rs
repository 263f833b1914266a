//! Ring-buffer trade cache, one bounded FIFO per instrument.
//!
//! Mirrors `TradeMemoryCache`: a `VecDeque` per symbol capped at `max_size`,
//! usage counters, and copy-out reads so callers never alias the cache's
//! internal buffer.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::domain::Trade;

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub additions: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct SymbolBuffer {
    trades: VecDeque<Trade>,
    total_added: u64,
}

/// Bounded per-instrument trade history. One `RwLock` per symbol; the
/// coordinator is the only writer, readers may come from any thread.
pub struct TradeCache {
    max_size: usize,
    buffers: RwLock<HashMap<String, SymbolBuffer>>,
    stats: RwLock<CacheStats>,
}

impl TradeCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            buffers: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Append a batch of trades for `symbol`, evicting the oldest trades
    /// once the buffer exceeds `max_size`.
    pub fn append_batch(&self, symbol: &str, trades: impl IntoIterator<Item = Trade>) {
        let trades: Vec<Trade> = trades.into_iter().collect();
        if trades.is_empty() {
            return;
        }
        let mut buffers = self.buffers.write();
        let buf = buffers.entry(symbol.to_string()).or_insert_with(|| SymbolBuffer {
            trades: VecDeque::with_capacity(self.max_size),
            total_added: 0,
        });

        let current_size = buf.trades.len();
        let overflow = (current_size + trades.len()).saturating_sub(self.max_size);
        let evictions = overflow.min(current_size);

        buf.total_added += trades.len() as u64;
        for t in trades {
            if buf.trades.len() >= self.max_size {
                buf.trades.pop_front();
            }
            buf.trades.push_back(t);
        }

        let mut stats = self.stats.write();
        stats.additions += buf.total_added.min(u64::MAX);
        stats.evictions += evictions as u64;
    }

    /// Most recent `count` trades, oldest first. Always a copy.
    pub fn recent(&self, symbol: &str, count: usize) -> Vec<Trade> {
        let buffers = self.buffers.read();
        let mut stats = self.stats.write();
        match buffers.get(symbol) {
            Some(buf) => {
                stats.hits += 1;
                let len = buf.trades.len();
                let start = len.saturating_sub(count);
                buf.trades.iter().skip(start).cloned().collect()
            }
            None => {
                stats.misses += 1;
                Vec::new()
            }
        }
    }

    /// Every trade currently buffered for `symbol`, oldest first. Always a copy.
    pub fn all(&self, symbol: &str) -> Vec<Trade> {
        let buffers = self.buffers.read();
        let mut stats = self.stats.write();
        match buffers.get(symbol) {
            Some(buf) => {
                stats.hits += 1;
                buf.trades.iter().cloned().collect()
            }
            None => {
                stats.misses += 1;
                Vec::new()
            }
        }
    }

    /// Trades within the last `window` of wall-clock time, chronological
    /// order. Trades are assumed monotonically ordered in the buffer, so
    /// iteration stops at the first trade outside the window.
    pub fn window(&self, symbol: &str, window: Duration, now: SystemTime) -> Vec<Trade> {
        let buffers = self.buffers.read();
        let mut stats = self.stats.write();
        let Some(buf) = buffers.get(symbol) else {
            stats.misses += 1;
            return Vec::new();
        };
        stats.hits += 1;
        let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut result: Vec<Trade> = Vec::new();
        for trade in buf.trades.iter().rev() {
            if trade.timestamp <= cutoff {
                break;
            }
            result.push(trade.clone());
        }
        result.reverse();
        result
    }

    pub fn size(&self, symbol: &str) -> usize {
        self.buffers.read().get(symbol).map(|b| b.trades.len()).unwrap_or(0)
    }

    pub fn clear(&self, symbol: Option<&str>) {
        let mut buffers = self.buffers.write();
        match symbol {
            Some(sym) => {
                buffers.remove(sym);
            }
            None => {
                buffers.clear();
                *self.stats.write() = CacheStats::default();
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;

    fn trade(price: f64, volume: u64, t: SystemTime) -> Trade {
        Trade::new("X", price, volume, Side::Buy, t, "t")
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let cache = TradeCache::new(3);
        let base = SystemTime::UNIX_EPOCH;
        for i in 0..5u64 {
            cache.append_batch("X", [trade(100.0 + i as f64, 1, base + Duration::from_secs(i))]);
        }
        assert_eq!(cache.size("X"), 3);
        let recent = cache.all("X");
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].price, 102.0);
        assert!(cache.stats().evictions >= 2);
    }

    #[test]
    fn window_stops_at_first_out_of_range() {
        let cache = TradeCache::new(100);
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        for i in 0..10u64 {
            cache.append_batch("X", [trade(100.0, 1, base + Duration::from_secs(i))]);
        }
        let now = base + Duration::from_secs(9);
        let recent = cache.window("X", Duration::from_secs(3), now);
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn recent_never_aliases() {
        let cache = TradeCache::new(10);
        cache.append_batch("X", [trade(1.0, 1, SystemTime::UNIX_EPOCH)]);
        let mut a = cache.recent("X", 1);
        a[0].price = 999.0;
        let b = cache.recent("X", 1);
        assert_eq!(b[0].price, 1.0);
    }
}
