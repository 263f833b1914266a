//! Ambient metrics tracker: rolling signal-approval deques, cumulative
//! counters, consecutive-loss streak and daily drawdown tracking. Feeds the
//! circuit breakers but is plain in-process state, not the out-of-scope
//! display.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

pub struct MetricsTracker {
    all_signals: VecDeque<SystemTime>,
    confluence_signals: VecDeque<SystemTime>,
    arbitrage_signals: VecDeque<SystemTime>,
    tape_signals: VecDeque<SystemTime>,
    consecutive_losses: u32,
    daily_pnl: f64,
    peak_pnl: f64,
    active_signals: HashMap<String, SystemTime>,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self {
            all_signals: VecDeque::with_capacity(500),
            confluence_signals: VecDeque::with_capacity(100),
            arbitrage_signals: VecDeque::with_capacity(200),
            tape_signals: VecDeque::with_capacity(300),
            consecutive_losses: 0,
            daily_pnl: 0.0,
            peak_pnl: 0.0,
            active_signals: HashMap::new(),
        }
    }
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_approval(&mut self, is_confluence: bool, now: SystemTime) {
        push_capped(&mut self.all_signals, now, 500);
        if is_confluence {
            push_capped(&mut self.confluence_signals, now, 100);
        } else {
            push_capped(&mut self.tape_signals, now, 300);
        }
        metrics::counter!("engine_signals_approved_total", 1);
    }

    pub fn count_since(&self, window: Duration, now: SystemTime) -> u32 {
        count_within(&self.all_signals, window, now)
    }

    pub fn confluence_count_since(&self, window: Duration, now: SystemTime) -> u32 {
        count_within(&self.confluence_signals, window, now)
    }

    pub fn record_active(&mut self, signal_id: impl Into<String>, now: SystemTime) {
        self.active_signals.insert(signal_id.into(), now);
    }

    pub fn active_count(&self) -> usize {
        self.active_signals.len()
    }

    pub fn clean_expired_active(&mut self, timeout: Duration, now: SystemTime) {
        self.active_signals.retain(|_, &mut t| crate::domain::elapsed_since(t, now) < timeout);
    }

    pub fn record_pnl(&mut self, pnl: f64) {
        self.daily_pnl += pnl;
        self.peak_pnl = self.peak_pnl.max(self.daily_pnl);
        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else if pnl > 0.0 {
            self.consecutive_losses = 0;
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn drawdown_percent(&self) -> f64 {
        if self.peak_pnl <= 0.0 {
            0.0
        } else {
            ((self.peak_pnl - self.daily_pnl) / self.peak_pnl * 100.0).max(0.0)
        }
    }

    /// Daily reset: clears PnL/peak/drawdown, prunes signal timestamps
    /// older than 24h, and clears active signals. Does not touch breakers
    /// (the risk manager resets only the `emergency` breaker separately).
    pub fn reset_daily(&mut self, now: SystemTime) {
        self.daily_pnl = 0.0;
        self.peak_pnl = 0.0;
        self.active_signals.clear();
        let cutoff = now.checked_sub(Duration::from_secs(86_400)).unwrap_or(SystemTime::UNIX_EPOCH);
        for deque in [&mut self.all_signals, &mut self.confluence_signals, &mut self.arbitrage_signals, &mut self.tape_signals] {
            deque.retain(|&t| t > cutoff);
        }
    }
}

fn push_capped(deque: &mut VecDeque<SystemTime>, value: SystemTime, cap: usize) {
    if deque.len() >= cap {
        deque.pop_front();
    }
    deque.push_back(value);
}

fn count_within(deque: &VecDeque<SystemTime>, window: Duration, now: SystemTime) -> u32 {
    let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
    deque.iter().rev().take_while(|&&t| t > cutoff).count() as u32
}
