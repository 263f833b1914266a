//! Pattern confirmation system (§4.5): a bounded map of pending patterns
//! awaiting a follow-up check before being promoted to a real signal.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use crate::config::PatternConfirmationConfig;
use crate::domain::{Candidate, PendingPattern, Side};
use crate::patterns::{
    DIVERGENCIA_ALTA, DIVERGENCIA_BAIXA, ESCORA_DETECTADA, HIDDEN_LIQUIDITY, INSTITUTIONAL_FOOTPRINT,
    MOMENTUM_EXTREMO,
};

pub enum ConfirmationOutcome {
    /// Not yet resolved, still pending.
    Pending,
    /// Confirmed as a genuine signal.
    Confirmed(Candidate),
    /// Confirmation evidence instead points to manipulation.
    Manipulation(Candidate),
    /// Timed out without confirming; silently dropped.
    Expired,
}

struct Entry {
    pending: PendingPattern,
    subsequent_trades: Vec<(f64, u64)>,
    divergence_checks: u32,
    cvd_continuations: u32,
    institutional_seconds_above: f64,
    reload_count: u32,
}

pub struct ConfirmationSystem {
    config: PatternConfirmationConfig,
    order: VecDeque<u64>,
    pending: std::collections::HashMap<u64, Entry>,
    next_id: u64,
}

impl ConfirmationSystem {
    pub fn new(config: PatternConfirmationConfig) -> Self {
        Self { config, order: VecDeque::new(), pending: std::collections::HashMap::new(), next_id: 1 }
    }

    pub fn requires_confirmation(&self, pattern: &str) -> bool {
        self.config.enabled && self.config.patterns.iter().any(|p| p == pattern)
    }

    /// Register a freshly detected candidate that needs confirmation.
    /// Evicts the oldest pending entry if already at capacity.
    pub fn register(&mut self, candidate: Candidate, now: SystemTime) -> u64 {
        if self.order.len() >= self.config.max_pending {
            if let Some(oldest) = self.order.pop_front() {
                self.pending.remove(&oldest);
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        let pending = PendingPattern {
            id,
            pattern: candidate.pattern.clone(),
            instrument: candidate.instrument.clone(),
            candidate,
            created_at: now,
            expires_at: now + Duration::from_secs(self.config.default_timeout_seconds),
            criteria: Default::default(),
            attempts: 0,
            last_check: now,
        };
        self.order.push_back(id);
        self.pending.insert(
            id,
            Entry {
                pending,
                subsequent_trades: Vec::new(),
                divergence_checks: 0,
                cvd_continuations: 0,
                institutional_seconds_above: 0.0,
                reload_count: 0,
            },
        );
        id
    }

    /// Feed a new trade observed on the instrument to every pending entry
    /// for that instrument, and resolve confirmation/expiry.
    pub fn observe_trade(&mut self, instrument: &str, price: f64, volume: u64, now: SystemTime) {
        for entry in self.pending.values_mut() {
            if entry.pending.instrument == instrument {
                entry.subsequent_trades.push((price, volume));
            }
        }
        let _ = now;
    }

    /// Drive the confirmation check for every pending entry, returning
    /// resolved outcomes (confirmed, manipulation, or expired). Still-open
    /// entries remain pending.
    pub fn tick(&mut self, now: SystemTime, cvd_roc_last_50: f64) -> Vec<(u64, ConfirmationOutcome)> {
        let mut resolved = Vec::new();
        let ids: Vec<u64> = self.order.iter().copied().collect();

        for id in ids {
            let outcome = {
                let Some(entry) = self.pending.get_mut(&id) else { continue };
                entry.pending.attempts += 1;
                entry.pending.last_check = now;

                if entry.pending.is_expired(now) {
                    ConfirmationOutcome::Expired
                } else {
                    confirm_one(entry, cvd_roc_last_50)
                }
            };

            match outcome {
                ConfirmationOutcome::Pending => continue,
                other => {
                    if let Some(entry) = self.pending.remove(&id) {
                        self.order.retain(|&x| x != id);
                        let resolved_outcome = match other {
                            ConfirmationOutcome::Confirmed(_) => {
                                ConfirmationOutcome::Confirmed(confirmed_candidate(&entry.pending))
                            }
                            ConfirmationOutcome::Manipulation(_) => {
                                ConfirmationOutcome::Manipulation(entry.pending.candidate.clone())
                            }
                            ConfirmationOutcome::Expired => ConfirmationOutcome::Expired,
                            ConfirmationOutcome::Pending => unreachable!(),
                        };
                        resolved.push((id, resolved_outcome));
                    }
                }
            }
        }
        resolved
    }

    pub fn pending_count(&self) -> usize {
        self.order.len()
    }
}

fn confirmed_candidate(pending: &PendingPattern) -> Candidate {
    let mut c = pending.candidate.clone();
    c.pattern = format!("{}_CONFIRMED", c.pattern);
    c.fields.insert("confirmed".into(), true.into());
    c
}

fn confirm_one(entry: &mut Entry, cvd_roc_last_50: f64) -> ConfirmationOutcome {
    let pattern = entry.pending.pattern.as_str();
    let original_price = entry.pending.candidate.price;
    let original_volume = entry.pending.candidate.volume;

    match pattern {
        ESCORA_DETECTADA => {
            let matches = entry
                .subsequent_trades
                .iter()
                .filter(|(p, v)| (p - original_price).abs() <= 0.5 && *v as f64 >= 0.7 * original_volume as f64)
                .count();
            if matches >= 2 {
                ConfirmationOutcome::Confirmed(entry.pending.candidate.clone())
            } else {
                ConfirmationOutcome::Pending
            }
        }
        DIVERGENCIA_ALTA | DIVERGENCIA_BAIXA => {
            let expect_up = pattern == DIVERGENCIA_ALTA;
            let correct_side = entry.subsequent_trades.iter().all(|(p, _)| {
                if expect_up {
                    *p >= original_price * (1.0 - 0.001)
                } else {
                    *p <= original_price * (1.0 + 0.001)
                }
            });
            entry.divergence_checks += 1;
            if entry.divergence_checks >= 3 {
                if correct_side && !entry.subsequent_trades.is_empty() {
                    ConfirmationOutcome::Confirmed(entry.pending.candidate.clone())
                } else {
                    ConfirmationOutcome::Expired
                }
            } else {
                ConfirmationOutcome::Pending
            }
        }
        MOMENTUM_EXTREMO => {
            let expect_positive = entry.pending.candidate.direction == Some(Side::Buy);
            let continues = if expect_positive { cvd_roc_last_50 > 0.0 } else { cvd_roc_last_50 < 0.0 };
            if continues && cvd_roc_last_50.abs() >= 50.0 {
                entry.cvd_continuations += 1;
            }
            if entry.cvd_continuations >= 1 {
                ConfirmationOutcome::Confirmed(entry.pending.candidate.clone())
            } else {
                ConfirmationOutcome::Pending
            }
        }
        INSTITUTIONAL_FOOTPRINT => {
            entry.institutional_seconds_above += 1.0;
            if entry.institutional_seconds_above >= 30.0 {
                ConfirmationOutcome::Confirmed(entry.pending.candidate.clone())
            } else {
                ConfirmationOutcome::Pending
            }
        }
        HIDDEN_LIQUIDITY => {
            entry.reload_count += 1;
            if entry.reload_count >= 2 {
                ConfirmationOutcome::Confirmed(entry.pending.candidate.clone())
            } else {
                ConfirmationOutcome::Pending
            }
        }
        _ => ConfirmationOutcome::Confirmed(entry.pending.candidate.clone()),
    }
}
