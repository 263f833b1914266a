//! Core data entities shared by every subsystem: trades, the order book,
//! market snapshots, signals and the calculated price grid.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Aggressor side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
    Unknown,
}

/// A single executed trade. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub instrument: String,
    pub price: f64,
    pub volume: u64,
    pub side: Side,
    pub timestamp: SystemTime,
    /// Human-readable label used only for de-duplication across overlapping snapshots.
    pub time_label: String,
}

impl Trade {
    pub fn new(
        instrument: impl Into<String>,
        price: f64,
        volume: u64,
        side: Side,
        timestamp: SystemTime,
        time_label: impl Into<String>,
    ) -> Self {
        debug_assert!(price > 0.0, "trade price must be positive");
        debug_assert!(volume > 0, "trade volume must be positive");
        Self {
            instrument: instrument.into(),
            price,
            volume,
            side,
            timestamp,
            time_label: time_label.into(),
        }
    }

    /// Key used for de-duplicating trades seen in overlapping snapshot windows.
    pub fn dedup_key(&self) -> (String, String, u64) {
        (self.time_label.clone(), format!("{:.4}", self.price), self.volume)
    }
}

/// A resting order book level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub volume: u64,
}

/// A full order book snapshot: bids descending by price, asks ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> f64 {
        self.bids.first().map(|l| l.price).unwrap_or(0.0)
    }

    pub fn best_ask(&self) -> f64 {
        self.asks.first().map(|l| l.price).unwrap_or(0.0)
    }

    pub fn spread(&self) -> f64 {
        let (bid, ask) = (self.best_bid(), self.best_ask());
        if bid > 0.0 && ask > 0.0 {
            ask - bid
        } else {
            0.0
        }
    }

    pub fn total_bid_volume(&self) -> u64 {
        self.bids.iter().map(|l| l.volume).sum()
    }

    pub fn total_ask_volume(&self) -> u64 {
        self.asks.iter().map(|l| l.volume).sum()
    }
}

/// Aggregated market data for one instrument as of the latest snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentData {
    pub trades: Vec<Trade>,
    pub book: OrderBook,
    pub last_price: f64,
    pub cumulative_volume: u64,
}

/// Full market snapshot across both instruments, as handed in by the provider.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub timestamp: SystemTime,
    pub data: HashMap<String, InstrumentData>,
}

impl MarketSnapshot {
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentData> {
        self.data.get(symbol)
    }
}

/// Where a [`Signal`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalSource {
    TapeReading,
    Confluence,
    Manipulation,
    System,
}

/// Importance level attached to a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalLevel {
    Info,
    Warning,
    Alert,
}

/// An emitted trading signal. Immutable; the `details` map carries pattern-
/// specific and confluence-specific metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub source: SignalSource,
    pub level: SignalLevel,
    pub message: String,
    #[serde(with = "chrono_shim")]
    pub timestamp: SystemTime,
    pub details: HashMap<String, serde_json::Value>,
}

impl Signal {
    pub fn new(source: SignalSource, level: SignalLevel, message: impl Into<String>) -> Self {
        Self {
            source,
            level,
            message: message.into(),
            timestamp: SystemTime::now(),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

mod chrono_shim {
    use super::SystemTime;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let dt: chrono::DateTime<chrono::Utc> = (*t).into();
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        use serde::Deserialize;
        let s = String::deserialize(d)?;
        let dt = chrono::DateTime::parse_from_rfc3339(&s).map_err(serde::de::Error::custom)?;
        Ok(dt.into())
    }
}

/// Type of a calculated price level (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LevelType {
    Resistance,
    Support,
    Pivot,
}

/// A single named level in the calculated grid, read-only input to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedLevel {
    pub name: String,
    pub price: f64,
    pub level_type: LevelType,
    pub strength: u8,
}

/// The full calculated grid for one trading day: every named level plus the
/// fair-value base the levels were derived from.
#[derive(Debug, Clone, Default)]
pub struct CalculatedGrid {
    pub base: f64,
    pub levels: Vec<CalculatedLevel>,
}

impl CalculatedGrid {
    pub fn nearest(&self, price: f64) -> Option<(&CalculatedLevel, f64)> {
        self.levels
            .iter()
            .map(|l| (l, (l.price - price).abs()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn supports_below(&self, price: f64) -> impl Iterator<Item = &CalculatedLevel> {
        self.levels
            .iter()
            .filter(move |l| l.level_type == LevelType::Support && l.price < price)
    }

    pub fn resistances_above(&self, price: f64) -> impl Iterator<Item = &CalculatedLevel> {
        self.levels
            .iter()
            .filter(move |l| l.level_type == LevelType::Resistance && l.price > price)
    }
}

/// A pattern detector's output before confirmation/filtering. Each variant
/// carries only the fields that pattern actually produces; conversion to a
/// serializable form happens only at the persistence boundary.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub pattern: String,
    pub instrument: String,
    pub price: f64,
    pub volume: u64,
    pub timestamp: SystemTime,
    pub strength: u8,
    pub direction: Option<Side>,
    pub fields: HashMap<String, serde_json::Value>,
}

impl Candidate {
    pub fn new(
        pattern: impl Into<String>,
        instrument: impl Into<String>,
        price: f64,
        volume: u64,
        timestamp: SystemTime,
        strength: u8,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            instrument: instrument.into(),
            price,
            volume,
            timestamp,
            strength,
            direction: None,
            fields: HashMap::new(),
        }
    }

    pub fn with_direction(mut self, side: Side) -> Self {
        self.direction = Some(side);
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Strength bump rule shared by every detector (§4.4): base class plus
    /// volume-size bonus.
    pub fn strength_for(base_class: StrengthClass, volume: u64) -> u8 {
        let mut s = match base_class {
            StrengthClass::Strong => 8,
            StrengthClass::Medium => 7,
            StrengthClass::Weak => 5,
        };
        if volume > 2000 {
            s += 2;
        } else if volume > 1000 {
            s += 1;
        }
        s.min(10)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StrengthClass {
    Strong,
    Medium,
    Weak,
}

/// A pattern awaiting confirmation, owned exclusively by the confirmation system.
#[derive(Debug, Clone)]
pub struct PendingPattern {
    pub id: u64,
    pub pattern: String,
    pub instrument: String,
    pub candidate: Candidate,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub criteria: HashMap<String, serde_json::Value>,
    pub attempts: u32,
    pub last_check: SystemTime,
}

impl PendingPattern {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

pub fn elapsed_since(earlier: SystemTime, later: SystemTime) -> Duration {
    later.duration_since(earlier).unwrap_or_default()
}
