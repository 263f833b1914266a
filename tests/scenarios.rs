//! End-to-end scenario coverage across detector, confirmation, confluence,
//! filter and risk subsystems.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tape_confluence_engine::config::{CalculatedMarketConfig, CooldownConfig, EngineConfig, PressureConfig};
use tape_confluence_engine::confirmation::{ConfirmationOutcome, ConfirmationSystem};
use tape_confluence_engine::confluence::ConfluenceMatrix;
use tape_confluence_engine::coordinator::Coordinator;
use tape_confluence_engine::domain::{
    BookLevel, CalculatedGrid, CalculatedLevel, LevelType, MarketSnapshot, OrderBook, Side, Trade,
};
use tape_confluence_engine::error::EngineError;
use tape_confluence_engine::event_bus::{Event, TOPIC_MANIPULATION_DETECTED, TOPIC_SIGNAL_GENERATED};
use tape_confluence_engine::filters::CooldownFilter;
use tape_confluence_engine::patterns::absorption::AbsorptionDetector;
use tape_confluence_engine::patterns::hidden_liquidity::HiddenLiquidityDetector;
use tape_confluence_engine::patterns::pressure::PressureDetector;
use tape_confluence_engine::provider::{CalculatedGridProvider, MarketProvider};
use tape_confluence_engine::risk::circuit_breaker::CONSECUTIVE_LOSSES;
use tape_confluence_engine::risk::RiskManager;
use tape_confluence_engine::sink::{DisplaySink, PersistenceError, PersistenceSink};

fn grid_with_devendo() -> CalculatedGrid {
    CalculatedGrid {
        base: 5500.0,
        levels: vec![
            CalculatedLevel { name: "DEVENDO".into(), price: 5500.0, level_type: LevelType::Support, strength: 3 },
            CalculatedLevel { name: "SOFRER".into(), price: 5520.0, level_type: LevelType::Resistance, strength: 3 },
        ],
    }
}

// Outside all four PTAX windows so confidence bonuses don't perturb assertions.
fn off_hours(base: SystemTime) -> SystemTime {
    base + Duration::from_secs(3600 * 20)
}

#[test]
fn s1_absorption_confirmation_produces_buy_confluence() {
    let t0 = SystemTime::UNIX_EPOCH;

    // Sell-dominant trades absorbed at 5500.00 without the price moving.
    let mut recent = Vec::new();
    for _ in 0..5 {
        recent.push(Trade::new("X", 5500.0, 200, Side::Sell, t0, "t"));
    }
    recent.push(Trade::new("X", 5500.5, 200, Side::Buy, t0, "t"));

    let absorption = AbsorptionDetector::new(Default::default());
    let candidate = absorption.detect("X", &recent).expect("absorption candidate");
    assert_eq!(candidate.pattern, "ESCORA_DETECTADA");
    assert_eq!(candidate.direction, Some(Side::Buy));
    assert!(candidate.strength >= 7);

    let mut confirmation = ConfirmationSystem::new(Default::default());
    assert!(confirmation.requires_confirmation(&candidate.pattern));
    let id = confirmation.register(candidate.clone(), t0);

    // Two further trades retest the level within tolerance and volume floor.
    confirmation.observe_trade("X", 5500.0, 900, t0 + Duration::from_secs(1));
    confirmation.observe_trade("X", 5500.3, 950, t0 + Duration::from_secs(2));

    let resolved = confirmation.tick(t0 + Duration::from_secs(3), 0.0);
    let (resolved_id, outcome) = resolved.into_iter().find(|(i, _)| *i == id).expect("resolved entry");
    assert_eq!(resolved_id, id);
    let confirmed = match outcome {
        ConfirmationOutcome::Confirmed(c) => c,
        _ => panic!("expected confirmation"),
    };
    assert_eq!(confirmed.pattern, "ESCORA_DETECTADA_CONFIRMED");

    let matrix = ConfluenceMatrix::new(CalculatedMarketConfig::default());
    let signal = matrix.evaluate(&confirmed, &grid_with_devendo(), off_hours(t0)).expect("confluence signal");
    assert_eq!(signal.details.get("action").and_then(|v| v.as_str()), Some("BUY"));
    assert_eq!(signal.details.get("level").and_then(|v| v.as_str()), Some("DEVENDO"));
    let confidence = signal.details.get("confidence").and_then(|v| v.as_f64()).unwrap();
    assert!(confidence >= 0.85, "confidence {confidence} below 0.85");
}

#[test]
fn s2_cooldown_suppresses_repeat_emission_within_window() {
    let mut config = CooldownConfig::default();
    config.per_pattern.insert("PRESSAO_COMPRA".into(), 15);
    let mut cooldown = CooldownFilter::new(config);

    let t0 = SystemTime::UNIX_EPOCH;
    assert!(cooldown.check_and_record("X", "PRESSAO_COMPRA", t0));
    assert!(!cooldown.check_and_record("X", "PRESSAO_COMPRA", t0 + Duration::from_secs(10)));
    assert_eq!(cooldown.blocked_count("X", "PRESSAO_COMPRA"), 1);

    // Detector still fires both times; only the filter gates the second.
    let pressure = PressureDetector::new(PressureConfig::default());
    let mut trades = vec![Trade::new("X", 5500.0, 10, Side::Buy, t0, "t"); 18];
    trades.extend(vec![Trade::new("X", 5500.0, 10, Side::Sell, t0, "t"); 2]);
    let candidate = pressure.detect("X", &trades).expect("pressure candidate");
    assert_eq!(candidate.pattern, "PRESSAO_COMPRA");
}

struct NoopProvider;
impl MarketProvider for NoopProvider {
    fn connect(&mut self) -> Result<bool, EngineError> {
        Ok(true)
    }
    fn poll(&mut self) -> Result<Option<MarketSnapshot>, EngineError> {
        Ok(None)
    }
    fn close(&mut self) {}
}

struct SupportGridProvider;
impl CalculatedGridProvider for SupportGridProvider {
    fn grid_for(&self, _instrument: &str) -> Option<CalculatedGrid> {
        Some(CalculatedGrid {
            base: 5500.0,
            levels: vec![CalculatedLevel { name: "SX_SUP".into(), price: 5500.0, level_type: LevelType::Support, strength: 2 }],
        })
    }
}

struct NoopDisplay;
impl DisplaySink for NoopDisplay {
    fn add(&mut self, _signal: &tape_confluence_engine::domain::Signal) {}
}

struct NoopPersistence;
impl PersistenceSink for NoopPersistence {
    fn save(&mut self, _signal: &tape_confluence_engine::domain::Signal) -> Result<(), PersistenceError> {
        Ok(())
    }
    fn save_pattern(&mut self, _stream: &str, _record: &serde_json::Value) -> Result<(), PersistenceError> {
        Ok(())
    }
    fn flush(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[test]
fn s3_layering_drops_candidate_and_publishes_manipulation_detected() {
    let book = OrderBook {
        bids: vec![
            BookLevel { price: 100.0, volume: 250 },
            BookLevel { price: 99.5, volume: 255 },
            BookLevel { price: 99.0, volume: 248 },
            BookLevel { price: 98.5, volume: 252 },
            BookLevel { price: 98.0, volume: 251 },
        ],
        asks: vec![BookLevel { price: 101.0, volume: 10 }],
    };

    let mut coordinator = Coordinator::new(
        EngineConfig::default(),
        Box::new(NoopProvider),
        Box::new(SupportGridProvider),
        Box::new(NoopPersistence),
        Box::new(NoopDisplay),
    );

    let generated = Arc::new(Mutex::new(Vec::new()));
    let manipulated = Arc::new(Mutex::new(Vec::new()));
    let generated_handle = generated.clone();
    let manipulated_handle = manipulated.clone();
    coordinator.bus().subscribe(TOPIC_SIGNAL_GENERATED, move |event| {
        generated_handle.lock().unwrap().push(event.clone());
        Ok(())
    });
    coordinator.bus().subscribe(TOPIC_MANIPULATION_DETECTED, move |event| {
        manipulated_handle.lock().unwrap().push(event.clone());
        Ok(())
    });

    let t0 = SystemTime::UNIX_EPOCH;
    let pressure = PressureDetector::new(PressureConfig::default());
    let mut trades = vec![Trade::new("X", 5500.0, 50, Side::Buy, t0, "t"); 18];
    trades.extend(vec![Trade::new("X", 5500.0, 50, Side::Sell, t0, "t"); 2]);
    let candidate = pressure.detect("X", &trades).expect("pressure candidate");
    assert_eq!(candidate.pattern, "PRESSAO_COMPRA");

    coordinator.dispatch_candidate(candidate, t0, 0.0, &book);

    assert!(generated.lock().unwrap().is_empty(), "manipulated candidate must not reach SIGNAL_GENERATED");
    let events = manipulated.lock().unwrap();
    assert_eq!(events.len(), 1, "exactly one MANIPULATION_DETECTED expected");
    let Event::Signal(signal) = &events[0] else { panic!("expected a signal event") };
    assert_eq!(signal.details.get("types").and_then(|v| v.as_str()), Some("LAYERING"));
    assert_eq!(signal.details.get("side").and_then(|v| v.as_str()), Some("BID"));
}

#[test]
fn s4_circuit_breaker_trips_after_consecutive_losses() {
    let mut risk = RiskManager::new(Default::default());
    let t0 = SystemTime::UNIX_EPOCH;

    for i in 0..5 {
        risk.record_pnl(-200.0, t0 + Duration::from_secs(i));
    }
    assert!(risk.breaker_active(CONSECUTIVE_LOSSES));

    let candidate = tape_confluence_engine::domain::Candidate::new(
        "PRESSAO_COMPRA",
        "X",
        5500.0,
        200,
        t0,
        8,
    )
    .with_direction(Side::Buy);
    let assessment = risk.evaluate(&candidate, 0.9, false, t0 + Duration::from_secs(10), 0.0, 12);
    assert!(!assessment.approved);
    assert!(assessment
        .reasons
        .iter()
        .any(|r| r.to_string().contains("consecutive_losses")));
}

#[test]
fn s5_volatile_regime_tightens_frequency_and_quality() {
    let mut risk = RiskManager::new(Default::default());
    let base_threshold = risk.current_quality_threshold();

    risk.on_regime_change("VOLATILE", "VOLATILE");
    let tightened_threshold = risk.current_quality_threshold();
    assert!(tightened_threshold > base_threshold);
    assert!(tightened_threshold <= 0.9);

    // max_signals_per_minute drops to round(10 * 0.7) = 7; the 9th approval
    // attempt within the same minute is frequency-rejected (the gate is
    // `count > cap`, so exactly `cap + 1` approvals land before a reject).
    // Each iteration evicts its own active-signal entry past the (also
    // shrunk) VOLATILE signal timeout so the separate concurrency cap never
    // interferes with isolating the frequency gate.
    let t0 = SystemTime::UNIX_EPOCH;
    let candidate = tape_confluence_engine::domain::Candidate::new(
        "PRESSAO_COMPRA",
        "X",
        5500.0,
        200,
        t0,
        8,
    )
    .with_direction(Side::Buy);
    let timeout = risk.signal_timeout();

    for i in 0..8 {
        let now = t0 + Duration::from_secs(i);
        let assessment = risk.evaluate(&candidate, 0.95, false, now, 0.0, 12);
        assert!(assessment.approved, "approval {i} unexpectedly rejected: {:?}", assessment.reasons);
        risk.record_approved(format!("sig-{i}"), false, now);
        risk.clean_expired_active(now + timeout + Duration::from_secs(1));
    }
    let ninth = risk.evaluate(&candidate, 0.95, false, t0 + Duration::from_secs(8), 0.0, 12);
    assert!(!ninth.approved);
    assert!(ninth
        .reasons
        .iter()
        .any(|r| matches!(r, tape_confluence_engine::error::RejectReason::FrequencyLimit(_))));
}

#[test]
fn s6_hidden_liquidity_consolidates_excess_and_reload_methods() {
    let mut detector = HiddenLiquidityDetector::new(Default::default());
    let t0 = SystemTime::UNIX_EPOCH;

    // Six trades at one price bucket totalling 1200 against 400 resting
    // (ratio 3.0, well past the 1.5x excess-execution floor), spaced 800ms
    // apart so every consecutive pair also lands inside the 2s reload
    // window.
    let mut trades = Vec::new();
    for i in 0..6u64 {
        trades.push(Trade::new("X", 5500.0, 200, Side::Buy, t0 + Duration::from_millis(i * 800), "t"));
    }

    let book = OrderBook {
        bids: vec![BookLevel { price: 5500.0, volume: 400 }],
        asks: vec![BookLevel { price: 5500.5, volume: 50 }],
    };

    let candidate = detector.detect("X", &trades, &book).expect("hidden liquidity candidate");
    assert_eq!(candidate.pattern, "HIDDEN_LIQUIDITY");
    let methods = candidate.fields.get("methods").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    assert!(methods.contains("RELOAD_PATTERN"), "methods: {methods}");
    assert!(methods.contains("EXCESS_EXECUTION"), "methods: {methods}");
    let confidence = candidate.fields.get("confidence").and_then(|v| v.as_f64()).unwrap_or_default();
    assert!(confidence >= 0.7, "confidence {confidence}");
    let hidden_volume = candidate.fields.get("estimated_hidden_volume").and_then(|v| v.as_f64()).unwrap_or_default();
    assert!(hidden_volume >= 600.0, "estimated_hidden_volume {hidden_volume}");
}
