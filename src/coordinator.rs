//! Main loop (§4.10): pulls snapshots from the provider, dedups and caches
//! trades, runs the full detector -> confirmation -> filter -> confluence ->
//! risk pipeline, and drives maintenance and daily reset on a schedule.

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::{error, info, warn};

use crate::cache::TradeCache;
use crate::config::EngineConfig;
use crate::confirmation::{ConfirmationOutcome, ConfirmationSystem};
use crate::confluence::ConfluenceMatrix;
use crate::correlator::{CorrelatorConfig, SignalCorrelator};
use crate::domain::{Candidate, MarketSnapshot, Signal, SignalLevel, SignalSource};
use crate::error::EngineError;
use crate::event_bus::{
    Event, EventBus, TOPIC_DAILY_RESET, TOPIC_MAINTENANCE_COMPLETED, TOPIC_MARKET_SNAPSHOT,
    TOPIC_PATTERN_DETECTED, TOPIC_SIGNAL_APPROVED, TOPIC_SIGNAL_GENERATED, TOPIC_SIGNAL_REJECTED,
    TOPIC_SYSTEM_ERROR,
};
use crate::filters::cooldown::CooldownFilter;
use crate::filters::defensive::DefensiveFilter;
use crate::filters::quality::QualityFilter;
use crate::patterns::absorption::AbsorptionDetector;
use crate::patterns::book_dynamics::BookDynamicsAnalyzer;
use crate::patterns::hidden_liquidity::HiddenLiquidityDetector;
use crate::patterns::iceberg::IcebergDetector;
use crate::patterns::institutional::InstitutionalDetector;
use crate::patterns::momentum::MomentumAnalyzer;
use crate::patterns::multiframe::MultiframeAnalyzer;
use crate::patterns::pace_anomaly::PaceAnomalyDetector;
use crate::patterns::pressure::PressureDetector;
use crate::patterns::traps::TrapDetector;
use crate::patterns::volume_spike::VolumeSpikeDetector;
use crate::provider::{CalculatedGridProvider, MarketProvider};
use crate::regime::RegimeDetector;
use crate::risk::RiskManager;
use crate::sink::{DisplaySink, PersistenceSink};
use crate::stats::cvd::CvdTracker;

struct InstrumentPipeline {
    absorption: AbsorptionDetector,
    iceberg: IcebergDetector,
    momentum: MomentumAnalyzer,
    pressure: PressureDetector,
    volume_spike: VolumeSpikeDetector,
    pace_anomaly: PaceAnomalyDetector,
    book_dynamics: BookDynamicsAnalyzer,
    institutional: InstitutionalDetector,
    hidden_liquidity: HiddenLiquidityDetector,
    multiframe: MultiframeAnalyzer,
    traps: TrapDetector,
    cvd: CvdTracker,
    seen_dedup_keys: HashSet<(String, String, u64)>,
}

impl InstrumentPipeline {
    fn new(config: &EngineConfig) -> Self {
        Self {
            absorption: AbsorptionDetector::new(config.absorption.clone()),
            iceberg: IcebergDetector::new(config.iceberg.clone()),
            momentum: MomentumAnalyzer::new(config.momentum.clone()),
            pressure: PressureDetector::new(config.pressure.clone()),
            volume_spike: VolumeSpikeDetector::new(config.volume_spike.clone()),
            pace_anomaly: PaceAnomalyDetector::new(
                config.pace.baseline_samples,
                config.pace.anomaly_stdev,
                config.pace.window_seconds,
            ),
            book_dynamics: BookDynamicsAnalyzer::new(config.book_dynamics.clone()),
            institutional: InstitutionalDetector::new(config.institutional.clone()),
            hidden_liquidity: HiddenLiquidityDetector::new(config.hidden_liquidity.clone()),
            multiframe: MultiframeAnalyzer::new(config.multiframe.clone()),
            traps: TrapDetector::new(config.trap_detection.clone()),
            cvd: CvdTracker::new(config.cvd.history_size, config.cvd.roc_period),
            seen_dedup_keys: HashSet::new(),
        }
    }
}

pub struct Coordinator {
    config: EngineConfig,
    bus: EventBus,
    cache: TradeCache,
    pipelines: HashMap<String, InstrumentPipeline>,
    confirmation: ConfirmationSystem,
    quality: QualityFilter,
    cooldown: CooldownFilter,
    defensive: DefensiveFilter,
    confluence: ConfluenceMatrix,
    risk: RiskManager,
    regime: RegimeDetector,
    correlator: SignalCorrelator,
    provider: Box<dyn MarketProvider>,
    grid_provider: Box<dyn CalculatedGridProvider>,
    persistence: Box<dyn PersistenceSink>,
    display: Box<dyn DisplaySink>,
    consecutive_errors: u32,
    last_error_at: Option<SystemTime>,
    iterations: u64,
    running: bool,
    last_regime_pair: Option<(crate::regime::MarketRegime, crate::regime::MarketRegime)>,
}

impl Coordinator {
    pub fn new(
        config: EngineConfig,
        provider: Box<dyn MarketProvider>,
        grid_provider: Box<dyn CalculatedGridProvider>,
        persistence: Box<dyn PersistenceSink>,
        display: Box<dyn DisplaySink>,
    ) -> Self {
        let pipelines = config
            .instruments
            .iter()
            .map(|i| (i.clone(), InstrumentPipeline::new(&config)))
            .collect();
        let cache = TradeCache::new(config.cache.buffer_size);
        let confirmation = ConfirmationSystem::new(config.pattern_confirmation.clone());
        let quality = QualityFilter::new(config.quality_filter.clone());
        let cooldown = CooldownFilter::new(config.cooldown.clone());
        let defensive = DefensiveFilter::new(config.manipulation_detection.clone());
        let confluence = ConfluenceMatrix::new(config.calculated_market.clone());
        let risk = RiskManager::new(config.risk_management.clone());
        let regime = RegimeDetector::new(config.regime.clone(), &config.instruments);
        let correlator = SignalCorrelator::new(CorrelatorConfig::default());

        Self {
            config,
            bus: EventBus::new(),
            cache,
            pipelines,
            confirmation,
            quality,
            cooldown,
            defensive,
            confluence,
            risk,
            regime,
            correlator,
            provider,
            grid_provider,
            persistence,
            display,
            consecutive_errors: 0,
            last_error_at: None,
            iterations: 0,
            running: false,
            last_regime_pair: None,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn run(&mut self) {
        self.running = true;
        if let Err(e) = self.provider.connect() {
            error!(error = %e, "provider connect failed");
        }

        while self.running {
            let now = SystemTime::now();
            match self.provider.poll() {
                Ok(Some(snapshot)) => {
                    self.consecutive_errors = 0;
                    self.process_snapshot(snapshot, now);
                }
                Ok(None) => {}
                Err(EngineError::OutOfMemory(reason)) => {
                    error!(reason, "out of memory, clearing caches and aborting");
                    self.cache.clear(None);
                    self.bus.publish(TOPIC_SYSTEM_ERROR, Event::Text("MEMORY_EMERGENCY".into()));
                    self.running = false;
                    continue;
                }
                Err(EngineError::Provider(reason)) => {
                    self.reconnect_with_backoff(&reason);
                }
                Err(err) => {
                    self.handle_generic_error(&err, now);
                }
            }

            self.iterations += 1;
            if self.iterations % self.config.loop_cfg.maintenance_interval_loops == 0 {
                self.run_maintenance(now);
            }
            if self.risk.maybe_daily_reset(now) {
                self.bus.publish(TOPIC_DAILY_RESET, Event::Text("daily reset".into()));
            }

            thread::sleep(Duration::from_secs_f64(self.config.loop_cfg.update_interval_secs));
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.provider.close();
    }

    fn reconnect_with_backoff(&mut self, reason: &str) {
        warn!(reason, "provider connection error, attempting reconnect");
        for delay in [1.0, 2.0, 4.0] {
            thread::sleep(Duration::from_secs_f64(delay));
            if self.provider.connect().unwrap_or(false) {
                info!("provider reconnected");
                return;
            }
        }
        error!("provider reconnect exhausted attempts");
        self.consecutive_errors += 1;
    }

    fn handle_generic_error(&mut self, err: &EngineError, now: SystemTime) {
        let stale = self
            .last_error_at
            .map(|t| crate::domain::elapsed_since(t, now) >= Duration::from_secs(300))
            .unwrap_or(true);
        if stale {
            self.consecutive_errors = 0;
        }
        self.consecutive_errors += 1;
        self.last_error_at = Some(now);
        let backoff = (self.config.loop_cfg.min_backoff_secs * 2f64.powi(self.consecutive_errors as i32 - 1))
            .clamp(self.config.loop_cfg.min_backoff_secs, self.config.loop_cfg.max_backoff_secs);
        error!(error = %err, backoff, consecutive = self.consecutive_errors, "loop error, backing off");
        thread::sleep(Duration::from_secs_f64(backoff));

        if self.consecutive_errors > self.config.loop_cfg.max_consecutive_errors {
            error!("consecutive error limit exceeded, stopping");
            self.bus.publish(TOPIC_SYSTEM_ERROR, Event::Text("SYSTEM_CRITICAL_FAILURE".into()));
            self.running = false;
        }
    }

    /// Periodic housekeeping: evicts stale risk-tracked active signals
    /// (the one cache whose entries carry an age past which they're
    /// meaningless to keep), then flushes persistence.
    fn run_maintenance(&mut self, now: SystemTime) {
        self.risk.clean_expired_active(now);
        if let Err(e) = self.persistence.flush() {
            error!(error = %e, "persistence flush failed during maintenance");
        }
        self.bus.publish(TOPIC_MAINTENANCE_COMPLETED, Event::Text(format!("iterations={}", self.iterations)));
    }

    fn process_snapshot(&mut self, snapshot: MarketSnapshot, now: SystemTime) {
        self.bus.publish(TOPIC_MARKET_SNAPSHOT, Event::Text(format!("t={:?}", snapshot.timestamp)));

        for instrument in self.config.instruments.clone() {
            let Some(data) = snapshot.data.get(&instrument) else { continue };
            let pipeline = self.pipelines.get_mut(&instrument).expect("pipeline per configured instrument");

            let mut fresh: Vec<crate::domain::Trade> = Vec::new();
            for trade in &data.trades {
                if pipeline.seen_dedup_keys.insert(trade.dedup_key()) {
                    fresh.push(trade.clone());
                }
            }
            if fresh.is_empty() {
                continue;
            }
            fresh.sort_by_key(|t| t.timestamp);
            self.cache.append_batch(&instrument, fresh.iter().cloned());
            for trade in &fresh {
                pipeline.cvd.record(trade);
                self.confirmation.observe_trade(&instrument, trade.price, trade.volume, trade.timestamp);
            }

            self.regime.ingest_trades(&instrument, &fresh);
            self.regime.update(&instrument, Some(&data.book), now, &self.bus);

            let recent = self.cache.recent(&instrument, 200);
            let last_20: Vec<_> = recent.iter().rev().take(20).rev().cloned().collect();
            let cvd_roc = pipeline.cvd.rate_of_change();

            let mut candidates = Vec::new();
            candidates.extend(pipeline.absorption.detect(&instrument, &recent));
            candidates.extend(pipeline.iceberg.detect(&instrument, &recent));
            candidates.extend(pipeline.momentum.detect(&instrument, &recent, cvd_roc));
            candidates.extend(pipeline.pressure.detect(&instrument, &last_20));
            candidates.extend(pipeline.volume_spike.detect(&instrument, &recent));
            candidates.extend(pipeline.pace_anomaly.detect(&instrument, now, &recent));
            candidates.extend(pipeline.book_dynamics.analyze(&instrument, &data.book, now));
            candidates.extend(pipeline.institutional.detect(&instrument, &recent));
            candidates.extend(pipeline.hidden_liquidity.detect(&instrument, &recent, &data.book));
            candidates.extend(pipeline.multiframe.update(&instrument, &recent, now));
            candidates.extend(pipeline.traps.detect(&instrument, &recent, Some(&data.book)));

            let book = data.book.clone();
            for candidate in candidates {
                self.bus.publish(TOPIC_PATTERN_DETECTED, Event::Candidate(std::sync::Arc::new(candidate.clone())));
                self.dispatch_candidate(candidate, now, cvd_roc, &book);
            }

            for (_, outcome) in self.confirmation.tick(now, cvd_roc) {
                if let ConfirmationOutcome::Confirmed(confirmed) = outcome {
                    self.emit_if_confluent(confirmed, now, cvd_roc, &book);
                } else if let ConfirmationOutcome::Manipulation(candidate) = outcome {
                    let signal = Signal::new(SignalSource::Manipulation, SignalLevel::Warning, format!("manipulation suspected: {}", candidate.pattern))
                        .with_detail("instrument", candidate.instrument.clone());
                    self.bus.publish(crate::event_bus::TOPIC_MANIPULATION_DETECTED, Event::Signal(std::sync::Arc::new(signal)));
                }
            }
        }

        self.refresh_cross_regime();
    }

    /// Recomputes the risk manager's adaptive factors whenever either
    /// instrument's regime has moved, using the other instrument's regime
    /// for the cross-symbol divergence adjustment.
    fn refresh_cross_regime(&mut self) {
        let [a, b] = match self.config.instruments.as_slice() {
            [a, b] => [a.clone(), b.clone()],
            _ => return,
        };
        let regime_a = self.regime.current_regime(&a);
        let regime_b = self.regime.current_regime(&b);
        if Some((regime_a, regime_b)) != self.last_regime_pair {
            self.risk.on_regime_change(regime_a.as_str(), regime_b.as_str());
            self.last_regime_pair = Some((regime_a, regime_b));
        }
    }

    /// Routes a candidate through confirmation (if its pattern requires
    /// one) or straight to the confluence/defensive/risk pipeline.
    pub fn dispatch_candidate(&mut self, candidate: Candidate, now: SystemTime, cvd_roc: f64, book: &crate::domain::OrderBook) {
        if self.confirmation.requires_confirmation(&candidate.pattern) {
            self.confirmation.register(candidate, now);
        } else {
            self.emit_if_confluent(candidate, now, cvd_roc, book);
        }
    }

    fn emit_if_confluent(&mut self, candidate: Candidate, now: SystemTime, cvd_roc: f64, book: &crate::domain::OrderBook) {
        let Some(grid) = self.grid_provider.grid_for(&candidate.instrument) else { return };

        if !self.cooldown.check_and_record(&candidate.instrument, &candidate.pattern, now) {
            return;
        }

        let (quality_score, passes_quality) = self.quality.evaluate(&candidate, self.risk.current_quality_threshold());
        if !passes_quality {
            self.bus.publish(TOPIC_SIGNAL_REJECTED, Event::Reject { instrument: candidate.instrument.clone(), reason: "quality_below_threshold".into() });
            return;
        }

        let Some(mut signal) = self.confluence.evaluate(&candidate, &grid, now) else { return };
        signal = signal.with_detail("instrument", candidate.instrument.clone());

        let verdict = self.defensive.check(book);
        if verdict.manipulated {
            let manipulation = Signal::new(
                SignalSource::Manipulation,
                SignalLevel::Warning,
                format!("manipulation detected: {}", verdict.types.join(",")),
            )
            .with_detail("instrument", candidate.instrument.clone())
            .with_detail("pattern", candidate.pattern.clone())
            .with_detail("types", verdict.types.join(","))
            .with_detail("side", verdict.side.unwrap_or("UNKNOWN"))
            .with_detail("confidence_penalty", verdict.confidence_penalty);
            self.bus.publish(crate::event_bus::TOPIC_MANIPULATION_DETECTED, Event::Signal(std::sync::Arc::new(manipulation)));
            return;
        }

        let hour = {
            let dt: chrono::DateTime<chrono::Utc> = now.into();
            use chrono::Timelike;
            dt.hour()
        };
        let assessment = self.risk.evaluate(&candidate, quality_score, true, now, cvd_roc, hour);
        if !assessment.approved {
            self.bus.publish(
                TOPIC_SIGNAL_REJECTED,
                Event::Reject { instrument: candidate.instrument.clone(), reason: assessment.reasons.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(",") },
            );
            return;
        }

        let signal_id = uuid::Uuid::new_v4().to_string();
        self.risk.record_approved(signal_id, true, now);

        self.display.add(&signal);
        if let Err(e) = self.persistence.save(&signal) {
            error!(error = %e, "failed to persist approved signal");
        }
        self.bus.publish(TOPIC_SIGNAL_APPROVED, Event::Signal(std::sync::Arc::new(signal.clone())));
        self.bus.publish(TOPIC_SIGNAL_GENERATED, Event::Signal(std::sync::Arc::new(signal.clone())));

        if let Some(composite) = self.correlator.observe(&signal, now) {
            self.display.add(&composite);
            if let Err(e) = self.persistence.save(&composite) {
                error!(error = %e, "failed to persist composite signal");
            }
        }
    }
}
