//! Engine configuration: every knob listed in the configuration surface,
//! loaded from a TOML file with environment-variable overrides layered on
//! top, same as `Config::from_env` elsewhere in this stack.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub buffer_size: usize,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self { buffer_size: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub update_interval_secs: f64,
    pub maintenance_interval_loops: u64,
    pub min_backoff_secs: f64,
    pub max_backoff_secs: f64,
    pub max_consecutive_errors: u32,
    pub daily_reset_time: String,
}
impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 0.1,
            maintenance_interval_loops: 600,
            min_backoff_secs: 1.0,
            max_backoff_secs: 4.0,
            max_consecutive_errors: 5,
            daily_reset_time: "00:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CvdConfig {
    pub history_size: usize,
    pub roc_period: usize,
}
impl Default for CvdConfig {
    fn default() -> Self {
        Self { history_size: 5000, roc_period: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaceConfig {
    pub baseline_samples: usize,
    pub anomaly_stdev: f64,
    pub window_seconds: u64,
}
impl Default for PaceConfig {
    fn default() -> Self {
        Self { baseline_samples: 100, anomaly_stdev: 2.0, window_seconds: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsorptionConfig {
    pub concentration_threshold: f64,
    pub min_volume_threshold: u64,
    pub exhaustion_volume: u64,
}
impl Default for AbsorptionConfig {
    fn default() -> Self {
        Self { concentration_threshold: 0.40, min_volume_threshold: 282, exhaustion_volume: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcebergConfig {
    pub repetitions: u32,
    pub min_volume: u64,
}
impl Default for IcebergConfig {
    fn default() -> Self {
        Self { repetitions: 4, min_volume: 59 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub divergence_threshold: f64,
    /// Binding default per spec.md (the upstream Python class default of
    /// 100 is superseded by the runtime config value, the same resolution
    /// already applied to the quality filter's min_quality_score).
    pub extreme_threshold: f64,
}
impl Default for MomentumConfig {
    fn default() -> Self {
        Self { divergence_threshold: 50.0, extreme_threshold: 250.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    pub threshold: f64,
    pub min_volume: u64,
}
impl Default for PressureConfig {
    fn default() -> Self {
        Self { threshold: 0.75, min_volume: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSpikeConfig {
    pub spike_multiplier: f64,
    pub history_size: usize,
    pub baseline_window: usize,
}
impl Default for VolumeSpikeConfig {
    fn default() -> Self {
        Self { spike_multiplier: 3.0, history_size: 100, baseline_window: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookDynamicsConfig {
    pub pulling_threshold: f64,
    pub stacking_threshold: f64,
    pub flash_order_seconds: u64,
    pub imbalance_shift_threshold: f64,
    pub snapshot_history: usize,
}
impl Default for BookDynamicsConfig {
    fn default() -> Self {
        Self {
            pulling_threshold: 0.5,
            stacking_threshold: 2.0,
            flash_order_seconds: 2,
            imbalance_shift_threshold: 0.3,
            snapshot_history: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstitutionalConfig {
    pub min_trades: usize,
    pub iceberg_size_tolerance: f64,
    pub rhythm_threshold: f64,
    pub institutional_volume_pct: f64,
    pub time_window_seconds: u64,
    pub common_iceberg_sizes: Vec<u64>,
    pub score_threshold: f64,
}
impl Default for InstitutionalConfig {
    fn default() -> Self {
        Self {
            min_trades: 50,
            iceberg_size_tolerance: 0.1,
            rhythm_threshold: 0.7,
            institutional_volume_pct: 0.3,
            time_window_seconds: 300,
            common_iceberg_sizes: vec![10, 20, 25, 50, 100, 200, 250, 500, 1000],
            score_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiddenLiquidityConfig {
    pub min_excess_ratio: f64,
    pub reload_time_seconds: u64,
    pub level_tolerance: f64,
    pub min_hidden_volume: u64,
}
impl Default for HiddenLiquidityConfig {
    fn default() -> Self {
        Self { min_excess_ratio: 1.5, reload_time_seconds: 2, level_tolerance: 0.5, min_hidden_volume: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiframeConfig {
    pub micro_seconds: u64,
    pub short_seconds: u64,
    pub medium_seconds: u64,
    pub long_seconds: u64,
    pub divergence_threshold: f64,
    pub confluence_threshold: f64,
}
impl Default for MultiframeConfig {
    fn default() -> Self {
        Self {
            micro_seconds: 60,
            short_seconds: 300,
            medium_seconds: 900,
            long_seconds: 1800,
            divergence_threshold: 0.3,
            confluence_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapDetectionConfig {
    pub breakout_threshold: f64,
    pub reversal_threshold: f64,
    pub volume_spike_multiplier: f64,
    pub stop_hunt_range: f64,
    pub trap_time_window_seconds: u64,
}
impl Default for TrapDetectionConfig {
    fn default() -> Self {
        Self {
            breakout_threshold: 0.002,
            reversal_threshold: 0.7,
            volume_spike_multiplier: 3.0,
            stop_hunt_range: 0.003,
            trap_time_window_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfirmationConfig {
    pub enabled: bool,
    pub max_pending: usize,
    pub default_timeout_seconds: u64,
    pub check_interval_seconds: u64,
    pub patterns: Vec<String>,
}
impl Default for PatternConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pending: 200,
            default_timeout_seconds: 30,
            check_interval_seconds: 1,
            patterns: vec![
                "ESCORA_DETECTADA".into(),
                "DIVERGENCIA_ALTA".into(),
                "DIVERGENCIA_BAIXA".into(),
                "MOMENTUM_EXTREMO".into(),
                "INSTITUTIONAL_FOOTPRINT".into(),
                "HIDDEN_LIQUIDITY".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManipulationDetectionConfig {
    pub layering_min_levels: u32,
    pub layering_min_volume: u64,
    pub layering_deviation_pct: f64,
    pub layering_confidence_penalty: f64,
    pub spoofing_ratio_threshold: f64,
    pub spoofing_confidence_penalty: f64,
}
impl Default for ManipulationDetectionConfig {
    fn default() -> Self {
        Self {
            layering_min_levels: 4,
            layering_min_volume: 50,
            layering_deviation_pct: 0.10,
            layering_confidence_penalty: 0.4,
            spoofing_ratio_threshold: 5.0,
            spoofing_confidence_penalty: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatedMarketConfig {
    pub cupom_cambial: f64,
    pub volatilidade_unidade: f64,
    pub tolerancia_proximidade: f64,
    pub multiplicadores: HashMap<String, f64>,
    pub janelas_ptax: Vec<(String, String)>,
    pub extreme_force_threshold: u8,
    pub minimum_force: u8,
    pub minimum_confidence: f64,
    pub ptax_confidence_bonus: f64,
    pub ptax_confidence_cap: f64,
    pub stop_target_margin: f64,
    pub stop_target_fallback: f64,
}
impl Default for CalculatedMarketConfig {
    fn default() -> Self {
        let mut multiplicadores = HashMap::new();
        for (name, mult) in [
            ("SOFRER_2X", 1.60),
            ("SOFRER", 1.25),
            ("SX_SUP", 0.80),
            ("DEFENDO", 0.45),
            ("BASE", 0.00),
            ("PB", -0.45),
            ("SX", -0.80),
            ("DEVENDO", -1.25),
            ("SOFGRE", -1.60),
        ] {
            multiplicadores.insert(name.to_string(), mult);
        }
        Self {
            cupom_cambial: 25.0,
            volatilidade_unidade: 12.5,
            tolerancia_proximidade: 3.0,
            multiplicadores,
            janelas_ptax: vec![
                ("10:00".into(), "10:10".into()),
                ("11:00".into(), "11:10".into()),
                ("12:00".into(), "12:10".into()),
                ("13:00".into(), "13:10".into()),
            ],
            extreme_force_threshold: 9,
            minimum_force: 7,
            minimum_confidence: 0.65,
            ptax_confidence_bonus: 0.10,
            ptax_confidence_cap: 0.95,
            stop_target_margin: 5.0,
            stop_target_fallback: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskManagementConfig {
    pub max_signals_per_minute: u32,
    pub max_signals_per_hour: u32,
    pub max_confluence_per_hour: u32,
    pub max_concurrent_signals: u32,
    pub signal_timeout_seconds: u64,
    pub signal_quality_threshold: f64,
    pub consecutive_losses_limit: u32,
    pub max_drawdown_percent: f64,
    pub emergency_stop_loss: f64,
    pub circuit_breaker_cooldown_seconds: u64,
    pub exposure_cooldown_seconds: u64,
}
impl Default for RiskManagementConfig {
    fn default() -> Self {
        Self {
            max_signals_per_minute: 10,
            max_signals_per_hour: 100,
            max_confluence_per_hour: 20,
            max_concurrent_signals: 5,
            signal_timeout_seconds: 60,
            signal_quality_threshold: 0.35,
            consecutive_losses_limit: 5,
            max_drawdown_percent: 2.0,
            emergency_stop_loss: -1000.0,
            circuit_breaker_cooldown_seconds: 300,
            exposure_cooldown_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityFilterConfig {
    pub min_quality_score: f64,
    pub weights: HashMap<String, f64>,
}
impl Default for QualityFilterConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        for (k, v) in [
            ("PRESSAO_COMPRA", 2.0),
            ("PRESSAO_VENDA", 2.0),
            ("ESCORA_DETECTADA", 3.0),
            ("MOMENTUM_EXTREMO", 2.5),
            ("DIVERGENCIA_ALTA", 2.5),
            ("DIVERGENCIA_BAIXA", 2.5),
            ("ICEBERG_BUY", 2.0),
            ("ICEBERG_SELL", 2.0),
            ("VOLUME_SPIKE", 1.5),
            ("PACE_ANOMALY", 1.0),
        ] {
            weights.insert(k.to_string(), v);
        }
        Self { min_quality_score: 0.35, weights }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub default_seconds: u64,
    pub per_pattern: HashMap<String, u64>,
}
impl Default for CooldownConfig {
    fn default() -> Self {
        Self { default_seconds: 30, per_pattern: HashMap::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub lookback_period: usize,
    pub update_interval_seconds: u64,
}
impl Default for RegimeConfig {
    fn default() -> Self {
        Self { lookback_period: 300, update_interval_seconds: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub instruments: Vec<String>,
    pub cache: CacheConfig,
    pub loop_cfg: LoopConfig,
    pub cvd: CvdConfig,
    pub pace: PaceConfig,
    pub absorption: AbsorptionConfig,
    pub iceberg: IcebergConfig,
    pub momentum: MomentumConfig,
    pub pressure: PressureConfig,
    pub volume_spike: VolumeSpikeConfig,
    pub book_dynamics: BookDynamicsConfig,
    pub institutional: InstitutionalConfig,
    pub hidden_liquidity: HiddenLiquidityConfig,
    pub multiframe: MultiframeConfig,
    pub trap_detection: TrapDetectionConfig,
    pub pattern_confirmation: PatternConfirmationConfig,
    pub manipulation_detection: ManipulationDetectionConfig,
    pub calculated_market: CalculatedMarketConfig,
    pub risk_management: RiskManagementConfig,
    pub quality_filter: QualityFilterConfig,
    pub cooldown: CooldownConfig,
    pub regime: RegimeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: vec!["X".to_string(), "Y".to_string()],
            cache: CacheConfig::default(),
            loop_cfg: LoopConfig::default(),
            cvd: CvdConfig::default(),
            pace: PaceConfig::default(),
            absorption: AbsorptionConfig::default(),
            iceberg: IcebergConfig::default(),
            momentum: MomentumConfig::default(),
            pressure: PressureConfig::default(),
            volume_spike: VolumeSpikeConfig::default(),
            book_dynamics: BookDynamicsConfig::default(),
            institutional: InstitutionalConfig::default(),
            hidden_liquidity: HiddenLiquidityConfig::default(),
            multiframe: MultiframeConfig::default(),
            trap_detection: TrapDetectionConfig::default(),
            pattern_confirmation: PatternConfirmationConfig::default(),
            manipulation_detection: ManipulationDetectionConfig::default(),
            calculated_market: CalculatedMarketConfig::default(),
            risk_management: RiskManagementConfig::default(),
            quality_filter: QualityFilterConfig::default(),
            cooldown: CooldownConfig::default(),
            regime: RegimeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults for any missing
    /// section, then apply `.env`-sourced environment overrides for the
    /// handful of values operators commonly override per-deployment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| EngineError::Configuration(format!("reading {path:?}: {e}")))?;
            toml::from_str(&text)
                .map_err(|e| EngineError::Configuration(format!("parsing {path:?}: {e}")))?
        } else {
            Self::default()
        };

        dotenv::dotenv().ok();
        if let Ok(v) = std::env::var("ENGINE_UPDATE_INTERVAL_SECS") {
            cfg.loop_cfg.update_interval_secs = v
                .parse()
                .map_err(|_| EngineError::Configuration("ENGINE_UPDATE_INTERVAL_SECS must be a float".into()))?;
        }
        if let Ok(v) = std::env::var("ENGINE_QUALITY_THRESHOLD") {
            cfg.quality_filter.min_quality_score = v
                .parse()
                .map_err(|_| EngineError::Configuration("ENGINE_QUALITY_THRESHOLD must be a float".into()))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.instruments.len() != 2 {
            return Err(EngineError::Configuration(
                "engine requires exactly two correlated instruments".into(),
            ));
        }
        if self.cache.buffer_size == 0 {
            return Err(EngineError::Configuration("cache.buffer_size must be > 0".into()));
        }
        Ok(())
    }
}
