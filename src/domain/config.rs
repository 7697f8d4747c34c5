//! Typed pipeline configuration, read from a [`ConfigPort`] and validated.
//!
//! Sections and defaults:
//!
//! ```ini
//! [indicators]
//! sma_short = 20
//! sma_medium = 50
//! sma_long = 200
//! atr_period = 14
//! volume_period = 20
//! high_volume_threshold = 3.0
//!
//! [stage]
//! ma_period = 30
//! slope_lookback = 4
//! confirmation_periods = 2
//! price_band_pct = 2.0
//! slope_band_pct = 0.5
//!
//! [pipeline]
//! history_buffer = 200
//! batch_size = 250
//! parallel = true
//! ```

use crate::domain::error::StagewiseError;
use crate::domain::indicator::IndicatorConfig;
use crate::domain::stage::StageConfig;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub indicators: IndicatorConfig,
    pub stage: StageConfig,
    /// Trailing adjusted daily rows prepended per ticker on an incremental run.
    pub history_buffer: usize,
    pub batch_size: usize,
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let indicators = IndicatorConfig::default();
        Self {
            history_buffer: indicators.required_history(),
            indicators,
            stage: StageConfig::default(),
            batch_size: 250,
            parallel: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_port(config: &dyn ConfigPort) -> Result<Self, StagewiseError> {
        let defaults = PipelineConfig::default();

        let indicators = IndicatorConfig {
            sma_short: get_window(config, "indicators", "sma_short", defaults.indicators.sma_short)?,
            sma_medium: get_window(config, "indicators", "sma_medium", defaults.indicators.sma_medium)?,
            sma_long: get_window(config, "indicators", "sma_long", defaults.indicators.sma_long)?,
            atr_period: get_window(config, "indicators", "atr_period", defaults.indicators.atr_period)?,
            volume_period: get_window(
                config,
                "indicators",
                "volume_period",
                defaults.indicators.volume_period,
            )?,
            high_volume_threshold: config.get_double(
                "indicators",
                "high_volume_threshold",
                defaults.indicators.high_volume_threshold,
            ),
        };

        let stage = StageConfig {
            ma_period: get_window(config, "stage", "ma_period", defaults.stage.ma_period)?,
            slope_lookback: get_window(config, "stage", "slope_lookback", defaults.stage.slope_lookback)?,
            confirmation_periods: get_window(
                config,
                "stage",
                "confirmation_periods",
                defaults.stage.confirmation_periods,
            )?,
            price_band_pct: config.get_double("stage", "price_band_pct", defaults.stage.price_band_pct),
            slope_band_pct: config.get_double("stage", "slope_band_pct", defaults.stage.slope_band_pct),
        };

        let parsed = PipelineConfig {
            history_buffer: get_window(config, "pipeline", "history_buffer", indicators.required_history())?,
            batch_size: get_window(config, "pipeline", "batch_size", defaults.batch_size)?,
            parallel: config.get_bool("pipeline", "parallel", defaults.parallel),
            indicators,
            stage,
        };

        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), StagewiseError> {
        let windows = [
            ("indicators", "sma_short", self.indicators.sma_short),
            ("indicators", "sma_medium", self.indicators.sma_medium),
            ("indicators", "sma_long", self.indicators.sma_long),
            ("indicators", "atr_period", self.indicators.atr_period),
            ("indicators", "volume_period", self.indicators.volume_period),
            ("stage", "ma_period", self.stage.ma_period),
            ("stage", "slope_lookback", self.stage.slope_lookback),
            ("stage", "confirmation_periods", self.stage.confirmation_periods),
            ("pipeline", "batch_size", self.batch_size),
        ];
        for (section, key, value) in windows {
            if value == 0 {
                return Err(StagewiseError::invalid(section, key, format!("{key} must be at least 1")));
            }
        }

        let threshold = self.indicators.high_volume_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(StagewiseError::invalid(
                "indicators",
                "high_volume_threshold",
                "high_volume_threshold must be positive",
            ));
        }

        for (key, value) in [
            ("price_band_pct", self.stage.price_band_pct),
            ("slope_band_pct", self.stage.slope_band_pct),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(StagewiseError::invalid("stage", key, format!("{key} must be non-negative")));
            }
        }

        let required = self.indicators.required_history();
        if self.history_buffer < required {
            return Err(StagewiseError::invalid(
                "pipeline",
                "history_buffer",
                format!("history_buffer must be at least {required} to seed every indicator window"),
            ));
        }

        Ok(())
    }
}

fn get_window(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, StagewiseError> {
    let value = config.get_int(section, key, default as i64);
    usize::try_from(value)
        .map_err(|_| StagewiseError::invalid(section, key, format!("{key} must not be negative")))
}
