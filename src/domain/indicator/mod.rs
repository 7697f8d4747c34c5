//! Rolling indicators over adjusted bars.
//!
//! Every value is causal (depends only on rows at or before its date) and
//! computed per ticker. Missing history produces `None`, never an error.
//!
//! - `sma`: moving averages of close
//! - `atr`: true range and its trailing mean
//! - `volume`: volume average, surge ratio and high-volume flag

pub mod atr;
pub mod sma;
pub mod volume;

use crate::domain::series::TickerSeries;
use crate::domain::timeframe::Timeframe;
use chrono::NaiveDate;

/// Window lengths and thresholds for the indicator set.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    pub sma_short: usize,
    pub sma_medium: usize,
    pub sma_long: usize,
    pub atr_period: usize,
    pub volume_period: usize,
    pub high_volume_threshold: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_short: 20,
            sma_medium: 50,
            sma_long: 200,
            atr_period: 14,
            volume_period: 20,
            high_volume_threshold: 3.0,
        }
    }
}

impl IndicatorConfig {
    /// Bars of prior history needed before every indicator is defined.
    /// ATR needs one extra bar for the first previous close.
    pub fn required_history(&self) -> usize {
        [
            self.sma_short,
            self.sma_medium,
            self.sma_long,
            self.volume_period,
            self.atr_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// One indicator row, 1:1 with an adjusted bar of the same timeframe.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    pub ticker: String,
    pub date: NaiveDate,
    pub timeframe: Timeframe,
    pub sma_short: Option<f64>,
    pub sma_medium: Option<f64>,
    pub sma_long: Option<f64>,
    pub atr: Option<f64>,
    pub volume_ma: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub is_high_volume: bool,
}

pub fn compute_indicators(
    series: &TickerSeries,
    timeframe: Timeframe,
    config: &IndicatorConfig,
) -> Vec<IndicatorRow> {
    let bars = &series.bars;
    let sma_short = sma::calc_sma(bars, config.sma_short);
    let sma_medium = sma::calc_sma(bars, config.sma_medium);
    let sma_long = sma::calc_sma(bars, config.sma_long);
    let atr = atr::calc_atr(bars, config.atr_period);
    let surge =
        volume::calc_volume_surge(bars, config.volume_period, config.high_volume_threshold);

    bars.iter()
        .enumerate()
        .map(|(i, bar)| IndicatorRow {
            ticker: series.ticker.clone(),
            date: bar.date,
            timeframe,
            sma_short: sma_short[i],
            sma_medium: sma_medium[i],
            sma_long: sma_long[i],
            atr: atr[i],
            volume_ma: surge[i].average,
            volume_ratio: surge[i].ratio,
            is_high_volume: surge[i].high_volume,
        })
        .collect()
}
