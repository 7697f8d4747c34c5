//! Retroactive split adjustment.
//!
//! For ticker T at date D the adjustment factor is the product of
//! `split_from / split_to` over every split of T executed strictly after D.
//! Prices are multiplied by the factor; volume and transactions are divided
//! by it and rounded once, after all splits have been compounded.
//!
//! Example: a 2-for-1 split (`1/2`) executed on 2024-01-15 turns a raw close
//! of 100 on 2024-01-12 into 50, and leaves 2024-01-15 onwards untouched.

use crate::domain::bar::{AdjustedBar, Bar, SplitEvent};
use crate::domain::error::StagewiseError;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Validated split events, grouped by ticker and ordered by execution date.
#[derive(Debug, Clone, Default)]
pub struct SplitTable {
    by_ticker: HashMap<String, Vec<(NaiveDate, f64)>>,
}

impl SplitTable {
    /// Builds the table from the full split event list.
    ///
    /// Repeated events for the same (ticker, execution_date) collapse into one
    /// when their ratios agree; disagreeing ratios are rejected.
    pub fn new(events: &[SplitEvent]) -> Result<Self, StagewiseError> {
        let mut by_ticker: HashMap<String, Vec<(NaiveDate, f64)>> = HashMap::new();

        for event in events {
            let valid = |v: f64| v.is_finite() && v > 0.0;
            if !valid(event.split_from) || !valid(event.split_to) {
                return Err(StagewiseError::InvalidSplitRatio {
                    ticker: event.ticker.clone(),
                    date: event.execution_date,
                    split_from: event.split_from,
                    split_to: event.split_to,
                });
            }

            let entries = by_ticker.entry(event.ticker.clone()).or_default();
            let ratio = event.ratio();
            match entries.iter().find(|(d, _)| *d == event.execution_date) {
                Some((_, existing)) if (existing - ratio).abs() <= f64::EPSILON * existing.abs() => {
                    continue;
                }
                Some(_) => {
                    return Err(StagewiseError::SplitConflict {
                        ticker: event.ticker.clone(),
                        date: event.execution_date,
                    });
                }
                None => entries.push((event.execution_date, ratio)),
            }
        }

        for entries in by_ticker.values_mut() {
            entries.sort_by_key(|(d, _)| *d);
        }

        Ok(Self { by_ticker })
    }

    /// Number of distinct split events held.
    pub fn len(&self) -> usize {
        self.by_ticker.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative factor for `ticker` at `date`; 1.0 when no later split exists.
    pub fn factor(&self, ticker: &str, date: NaiveDate) -> f64 {
        self.by_ticker
            .get(ticker)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(execution_date, _)| *execution_date > date)
                    .map(|(_, ratio)| *ratio)
                    .product()
            })
            .unwrap_or(1.0)
    }

    pub fn adjust(&self, bar: &Bar) -> AdjustedBar {
        let factor = self.factor(&bar.ticker, bar.date);
        AdjustedBar {
            ticker: bar.ticker.clone(),
            date: bar.date,
            open: bar.open * factor,
            high: bar.high * factor,
            low: bar.low * factor,
            close: bar.close * factor,
            volume: (bar.volume as f64 / factor).round() as i64,
            transactions: (bar.transactions as f64 / factor).round() as i64,
        }
    }
}

/// Adjusts every bar; output order matches input order.
pub fn apply_splits(bars: &[Bar], splits: &SplitTable) -> Vec<AdjustedBar> {
    bars.iter().map(|bar| splits.adjust(bar)).collect()
}
