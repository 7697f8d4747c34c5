//! Per-ticker partitioning of bar rows.
//!
//! Every downstream component works on one ticker's rows at a time, sorted
//! by date with no duplicates. This module produces those partitions and
//! checks the ordering contract.

use crate::domain::bar::AdjustedBar;
use crate::domain::error::StagewiseError;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct TickerSeries {
    pub ticker: String,
    pub bars: Vec<AdjustedBar>,
}

impl TickerSeries {
    /// Wraps rows already known to belong to `ticker`, checking their order.
    pub fn new(ticker: String, bars: Vec<AdjustedBar>) -> Result<Self, StagewiseError> {
        ensure_strictly_increasing(&ticker, &bars)?;
        Ok(Self { ticker, bars })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Groups rows by ticker (tickers in lexical order) and sorts each group by
/// date. Two rows for the same (ticker, date) are an error.
pub fn partition_by_ticker(bars: Vec<AdjustedBar>) -> Result<Vec<TickerSeries>, StagewiseError> {
    let mut groups: BTreeMap<String, Vec<AdjustedBar>> = BTreeMap::new();
    for bar in bars {
        groups.entry(bar.ticker.clone()).or_default().push(bar);
    }

    groups
        .into_iter()
        .map(|(ticker, mut rows)| {
            rows.sort_by_key(|b| b.date);
            TickerSeries::new(ticker, rows)
        })
        .collect()
}

/// Rejects rows that are out of date order, duplicated, or from another ticker.
pub fn ensure_strictly_increasing(
    ticker: &str,
    bars: &[AdjustedBar],
) -> Result<(), StagewiseError> {
    for (i, bar) in bars.iter().enumerate() {
        let out_of_order = i > 0 && bar.date <= bars[i - 1].date;
        if out_of_order || bar.ticker != ticker {
            return Err(StagewiseError::UnsortedSeries {
                ticker: ticker.to_string(),
                date: bar.date,
            });
        }
    }
    Ok(())
}
