//! Collapses daily bars into weekly or monthly bars.
//!
//! open = first open, high = max high, low = min low, close = last close,
//! volume and transactions are summed. Each output row is labelled with the
//! first day of its bucket (see [`Timeframe::period_start`]).

use crate::domain::bar::AdjustedBar;
use crate::domain::error::StagewiseError;
use crate::domain::series::{ensure_strictly_increasing, TickerSeries};
use crate::domain::timeframe::Timeframe;

/// Aggregates one ticker's daily rows. Input must be strictly increasing by date.
pub fn aggregate(
    series: &TickerSeries,
    timeframe: Timeframe,
) -> Result<TickerSeries, StagewiseError> {
    ensure_strictly_increasing(&series.ticker, &series.bars)?;

    if timeframe == Timeframe::Daily {
        return Ok(series.clone());
    }

    let mut out: Vec<AdjustedBar> = Vec::new();
    for bar in &series.bars {
        let bucket = timeframe.period_start(bar.date);
        match out.last_mut() {
            Some(current) if current.date == bucket => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
                current.volume += bar.volume;
                current.transactions += bar.transactions;
            }
            _ => out.push(AdjustedBar {
                ticker: bar.ticker.clone(),
                date: bucket,
                ..bar.clone()
            }),
        }
    }

    Ok(TickerSeries {
        ticker: series.ticker.clone(),
        bars: out,
    })
}
