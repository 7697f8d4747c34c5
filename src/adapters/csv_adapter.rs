//! CSV file source for raw bars and split events.
//!
//! Bars file columns: `ticker,date,open,high,low,close,volume,transactions`.
//! Splits file columns: `ticker,execution_date,split_from,split_to`.
//! Both files have a header row. Dates are `%Y-%m-%d`.

use crate::domain::bar::{Bar, SplitEvent};
use crate::domain::error::StagewiseError;
use crate::ports::data_port::{BarSource, SplitSource};
use chrono::NaiveDate;
use csv::StringRecord;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub struct CsvAdapter {
    bars_path: PathBuf,
    splits_path: Option<PathBuf>,
}

impl CsvAdapter {
    /// Without a splits file the source reports no split events.
    pub fn new(bars_path: PathBuf, splits_path: Option<PathBuf>) -> Self {
        Self {
            bars_path,
            splits_path,
        }
    }

    fn read_records(path: &Path) -> Result<Vec<StringRecord>, StagewiseError> {
        let content = fs::read_to_string(path).map_err(|e| StagewiseError::Database {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes())
            .records()
            .map(|r| {
                r.map_err(|e| StagewiseError::Database {
                    reason: format!("CSV parse error in {}: {}", path.display(), e),
                })
            })
            .collect()
    }

    fn read_bars(&self) -> Result<Vec<Bar>, StagewiseError> {
        Self::read_records(&self.bars_path)?
            .iter()
            .map(|record| {
                Ok(Bar {
                    ticker: field::<String>(record, 0, "ticker")?,
                    date: date_field(record, 1, "date")?,
                    open: field(record, 2, "open")?,
                    high: field(record, 3, "high")?,
                    low: field(record, 4, "low")?,
                    close: field(record, 5, "close")?,
                    volume: field(record, 6, "volume")?,
                    transactions: field(record, 7, "transactions")?,
                })
            })
            .collect()
    }
}

fn field<T>(record: &StringRecord, index: usize, name: &str) -> Result<T, StagewiseError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    record
        .get(index)
        .ok_or_else(|| StagewiseError::Database {
            reason: format!("missing {name} column"),
        })?
        .parse()
        .map_err(|e| StagewiseError::Database {
            reason: format!("invalid {name} value: {e}"),
        })
}

fn date_field(record: &StringRecord, index: usize, name: &str) -> Result<NaiveDate, StagewiseError> {
    let raw: String = field(record, index, name)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| StagewiseError::Database {
        reason: format!("invalid {name} format: {e}"),
    })
}

impl BarSource for CsvAdapter {
    fn list_tickers(&self) -> Result<Vec<String>, StagewiseError> {
        let tickers: BTreeSet<String> = self.read_bars()?.into_iter().map(|b| b.ticker).collect();
        Ok(tickers.into_iter().collect())
    }

    fn fetch_bars(
        &self,
        tickers: Option<&[String]>,
        after: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StagewiseError> {
        let wanted: Option<BTreeSet<&str>> =
            tickers.map(|t| t.iter().map(String::as_str).collect());

        Ok(self
            .read_bars()?
            .into_iter()
            .filter(|b| wanted.as_ref().is_none_or(|w| w.contains(b.ticker.as_str())))
            .filter(|b| after.is_none_or(|a| b.date > a))
            .collect())
    }
}

impl SplitSource for CsvAdapter {
    fn fetch_splits(&self) -> Result<Vec<SplitEvent>, StagewiseError> {
        let Some(path) = &self.splits_path else {
            return Ok(Vec::new());
        };

        Self::read_records(path)?
            .iter()
            .map(|record| {
                Ok(SplitEvent {
                    ticker: field(record, 0, "ticker")?,
                    execution_date: date_field(record, 1, "execution_date")?,
                    split_from: field(record, 2, "split_from")?,
                    split_to: field(record, 3, "split_to")?,
                })
            })
            .collect()
    }
}
