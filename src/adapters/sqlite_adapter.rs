//! SQLite adapter: raw inputs, derived tables and the watermark in one file.
//!
//! Raw inputs live in `raw_bars` and `splits`. Derived tables are
//! `adjusted_{daily,weekly,monthly}`, `indicators_{daily,weekly,monthly}`
//! and `stages`, all keyed by (ticker, date). The watermark is a single row
//! in `watermark` and the rebuild-pending marker a single row in `run_state`.
//! Dates are stored as `%Y-%m-%d` text.

use crate::domain::bar::{AdjustedBar, Bar, SplitEvent};
use crate::domain::error::StagewiseError;
use crate::domain::indicator::IndicatorRow;
use crate::domain::stage::StageRecord;
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::{BarSource, SplitSource};
use crate::ports::store_port::{DerivedStore, WatermarkStore, WriteMode};
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row, Transaction};

const DATE_FORMAT: &str = "%Y-%m-%d";

const BAR_COLUMNS: &str = "ticker TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    transactions INTEGER NOT NULL,
    PRIMARY KEY (ticker, date)";

const INDICATOR_COLUMNS: &str = "ticker TEXT NOT NULL,
    date TEXT NOT NULL,
    sma_short REAL,
    sma_medium REAL,
    sma_long REAL,
    atr REAL,
    volume_ma REAL,
    volume_ratio REAL,
    is_high_volume INTEGER NOT NULL,
    PRIMARY KEY (ticker, date)";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: r2d2::Error) -> StagewiseError {
    StagewiseError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> StagewiseError {
    StagewiseError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn date_column(row: &Row<'_>, index: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(index)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn bar_table(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Daily => "adjusted_daily",
        Timeframe::Weekly => "adjusted_weekly",
        Timeframe::Monthly => "adjusted_monthly",
    }
}

fn indicator_table(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Daily => "indicators_daily",
        Timeframe::Weekly => "indicators_weekly",
        Timeframe::Monthly => "indicators_monthly",
    }
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StagewiseError> {
        let db_path = config.require_string("sqlite", "path")?;

        let pool_size = config.get_int("sqlite", "pool_size", 4);
        let pool_size = u32::try_from(pool_size)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                StagewiseError::invalid("sqlite", "pool_size", "pool_size must be at least 1")
            })?;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, StagewiseError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StagewiseError> {
        self.pool.get().map_err(db_err)
    }

    pub fn initialize_schema(&self) -> Result<(), StagewiseError> {
        let conn = self.conn()?;

        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS raw_bars ({BAR_COLUMNS});
            CREATE INDEX IF NOT EXISTS idx_raw_bars_date ON raw_bars(date);
            CREATE TABLE IF NOT EXISTS splits (
                ticker TEXT NOT NULL,
                execution_date TEXT NOT NULL,
                split_from REAL NOT NULL,
                split_to REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS stages (
                ticker TEXT NOT NULL,
                date TEXT NOT NULL,
                ma REAL,
                price_vs_ma_pct REAL,
                ma_slope_pct REAL,
                raw_stage INTEGER,
                stage INTEGER NOT NULL,
                stage_changed INTEGER NOT NULL,
                weeks_in_stage INTEGER NOT NULL,
                PRIMARY KEY (ticker, date)
            );
            CREATE TABLE IF NOT EXISTS watermark (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_processed_date TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS run_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                rebuild_pending INTEGER NOT NULL
            );"
        );
        for tf in Timeframe::ALL {
            ddl.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({BAR_COLUMNS});
                CREATE TABLE IF NOT EXISTS {} ({INDICATOR_COLUMNS});",
                bar_table(tf),
                indicator_table(tf),
            ));
        }

        conn.execute_batch(&ddl).map_err(query_err)
    }

    /// Upserts raw bars.
    pub fn insert_bars(&self, bars: &[Bar]) -> Result<(), StagewiseError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO raw_bars
                 (ticker, date, open, high, low, close, volume, transactions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bar.ticker,
                    format_date(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.transactions
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    /// Replaces the split list wholesale.
    pub fn replace_splits(&self, splits: &[SplitEvent]) -> Result<(), StagewiseError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute("DELETE FROM splits", []).map_err(query_err)?;
        for split in splits {
            tx.execute(
                "INSERT INTO splits (ticker, execution_date, split_from, split_to)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    split.ticker,
                    format_date(split.execution_date),
                    split.split_from,
                    split.split_to
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    fn count_rows(&self, table: &str) -> Result<usize, StagewiseError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(query_err)?;
        Ok(count as usize)
    }

    /// Clears the table for an overwrite, then hands each row to `insert`.
    fn write_rows<T>(
        &self,
        table: &str,
        rows: &[T],
        mode: WriteMode,
        insert: impl Fn(&Transaction<'_>, &T) -> rusqlite::Result<usize>,
    ) -> Result<(), StagewiseError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        if mode == WriteMode::Overwrite {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .map_err(query_err)?;
        }
        for row in rows {
            insert(&tx, row).map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    fn query_bars(
        &self,
        table: &str,
        ticker: Option<&str>,
        after: Option<NaiveDate>,
    ) -> Result<Vec<AdjustedBar>, StagewiseError> {
        let conn = self.conn()?;
        let after = after.map(format_date).unwrap_or_default();

        let query = format!(
            "SELECT ticker, date, open, high, low, close, volume, transactions
             FROM {table}
             WHERE (?1 IS NULL OR ticker = ?1) AND date > ?2
             ORDER BY ticker ASC, date ASC"
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;

        let rows = stmt
            .query_map(params![ticker, after], |row| {
                Ok(AdjustedBar {
                    ticker: row.get(0)?,
                    date: date_column(row, 1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                    transactions: row.get(7)?,
                })
            })
            .map_err(query_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)
    }
}

impl BarSource for SqliteAdapter {
    fn list_tickers(&self) -> Result<Vec<String>, StagewiseError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT ticker FROM raw_bars ORDER BY ticker")
            .map_err(query_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_err)?;
        rows.collect::<rusqlite::Result<Vec<String>>>().map_err(query_err)
    }

    fn fetch_bars(
        &self,
        tickers: Option<&[String]>,
        after: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StagewiseError> {
        let rows = match tickers {
            None => self.query_bars("raw_bars", None, after)?,
            Some(tickers) => {
                let mut rows = Vec::new();
                for ticker in tickers {
                    rows.extend(self.query_bars("raw_bars", Some(ticker), after)?);
                }
                rows
            }
        };

        Ok(rows
            .into_iter()
            .map(|b| Bar {
                ticker: b.ticker,
                date: b.date,
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
                transactions: b.transactions,
            })
            .collect())
    }
}

impl SplitSource for SqliteAdapter {
    fn fetch_splits(&self) -> Result<Vec<SplitEvent>, StagewiseError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ticker, execution_date, split_from, split_to
                 FROM splits ORDER BY ticker, execution_date",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SplitEvent {
                    ticker: row.get(0)?,
                    execution_date: date_column(row, 1)?,
                    split_from: row.get(2)?,
                    split_to: row.get(3)?,
                })
            })
            .map_err(query_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(query_err)
    }
}

impl DerivedStore for SqliteAdapter {
    fn adjusted_row_count(&self, timeframe: Timeframe) -> Result<usize, StagewiseError> {
        self.count_rows(bar_table(timeframe))
    }

    fn read_adjusted(
        &self,
        timeframe: Timeframe,
        tickers: &[String],
    ) -> Result<Vec<AdjustedBar>, StagewiseError> {
        let mut sorted: Vec<&String> = tickers.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut rows = Vec::new();
        for ticker in sorted {
            rows.extend(self.query_bars(bar_table(timeframe), Some(ticker), None)?);
        }
        Ok(rows)
    }

    fn write_adjusted(
        &self,
        timeframe: Timeframe,
        rows: &[AdjustedBar],
        mode: WriteMode,
    ) -> Result<(), StagewiseError> {
        let sql = format!(
            "INSERT OR REPLACE INTO {}
             (ticker, date, open, high, low, close, volume, transactions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            bar_table(timeframe)
        );
        self.write_rows(bar_table(timeframe), rows, mode, |tx, bar| {
            tx.execute(
                &sql,
                params![
                    bar.ticker,
                    format_date(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.transactions
                ],
            )
        })
    }

    fn write_indicators(
        &self,
        timeframe: Timeframe,
        rows: &[IndicatorRow],
        mode: WriteMode,
    ) -> Result<(), StagewiseError> {
        let sql = format!(
            "INSERT OR REPLACE INTO {}
             (ticker, date, sma_short, sma_medium, sma_long, atr, volume_ma, volume_ratio, is_high_volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            indicator_table(timeframe)
        );
        self.write_rows(indicator_table(timeframe), rows, mode, |tx, row| {
            tx.execute(
                &sql,
                params![
                    row.ticker,
                    format_date(row.date),
                    row.sma_short,
                    row.sma_medium,
                    row.sma_long,
                    row.atr,
                    row.volume_ma,
                    row.volume_ratio,
                    row.is_high_volume
                ],
            )
        })
    }

    fn write_stages(&self, rows: &[StageRecord], mode: WriteMode) -> Result<(), StagewiseError> {
        self.write_rows("stages", rows, mode, |tx, rec| {
            tx.execute(
                "INSERT OR REPLACE INTO stages
                 (ticker, date, ma, price_vs_ma_pct, ma_slope_pct, raw_stage, stage, stage_changed, weeks_in_stage)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    rec.ticker,
                    format_date(rec.date),
                    rec.ma,
                    rec.price_vs_ma_pct,
                    rec.ma_slope_pct,
                    rec.raw_stage.map(|s| s.number()),
                    rec.stage.number(),
                    rec.stage_changed,
                    rec.weeks_in_stage
                ],
            )
        })
    }
}

impl WatermarkStore for SqliteAdapter {
    fn read_watermark(&self) -> Result<Option<NaiveDate>, StagewiseError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT last_processed_date FROM watermark WHERE id = 1")
            .map_err(query_err)?;
        let mut rows = stmt.query_map([], |row| date_column(row, 0)).map_err(query_err)?;
        rows.next().transpose().map_err(query_err)
    }

    fn write_watermark(&self, date: NaiveDate) -> Result<(), StagewiseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO watermark (id, last_processed_date) VALUES (1, ?1)",
            params![format_date(date)],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn read_rebuild_pending(&self) -> Result<bool, StagewiseError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT rebuild_pending FROM run_state WHERE id = 1")
            .map_err(query_err)?;
        let mut rows = stmt.query_map([], |row| row.get::<_, bool>(0)).map_err(query_err)?;
        Ok(rows.next().transpose().map_err(query_err)?.unwrap_or(false))
    }

    fn write_rebuild_pending(&self, pending: bool) -> Result<(), StagewiseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO run_state (id, rebuild_pending) VALUES (1, ?1)",
            params![pending],
        )
        .map_err(query_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stage::Stage;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        adapter
    }

    fn raw(ticker: &str, day: NaiveDate, close: f64) -> Bar {
        Bar {
            ticker: ticker.into(),
            date: day,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1_000,
            transactions: 25,
        }
    }

    fn adjusted(ticker: &str, day: NaiveDate, close: f64) -> AdjustedBar {
        let b = raw(ticker, day, close);
        AdjustedBar {
            ticker: b.ticker,
            date: b.date,
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
            transactions: b.transactions,
        }
    }

    #[test]
    fn from_config_missing_path() {
        match SqliteAdapter::from_config(&EmptyConfig) {
            Err(StagewiseError::ConfigMissing { section, key }) => {
                assert_eq!(section, "sqlite");
                assert_eq!(key, "path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let adapter = setup();
        adapter.initialize_schema().unwrap();
        for tf in Timeframe::ALL {
            assert_eq!(adapter.adjusted_row_count(tf).unwrap(), 0);
        }
    }

    #[test]
    fn raw_bars_filter_by_ticker_and_date() {
        let adapter = setup();
        adapter
            .insert_bars(&[
                raw("CBA", date(2024, 1, 2), 150.0),
                raw("BHP", date(2024, 1, 1), 100.0),
                raw("BHP", date(2024, 1, 2), 101.0),
            ])
            .unwrap();

        assert_eq!(adapter.list_tickers().unwrap(), vec!["BHP", "CBA"]);
        assert_eq!(adapter.fetch_bars(None, None).unwrap().len(), 3);

        let after = adapter.fetch_bars(None, Some(date(2024, 1, 1))).unwrap();
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|b| b.date == date(2024, 1, 2)));

        let bhp = adapter
            .fetch_bars(Some(&["BHP".to_string()]), None)
            .unwrap();
        assert_eq!(bhp.len(), 2);
        assert_eq!(bhp[1].close, 101.0);
        assert_eq!(bhp[1].transactions, 25);
    }

    #[test]
    fn splits_replaced_wholesale() {
        let adapter = setup();
        let split = |day| SplitEvent {
            ticker: "AAPL".into(),
            execution_date: day,
            split_from: 1.0,
            split_to: 4.0,
        };
        adapter.replace_splits(&[split(date(2020, 8, 31))]).unwrap();
        adapter
            .replace_splits(&[split(date(2014, 6, 9)), split(date(2020, 8, 31))])
            .unwrap();

        let splits = adapter.fetch_splits().unwrap();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].execution_date, date(2014, 6, 9));
        assert_eq!(splits[1].ratio(), 0.25);
    }

    #[test]
    fn overwrite_replaces_and_append_upserts() {
        let adapter = setup();
        let tf = Timeframe::Daily;
        adapter
            .write_adjusted(
                tf,
                &[adjusted("BHP", date(2024, 1, 1), 1.0), adjusted("BHP", date(2024, 1, 2), 2.0)],
                WriteMode::Overwrite,
            )
            .unwrap();
        adapter
            .write_adjusted(tf, &[adjusted("CBA", date(2024, 1, 1), 9.0)], WriteMode::Overwrite)
            .unwrap();
        assert_eq!(adapter.adjusted_row_count(tf).unwrap(), 1);

        adapter
            .write_adjusted(
                tf,
                &[adjusted("CBA", date(2024, 1, 1), 10.0), adjusted("CBA", date(2024, 1, 2), 11.0)],
                WriteMode::Append,
            )
            .unwrap();
        let rows = adapter.read_adjusted(tf, &["CBA".to_string()]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close, 10.0);
        assert_eq!(rows[1].close, 11.0);
    }

    #[test]
    fn read_adjusted_sorted_by_ticker_then_date() {
        let adapter = setup();
        adapter
            .write_adjusted(
                Timeframe::Weekly,
                &[
                    adjusted("RIO", date(2024, 1, 8), 3.0),
                    adjusted("BHP", date(2024, 1, 8), 2.0),
                    adjusted("BHP", date(2024, 1, 1), 1.0),
                ],
                WriteMode::Append,
            )
            .unwrap();

        let rows = adapter
            .read_adjusted(Timeframe::Weekly, &["RIO".to_string(), "BHP".to_string()])
            .unwrap();
        let keys: Vec<(&str, NaiveDate)> = rows.iter().map(|r| (r.ticker.as_str(), r.date)).collect();
        assert_eq!(
            keys,
            vec![
                ("BHP", date(2024, 1, 1)),
                ("BHP", date(2024, 1, 8)),
                ("RIO", date(2024, 1, 8))
            ]
        );
        assert!(adapter.read_adjusted(Timeframe::Daily, &["RIO".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn indicator_and_stage_rows_written() {
        let adapter = setup();
        let indicator = IndicatorRow {
            ticker: "BHP".into(),
            date: date(2024, 1, 1),
            timeframe: Timeframe::Monthly,
            sma_short: Some(1.0),
            sma_medium: None,
            sma_long: None,
            atr: Some(0.5),
            volume_ma: Some(1000.0),
            volume_ratio: Some(1.0),
            is_high_volume: false,
        };
        adapter
            .write_indicators(Timeframe::Monthly, &[indicator.clone(), indicator], WriteMode::Append)
            .unwrap();
        assert_eq!(adapter.count_rows("indicators_monthly").unwrap(), 1);

        let record = StageRecord {
            ticker: "BHP".into(),
            date: date(2024, 1, 1),
            ma: None,
            price_vs_ma_pct: None,
            ma_slope_pct: None,
            raw_stage: None,
            stage: Stage::Basing,
            stage_changed: true,
            weeks_in_stage: 1,
        };
        adapter.write_stages(&[record], WriteMode::Overwrite).unwrap();
        assert_eq!(adapter.count_rows("stages").unwrap(), 1);
    }

    #[test]
    fn watermark_round_trip() {
        let adapter = setup();
        assert_eq!(adapter.read_watermark().unwrap(), None);

        adapter.write_watermark(date(2024, 6, 28)).unwrap();
        adapter.write_watermark(date(2024, 7, 5)).unwrap();
        assert_eq!(adapter.read_watermark().unwrap(), Some(date(2024, 7, 5)));
        assert_eq!(adapter.count_rows("watermark").unwrap(), 1);
    }

    #[test]
    fn rebuild_marker_defaults_to_clear() {
        let adapter = setup();
        assert!(!adapter.read_rebuild_pending().unwrap());

        adapter.write_rebuild_pending(true).unwrap();
        assert!(adapter.read_rebuild_pending().unwrap());
        adapter.write_rebuild_pending(false).unwrap();
        assert!(!adapter.read_rebuild_pending().unwrap());
        assert_eq!(adapter.count_rows("run_state").unwrap(), 1);
    }
}
