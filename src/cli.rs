//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::config::PipelineConfig;
use crate::domain::pipeline::{RunPlan, RunSummary, StatusReport};
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(name = "stagewise", about = "Split-adjusted bars, indicators and market stages")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Derive new rows (or rebuild everything) and advance the watermark
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the watermark, derived row counts and what the next run would do
    Status {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Load raw bars (and optionally the split list) from CSV into the database
    Import {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        bars: PathBuf,
        #[arg(long)]
        splits: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run { config } => run_pipeline(&config),
        Command::Status { config } => run_status(&config),
        Command::Import {
            config,
            bars,
            splits,
        } => run_import(&config, &bars, splits.as_deref()),
    }
}

pub fn load_config(path: &Path) -> Result<(FileConfigAdapter, PipelineConfig), ExitCode> {
    let adapter = FileConfigAdapter::from_file(path).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })?;
    let pipeline = PipelineConfig::from_port(&adapter).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })?;
    Ok((adapter, pipeline))
}

/// Bars and splits come from CSV when `[csv] bars_path` is set, otherwise
/// from the database's raw tables.
#[cfg(feature = "sqlite")]
fn csv_source(config: &dyn ConfigPort) -> Option<crate::adapters::csv_adapter::CsvAdapter> {
    let bars = config.get_string("csv", "bars_path")?;
    let splits = config.get_string("csv", "splits_path").map(PathBuf::from);
    Some(crate::adapters::csv_adapter::CsvAdapter::new(
        PathBuf::from(bars),
        splits,
    ))
}

fn run_pipeline(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let (adapter, pipeline) = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    #[cfg(feature = "sqlite")]
    {
        use crate::domain::pipeline::IncrementalController;
        use crate::ports::data_port::{BarSource, SplitSource};

        let db = match open_database(&adapter) {
            Ok(db) => db,
            Err(code) => return code,
        };

        let csv = csv_source(&adapter);
        let (bars, splits): (&dyn BarSource, &dyn SplitSource) = match &csv {
            Some(csv) => (csv as &dyn BarSource, csv as &dyn SplitSource),
            None => (&db as &dyn BarSource, &db as &dyn SplitSource),
        };

        let controller = IncrementalController::new(bars, splits, &db, &db, pipeline);
        match controller.run() {
            Ok(summary) => {
                print_summary(&summary);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                (&e).into()
            }
        }
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (adapter, pipeline);
        eprintln!("error: sqlite feature is required for run");
        ExitCode::from(1)
    }
}

fn run_status(config_path: &Path) -> ExitCode {
    let (adapter, pipeline) = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    #[cfg(feature = "sqlite")]
    {
        use crate::domain::pipeline::IncrementalController;
        use crate::ports::data_port::{BarSource, SplitSource};

        let db = match open_database(&adapter) {
            Ok(db) => db,
            Err(code) => return code,
        };

        let csv = csv_source(&adapter);
        let (bars, splits): (&dyn BarSource, &dyn SplitSource) = match &csv {
            Some(csv) => (csv as &dyn BarSource, csv as &dyn SplitSource),
            None => (&db as &dyn BarSource, &db as &dyn SplitSource),
        };

        let controller = IncrementalController::new(bars, splits, &db, &db, pipeline);
        match controller.status() {
            Ok(report) => {
                print_status(&report);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                (&e).into()
            }
        }
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (adapter, pipeline);
        eprintln!("error: sqlite feature is required for status");
        ExitCode::from(1)
    }
}

fn run_import(config_path: &Path, bars_path: &Path, splits_path: Option<&Path>) -> ExitCode {
    let (adapter, _) = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::csv_adapter::CsvAdapter;
        use crate::ports::data_port::{BarSource, SplitSource};

        let db = match open_database(&adapter) {
            Ok(db) => db,
            Err(code) => return code,
        };
        let csv = CsvAdapter::new(bars_path.to_path_buf(), splits_path.map(Path::to_path_buf));

        let result = csv.fetch_bars(None, None).and_then(|bars| {
            db.insert_bars(&bars)?;
            eprintln!("Imported {} bars from {}", bars.len(), bars_path.display());
            if splits_path.is_some() {
                let splits = csv.fetch_splits()?;
                db.replace_splits(&splits)?;
                eprintln!("Replaced split list with {} events", splits.len());
            }
            Ok(())
        });

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e}");
                (&e).into()
            }
        }
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (adapter, bars_path, splits_path);
        eprintln!("error: sqlite feature is required for import");
        ExitCode::from(1)
    }
}

#[cfg(feature = "sqlite")]
fn open_database(
    config: &dyn ConfigPort,
) -> Result<crate::adapters::sqlite_adapter::SqliteAdapter, ExitCode> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;

    let db = SqliteAdapter::from_config(config).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })?;
    db.initialize_schema().map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })?;
    Ok(db)
}

pub fn format_summary(summary: &RunSummary) -> String {
    let Some(watermark) = summary.watermark else {
        return match summary.previous_watermark {
            Some(prev) => format!("Nothing to do: no new bars after {prev}"),
            None => "Nothing to do: no bars available".to_string(),
        };
    };

    let mut out = format!("Mode:       {}\n", summary.mode);
    if let Some(reason) = &summary.reason {
        out.push_str(&format!("Reason:     {reason}\n"));
    }
    out.push_str(&format!("Tickers:    {}\n", summary.tickers));
    for tf in Timeframe::ALL {
        out.push_str(&format!(
            "{:<11} {} bars, {} indicator rows\n",
            format!("{tf}:"),
            summary.rows.adjusted.get(tf),
            summary.rows.indicators.get(tf),
        ));
    }
    out.push_str(&format!("Stages:     {}\n", summary.rows.stages));
    out.push_str(&format!("Watermark:  {watermark}"));
    out
}

pub fn format_status(report: &StatusReport) -> String {
    let watermark = report
        .watermark
        .map_or_else(|| "none".to_string(), |d| d.to_string());
    let next = match &report.next_run {
        RunPlan::FullRebuild(reason) => format!("full rebuild ({reason})"),
        RunPlan::Incremental { watermark } => format!("incremental (bars after {watermark})"),
    };

    let mut out = format!("Watermark:  {watermark}\n");
    for tf in Timeframe::ALL {
        out.push_str(&format!(
            "{:<11} {} adjusted bars\n",
            format!("{tf}:"),
            report.adjusted_rows.get(tf)
        ));
    }
    out.push_str(&format!("Splits:     {}\n", report.split_events));
    out.push_str(&format!("Next run:   {next}"));
    out
}

fn print_summary(summary: &RunSummary) {
    eprintln!("{}", format_summary(summary));
}

fn print_status(report: &StatusReport) {
    println!("{}", format_status(report));
}
