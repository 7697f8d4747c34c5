//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for stagewise.
#[derive(Debug, thiserror::Error)]
pub enum StagewiseError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("input for {ticker} is not strictly increasing at {date}")]
    UnsortedSeries { ticker: String, date: NaiveDate },

    #[error("conflicting split events for {ticker} on {date}")]
    SplitConflict { ticker: String, date: NaiveDate },

    #[error("invalid split ratio for {ticker} on {date}: {split_from}/{split_to}")]
    InvalidSplitRatio {
        ticker: String,
        date: NaiveDate,
        split_from: f64,
        split_to: f64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StagewiseError {
    pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        StagewiseError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&StagewiseError> for std::process::ExitCode {
    fn from(err: &StagewiseError) -> Self {
        let code: u8 = match err {
            StagewiseError::Io(_) => 1,
            StagewiseError::ConfigParse { .. }
            | StagewiseError::ConfigMissing { .. }
            | StagewiseError::ConfigInvalid { .. } => 2,
            StagewiseError::Database { .. } | StagewiseError::DatabaseQuery { .. } => 3,
            StagewiseError::UnsortedSeries { .. }
            | StagewiseError::SplitConflict { .. }
            | StagewiseError::InvalidSplitRatio { .. } => 4,
        };
        std::process::ExitCode::from(code)
    }
}
