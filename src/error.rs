use chrono::NaiveDate;
use thiserror::Error;

/// Per-unit failures. None of these abort a batch: the unit they describe
/// is logged, skipped and counted in the stage summary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Invalid balance {value} at position {index}")]
    InvalidBalance { index: usize, value: f64 },

    #[error("Unresolved market data for {token_id} on {date}")]
    UnresolvedMarketData { token_id: String, date: NaiveDate },

    #[error("{date} is outside snapshot coverage for {token_id}")]
    Coverage { token_id: String, date: NaiveDate },

    #[error("Insufficient sample: {0}")]
    InsufficientSample(String),
}

impl AnalysisError {
    /// Expected conditions that are skipped quietly rather than reported
    /// as anomalies.
    pub fn is_expected(&self) -> bool {
        matches!(self, AnalysisError::InsufficientSample(_))
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
