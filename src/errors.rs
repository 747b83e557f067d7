use thiserror::Error;

/// Fatal errors raised before the simulation loop starts.
///
/// Nothing in here is produced mid-run: once the loop begins, order problems are
/// recorded as skipped entries instead.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient candle history: warm-up needs {required}, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("candles out of order at index {index}: open time does not advance")]
    UnorderedCandles { index: usize },

    #[error("invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: String },

    #[error("unknown time zone '{0}'")]
    UnknownTimeZone(String),
}

impl BacktestError {
    pub fn from_messages(messages: Vec<String>) -> Self {
        BacktestError::InvalidConfig(messages.join(", "))
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
