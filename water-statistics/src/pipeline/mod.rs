use meter_client::domain::DeltaReading;
use rust_decimal::Decimal;
use time::Date;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid delta reading: {0}")]
    InvalidDelta(String),
    #[error("invalid meter state: {0}")]
    InvalidState(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{series} regression at {timestamp}: {value} does not continue {stored}")]
    Regression {
        series: &'static str,
        timestamp: Date,
        value: Decimal,
        stored: Decimal,
    },
    #[error("publish error: {0}")]
    Publish(String),
}

impl PipelineError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Transport(_) => "transport",
            Self::InvalidDelta(_) => "invalid_delta",
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Regression { .. } => "regression",
            Self::Publish(_) => "publish",
        }
    }
}

/// Anything that can hand back consumption deltas for a date range.
///
/// Both `start` and `end` are inclusive.
#[async_trait::async_trait]
pub trait DeltaSource: Send + Sync {
    async fn fetch_deltas(&self, start: Date, end: Date) -> Result<Vec<DeltaReading>, PipelineError>;
}

#[async_trait::async_trait]
impl<T> DeltaSource for std::sync::Arc<T>
where
    T: DeltaSource + ?Sized,
{
    async fn fetch_deltas(&self, start: Date, end: Date) -> Result<Vec<DeltaReading>, PipelineError> {
        (**self).fetch_deltas(start, end).await
    }
}
