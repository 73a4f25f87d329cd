use crate::model::Forecast;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt::Debug;

pub mod openweather;

pub use openweather::OpenWeatherClient;

/// Failure of a single forecast request.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("city not found")]
    CityNotFound,

    #[error("external provider error (status {status})")]
    External { status: StatusCode },

    #[error("corrupted call")]
    CorruptedCall(#[source] reqwest::Error),

    #[error("failed to decode forecast response")]
    Decode(#[source] serde_json::Error),

    #[error("forecast request cancelled")]
    Cancelled,

    #[error("forecast pipeline is not running")]
    Unavailable,
}

impl ForecastError {
    /// Whether the failure came from the provider side rather than from us.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            ForecastError::External { .. } | ForecastError::CorruptedCall(_)
        )
    }
}

/// One outbound forecast call per invocation, no retries.
///
/// Implementations are cancel-safe: dropping the returned future abandons the call.
#[async_trait]
pub trait ForecastProvider: Send + Sync + Debug {
    async fn fetch(&self, city: &str) -> Result<Forecast, ForecastError>;
}

/// Map a non-success HTTP status to the error taxonomy.
///
/// Returns `None` for success statuses.
pub fn classify_status(status: StatusCode) -> Option<ForecastError> {
    if status.is_success() {
        return None;
    }

    match status {
        StatusCode::NOT_FOUND => Some(ForecastError::CityNotFound),
        _ => Some(ForecastError::External { status }),
    }
}
