//! Rate-limited weather fetching
//!
//! Requests for a coordinate are validated, queued FIFO and dispatched to a
//! [`WeatherProvider`] no faster than the configured requests-per-minute
//! ceiling. Every upstream response shape is normalized into a
//! [`fleetwx_core::WeatherSnapshot`].

pub mod batch;
pub mod normalize;
pub mod openweather;
pub mod pacer;

pub use batch::*;
pub use normalize::*;
pub use openweather::*;
pub use pacer::*;

use fleetwx_core::{Coordinate, CoordinateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(#[from] CoordinateError),

    #[error("Upstream rate limit hit for {coordinate}")]
    UpstreamRateLimited { coordinate: Coordinate },

    #[error("Upstream unavailable for {coordinate}: {reason}")]
    UpstreamUnavailable {
        coordinate: Coordinate,
        reason: String,
    },

    #[error("Malformed response for {coordinate}: {detail}")]
    MalformedResponse {
        coordinate: Coordinate,
        detail: String,
        /// Truncated raw body, for diagnosis
        raw: String,
    },

    #[error("Invalid client configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Fetch pipeline closed")]
    PipelineClosed,
}

impl FetchError {
    /// Whether retrying the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::UpstreamRateLimited { .. } | FetchError::UpstreamUnavailable { .. }
        )
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Source of raw weather for a coordinate
#[async_trait::async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Provider name/identifier
    fn name(&self) -> &str;

    /// Perform exactly one upstream request for the coordinate
    async fn fetch(&self, coordinate: Coordinate) -> FetchResult<RawWeather>;
}
