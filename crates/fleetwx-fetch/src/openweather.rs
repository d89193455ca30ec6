//! OpenWeatherMap-style HTTP client

use crate::{FetchError, FetchResult, RawWeather, WeatherProvider};
use fleetwx_core::Coordinate;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const ONE_CALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

const MAX_RAW_BODY: usize = 500;

/// One GET per coordinate against a one-call style endpoint.
///
/// Requests carry `lat`, `lon` and `appid`; no `units` parameter is sent so
/// responses arrive in standard units (Kelvin, m/s).
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    exclude_minutely: bool,
}

impl OpenWeatherClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        timeout: Duration,
        exclude_minutely: bool,
    ) -> FetchResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(FetchError::InvalidConfiguration("api key is empty".into()));
        }
        let base_url = Url::parse(base_url).map_err(|e| {
            FetchError::InvalidConfiguration(format!("invalid base url {base_url:?}: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("fleetwx/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::InvalidConfiguration(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            exclude_minutely,
        })
    }

    fn request_url(&self, coordinate: Coordinate) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("lat", &coordinate.latitude.to_string())
                .append_pair("lon", &coordinate.longitude.to_string())
                .append_pair("appid", &self.api_key);
            if self.exclude_minutely {
                query.append_pair("exclude", "minutely");
            }
        }
        url
    }
}

#[async_trait::async_trait]
impl WeatherProvider for OpenWeatherClient {
    fn name(&self) -> &str {
        "openweather"
    }

    async fn fetch(&self, coordinate: Coordinate) -> FetchResult<RawWeather> {
        debug!(
            endpoint = %self.base_url,
            lat = coordinate.latitude,
            lon = coordinate.longitude,
            "Requesting weather"
        );

        // without_url() keeps the appid out of error messages
        let resp = self
            .client
            .get(self.request_url(coordinate))
            .send()
            .await
            .map_err(|e| FetchError::UpstreamUnavailable {
                coordinate,
                reason: e.without_url().to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::UpstreamRateLimited { coordinate });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::UpstreamUnavailable {
                coordinate,
                reason: e.without_url().to_string(),
            })?;

        if !status.is_success() {
            return Err(FetchError::UpstreamUnavailable {
                coordinate,
                reason: format!("status {}: {}", status.as_u16(), truncate(&body)),
            });
        }

        let malformed = |detail: String| FetchError::MalformedResponse {
            coordinate,
            detail,
            raw: truncate(&body),
        };
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| malformed(e.to_string()))?;
        RawWeather::from_value(value).map_err(|e| malformed(e.to_string()))
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_RAW_BODY).collect()
}
