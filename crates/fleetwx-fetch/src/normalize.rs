//! Upstream response shapes and their normalization
//!
//! Four payload shapes are accepted:
//! - `Current`: the current-conditions endpoint (`main`, `wind`, `weather[]`)
//! - `OneCall`: current conditions with hourly and daily forecasts
//! - `OneCallWithAlerts`: as `OneCall`, plus an `alerts` array
//! - `Flattened`: a facility's cached weather record (`temp`, `humidity`, `forecast`)
//!
//! All of them normalize into one [`WeatherSnapshot`]. Absent forecast or
//! alert data becomes an empty vector.

use chrono::{DateTime, TimeZone, Utc};
use fleetwx_core::{Condition, DailyForecast, HourlyForecast, WeatherAlert, WeatherSnapshot};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Unrecognized response shape (keys: {0})")]
    UnknownShape(String),

    #[error("Missing or invalid fields in {shape} response: {source}")]
    Malformed {
        shape: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCondition {
    #[serde(default)]
    pub id: u16,
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainBlock {
    pub temp: f64,
    #[serde(default)]
    pub feels_like: Option<f64>,
    pub humidity: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WindBlock {
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub deg: f64,
}

/// Current-conditions endpoint payload
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentConditionsPayload {
    #[serde(default)]
    pub dt: Option<i64>,
    pub main: MainBlock,
    #[serde(default)]
    pub wind: WindBlock,
    #[serde(default)]
    pub weather: Vec<RawCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneCallCurrent {
    #[serde(default)]
    pub dt: Option<i64>,
    pub temp: f64,
    #[serde(default)]
    pub feels_like: Option<f64>,
    pub humidity: f64,
    #[serde(default)]
    pub uvi: Option<f64>,
    #[serde(default)]
    pub wind_speed: f64,
    #[serde(default)]
    pub wind_deg: f64,
    #[serde(default)]
    pub weather: Vec<RawCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHourly {
    pub dt: i64,
    pub temp: f64,
    #[serde(default)]
    pub weather: Vec<RawCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDailyTemp {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub day: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDaily {
    pub dt: i64,
    pub temp: RawDailyTemp,
    #[serde(default)]
    pub weather: Vec<RawCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAlert {
    #[serde(default)]
    pub sender_name: String,
    pub event: String,
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One-call payload (current + hourly + daily, optionally alerts)
#[derive(Debug, Clone, Deserialize)]
pub struct OneCallPayload {
    pub current: OneCallCurrent,
    #[serde(default)]
    pub hourly: Vec<RawHourly>,
    #[serde(default)]
    pub daily: Vec<RawDaily>,
    #[serde(default)]
    pub alerts: Vec<RawAlert>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawForecast {
    #[serde(default)]
    pub hourly: Vec<RawHourly>,
    #[serde(default)]
    pub daily: Vec<RawDaily>,
}

/// A facility's cached weather record
#[derive(Debug, Clone, Deserialize)]
pub struct FlattenedPayload {
    pub temp: f64,
    #[serde(default)]
    pub feels_like: Option<f64>,
    pub humidity: f64,
    #[serde(default)]
    pub uvi: Option<f64>,
    #[serde(default)]
    pub wind_speed: f64,
    #[serde(default)]
    pub wind_deg: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub weather: Vec<RawCondition>,
    #[serde(default)]
    pub forecast: RawForecast,
    #[serde(default)]
    pub alerts: Vec<RawAlert>,
}

/// An upstream payload, tagged by shape
#[derive(Debug, Clone)]
pub enum RawWeather {
    Current(CurrentConditionsPayload),
    OneCall(OneCallPayload),
    OneCallWithAlerts(OneCallPayload),
    Flattened(FlattenedPayload),
}

impl RawWeather {
    /// Detect the shape of a JSON payload and parse it
    pub fn from_value(value: Value) -> Result<Self, NormalizeError> {
        let Some(object) = value.as_object() else {
            return Err(NormalizeError::UnknownShape("not an object".into()));
        };

        if object.contains_key("current") {
            let with_alerts = object.get("alerts").is_some_and(|a| !a.is_null());
            let payload: OneCallPayload = parse("one-call", value)?;
            return Ok(if with_alerts {
                RawWeather::OneCallWithAlerts(payload)
            } else {
                RawWeather::OneCall(payload)
            });
        }
        if object.contains_key("main") {
            return parse("current-conditions", value).map(RawWeather::Current);
        }
        if object.contains_key("temp") {
            return parse("flattened", value).map(RawWeather::Flattened);
        }

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        Err(NormalizeError::UnknownShape(keys.join(",")))
    }

    pub fn shape(&self) -> &'static str {
        match self {
            RawWeather::Current(_) => "current-conditions",
            RawWeather::OneCall(_) => "one-call",
            RawWeather::OneCallWithAlerts(_) => "one-call-alerts",
            RawWeather::Flattened(_) => "flattened",
        }
    }
}

fn parse<T: DeserializeOwned>(shape: &'static str, value: Value) -> Result<T, NormalizeError> {
    serde_json::from_value(value).map_err(|source| NormalizeError::Malformed { shape, source })
}

/// Fields common to every shape once unpacked
struct Current {
    dt: Option<i64>,
    temp: f64,
    feels_like: Option<f64>,
    humidity: f64,
    uvi: Option<f64>,
    wind_speed: f64,
    wind_deg: f64,
    description: Option<String>,
    weather: Vec<RawCondition>,
}

/// Normalize any upstream shape into the canonical snapshot
pub fn normalize(raw: RawWeather) -> WeatherSnapshot {
    let (current, hourly, daily, alerts) = match raw {
        RawWeather::Current(p) => (
            Current {
                dt: p.dt,
                temp: p.main.temp,
                feels_like: p.main.feels_like,
                humidity: p.main.humidity,
                uvi: None,
                wind_speed: p.wind.speed,
                wind_deg: p.wind.deg,
                description: None,
                weather: p.weather,
            },
            Vec::new(),
            Vec::new(),
            Vec::new(),
        ),
        RawWeather::OneCall(p) | RawWeather::OneCallWithAlerts(p) => (
            Current {
                dt: p.current.dt,
                temp: p.current.temp,
                feels_like: p.current.feels_like,
                humidity: p.current.humidity,
                uvi: p.current.uvi,
                wind_speed: p.current.wind_speed,
                wind_deg: p.current.wind_deg,
                description: None,
                weather: p.current.weather,
            },
            p.hourly,
            p.daily,
            p.alerts,
        ),
        RawWeather::Flattened(p) => (
            Current {
                dt: None,
                temp: p.temp,
                feels_like: p.feels_like,
                humidity: p.humidity,
                uvi: p.uvi,
                wind_speed: p.wind_speed,
                wind_deg: p.wind_deg,
                description: Some(p.description).filter(|d| !d.is_empty()),
                weather: p.weather,
            },
            p.forecast.hourly,
            p.forecast.daily,
            p.alerts,
        ),
    };

    let condition = first_condition(current.weather);
    let description = current
        .description
        .unwrap_or_else(|| condition.description.clone());

    let mut hourly: Vec<HourlyForecast> = hourly
        .into_iter()
        .filter_map(|h| {
            Some(HourlyForecast {
                timestamp: timestamp(h.dt)?,
                temperature_k: h.temp,
                condition: first_condition(h.weather),
            })
        })
        .collect();
    hourly.sort_by_key(|h| h.timestamp);

    let mut daily: Vec<DailyForecast> = daily
        .into_iter()
        .filter_map(|d| {
            Some(DailyForecast {
                timestamp: timestamp(d.dt)?,
                temp_min_k: d.temp.min,
                temp_max_k: d.temp.max,
                temp_day_k: d.temp.day.unwrap_or((d.temp.min + d.temp.max) / 2.0),
                condition: first_condition(d.weather),
            })
        })
        .collect();
    daily.sort_by_key(|d| d.timestamp);

    let alerts = alerts
        .into_iter()
        .filter_map(|a| {
            Some(WeatherAlert {
                sender: a.sender_name,
                event: a.event,
                start: timestamp(a.start)?,
                end: timestamp(a.end)?,
                description: a.description,
                tags: a.tags,
            })
        })
        .collect();

    WeatherSnapshot {
        temperature_k: current.temp,
        feels_like_k: current.feels_like.unwrap_or(current.temp),
        humidity: current.humidity.clamp(0.0, 100.0),
        wind_speed_mps: current.wind_speed.max(0.0),
        wind_deg: bearing(current.wind_deg),
        uv_index: current.uvi,
        description,
        condition,
        observed_at: current.dt.and_then(timestamp),
        hourly,
        daily,
        alerts,
    }
}

fn first_condition(weather: Vec<RawCondition>) -> Condition {
    weather
        .into_iter()
        .next()
        .map(|c| Condition {
            code: c.id,
            main: c.main,
            description: c.description,
            icon: c.icon,
        })
        .unwrap_or_default()
}

/// Bearing folded into [0, 360); `rem_euclid` rounds tiny negatives up to 360
fn bearing(deg: f64) -> f64 {
    let folded = deg.rem_euclid(360.0);
    if folded >= 360.0 {
        0.0
    } else {
        folded
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
