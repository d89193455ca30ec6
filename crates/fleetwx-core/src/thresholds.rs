//! Weather thresholds, expressed in the canonical units (Kelvin, m/s)

use crate::types::WeatherSnapshot;
use crate::units::fahrenheit_to_kelvin;
use serde::{Deserialize, Serialize};

/// Condition flagged on a facility's current weather
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherFlag {
    Heat,
    Freeze,
    HighUv,
    HighWind,
    ActiveAlert,
}

/// The single threshold table applied across the fleet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Temperatures at or above this are hot (90F)
    pub heat_k: f64,
    /// Temperatures at or below this are freezing (32F)
    pub freeze_k: f64,
    pub high_uv: f64,
    /// 30 mph
    pub high_wind_mps: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            heat_k: fahrenheit_to_kelvin(90.0),
            freeze_k: fahrenheit_to_kelvin(32.0),
            high_uv: 6.0,
            high_wind_mps: 13.4,
        }
    }
}

impl Thresholds {
    /// Flags raised by a snapshot. Placeholder snapshots raise nothing.
    pub fn classify(&self, weather: &WeatherSnapshot) -> Vec<WeatherFlag> {
        let mut flags = Vec::new();
        if weather.is_placeholder() {
            return flags;
        }

        if weather.temperature_k >= self.heat_k {
            flags.push(WeatherFlag::Heat);
        }
        if weather.temperature_k <= self.freeze_k {
            flags.push(WeatherFlag::Freeze);
        }
        if weather.uv_index.is_some_and(|uv| uv >= self.high_uv) {
            flags.push(WeatherFlag::HighUv);
        }
        if weather.wind_speed_mps >= self.high_wind_mps {
            flags.push(WeatherFlag::HighWind);
        }
        if !weather.alerts.is_empty() {
            flags.push(WeatherFlag::ActiveAlert);
        }
        flags
    }

    pub fn is_hot(&self, weather: &WeatherSnapshot) -> bool {
        !weather.is_placeholder() && weather.temperature_k >= self.heat_k
    }
}
