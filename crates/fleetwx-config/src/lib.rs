use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "FLEETWX_CONFIG";
pub const API_KEY_ENV: &str = "FLEETWX_API_KEY";

const ONE_CALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    /// Dispatch ceiling, kept below the upstream quota of 60/min
    pub requests_per_minute: u32,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub exclude_minutely: bool,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            requests_per_minute: 55,
            base_url: ONE_CALL_URL.to_string(),
            request_timeout_secs: 10,
            exclude_minutely: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapConfig {
    pub cluster_radius_px: f64,
    pub extent: f64,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_points: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            cluster_radius_px: 40.0,
            extent: 512.0,
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Heat-map mode when a request does not say
    pub enabled: bool,
    pub attribute: String,
    pub stops: [f64; 3],
    pub colors: [String; 3],
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            attribute: "temperature".to_string(),
            stops: [60.0, 75.0, 90.0],
            colors: [
                "#00ff00".to_string(),
                "#ffff00".to_string(),
                "#ff0000".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_secs: 1800 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FacilitiesConfig {
    /// JSON fleet file; the bundled fleet is used when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub weather: WeatherConfig,
    pub map: MapConfig,
    pub heatmap: HeatmapConfig,
    pub server: ServerConfig,
    pub refresh: RefreshConfig,
    pub facilities: FacilitiesConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No weather API key configured (set weather.api_key or {API_KEY_ENV})")]
    MissingApiKey,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Load configuration from the FLEETWX_CONFIG path (TOML) if present, with
    /// reasonable defaults, then apply environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
        let cfg = Self::load_from(&path)?;
        Ok(cfg.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Read a TOML file; a missing file yields the defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let s = fs::read_to_string(path)?;
        Ok(toml::from_str::<AppConfig>(&s)?)
    }

    /// Apply FLEETWX_API_KEY through the given lookup
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.weather.api_key = Some(key);
        }
        self
    }

    /// The weather API credential; its absence is fatal at start-up
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.weather
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.weather.requests_per_minute == 0 {
            return invalid("weather.requests_per_minute must be positive".into());
        }
        if self.weather.request_timeout_secs == 0 {
            return invalid("weather.request_timeout_secs must be positive".into());
        }
        if !(self.map.cluster_radius_px.is_finite() && self.map.cluster_radius_px > 0.0) {
            return invalid(format!(
                "map.cluster_radius_px must be positive, got {}",
                self.map.cluster_radius_px
            ));
        }
        if !(self.map.extent.is_finite() && self.map.extent > 0.0) {
            return invalid(format!("map.extent must be positive, got {}", self.map.extent));
        }
        if self.map.min_zoom > self.map.max_zoom {
            return invalid(format!(
                "map.min_zoom ({}) exceeds map.max_zoom ({})",
                self.map.min_zoom, self.map.max_zoom
            ));
        }
        if self.map.min_points < 2 {
            return invalid("map.min_points must be at least 2".into());
        }
        let [a, b, c] = self.heatmap.stops;
        if !(a < b && b < c) {
            return invalid(format!(
                "heatmap.stops must be strictly increasing, got {:?}",
                self.heatmap.stops
            ));
        }
        if self.refresh.interval_secs == 0 {
            return invalid("refresh.interval_secs must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.weather.requests_per_minute, 55);
        assert_eq!(cfg.map.cluster_radius_px, 40.0);
        assert_eq!(cfg.map.max_zoom, 16);
        assert!(cfg.validate().is_ok());
        assert!(matches!(cfg.api_key(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[weather]
api_key = "abc123"
requests_per_minute = 30

[map]
cluster_radius_px = 60.0

[heatmap]
enabled = true
attribute = "humidity"
stops = [20.0, 50.0, 80.0]
"#
        )
        .unwrap();

        let cfg = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.api_key().unwrap(), "abc123");
        assert_eq!(cfg.weather.requests_per_minute, 30);
        assert_eq!(cfg.weather.request_timeout_secs, 10);
        assert_eq!(cfg.map.cluster_radius_px, 60.0);
        assert_eq!(cfg.map.extent, 512.0);
        assert!(cfg.heatmap.enabled);
        assert_eq!(cfg.heatmap.colors[2], "#ff0000");
        assert_eq!(cfg.refresh.interval_secs, 1800);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bad_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[weather\napi_key = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn env_key_overrides_file() {
        let mut cfg = AppConfig::default();
        cfg.weather.api_key = Some("from-file".into());

        let cfg = cfg.with_env_overrides(|key| (key == API_KEY_ENV).then(|| "from-env".to_string()));
        assert_eq!(cfg.api_key().unwrap(), "from-env");

        let cfg = cfg.with_env_overrides(|_| Some("   ".to_string()));
        assert_eq!(cfg.api_key().unwrap(), "from-env");
    }

    #[test]
    fn validation_rejects_nonsense() {
        let mut cfg = AppConfig::default();
        cfg.weather.requests_per_minute = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = AppConfig::default();
        cfg.map.cluster_radius_px = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.map.min_zoom = 10;
        cfg.map.max_zoom = 4;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.heatmap.stops = [90.0, 75.0, 60.0];
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.weather.api_key = Some("  ".into());
        assert!(matches!(cfg.api_key(), Err(ConfigError::MissingApiKey)));
    }
}
