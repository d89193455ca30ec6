//! State-level rollups and fleet search

use crate::thresholds::Thresholds;
use crate::types::{FacilityId, FacilityRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A facility holding the highest or lowest temperature of a group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extreme {
    pub id: FacilityId,
    pub name: String,
    pub temperature_k: f64,
}

/// Accumulator for temperature statistics over a group of facilities
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    count: usize,
    sum: f64,
    highest: Option<Extreme>,
    lowest: Option<Extreme>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, facility: &FacilityRecord) {
        let value = facility.weather.temperature_k;
        self.count += 1;
        self.sum += value;

        let extreme = || Extreme {
            id: facility.id.clone(),
            name: facility.name.clone(),
            temperature_k: value,
        };
        if self.highest.as_ref().map_or(true, |h| value > h.temperature_k) {
            self.highest = Some(extreme());
        }
        if self.lowest.as_ref().map_or(true, |l| value < l.temperature_k) {
            self.lowest = Some(extreme());
        }
    }

    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Drill-down summary for one state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSummary {
    pub state: String,
    pub facility_count: usize,
    /// Facilities with real (non-placeholder) weather
    pub reporting_count: usize,
    pub average_temp_k: Option<f64>,
    pub highest: Option<Extreme>,
    pub lowest: Option<Extreme>,
    pub hot_count: usize,
    pub alert_count: usize,
}

#[derive(Default)]
struct StateRollup {
    facility_count: usize,
    temps: Accumulator,
    hot_count: usize,
    alert_count: usize,
}

impl StateRollup {
    fn add(&mut self, facility: &FacilityRecord, thresholds: &Thresholds) {
        self.facility_count += 1;
        if facility.weather.is_placeholder() {
            return;
        }
        self.temps.add(facility);
        if thresholds.is_hot(&facility.weather) {
            self.hot_count += 1;
        }
        self.alert_count += facility.weather.alerts.len();
    }

    fn finish(self, state: String) -> StateSummary {
        StateSummary {
            state,
            facility_count: self.facility_count,
            reporting_count: self.temps.count(),
            average_temp_k: self.temps.average(),
            highest: self.temps.highest,
            lowest: self.temps.lowest,
            hot_count: self.hot_count,
            alert_count: self.alert_count,
        }
    }
}

/// Summaries for every state in the fleet, ordered by state name
pub fn summarize_states(facilities: &[FacilityRecord], thresholds: &Thresholds) -> Vec<StateSummary> {
    let mut rollups: BTreeMap<&str, StateRollup> = BTreeMap::new();
    for facility in facilities {
        rollups
            .entry(facility.state.as_str())
            .or_default()
            .add(facility, thresholds);
    }

    rollups
        .into_iter()
        .map(|(state, rollup)| rollup.finish(state.to_string()))
        .collect()
}

/// Summary for a single state (case-insensitive), None if the fleet has no facility there
pub fn summarize_state(
    facilities: &[FacilityRecord],
    state: &str,
    thresholds: &Thresholds,
) -> Option<StateSummary> {
    let members = facilities_in_state(facilities, state);
    let first = members.first()?;
    let name = first.state.clone();

    let mut rollup = StateRollup::default();
    for facility in members {
        rollup.add(facility, thresholds);
    }
    Some(rollup.finish(name))
}

pub fn facilities_in_state<'a>(facilities: &'a [FacilityRecord], state: &str) -> Vec<&'a FacilityRecord> {
    facilities
        .iter()
        .filter(|f| f.state.eq_ignore_ascii_case(state))
        .collect()
}

/// Case-insensitive substring match on facility name or state; an empty term matches everything
pub fn search_facilities<'a>(facilities: &'a [FacilityRecord], term: &str) -> Vec<&'a FacilityRecord> {
    let term = term.trim().to_lowercase();
    facilities
        .iter()
        .filter(|f| {
            term.is_empty()
                || f.name.to_lowercase().contains(&term)
                || f.state.to_lowercase().contains(&term)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinate, WeatherSnapshot};
    use crate::units::fahrenheit_to_kelvin;
    use chrono::Utc;

    fn facility(id: &str, state: &str, temp_f: Option<f64>) -> FacilityRecord {
        let weather = match temp_f {
            Some(t) => WeatherSnapshot {
                temperature_k: fahrenheit_to_kelvin(t),
                feels_like_k: fahrenheit_to_kelvin(t),
                humidity: 50.0,
                description: "clear sky".into(),
                observed_at: Some(Utc::now()),
                ..Default::default()
            },
            None => WeatherSnapshot::default(),
        };
        FacilityRecord {
            id: FacilityId::from(id),
            name: format!("{} {}", state, id),
            state: state.to_string(),
            city: "Somewhere".into(),
            kind: "Warehouse".into(),
            address: String::new(),
            coordinate: Coordinate::new(35.0, -90.0).unwrap(),
            weather,
            weather_updated_at: None,
        }
    }

    #[test]
    fn test_accumulator_empty() {
        let acc = Accumulator::new();
        assert_eq!(acc.average(), None);
        assert_eq!(acc.count(), 0);
    }

    #[test]
    fn test_state_summary() {
        let fleet = vec![
            facility("AZ-PHX3", "Arizona", Some(100.0)),
            facility("AZ-TUS1", "Arizona", Some(80.0)),
            facility("AZ-FLG1", "Arizona", None),
            facility("OH-CMH1", "Ohio", Some(50.0)),
        ];
        let summaries = summarize_states(&fleet, &Thresholds::default());
        assert_eq!(summaries.len(), 2);

        let az = &summaries[0];
        assert_eq!(az.state, "Arizona");
        assert_eq!(az.facility_count, 3);
        assert_eq!(az.reporting_count, 2);
        assert_eq!(az.hot_count, 1);
        assert_eq!(az.highest.as_ref().unwrap().id.as_str(), "AZ-PHX3");
        assert_eq!(az.lowest.as_ref().unwrap().id.as_str(), "AZ-TUS1");
        let avg = az.average_temp_k.unwrap();
        assert!((avg - fahrenheit_to_kelvin(90.0)).abs() < 1e-9);
    }

    #[test]
    fn test_single_state_lookup() {
        let fleet = vec![facility("OH-CMH1", "Ohio", None)];
        let summary = summarize_state(&fleet, "ohio", &Thresholds::default()).unwrap();
        assert_eq!(summary.state, "Ohio");
        assert_eq!(summary.reporting_count, 0);
        assert_eq!(summary.average_temp_k, None);
        assert!(summarize_state(&fleet, "Texas", &Thresholds::default()).is_none());
    }

    #[test]
    fn test_search() {
        let fleet = vec![
            facility("AZ-PHX3", "Arizona", None),
            facility("OH-CMH1", "Ohio", None),
        ];
        assert_eq!(search_facilities(&fleet, "ARIZ").len(), 1);
        assert_eq!(search_facilities(&fleet, "cmh1").len(), 1);
        assert_eq!(search_facilities(&fleet, "  ").len(), 2);
        assert!(search_facilities(&fleet, "texas").is_empty());
    }
}
