//! Fleet-wide enrichment
//!
//! A failed fetch never fails the batch: the facility keeps its prior
//! weather and the error is recorded on its update.

use crate::{FetchError, ThrottledFetcher};
use chrono::{DateTime, Utc};
use fleetwx_core::{FacilityId, FacilityRecord, WeatherSnapshot};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug)]
pub enum UpdateOutcome {
    Fresh,
    /// Prior weather retained
    Fallback(FetchError),
}

#[derive(Debug)]
pub struct WeatherUpdate {
    pub id: FacilityId,
    pub snapshot: WeatherSnapshot,
    /// Set only when the snapshot is fresh
    pub fetched_at: Option<DateTime<Utc>>,
    pub outcome: UpdateOutcome,
}

impl WeatherUpdate {
    pub fn is_fresh(&self) -> bool {
        matches!(self.outcome, UpdateOutcome::Fresh)
    }

    pub fn error(&self) -> Option<&FetchError> {
        match &self.outcome {
            UpdateOutcome::Fresh => None,
            UpdateOutcome::Fallback(e) => Some(e),
        }
    }
}

/// Fetch weather for every facility through the pacer.
///
/// Returns one update per facility in input order. The facilities themselves
/// are not modified; see [`apply_updates`].
pub async fn enrich_facilities(
    fetcher: &ThrottledFetcher,
    facilities: &[FacilityRecord],
) -> Vec<WeatherUpdate> {
    let coordinates: Vec<(f64, f64)> = facilities
        .iter()
        .map(|f| (f.coordinate.latitude, f.coordinate.longitude))
        .collect();
    let results = fetcher.fetch_weather_batch(&coordinates).await;

    let updates: Vec<WeatherUpdate> = facilities
        .iter()
        .zip(results)
        .map(|(facility, result)| match result {
            Ok(snapshot) => WeatherUpdate {
                id: facility.id.clone(),
                snapshot,
                fetched_at: Some(Utc::now()),
                outcome: UpdateOutcome::Fresh,
            },
            Err(e) => {
                warn!(facility = %facility.id, error = %e, "Keeping prior weather");
                WeatherUpdate {
                    id: facility.id.clone(),
                    snapshot: facility.weather.clone(),
                    fetched_at: None,
                    outcome: UpdateOutcome::Fallback(e),
                }
            }
        })
        .collect();

    let fresh = updates.iter().filter(|u| u.is_fresh()).count();
    info!(
        facilities = facilities.len(),
        fresh,
        failed = facilities.len() - fresh,
        "Enrichment batch complete"
    );
    updates
}

/// Merge updates into a caller-owned facility list; returns how many
/// facilities received fresh weather. Updates for unknown ids are ignored.
pub fn apply_updates(facilities: &mut [FacilityRecord], updates: Vec<WeatherUpdate>) -> usize {
    let positions: HashMap<FacilityId, usize> = facilities
        .iter()
        .enumerate()
        .map(|(i, f)| (f.id.clone(), i))
        .collect();

    let mut applied = 0;
    for update in updates {
        let Some(&i) = positions.get(&update.id) else {
            warn!(facility = %update.id, "Update for unknown facility");
            continue;
        };
        if let Some(fetched_at) = update.fetched_at {
            facilities[i].weather = update.snapshot;
            facilities[i].weather_updated_at = Some(fetched_at);
            applied += 1;
        }
    }
    applied
}
