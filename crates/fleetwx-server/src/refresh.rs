//! Periodic fleet enrichment

use std::sync::Arc;
use std::time::Duration;

use fleetwx_fetch::{apply_updates, enrich_facilities, ThrottledFetcher};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::{record_fetch, replace_fleet, set_ready, AppState};

/// Run one enrichment batch over the whole fleet and publish the result.
///
/// Facilities whose fetch failed keep their prior weather. The service is
/// marked ready once the first batch has been published. Returns the number
/// of facilities that received fresh weather.
pub async fn refresh_once(state: &Arc<AppState>, fetcher: &ThrottledFetcher) -> usize {
    let mut facilities = state.facilities().await;
    info!(facilities = facilities.len(), "Refreshing fleet weather");

    let updates = enrich_facilities(fetcher, &facilities).await;
    for update in &updates {
        record_fetch(state, update.error().map_or(Ok(()), Err));
    }
    let fresh = apply_updates(&mut facilities, updates);

    replace_fleet(state, facilities).await;
    set_ready(state, true);
    fresh
}

/// Refresh now and then every `period`, until the task is aborted
pub fn spawn_refresh(
    state: Arc<AppState>,
    fetcher: ThrottledFetcher,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let fresh = refresh_once(&state, &fetcher).await;
            info!(fresh, next_in_secs = period.as_secs(), "Fleet refresh complete");
        }
    })
}
