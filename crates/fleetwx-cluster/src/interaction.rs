//! Marker click and hover handling

use crate::index::{ClusterId, ClusterIndex, MapMarker};
use crate::ClusterError;
use fleetwx_core::FacilityRecord;

/// Short display name for a point marker's payload
pub trait MarkerLabel {
    fn marker_label(&self) -> &str;
}

impl MarkerLabel for FacilityRecord {
    fn marker_label(&self) -> &str {
        &self.name
    }
}

impl MarkerLabel for str {
    fn marker_label(&self) -> &str {
        self
    }
}

impl MarkerLabel for String {
    fn marker_label(&self) -> &str {
        self
    }
}

impl<T: MarkerLabel + ?Sized> MarkerLabel for &T {
    fn marker_label(&self) -> &str {
        (**self).marker_label()
    }
}

/// What a click on a marker resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome<'a, P> {
    /// A single facility was clicked; open its detail view
    Point { index: usize, payload: &'a P },
    /// A cluster was clicked; the caller decides whether to zoom to `expansion_zoom`
    Cluster {
        id: ClusterId,
        count: usize,
        expansion_zoom: u8,
    },
}

/// Resolve a click on a marker produced by `index`
pub fn on_marker_click<'a, P>(
    index: &ClusterIndex<P>,
    marker: &MapMarker<'a, P>,
) -> Result<ClickOutcome<'a, P>, ClusterError> {
    match *marker {
        MapMarker::Point { index: i, payload, .. } => Ok(ClickOutcome::Point { index: i, payload }),
        MapMarker::Cluster { id, count, .. } => {
            let expansion_zoom = index.cluster_expansion_zoom(id)?;
            tracing::debug!(cluster = %id, count, expansion_zoom, "cluster clicked");
            Ok(ClickOutcome::Cluster {
                id,
                count,
                expansion_zoom,
            })
        }
    }
}

/// Tooltip text for a marker
pub fn hover_label<P: MarkerLabel>(marker: &MapMarker<'_, P>) -> String {
    match marker {
        MapMarker::Point { payload, .. } => payload.marker_label().to_string(),
        MapMarker::Cluster { count, .. } => format!("Cluster of {count} facilities"),
    }
}
