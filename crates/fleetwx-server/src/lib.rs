use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use fleetwx_cluster::{
    hover_label, on_marker_click, point_fill, BoundingBox, ClickOutcome, ClusterError, ClusterId,
    ClusterIndex, ClusterOptions, ColorScale, DisplayMode, DroppedPoint, GeoPoint, HeatAttribute,
    MapMarker, Rgb, Viewport,
};
use fleetwx_config::AppConfig;
use fleetwx_core::{
    compass_direction, facilities_in_state, kelvin_to_celsius, kelvin_to_fahrenheit, mps_to_mph,
    search_facilities, summarize_state, summarize_states, ConditionCategory, FacilityId,
    FacilityRecord, StateSummary, Thresholds, WeatherFlag,
};
use fleetwx_fetch::{FetchError, ThrottledFetcher};
use opentelemetry::metrics::{Counter, MeterProvider};
use opentelemetry::KeyValue;
use opentelemetry_prometheus::exporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

pub mod refresh;

/// Map rendering settings resolved from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MapSettings {
    pub options: ClusterOptions,
    pub scale: ColorScale,
    pub attribute: HeatAttribute,
    /// Heat-map mode when a request does not ask for one
    pub heatmap_default: bool,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            options: ClusterOptions::default(),
            scale: ColorScale::default(),
            attribute: HeatAttribute::default(),
            heatmap_default: false,
        }
    }
}

impl MapSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ClusterError> {
        let options = ClusterOptions {
            radius_px: cfg.map.cluster_radius_px,
            extent: cfg.map.extent,
            min_zoom: cfg.map.min_zoom,
            max_zoom: cfg.map.max_zoom,
            min_points: cfg.map.min_points,
        };
        options.validate()?;

        let [c0, c1, c2] = &cfg.heatmap.colors;
        let colors: [Rgb; 3] = [c0.parse()?, c1.parse()?, c2.parse()?];
        let scale = ColorScale::new(cfg.heatmap.stops, colors)?;

        Ok(Self {
            options,
            scale,
            attribute: cfg.heatmap.attribute.parse()?,
            heatmap_default: cfg.heatmap.enabled,
        })
    }
}

/// Facility list plus the cluster index built over it; replaced wholesale
pub struct FleetSnapshot {
    facilities: Vec<FacilityRecord>,
    index: ClusterIndex<FacilityRecord>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl FleetSnapshot {
    pub fn build(facilities: Vec<FacilityRecord>, options: ClusterOptions) -> Self {
        let points = facilities
            .iter()
            .map(|f| GeoPoint::new(f.coordinate.longitude, f.coordinate.latitude, f.clone()))
            .collect();
        let index = ClusterIndex::load(points, options);
        if !index.dropped().is_empty() {
            tracing::warn!(
                dropped = index.dropped().len(),
                "Facilities with unusable coordinates left off the map"
            );
        }
        Self {
            facilities,
            index,
            refreshed_at: None,
        }
    }
}

pub struct AppState {
    ready: AtomicBool,
    registry: Registry,
    #[allow(dead_code)]
    provider: SdkMeterProvider,
    requests_total: Counter<u64>,
    fetches_total: Counter<u64>,
    settings: MapSettings,
    thresholds: Thresholds,
    fleet: RwLock<FleetSnapshot>,
    fetcher: Option<ThrottledFetcher>,
}

impl AppState {
    pub async fn facilities(&self) -> Vec<FacilityRecord> {
        self.fleet.read().await.facilities.clone()
    }
}

pub fn build_app(
    facilities: Vec<FacilityRecord>,
    settings: MapSettings,
    fetcher: Option<ThrottledFetcher>,
) -> Result<(Router, Arc<AppState>)> {
    // Prometheus exporter via OpenTelemetry
    let registry = Registry::new();
    let reader = exporter().with_registry(registry.clone()).build()?;
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    let meter = provider.meter("fleetwx-server");

    let requests_total = meter
        .u64_counter("fleetwx_requests_total")
        .with_description("Total HTTP requests served")
        .init();
    let fetches_total = meter
        .u64_counter("fleetwx_weather_fetches_total")
        .with_description("Weather fetches by outcome")
        .init();

    let fleet = FleetSnapshot::build(facilities, settings.options);
    let state = Arc::new(AppState {
        ready: AtomicBool::new(false),
        registry,
        provider,
        requests_total,
        fetches_total,
        settings,
        thresholds: Thresholds::default(),
        fleet: RwLock::new(fleet),
        fetcher,
    });

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/facilities", get(list_facilities))
        .route("/api/v1/facilities/:id", get(get_facility))
        .route("/api/v1/states", get(list_states))
        .route("/api/v1/states/:state", get(get_state))
        .route("/api/v1/markers", get(markers))
        .route("/api/v1/clusters/:id", get(cluster_detail))
        .route("/api/weather", get(weather))
        .with_state(Arc::clone(&state));

    Ok((router, state))
}

pub fn set_ready(state: &Arc<AppState>, is_ready: bool) {
    state.ready.store(is_ready, Ordering::Relaxed);
}

/// Swap in a new facility list and rebuild the cluster index over it
pub async fn replace_fleet(state: &Arc<AppState>, facilities: Vec<FacilityRecord>) {
    let mut snapshot = FleetSnapshot::build(facilities, state.settings.options);
    snapshot.refreshed_at = Some(Utc::now());
    *state.fleet.write().await = snapshot;
}

pub fn record_fetch(state: &AppState, result: Result<(), &FetchError>) {
    let outcome = match result {
        Ok(()) => "fresh",
        Err(FetchError::InvalidCoordinate(_)) => "invalid_coordinate",
        Err(FetchError::UpstreamRateLimited { .. }) => "rate_limited",
        Err(FetchError::UpstreamUnavailable { .. }) => "unavailable",
        Err(FetchError::MalformedResponse { .. }) => "malformed",
        Err(FetchError::InvalidConfiguration(_)) => "misconfigured",
        Err(FetchError::PipelineClosed) => "closed",
    };
    state
        .fetches_total
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

fn count_request(state: &AppState, route: &'static str) {
    state.requests_total.add(1, &[KeyValue::new("route", route)]);
}

/// JSON error body with a matching status code
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    RateLimited(String),
    BadGateway(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::RateLimited(m) => (StatusCode::TOO_MANY_REQUESTS, m),
            ApiError::BadGateway(m) => (StatusCode::BAD_GATEWAY, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<FetchError> for ApiError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::InvalidCoordinate(_) => ApiError::BadRequest(e.to_string()),
            FetchError::UpstreamRateLimited { .. } => ApiError::RateLimited(e.to_string()),
            FetchError::PipelineClosed => ApiError::Unavailable(e.to_string()),
            _ => ApiError::BadGateway(e.to_string()),
        }
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> StatusCode {
    count_request(&state, "healthz");
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(
    State(state): State<Arc<AppState>>,
) -> (
    [(axum::http::header::HeaderName, axum::http::HeaderValue); 1],
    String,
) {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::warn!(error=?e, "failed to encode metrics");
    }
    let body = String::from_utf8(buf).unwrap_or_default();
    let header = (
        header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    ([header], body)
}

/// Facility with its weather in presentation units
#[derive(Debug, Serialize)]
pub struct FacilityView {
    #[serde(flatten)]
    pub facility: FacilityRecord,
    pub temperature_f: Option<f64>,
    pub temperature_c: Option<f64>,
    pub feels_like_f: Option<f64>,
    pub wind_mph: Option<f64>,
    pub wind_direction: Option<&'static str>,
    pub category: ConditionCategory,
    pub flags: Vec<WeatherFlag>,
}

impl FacilityView {
    fn new(facility: &FacilityRecord, thresholds: &Thresholds) -> Self {
        let w = &facility.weather;
        let live = !w.is_placeholder();
        Self {
            temperature_f: live.then(|| kelvin_to_fahrenheit(w.temperature_k)),
            temperature_c: live.then(|| kelvin_to_celsius(w.temperature_k)),
            feels_like_f: live.then(|| kelvin_to_fahrenheit(w.feels_like_k)),
            wind_mph: live.then(|| mps_to_mph(w.wind_speed_mps)),
            wind_direction: live.then(|| compass_direction(w.wind_deg)),
            category: w.condition.category(),
            flags: thresholds.classify(w),
            facility: facility.clone(),
        }
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn list_facilities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    count_request(&state, "facilities");
    let fleet = state.fleet.read().await;
    let term = query.q.unwrap_or_default();
    let views: Vec<FacilityView> = search_facilities(&fleet.facilities, &term)
        .into_iter()
        .map(|f| FacilityView::new(f, &state.thresholds))
        .collect();
    Json(views)
}

async fn get_facility(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FacilityView>, ApiError> {
    count_request(&state, "facility");
    let id = FacilityId::new(id);
    let fleet = state.fleet.read().await;
    fleet
        .facilities
        .iter()
        .find(|f| f.id == id)
        .map(|f| Json(FacilityView::new(f, &state.thresholds)))
        .ok_or_else(|| ApiError::NotFound(format!("no facility with id {id}")))
}

async fn list_states(State(state): State<Arc<AppState>>) -> Json<Vec<StateSummary>> {
    count_request(&state, "states");
    let fleet = state.fleet.read().await;
    Json(summarize_states(&fleet.facilities, &state.thresholds))
}

#[derive(Serialize)]
struct StateDetail {
    summary: StateSummary,
    facilities: Vec<FacilityView>,
}

async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<StateDetail>, ApiError> {
    count_request(&state, "state");
    let fleet = state.fleet.read().await;
    let summary = summarize_state(&fleet.facilities, &name, &state.thresholds)
        .ok_or_else(|| ApiError::NotFound(format!("no facilities in {name}")))?;
    let facilities = facilities_in_state(&fleet.facilities, &name)
        .into_iter()
        .map(|f| FacilityView::new(f, &state.thresholds))
        .collect();
    Ok(Json(StateDetail {
        summary,
        facilities,
    }))
}

/// Render-ready marker
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerView {
    Cluster {
        id: ClusterId,
        latitude: f64,
        longitude: f64,
        count: usize,
        label: String,
    },
    Point {
        facility_id: FacilityId,
        latitude: f64,
        longitude: f64,
        label: String,
        color: Rgb,
        flags: Vec<WeatherFlag>,
    },
}

impl MarkerView {
    fn new(
        marker: &MapMarker<'_, FacilityRecord>,
        settings: &MapSettings,
        mode: DisplayMode,
        attribute: HeatAttribute,
        thresholds: &Thresholds,
    ) -> Self {
        let coordinate = marker.coordinate();
        let label = hover_label(marker);
        match *marker {
            MapMarker::Cluster { id, count, .. } => MarkerView::Cluster {
                id,
                latitude: coordinate.latitude,
                longitude: coordinate.longitude,
                count,
                label,
            },
            MapMarker::Point { payload, .. } => MarkerView::Point {
                facility_id: payload.id.clone(),
                latitude: coordinate.latitude,
                longitude: coordinate.longitude,
                label,
                color: point_fill(&payload.weather, mode, &settings.scale, attribute),
                flags: thresholds.classify(&payload.weather),
            },
        }
    }
}

#[derive(Deserialize)]
struct MarkersQuery {
    zoom: Option<f64>,
    bbox: Option<String>,
    heatmap: Option<bool>,
    attribute: Option<String>,
}

#[derive(Serialize)]
struct MarkersResponse {
    zoom: u8,
    heatmap: bool,
    refreshed_at: Option<DateTime<Utc>>,
    markers: Vec<MarkerView>,
    dropped: Vec<DroppedPoint>,
}

async fn markers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarkersQuery>,
) -> Result<Json<MarkersResponse>, ApiError> {
    count_request(&state, "markers");
    let bbox = match query.bbox.as_deref() {
        Some(raw) => raw
            .parse::<BoundingBox>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => BoundingBox::WORLD,
    };
    let attribute = match query.attribute.as_deref() {
        Some(raw) => raw
            .parse::<HeatAttribute>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => state.settings.attribute,
    };
    let heatmap = query.heatmap.unwrap_or(state.settings.heatmap_default);
    let mode = if heatmap {
        DisplayMode::HeatMap
    } else {
        DisplayMode::Plain
    };

    let fleet = state.fleet.read().await;
    let zoom = query
        .zoom
        .unwrap_or(f64::from(state.settings.options.min_zoom));
    let viewport = Viewport::new(bbox, zoom);
    let markers = fleet
        .index
        .markers(&viewport)
        .iter()
        .map(|m| MarkerView::new(m, &state.settings, mode, attribute, &state.thresholds))
        .collect();

    Ok(Json(MarkersResponse {
        zoom: fleet.index.limit_zoom(zoom),
        heatmap,
        refreshed_at: fleet.refreshed_at,
        markers,
        dropped: fleet.index.dropped().to_vec(),
    }))
}

#[derive(Serialize)]
struct Leaf {
    id: FacilityId,
    name: String,
}

#[derive(Serialize)]
struct ClusterDetail {
    id: ClusterId,
    count: usize,
    expansion_zoom: u8,
    latitude: f64,
    longitude: f64,
    label: String,
    leaves: Vec<Leaf>,
    children: Vec<MarkerView>,
}

async fn cluster_detail(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<ClusterDetail>, ApiError> {
    count_request(&state, "cluster");
    let id: ClusterId = raw_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid cluster id {raw_id}")))?;

    let fleet = state.fleet.read().await;
    let index = &fleet.index;
    let not_found = |e: ClusterError| ApiError::NotFound(e.to_string());

    let marker = index.cluster_marker(id).map_err(not_found)?;
    let ClickOutcome::Cluster {
        count,
        expansion_zoom,
        ..
    } = on_marker_click(index, &marker).map_err(not_found)?
    else {
        return Err(ApiError::NotFound(format!("{id} is not a cluster")));
    };

    let leaves = index
        .cluster_leaves(id)
        .map_err(not_found)?
        .into_iter()
        .filter_map(|m| match m {
            MapMarker::Point { payload, .. } => Some(Leaf {
                id: payload.id.clone(),
                name: payload.name.clone(),
            }),
            MapMarker::Cluster { .. } => None,
        })
        .collect();
    let mode = if state.settings.heatmap_default {
        DisplayMode::HeatMap
    } else {
        DisplayMode::Plain
    };
    let children = index
        .cluster_children(id)
        .map_err(not_found)?
        .iter()
        .map(|m| {
            MarkerView::new(
                m,
                &state.settings,
                mode,
                state.settings.attribute,
                &state.thresholds,
            )
        })
        .collect();

    let coordinate = marker.coordinate();
    Ok(Json(ClusterDetail {
        id,
        count,
        expansion_zoom,
        latitude: coordinate.latitude,
        longitude: coordinate.longitude,
        label: hover_label(&marker),
        leaves,
        children,
    }))
}

#[derive(Deserialize)]
struct WeatherQuery {
    lat: Option<String>,
    lon: Option<String>,
}

fn parse_degrees(name: &str, raw: Option<&str>) -> Result<f64, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::BadRequest(format!("missing {name}")))?;
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("invalid {name}: {raw}")))
}

/// Weather for an arbitrary location, through the same pacer as the fleet
async fn weather(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeatherQuery>,
) -> Result<impl IntoResponse, ApiError> {
    count_request(&state, "weather");
    let lat = parse_degrees("lat", query.lat.as_deref())?;
    let lon = parse_degrees("lon", query.lon.as_deref())?;
    let fetcher = state
        .fetcher
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("weather fetching is disabled".into()))?;

    let result = fetcher.fetch_weather(lat, lon).await;
    record_fetch(&state, result.as_ref().map(|_| ()));
    Ok(Json(result?))
}
