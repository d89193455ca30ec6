use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use fleetwx_core::{fahrenheit_to_kelvin, seed_facilities, Coordinate, WeatherSnapshot};
use fleetwx_fetch::{FetchError, FetchResult, PacerConfig, RawWeather, ThrottledFetcher, WeatherProvider};
use fleetwx_server::{refresh::refresh_once, MapSettings};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let res = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

/// Latitude 10 is rate limited, latitude 20 is down, everything else is 77F
struct StubProvider;

#[async_trait::async_trait]
impl WeatherProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn fetch(&self, coordinate: Coordinate) -> FetchResult<RawWeather> {
        if coordinate.latitude == 10.0 {
            return Err(FetchError::UpstreamRateLimited { coordinate });
        }
        if coordinate.latitude == 20.0 {
            return Err(FetchError::UpstreamUnavailable {
                coordinate,
                reason: "status 503".into(),
            });
        }
        Ok(RawWeather::from_value(json!({
            "temp": 298.15,
            "humidity": 40,
            "wind_speed": 4.0,
            "wind_deg": 90,
            "description": "few clouds",
            "weather": [{"id": 801, "main": "Clouds", "description": "few clouds", "icon": "02d"}]
        }))
        .unwrap())
    }
}

fn stub_fetcher() -> ThrottledFetcher {
    ThrottledFetcher::spawn(
        Arc::new(StubProvider),
        PacerConfig {
            requests_per_minute: 600,
            request_timeout: Duration::from_secs(5),
        },
    )
    .unwrap()
}

fn seeded_app() -> Router {
    let (app, _state) =
        fleetwx_server::build_app(seed_facilities().unwrap(), MapSettings::default(), None).unwrap();
    app
}

#[tokio::test]
async fn health_readiness_metrics_and_unknown_routes() {
    let (app, state) =
        fleetwx_server::build_app(seed_facilities().unwrap(), MapSettings::default(), None).unwrap();

    assert_eq!(get(&app, "/healthz").await.0, StatusCode::OK);
    assert_eq!(get(&app, "/readyz").await.0, StatusCode::SERVICE_UNAVAILABLE);
    fleetwx_server::set_ready(&state, true);
    assert_eq!(get(&app, "/readyz").await.0, StatusCode::OK);
    assert_eq!(get(&app, "/api/v1/nope").await.0, StatusCode::NOT_FOUND);

    let res = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let content_type = res.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"), "{content_type}");
    let text = String::from_utf8(to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("fleetwx_requests_total"), "{text}");
}

#[tokio::test]
async fn facility_search_and_detail() {
    let app = seeded_app();

    let (status, body) = get(&app, "/api/v1/facilities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 52);

    let (_, body) = get(&app, "/api/v1/facilities?q=alabama").await;
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Alabama BHM1", "Alabama HSV1"]);

    let (status, body) = get(&app, "/api/v1/facilities/AL-BHM1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "AL-BHM1");
    assert_eq!(body["latitude"], 33.5186);
    // no weather yet
    assert!(body["temperature_f"].is_null());
    assert_eq!(body["flags"], json!([]));

    let (status, body) = get(&app, "/api/v1/facilities/XX-NOPE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("XX-NOPE"));
}

#[tokio::test]
async fn state_drill_down() {
    let app = seeded_app();

    let (status, body) = get(&app, "/api/v1/states").await;
    assert_eq!(status, StatusCode::OK);
    let states = body.as_array().unwrap();
    assert_eq!(states[0]["state"], "Alabama");
    let total: u64 = states
        .iter()
        .map(|s| s["facility_count"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 52);

    let (status, body) = get(&app, "/api/v1/states/california").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["state"], "California");
    assert_eq!(body["summary"]["facility_count"], 10);
    assert_eq!(body["facilities"].as_array().unwrap().len(), 10);

    let (status, _) = get(&app, "/api/v1/states/Atlantis").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn markers_partition_the_fleet() {
    let app = seeded_app();

    for zoom in [0, 3, 6, 16] {
        let (status, body) = get(&app, &format!("/api/v1/markers?zoom={zoom}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["zoom"], zoom);
        let total: u64 = body["markers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| match m["kind"].as_str().unwrap() {
                "cluster" => m["count"].as_u64().unwrap(),
                _ => 1,
            })
            .sum();
        assert_eq!(total, 52, "zoom {zoom}");
    }

    let (_, body) = get(&app, "/api/v1/markers?zoom=16").await;
    let markers = body["markers"].as_array().unwrap();
    assert!(markers.iter().all(|m| m["kind"] == "point"));

    // zoom above the supported range is clamped
    let (_, body) = get(&app, "/api/v1/markers?zoom=30").await;
    assert_eq!(body["zoom"], 16);

    // Hawaii only
    let (_, body) = get(&app, "/api/v1/markers?zoom=16&bbox=-161,18,-154,23").await;
    let markers = body["markers"].as_array().unwrap();
    assert_eq!(markers.len(), 1);
    assert!(markers[0]["label"].as_str().unwrap().starts_with("Hawaii"));

    let (status, body) = get(&app, "/api/v1/markers?bbox=1,2,3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = get(&app, "/api/v1/markers?attribute=pressure").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn heatmap_colours_points() {
    let mut fleet = seed_facilities().unwrap();
    fleet[0].weather = WeatherSnapshot {
        temperature_k: fahrenheit_to_kelvin(50.0),
        feels_like_k: fahrenheit_to_kelvin(48.0),
        humidity: 60.0,
        description: "clear sky".into(),
        observed_at: Some(Utc::now()),
        ..Default::default()
    };
    let (app, _state) =
        fleetwx_server::build_app(fleet, MapSettings::default(), None).unwrap();

    let colour_of = |body: &Value| {
        body["markers"]
            .as_array()
            .unwrap()
            .iter()
            .find(|m| m["facility_id"] == "AL-BHM1")
            .map(|m| m["color"].as_str().unwrap().to_string())
            .unwrap()
    };

    let (_, plain) = get(&app, "/api/v1/markers?zoom=16").await;
    assert_eq!(colour_of(&plain), "#ff0000");
    assert_eq!(plain["heatmap"], false);

    let (_, heat) = get(&app, "/api/v1/markers?zoom=16&heatmap=true").await;
    assert_eq!(colour_of(&heat), "#00ff00");
    assert_eq!(heat["heatmap"], true);
}

#[tokio::test]
async fn cluster_click_detail() {
    let app = seeded_app();

    let (_, body) = get(&app, "/api/v1/markers?zoom=0").await;
    let cluster = body["markers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["kind"] == "cluster")
        .cloned()
        .unwrap();
    let id = cluster["id"].as_u64().unwrap();
    let count = cluster["count"].as_u64().unwrap();
    assert_eq!(
        cluster["label"].as_str().unwrap(),
        format!("Cluster of {count} facilities")
    );

    let (status, detail) = get(&app, &format!("/api/v1/clusters/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["count"], count);
    assert_eq!(detail["leaves"].as_array().unwrap().len() as u64, count);
    assert!(detail["expansion_zoom"].as_u64().unwrap() >= 1);
    let child_total: u64 = detail["children"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["count"].as_u64().unwrap_or(1))
        .sum();
    assert_eq!(child_total, count);

    let (status, _) = get(&app, "/api/v1/clusters/999999999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/api/v1/clusters/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn weather_proxy_status_codes() {
    let (app, _state) = fleetwx_server::build_app(
        seed_facilities().unwrap(),
        MapSettings::default(),
        Some(stub_fetcher()),
    )
    .unwrap();

    let (status, body) = get(&app, "/api/weather?lat=33.5&lon=-86.8").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["temperature_k"], 298.15);
    assert_eq!(body["description"], "few clouds");

    let (status, _) = get(&app, "/api/weather?lon=-86.8").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&app, "/api/weather?lat=abc&lon=-86.8").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&app, "/api/weather?lat=95&lon=-86.8").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/weather?lat=10&lon=0").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let (status, _) = get(&app, "/api/weather?lat=20&lon=0").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let metrics = String::from_utf8(body.to_vec()).unwrap();
    assert!(metrics.contains("fleetwx_weather_fetches_total"));
}

#[tokio::test]
async fn weather_proxy_without_fetcher() {
    let app = seeded_app();
    let (status, _) = get(&app, "/api/weather?lat=33.5&lon=-86.8").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(start_paused = true)]
async fn refresh_publishes_weather_and_readiness() {
    let mut fleet = seed_facilities().unwrap();
    fleet.truncate(5);
    let fetcher = stub_fetcher();
    let (app, state) =
        fleetwx_server::build_app(fleet, MapSettings::default(), Some(fetcher.clone())).unwrap();

    let (status, _) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    assert_eq!(refresh_once(&state, &fetcher).await, 5);

    let (status, _) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&app, "/api/v1/facilities/AL-BHM1").await;
    assert_eq!(body["temperature_f"].as_f64().unwrap().round(), 77.0);
    assert_eq!(body["category"], "clouds");
    assert_eq!(body["wind_direction"], "E");

    let (_, body) = get(&app, "/api/v1/markers?zoom=0").await;
    assert!(body["refreshed_at"].is_string());
}

#[test]
fn map_settings_from_config() {
    let mut cfg = fleetwx_config::AppConfig::default();
    assert_eq!(MapSettings::from_config(&cfg).unwrap(), MapSettings::default());

    cfg.heatmap.attribute = "humidity".into();
    cfg.heatmap.enabled = true;
    let settings = MapSettings::from_config(&cfg).unwrap();
    assert_eq!(settings.attribute, fleetwx_cluster::HeatAttribute::Humidity);
    assert!(settings.heatmap_default);

    cfg.heatmap.colors[1] = "yellow".into();
    assert!(MapSettings::from_config(&cfg).is_err());
}
