//! HTTP request handlers
//!
//! Implements REST API endpoints for the IoT farming backend.

use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier;
use crate::error::AppError;
use crate::ingest::process_reading;
use crate::models::{
    ActivityInput, HealthCheck, Reading, StatusLevel, TelemetryRecord, ThresholdProfile,
};
use crate::state::AppState;
use crate::validation::{validate_activity, validate_device_id, validate_limit, validate_reading};
use crate::websocket::WsSession;

type SharedState = web::Data<Arc<RwLock<AppState>>>;

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Health check
            .route("/health", web::get().to(health_check))
            // Telemetry ingestion
            .route("/telemetry", web::post().to(ingest_reading))
            // Device status and history
            .route("/devices", web::get().to(list_devices))
            .route("/devices/{id}", web::get().to(get_device))
            .route("/devices/{id}/telemetry", web::get().to(get_device_telemetry))
            .route("/devices/{id}/activity", web::post().to(record_device_activity))
            .route("/activity", web::get().to(get_activity))
            // Classification profiles and dashboard summary
            .route("/thresholds", web::get().to(get_thresholds))
            .route("/sensors/data", web::get().to(get_sensors_data)),
    )
    // WebSocket endpoint
    .route("/ws", web::get().to(websocket_handler));
}

/// Health check endpoint
///
/// GET /api/health
pub async fn health_check(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;

    let health = HealthCheck {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        storage_backend: state.storage().backend().to_string(),
        connected_clients: state.client_count(),
        total_readings: state.total_readings(),
        last_reading: state.last_reading_time(),
    };

    Ok(HttpResponse::Ok().json(health))
}

/// Ingest a reading
///
/// POST /api/telemetry
///
/// Classifies the reading, upserts the device status and appends the value.
pub async fn ingest_reading(
    state: SharedState,
    body: web::Json<Reading>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let reading = body.into_inner();

    info!(
        correlation_id = %correlation_id,
        device_id = reading.device_id,
        "Received reading ingestion request"
    );

    validate_reading(&reading)?;

    let storage = state.read().await.storage().clone();
    let outcome = process_reading(&storage, &reading).await;
    state.write().await.note_reading(outcome.status.last_updated);

    info!(
        correlation_id = %correlation_id,
        device_id = reading.device_id,
        status = %outcome.status.status,
        stored_in = ?outcome.stored_in,
        "Reading ingested successfully"
    );

    Ok(HttpResponse::Created()
        .insert_header(("X-Correlation-ID", correlation_id))
        .json(outcome))
}

/// Latest status of every device
///
/// GET /api/devices
pub async fn list_devices(state: SharedState) -> Result<HttpResponse, AppError> {
    let storage = state.read().await.storage().clone();
    Ok(HttpResponse::Ok().json(storage.device_statuses().await))
}

/// Latest status of one device
///
/// GET /api/devices/{id}
pub async fn get_device(state: SharedState, path: web::Path<i32>) -> Result<HttpResponse, AppError> {
    let device_id = validate_device_id(path.into_inner())?;
    let storage = state.read().await.storage().clone();

    match storage.device_status(device_id).await {
        Some(status) => Ok(HttpResponse::Ok().json(status)),
        None => Err(not_found(device_id)),
    }
}

/// Query parameters for history endpoints
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

/// Recent telemetry of one device, newest first
///
/// GET /api/devices/{id}/telemetry?limit=100
pub async fn get_device_telemetry(
    state: SharedState,
    path: web::Path<i32>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, AppError> {
    let device_id = validate_device_id(path.into_inner())?;
    let limit = validate_limit(query.limit)?;
    let storage = state.read().await.storage().clone();

    let records = storage.recent_telemetry(device_id, limit).await;
    Ok(HttpResponse::Ok().json(records))
}

/// Record a device activity entry
///
/// POST /api/devices/{id}/activity
pub async fn record_device_activity(
    state: SharedState,
    path: web::Path<i32>,
    body: web::Json<ActivityInput>,
) -> Result<HttpResponse, AppError> {
    let device_id = validate_device_id(path.into_inner())?;
    validate_activity(&body)?;

    let storage = state.read().await.storage().clone();
    let record = storage
        .record_activity(device_id, &body.action, &body.status)
        .await;

    Ok(HttpResponse::Created().json(record))
}

/// Recent activity across all devices, newest first
///
/// GET /api/activity?limit=100
pub async fn get_activity(
    state: SharedState,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = validate_limit(query.limit)?;
    let storage = state.read().await.storage().clone();
    Ok(HttpResponse::Ok().json(storage.recent_activity(limit).await))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThresholdEntry {
    device_type: &'static str,
    threshold: ThresholdProfile,
}

/// Built-in threshold profiles
///
/// GET /api/thresholds
pub async fn get_thresholds() -> HttpResponse {
    let entries: Vec<ThresholdEntry> = classifier::profiles()
        .into_iter()
        .map(|(device_type, threshold)| ThresholdEntry {
            device_type,
            threshold,
        })
        .collect();

    HttpResponse::Ok().json(entries)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SensorSummary {
    id: String,
    name: String,
    value: f64,
    unit: String,
    status: StatusLevel,
}

#[derive(Debug, Default, Serialize)]
struct StatusCounts {
    normal: usize,
    warning: usize,
    critical: usize,
}

/// One chart entry per day: `{"name": "Mar 04", "temperature": 22.1, ...}`
#[derive(Debug, Serialize)]
struct ChartPoint {
    name: String,
    #[serde(flatten)]
    values: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct HumidityPoint {
    name: String,
    value: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardResponse {
    success: bool,
    sensors: Vec<SensorSummary>,
    status_counts: StatusCounts,
    chart_data: Vec<ChartPoint>,
    humidity_data: Vec<HumidityPoint>,
}

const CHART_WINDOW_DAYS: i64 = 30;
const HUMIDITY_WINDOW_HOURS: i64 = 24;
const HUMIDITY_POINTS: u32 = 24;

/// Group the latest value per device type and day into chart entries,
/// oldest day first.
fn chart_points(daily: Vec<(String, TelemetryRecord)>) -> Vec<ChartPoint> {
    let mut days: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
    for (device_type, record) in daily {
        days.entry(record.recorded_at.date_naive())
            .or_default()
            .insert(device_type, record.value);
    }

    days.into_iter()
        .map(|(day, values)| ChartPoint {
            name: day.format("%b %d").to_string(),
            values,
        })
        .collect()
}

fn humidity_points(records: Vec<TelemetryRecord>) -> Vec<HumidityPoint> {
    records
        .into_iter()
        .map(|r| HumidityPoint {
            name: r.recorded_at.format("%H:%M").to_string(),
            value: r.value,
        })
        .collect()
}

/// Dashboard summary: latest value per sensor, counts per status, a daily
/// chart over the last 30 days and the last 24 humidity readings of the day
///
/// GET /api/sensors/data
pub async fn get_sensors_data(state: SharedState) -> Result<HttpResponse, AppError> {
    let storage = state.read().await.storage().clone();
    let statuses = storage.device_statuses().await;

    let now = Utc::now();
    let chart_data = chart_points(
        storage
            .daily_telemetry(now - ChronoDuration::days(CHART_WINDOW_DAYS))
            .await,
    );
    let humidity_data = humidity_points(
        storage
            .recent_telemetry_by_type(
                "humidity",
                now - ChronoDuration::hours(HUMIDITY_WINDOW_HOURS),
                HUMIDITY_POINTS,
            )
            .await,
    );

    let mut counts = StatusCounts::default();
    for status in &statuses {
        match status.status {
            StatusLevel::Normal => counts.normal += 1,
            StatusLevel::Warning => counts.warning += 1,
            StatusLevel::Critical => counts.critical += 1,
        }
    }

    let sensors = statuses
        .into_iter()
        .map(|s| SensorSummary {
            id: s.id,
            name: s.name,
            value: s.last_value,
            unit: s.unit,
            status: s.status,
        })
        .collect();

    Ok(HttpResponse::Ok().json(DashboardResponse {
        success: true,
        sensors,
        status_counts: counts,
        chart_data,
        humidity_data,
    }))
}

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: SharedState,
) -> Result<HttpResponse, actix_web::Error> {
    let client_id = Uuid::new_v4().to_string();

    info!(client_id = %client_id, "WebSocket connection request");

    // Register client
    let (storage, interval) = {
        let mut state = state.write().await;
        state.add_client(client_id.clone());
        (state.storage().clone(), state.broadcast_interval())
    };

    let ws_session = WsSession::new(client_id.clone(), state.get_ref().clone(), storage, interval);

    let response = actix_web_actors::ws::start(ws_session, &req, stream);
    if let Err(e) = &response {
        // The session never started, so it will not unregister itself.
        warn!(client_id = %client_id, error = %e, "WebSocket handshake failed");
        state.write().await.remove_client(&client_id);
    }
    response
}

fn not_found(device_id: i32) -> AppError {
    AppError::NotFound(format!("No status recorded for device {device_id}"))
}

/// Extract or generate correlation ID from request headers
fn extract_correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceStatus, WsMessage};
    use crate::storage::Storage;
    use actix_web::{test, App};
    use futures::StreamExt;

    fn test_state() -> Arc<RwLock<AppState>> {
        Arc::new(RwLock::new(AppState::new(Storage::fallback_only())))
    }

    fn reading_json(device_id: i32, device_type: &str, value: f64) -> serde_json::Value {
        serde_json::json!({
            "deviceId": device_id,
            "deviceName": "Test Sensor",
            "deviceType": device_type,
            "value": value,
            "unit": "%"
        })
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storageBackend"], "fallback");
        assert_eq!(body["totalReadings"], 0);
        assert_eq!(body["connectedClients"], 0);
    }

    #[actix_web::test]
    async fn test_ingest_valid_reading() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/telemetry")
            .set_json(reading_json(2, "humidity", 82.0))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"]["id"], "humidity002");
        assert_eq!(body["status"]["status"], "warning");
        assert_eq!(body["storedIn"], "fallback");
        assert_eq!(body["telemetry"]["dataId"], 1);

        assert_eq!(state.read().await.total_readings(), 1);
    }

    #[actix_web::test]
    async fn test_ingest_invalid_reading() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/telemetry")
            .set_json(reading_json(0, "humidity", 50.0))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_get_unknown_device() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/devices/7").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);

        let req = test::TestRequest::get().uri("/api/devices/0").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_device_status_and_history_after_ingest() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .configure(configure_routes),
        )
        .await;

        for value in [30.0, 40.0] {
            let req = test::TestRequest::post()
                .uri("/api/telemetry")
                .set_json(reading_json(3, "soil_moisture", value))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 201);
        }

        let req = test::TestRequest::get().uri("/api/devices/3").to_request();
        let status: DeviceStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.id, "soil_moisture003");
        assert_eq!(status.last_value, 40.0);
        assert_eq!(status.status, StatusLevel::Normal);

        let req = test::TestRequest::get().uri("/api/devices").to_request();
        let all: Vec<DeviceStatus> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(all.len(), 1);

        let req = test::TestRequest::get()
            .uri("/api/devices/3/telemetry?limit=1")
            .to_request();
        let history: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["value"], 40.0);

        let req = test::TestRequest::get()
            .uri("/api/devices/3/telemetry?limit=5000")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_activity_endpoints() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/devices/1/activity")
            .set_json(serde_json::json!({ "action": "Start Telemetry" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);

        let req = test::TestRequest::post()
            .uri("/api/devices/1/activity")
            .set_json(serde_json::json!({ "action": "" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::get().uri("/api/activity").to_request();
        let activity: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(activity.as_array().unwrap().len(), 1);
        assert_eq!(activity[0]["action"], "Start Telemetry");
        assert_eq!(activity[0]["status"], "Active");
    }

    #[actix_web::test]
    async fn test_thresholds_and_dashboard() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/thresholds").to_request();
        let thresholds: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(thresholds.as_array().unwrap().len(), 4);
        assert_eq!(thresholds[0]["deviceType"], "temperature");
        assert_eq!(thresholds[3]["threshold"]["criticalMax"], 95.0);

        for (id, ty, value) in [(1, "temperature", 14.0), (2, "humidity", 60.0)] {
            let req = test::TestRequest::post()
                .uri("/api/telemetry")
                .set_json(reading_json(id, ty, value))
                .to_request();
            test::call_service(&app, req).await;
        }

        let req = test::TestRequest::get().uri("/api/sensors/data").to_request();
        let dashboard: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(dashboard["success"], true);
        assert_eq!(dashboard["sensors"].as_array().unwrap().len(), 2);
        assert_eq!(dashboard["statusCounts"]["critical"], 1);
        assert_eq!(dashboard["statusCounts"]["normal"], 1);

        let chart = dashboard["chartData"].as_array().unwrap();
        assert_eq!(chart.len(), 1);
        assert_eq!(chart[0]["temperature"], 14.0);
        assert_eq!(chart[0]["humidity"], 60.0);
        assert!(chart[0]["name"].is_string());

        let humidity = dashboard["humidityData"].as_array().unwrap();
        assert_eq!(humidity.len(), 1);
        assert_eq!(humidity[0]["value"], 60.0);
        assert_eq!(humidity[0]["name"].as_str().unwrap().len(), 5);
    }

    #[::core::prelude::v1::test]
    fn test_chart_points_group_by_day() {
        let record = |value: f64, at: chrono::DateTime<Utc>| TelemetryRecord {
            data_id: 1,
            device_id: 1,
            value,
            unit: "%".into(),
            status: StatusLevel::Normal,
            recorded_at: at,
        };
        let day_one = chrono::DateTime::parse_from_rfc3339("2025-03-04T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let day_two = day_one + ChronoDuration::days(1);

        let points = chart_points(vec![
            ("humidity".into(), record(61.0, day_two)),
            ("temperature".into(), record(22.5, day_one)),
            ("humidity".into(), record(55.0, day_one)),
        ]);

        let json = serde_json::to_value(&points).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                { "name": "Mar 04", "humidity": 55.0, "temperature": 22.5 },
                { "name": "Mar 05", "humidity": 61.0 }
            ])
        );

        let humidity = serde_json::to_value(humidity_points(vec![record(61.0, day_two)])).unwrap();
        assert_eq!(humidity, serde_json::json!([{ "name": "10:00", "value": 61.0 }]));
    }

    #[actix_web::test]
    async fn test_failed_ws_handshake_does_not_register_client() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure_routes),
        )
        .await;

        for _ in 0..3 {
            let req = test::TestRequest::get().uri("/ws").to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);
        }

        assert_eq!(state.read().await.client_count(), 0);
    }

    #[actix_web::test]
    async fn test_live_server_health_and_ws_greeting() {
        let state = test_state();
        let mut srv = actix_test::start(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure_routes)
        });

        let health: serde_json::Value = reqwest::get(srv.url("/api/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");

        let mut framed = srv.ws_at("/ws").await.unwrap();
        let frame = framed.next().await.unwrap().unwrap();

        match frame {
            actix_web_actors::ws::Frame::Text(bytes) => {
                let msg: WsMessage = serde_json::from_slice(&bytes).unwrap();
                assert!(matches!(msg, WsMessage::Connected { .. }));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
