use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{Reading, Report};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
struct AppState {
    devices: Arc<RwLock<BTreeMap<String, DeviceReading>>>,
}

/// Latest reading received from one sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct DeviceReading {
    device: String,
    reading: Reading,
    received_at: u64, // milliseconds since epoch
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collector=debug,tower_http=debug".into()),
        )
        .init();

    let addr = std::env::var("COLLECTOR_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Collector listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app(AppState::default())).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/everytherm/report", post(report))
        .route("/devices", get(list_devices))
        .route("/devices/:device", get(get_device))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Store a reading pushed by a sensor. A malformed query is rejected with 400
/// by the extractor before this runs.
async fn report(State(state): State<AppState>, Query(report): Query<Report>) -> StatusCode {
    if report.device.is_empty() {
        warn!("Rejected report without a device identity");
        return StatusCode::BAD_REQUEST;
    }

    debug!("Reading {} from {}", report.reading, report.device);

    let entry = DeviceReading {
        device: report.device.clone(),
        reading: report.reading,
        received_at: now_ms(),
    };
    state.devices.write().await.insert(report.device, entry);

    StatusCode::OK
}

async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceReading>> {
    Json(state.devices.read().await.values().cloned().collect())
}

async fn get_device(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<Json<DeviceReading>, StatusCode> {
    state
        .devices
        .read()
        .await
        .get(&device)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_report_then_query() {
        let app = app(AppState::default());

        let (status, _) = send(
            &app,
            "POST",
            "/everytherm/report?device=AA:BB:CC:DD:EE:FF&reading=21",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // A newer reading replaces the old one
        let (status, _) = send(
            &app,
            "POST",
            "/everytherm/report?device=AA:BB:CC:DD:EE:FF&reading=23",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", "/devices/AA:BB:CC:DD:EE:FF").await;
        assert_eq!(status, StatusCode::OK);
        let device: DeviceReading = serde_json::from_slice(&body).unwrap();
        assert_eq!(device.device, "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.reading, 23);

        let (_, body) = send(&app, "GET", "/devices").await;
        let devices: Vec<DeviceReading> = serde_json::from_slice(&body).unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_reports() {
        let app = app(AppState::default());

        let (status, _) = send(&app, "POST", "/everytherm/report?device=AA:BB").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "POST", "/everytherm/report?device=AA:BB&reading=hot").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "POST", "/everytherm/report?device=&reading=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "GET", "/devices/AA:BB").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
