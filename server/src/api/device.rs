use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use healthpatch_bridge::{decode, SensorReading, SessionConfig, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::bridge_error;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(device_status))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/calibrate", post(calibrate))
        .route("/test", post(test_connection))
        .route("/firmware", get(firmware_version))
        .route("/raw", get(read_raw))
        .route("/config", put(update_config))
        .route("/write-calibration", post(write_calibration))
}

/// GET /api/device/status - Get reader connection status
async fn device_status(State(state): State<Arc<AppState>>) -> Json<SessionStatus> {
    Json(state.session.status().await)
}

/// POST /api/device/connect - Connect to the reader
///
/// The body is optional; given fields override the configured session settings.
async fn connect(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SessionStatus>, (StatusCode, String)> {
    let config = if body.is_empty() {
        state.config.session.clone()
    } else {
        session_overrides(&state.config.session, &body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid session config: {}", e)))?
    };

    state.session.connect(config).await.map_err(bridge_error)?;
    Ok(Json(state.session.status().await))
}

/// Lays the fields of a JSON object over `base`.
fn session_overrides(base: &SessionConfig, body: &[u8]) -> Result<SessionConfig, serde_json::Error> {
    let overrides: Map<String, Value> = serde_json::from_slice(body)?;
    let mut merged = serde_json::to_value(base)?;
    if let Value::Object(fields) = &mut merged {
        fields.extend(overrides);
    }
    serde_json::from_value(merged)
}

/// POST /api/device/disconnect - Disconnect from the reader
async fn disconnect(State(state): State<Arc<AppState>>) -> Json<SessionStatus> {
    state.session.disconnect().await;
    Json(state.session.status().await)
}

/// POST /api/device/calibrate - Run sensor calibration
async fn calibrate(State(state): State<Arc<AppState>>) -> Result<StatusCode, (StatusCode, String)> {
    state.session.calibrate().await.map_err(bridge_error)?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
pub struct TestResult {
    tag_detected: bool,
}

/// POST /api/device/test - Test reader connection and tag detection
async fn test_connection(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TestResult>, (StatusCode, String)> {
    let tag_detected = state.session.test_connection().await.map_err(bridge_error)?;
    Ok(Json(TestResult { tag_detected }))
}

#[derive(Debug, Serialize)]
pub struct FirmwareVersion {
    version: String,
}

/// GET /api/device/firmware - Get reader status / firmware string
async fn firmware_version(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FirmwareVersion>, (StatusCode, String)> {
    let version = state.session.firmware_version().await.map_err(bridge_error)?;
    Ok(Json(FirmwareVersion { version }))
}

#[derive(Debug, Serialize)]
pub struct RawData {
    bytes: Vec<u8>,
    /// Present when the bytes form a valid health payload
    reading: Option<SensorReading>,
}

/// GET /api/device/raw - Read raw sensor bytes from the driver
async fn read_raw(State(state): State<Arc<AppState>>) -> Result<Json<RawData>, (StatusCode, String)> {
    let bytes = state.session.read_raw_data().await.map_err(bridge_error)?;
    let reading = decode(&bytes).ok();
    Ok(Json(RawData { bytes, reading }))
}

/// PUT /api/device/config - Update driver configuration
async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(params): Json<serde_json::Value>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.session.update_config(&params).await.map_err(bridge_error)?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct WriteCalibrationRequest {
    pub data: Vec<u8>,
}

/// POST /api/device/write-calibration - Write calibration data to the current tag
async fn write_calibration(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WriteCalibrationRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .session
        .write_calibration_to_tag(&request.data)
        .await
        .map_err(bridge_error)?;
    Ok(StatusCode::OK)
}
