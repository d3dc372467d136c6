use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use healthpatch_bridge::{SensorReading, Statistics};
use serde::{Deserialize, Serialize};

use crate::{db::Reading, AppState};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;
const SECONDS_PER_DAY: i64 = 86_400;
const EXPORT_HEADER: [&str; 5] = ["timestamp", "temperature", "ph", "glucose", "tag_uid"];

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_readings).delete(clear_readings))
        .route("/latest", get(latest_reading))
        .route("/stats", get(reading_stats))
        .route("/dates", get(reading_dates))
        .route("/export", get(export_readings))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Number of readings to return, newest first
    limit: Option<i64>,
    /// Only readings recorded at or after this instant (RFC 3339)
    since: Option<DateTime<Utc>>,
}

/// GET /api/readings - List stored readings
async fn list_readings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Reading>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let since = query.since.map(|since| since.timestamp());
    let readings = crate::db::list_readings(&state.db, limit, since)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(readings))
}

#[derive(Debug, Serialize)]
pub struct Cleared {
    deleted: u64,
}

/// DELETE /api/readings - Drop stored readings and the in-memory history
async fn clear_readings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Cleared>, (StatusCode, String)> {
    let deleted = crate::db::clear_readings(&state.db)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state.history.write().await.clear();
    tracing::info!("Cleared {} stored readings", deleted);

    Ok(Json(Cleared { deleted }))
}

/// GET /api/readings/latest - Last reading decoded by the session
async fn latest_reading(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SensorReading>, (StatusCode, String)> {
    state
        .session
        .last_reading()
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "No tag read yet".into()))
}

/// GET /api/readings/stats - Min/max/avg over the in-memory history
async fn reading_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Statistics>, (StatusCode, String)> {
    state
        .history
        .read()
        .await
        .statistics()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "No readings recorded".into()))
}

/// GET /api/readings/dates - Days (UTC) with stored readings
async fn reading_dates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    crate::db::reading_dates(&state.db)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// Restrict the export to one UTC day, `YYYY-MM-DD`
    date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    timestamp: String,
    temperature: f64,
    ph: f64,
    glucose: f64,
    tag_uid: Option<&'a str>,
}

/// GET /api/readings/export - Stored readings as CSV, oldest first
async fn export_readings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (from, to, filename) = match query.date {
        Some(date) => {
            let start = date.and_time(NaiveTime::MIN).and_utc().timestamp();
            (start, start + SECONDS_PER_DAY, format!("sensor_data_{date}.csv"))
        }
        None => (
            i64::MIN,
            i64::MAX,
            format!("sensor_export_{}.csv", Utc::now().format("%Y%m%d_%H%M%S")),
        ),
    };

    let readings = crate::db::readings_between(&state.db, from, to)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let body = to_csv(&readings).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    ))
}

fn to_csv(readings: &[Reading]) -> Result<Vec<u8>, String> {
    // Empty exports still carry the header row
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER).map_err(|e| e.to_string())?;
    for reading in readings {
        let timestamp = DateTime::<Utc>::from_timestamp(reading.recorded_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| reading.recorded_at.to_string());
        writer
            .serialize(ExportRow {
                timestamp,
                temperature: reading.temperature,
                ph: reading.ph,
                glucose: reading.glucose,
                tag_uid: reading.tag_uid.as_deref(),
            })
            .map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.error().to_string())
}
