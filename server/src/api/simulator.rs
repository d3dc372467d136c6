use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use healthpatch_bridge::{NdefRecord, SensorReading};
use serde::{Deserialize, Serialize};

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tag", post(present_tag).delete(remove_tag))
}

#[derive(Debug, Deserialize)]
pub struct PresentTagRequest {
    pub uid: Vec<u8>,
    /// Raw NDEF records to put on the tag
    pub records: Option<Vec<NdefRecord>>,
    /// Shorthand for a tag carrying one health record
    pub reading: Option<SensorReading>,
}

#[derive(Debug, Serialize)]
pub struct PresentedTag {
    uid: String,
}

/// POST /api/simulator/tag - Bring a simulated tag into the reader field
async fn present_tag(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PresentTagRequest>,
) -> Result<(StatusCode, Json<PresentedTag>), (StatusCode, String)> {
    if request.uid.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Tag uid must not be empty".into()));
    }

    let records = match (request.records, request.reading) {
        (Some(records), _) => records,
        (None, Some(reading)) => vec![NdefRecord::health(reading.to_payload().to_vec())],
        (None, None) => {
            return Err((StatusCode::BAD_REQUEST, "Either records or reading is required".into()));
        }
    };

    let transport = state.session.transport();
    let uid = transport.present_tag(request.uid, records).uid_hex();
    tracing::info!("Simulated tag {} presented", uid);

    Ok((StatusCode::ACCEPTED, Json(PresentedTag { uid })))
}

/// DELETE /api/simulator/tag - Take every simulated tag out of the field
async fn remove_tag(State(state): State<Arc<AppState>>) -> Result<StatusCode, (StatusCode, String)> {
    if state.session.transport().remove_tag() {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "No tag in the field".into()))
    }
}
