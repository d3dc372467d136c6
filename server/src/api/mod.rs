pub mod device;
mod readings;
mod simulator;

use std::sync::Arc;

use axum::{http::StatusCode, Router};
use healthpatch_bridge::BridgeError;

use crate::AppState;

/// Build the API router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/device", device::router())
        .nest("/readings", readings::router())
        .nest("/simulator", simulator::router())
}

/// Map a session error onto the HTTP status the API reports for it
pub(crate) fn bridge_error(e: BridgeError) -> (StatusCode, String) {
    let status = match &e {
        BridgeError::NotSupported | BridgeError::NotEnabled | BridgeError::NotConnected => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        BridgeError::AlreadyConnected => StatusCode::CONFLICT,
        BridgeError::NoTagPresent | BridgeError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        BridgeError::TagLost => StatusCode::GONE,
        BridgeError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BridgeError::TagTimeout => StatusCode::GATEWAY_TIMEOUT,
        BridgeError::TransportFailure { .. } | BridgeError::ChannelIo(_) => StatusCode::BAD_GATEWAY,
        BridgeError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
