mod ui;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub use ui::ui_ws;

/// Build the WebSocket router
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ui", axum::routing::get(ui_ws))
}
