use std::sync::Arc;

use healthpatch_bridge::SessionEvent;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use crate::{db, AppState};

/// Forward session events to UI clients and persist every decoded reading.
pub fn spawn_recorder(state: Arc<AppState>) -> JoinHandle<()> {
    let mut events = state.session.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Recorder lagging, skipped {} session events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            record_event(&state, event).await;
        }
    })
}

async fn record_event(state: &AppState, event: SessionEvent) {
    if let SessionEvent::Reading { uid, reading } = &event {
        state
            .history
            .write()
            .await
            .record(*reading, Some(uid.clone()));

        if let Err(e) = db::insert_reading(&state.db, Some(uid.as_str()), reading).await {
            tracing::error!("Failed to store reading from {}: {}", uid, e);
        }
    }

    match serde_json::to_string(&event) {
        Ok(json) => {
            let _ = state.ui_broadcast.send(json);
        }
        Err(e) => tracing::warn!("Cannot serialize session event: {}", e),
    }
}
