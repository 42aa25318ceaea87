//! Playback status endpoint

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::playback::PlaybackSnapshot;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub device_id: String,
    /// Last volume applied through the mixer
    pub volume: Option<u8>,
    pub playback: PlaybackSnapshot,
}

/// GET /status
pub async fn playback_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        device_id: state.device_id.clone(),
        volume: state.mixer.current(),
        playback: state.playback.snapshot(),
    })
}

pub fn status_routes() -> Router<AppState> {
    Router::new().route("/status", get(playback_status))
}
