//! revive-agent library - networked speaker playback agent
//!
//! Keeps exactly one audio renderer playing what the device's group asks
//! for, interleaves timed announcements, applies remote commands, and
//! reports liveness back to the document store.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

pub mod announce;
pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod ingest;
pub mod playback;
pub mod player;
pub mod update;
pub mod watcher;

pub use error::{Error, Result};

use audio::AudioMixerControl;
use playback::PlaybackHandle;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub device_id: String,
    pub playback: PlaybackHandle,
    pub mixer: Arc<AudioMixerControl>,
}

impl AppState {
    pub fn new(device_id: impl Into<String>, playback: PlaybackHandle, mixer: Arc<AudioMixerControl>) -> Self {
        Self {
            device_id: device_id.into(),
            playback,
            mixer,
        }
    }
}

/// Build the status API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::status_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
