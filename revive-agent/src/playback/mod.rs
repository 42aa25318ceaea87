//! Playback orchestration
//!
//! [`PlaybackController`] is the single authority over the renderer slot;
//! everything else talks to it through a [`PlaybackHandle`].

pub mod controller;
pub mod handle;
pub mod state;

pub use controller::{ControllerSettings, PlaybackController};
pub use handle::PlaybackHandle;
pub use state::{PlaybackPhase, PlaybackSnapshot, PlaybackState, Playlist};
