//! Audio renderer subprocess management

pub mod events;
pub mod launcher;
pub mod process;

pub use events::PlayerEvent;
pub use launcher::{MpvLauncher, ProcessLauncher, ProcessSignal, RenderRequest, SpawnedProcess};
pub use process::{PlayerProcess, ResumeOutcome, StartOutcome, SuspendOutcome};
