//! Renderer subprocess lifecycle events

/// Lifecycle event for one spawned renderer
///
/// Every spawn gets a fresh generation. The controller compares it with the
/// live generation so that a superseded process's exit is never mistaken for
/// the end of the current track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Process survived the verification delay
    Started { generation: u64, pid: u32, url: String },

    /// Process exited; `code` is `None` when killed by a signal
    Exited {
        generation: u64,
        url: String,
        code: Option<i32>,
    },

    /// Spawn itself failed
    Failed {
        generation: u64,
        url: String,
        error: String,
    },
}

impl PlayerEvent {
    pub fn generation(&self) -> u64 {
        match self {
            PlayerEvent::Started { generation, .. }
            | PlayerEvent::Exited { generation, .. }
            | PlayerEvent::Failed { generation, .. } => *generation,
        }
    }
}
