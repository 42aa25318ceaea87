//! Timed announcements interleaved with the music

pub mod player;
pub mod scheduler;

pub use player::{AnnouncementPlayer, FinishOutcome, PlayOutcome};
pub use scheduler::{AnnouncementScheduler, ScheduleOutcome, SchedulePlan};

/// One fire of the announcement timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueAnnouncement {
    pub url: String,
    /// Position in the group's announcement list
    pub index: usize,
    pub volume: u8,
}

/// Inputs from the announcement side to the playback controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnouncementEvent {
    Due(DueAnnouncement),
    /// The announcement renderer for `flight` is done (or never started)
    Finished {
        flight: u64,
        url: String,
        outcome: Result<Option<i32>, String>,
    },
}
