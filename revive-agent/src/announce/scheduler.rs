//! Announcement timer
//!
//! One timer per configured group. The timer task only emits
//! [`AnnouncementEvent::Due`]; whether anything plays is the controller's
//! decision. The rotation index lives outside the task so it survives
//! suspend and resume.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use revive_common::models::{Group, MediaRef};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::{AnnouncementEvent, DueAnnouncement};

/// Everything that decides when and what the timer fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePlan {
    pub fingerprint: String,
    pub announcements: Vec<MediaRef>,
    pub interval: Duration,
    pub volume: u8,
}

impl SchedulePlan {
    pub fn from_group(group: &Group) -> Self {
        Self {
            fingerprint: fingerprint(group),
            announcements: group.announcements.clone(),
            interval: Duration::from_secs(u64::from(group.announcement_interval_minutes()) * 60),
            volume: group.announcement_volume(),
        }
    }
}

/// Group id, or the serialized list for groups without one
fn fingerprint(group: &Group) -> String {
    if !group.id.is_empty() {
        return group.id.clone();
    }
    serde_json::to_string(&group.announcements).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Same plan already in place
    Unchanged,
    Armed,
    /// New plan stored but not armed while suspended
    Deferred,
    /// Group has no announcements
    Cleared,
}

pub struct AnnouncementScheduler {
    events: mpsc::UnboundedSender<AnnouncementEvent>,
    warmup: Duration,
    plan: Option<SchedulePlan>,
    timer: Option<JoinHandle<()>>,
    suspended: bool,
    next_index: Arc<AtomicUsize>,
    arm_count: u64,
}

impl AnnouncementScheduler {
    pub fn new(events: mpsc::UnboundedSender<AnnouncementEvent>, warmup: Duration) -> Self {
        Self {
            events,
            warmup,
            plan: None,
            timer: None,
            suspended: false,
            next_index: Arc::new(AtomicUsize::new(0)),
            arm_count: 0,
        }
    }

    pub fn plan(&self) -> Option<&SchedulePlan> {
        self.plan.as_ref()
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Times a timer has been armed since creation
    pub fn arm_count(&self) -> u64 {
        self.arm_count
    }

    pub fn schedule(&mut self, group: &Group) -> ScheduleOutcome {
        let plan = SchedulePlan::from_group(group);
        if self.plan.as_ref() == Some(&plan) {
            debug!(fingerprint = %plan.fingerprint, "Announcement schedule unchanged");
            return ScheduleOutcome::Unchanged;
        }

        self.stop_timer();
        self.next_index.store(0, Ordering::Relaxed);

        if plan.announcements.is_empty() {
            if self.plan.take().is_some() {
                info!(group_id = %group.id, "Announcements cleared");
            }
            return ScheduleOutcome::Cleared;
        }

        info!(
            group_id = %group.id,
            count = plan.announcements.len(),
            interval_min = plan.interval.as_secs() / 60,
            volume = plan.volume,
            "Announcement schedule configured"
        );
        self.plan = Some(plan);

        if self.suspended {
            return ScheduleOutcome::Deferred;
        }
        self.arm();
        ScheduleOutcome::Armed
    }

    /// Stop firing but keep plan and rotation
    pub fn suspend(&mut self) {
        if self.suspended {
            return;
        }
        self.stop_timer();
        self.suspended = true;
        debug!("Announcement timer suspended");
    }

    /// Re-arm after [`suspend`](Self::suspend); warm-up starts over
    pub fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        if self.plan.is_some() {
            self.arm();
            debug!("Announcement timer resumed");
        }
    }

    /// Drop timer, plan, and rotation
    pub fn cancel(&mut self) {
        self.stop_timer();
        self.suspended = false;
        self.next_index.store(0, Ordering::Relaxed);
        if self.plan.take().is_some() {
            debug!("Announcement schedule cancelled");
        }
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn arm(&mut self) {
        let Some(plan) = self.plan.clone() else {
            return;
        };
        self.stop_timer();
        self.arm_count += 1;

        let events = self.events.clone();
        let next_index = self.next_index.clone();
        let first = Instant::now() + self.warmup;

        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first, plan.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let index = next_index.fetch_add(1, Ordering::Relaxed) % plan.announcements.len();
                let due = DueAnnouncement {
                    url: plan.announcements[index].url.clone(),
                    index,
                    volume: plan.volume,
                };
                if events.send(AnnouncementEvent::Due(due)).is_err() {
                    break;
                }
            }
        }));
    }
}

impl Drop for AnnouncementScheduler {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
