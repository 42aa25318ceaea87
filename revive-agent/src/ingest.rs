//! Remote command ingestion
//!
//! Commands are acted on at most once: already-processed commands and
//! recently seen ids are skipped, and every dispatched command is marked
//! processed whether or not it succeeded.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use revive_common::models::{Command, CommandKind};
use revive_common::store::CommandSource;
use tracing::{debug, error, info, warn};

use crate::audio::AudioMixerControl;
use crate::error::Result;
use crate::playback::PlaybackHandle;
use crate::update::{UpdateJob, UpdateRunner};

/// Ids remembered to catch feed redelivery of a not-yet-processed snapshot
pub const SEEN_CAPACITY: usize = 256;

/// What happened to one delivered command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Skipped,
    Dispatched,
    Failed,
}

pub struct CommandIngestor {
    device_id: String,
    commands: Arc<dyn CommandSource>,
    playback: PlaybackHandle,
    mixer: Arc<AudioMixerControl>,
    updates: Arc<UpdateRunner>,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
}

impl CommandIngestor {
    pub fn new(
        device_id: impl Into<String>,
        commands: Arc<dyn CommandSource>,
        playback: PlaybackHandle,
        mixer: Arc<AudioMixerControl>,
        updates: Arc<UpdateRunner>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            commands,
            playback,
            mixer,
            updates,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    pub async fn run(mut self) {
        info!(device_id = %self.device_id, "Listening for commands");
        let mut feed = self.commands.watch_commands(&self.device_id);
        while let Some(command) = feed.next().await {
            self.ingest(command).await;
        }
        warn!("Command feed ended");
    }

    pub async fn ingest(&mut self, command: Command) -> Disposition {
        if command.processed || !self.remember(&command.id) {
            debug!(command_id = %command.id, "Skipping already handled command");
            return Disposition::Skipped;
        }

        info!(command_id = %command.id, action = %command.action, "Command received");

        let result = match command.kind() {
            Ok(kind) => self.dispatch(kind).await,
            Err(e) => Err(e.into()),
        };

        let disposition = match result {
            Ok(()) => Disposition::Dispatched,
            Err(e) => {
                error!(command_id = %command.id, action = %command.action, error = %e, "Command failed");
                Disposition::Failed
            }
        };

        if let Err(e) = self.commands.mark_processed(&command.id).await {
            warn!(command_id = %command.id, error = %e, "Failed to mark command processed");
        }
        disposition
    }

    /// Number of ids currently remembered
    pub fn remembered(&self) -> usize {
        self.seen.len()
    }

    /// Record `id`; `false` if it was already remembered
    fn remember(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.seen_order.push_back(id.to_string());
        if self.seen_order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    async fn dispatch(&self, kind: CommandKind) -> Result<()> {
        match kind {
            CommandKind::Play { url } => self.playback.play(url).await,
            CommandKind::Pause => self.playback.pause().await,
            CommandKind::Resume => self.playback.resume().await,
            CommandKind::Volume(volume) => {
                self.mixer.set_volume(i64::from(volume)).await;
                Ok(())
            }
            CommandKind::Update(kind) => {
                self.updates.spawn(UpdateJob::from(kind));
                Ok(())
            }
            CommandKind::Restart => {
                self.updates.spawn(UpdateJob::Restart);
                Ok(())
            }
        }
    }
}
