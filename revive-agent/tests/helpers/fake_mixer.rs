//! Recording mixer backend

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use revive_agent::audio::MixerBackend;
use revive_agent::{Error, Result};

#[derive(Default)]
pub struct FakeMixer {
    applied: Mutex<Vec<i64>>,
    probes: AtomicU32,
    failing_probes: AtomicU32,
}

impl FakeMixer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn applied(&self) -> Vec<i64> {
        self.applied.lock().unwrap().clone()
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Make the next `count` probes report the device as missing
    pub fn fail_probes(&self, count: u32) {
        self.failing_probes.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl MixerBackend for FakeMixer {
    async fn apply_raw(&self, raw: i64) -> Result<()> {
        self.applied.lock().unwrap().push(raw);
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_probes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_probes.store(failing - 1, Ordering::SeqCst);
            return Err(Error::Mixer("no such card".into()));
        }
        Ok(())
    }
}
