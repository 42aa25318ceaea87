//! Scriptable stand-in for the renderer launcher
//!
//! Spawns nothing. Each "process" is a pid plus an exit channel the test
//! fires with [`FakeLauncher::finish`]. Signals are recorded; KILL also ends
//! the process the way the real OS would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use revive_agent::player::{ProcessLauncher, ProcessSignal, RenderRequest, SpawnedProcess};
use revive_agent::{Error, Result};
use tokio::sync::{oneshot, watch};

#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub pid: u32,
    pub request: RenderRequest,
}

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    spawns: Vec<SpawnRecord>,
    live: HashMap<u32, oneshot::Sender<Option<i32>>>,
    signals: Vec<(u32, ProcessSignal)>,
    sweeps: usize,
    refuse_spawns: usize,
    refuse_signal: Option<ProcessSignal>,
}

pub struct FakeLauncher {
    state: Mutex<FakeState>,
    spawned: watch::Sender<usize>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        let (spawned, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(FakeState {
                next_pid: 1000,
                ..Default::default()
            }),
            spawned,
        })
    }

    pub fn spawns(&self) -> Vec<SpawnRecord> {
        self.state.lock().unwrap().spawns.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().spawns.len()
    }

    pub fn last_spawn(&self) -> SpawnRecord {
        self.spawns().pop().expect("nothing spawned yet")
    }

    pub fn urls(&self) -> Vec<String> {
        self.spawns().into_iter().map(|s| s.request.url).collect()
    }

    pub fn signals_for(&self, pid: u32) -> Vec<ProcessSignal> {
        self.state
            .lock()
            .unwrap()
            .signals
            .iter()
            .filter(|(p, _)| *p == pid)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn sweeps(&self) -> usize {
        self.state.lock().unwrap().sweeps
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.state.lock().unwrap().live.contains_key(&pid)
    }

    /// End a process with `code` (`None` reads as killed)
    pub fn finish(&self, pid: u32, code: Option<i32>) {
        let sender = self.state.lock().unwrap().live.remove(&pid);
        if let Some(sender) = sender {
            let _ = sender.send(code);
        }
    }

    pub fn refuse_next_spawns(&self, count: usize) {
        self.state.lock().unwrap().refuse_spawns = count;
    }

    pub fn refuse_signal(&self, signal: ProcessSignal) {
        self.state.lock().unwrap().refuse_signal = Some(signal);
    }

    /// Wait until at least `count` processes were spawned
    pub async fn wait_for_spawns(&self, count: usize) -> Vec<SpawnRecord> {
        let mut rx = self.spawned.subscribe();
        tokio::time::timeout(
            std::time::Duration::from_secs(3600),
            rx.wait_for(|spawned| *spawned >= count),
        )
        .await
        .expect("timed out waiting for spawns")
        .expect("launcher dropped");
        self.spawns()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, request: &RenderRequest) -> Result<SpawnedProcess> {
        let (pid, exited, total) = {
            let mut state = self.state.lock().unwrap();
            if state.refuse_spawns > 0 {
                state.refuse_spawns -= 1;
                return Err(Error::Process("spawn refused".into()));
            }
            state.next_pid += 1;
            let pid = state.next_pid;
            let (tx, rx) = oneshot::channel();
            state.live.insert(pid, tx);
            state.spawns.push(SpawnRecord {
                pid,
                request: request.clone(),
            });
            (pid, rx, state.spawns.len())
        };
        self.spawned.send_replace(total);
        Ok(SpawnedProcess { pid, exited })
    }

    async fn signal(&self, pid: u32, signal: ProcessSignal) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.signals.push((pid, signal));
        if state.refuse_signal == Some(signal) {
            return Err(Error::Process(format!("{} refused", signal.name())));
        }
        if !state.live.contains_key(&pid) {
            return Err(Error::Process(format!("no such process {}", pid)));
        }
        if signal == ProcessSignal::Kill {
            if let Some(sender) = state.live.remove(&pid) {
                let _ = sender.send(None);
            }
        }
        Ok(())
    }

    async fn sweep(&self) -> Result<()> {
        self.state.lock().unwrap().sweeps += 1;
        Ok(())
    }
}
