//! Configuration management for the playback agent
//!
//! Bootstrap configuration comes from a TOML file; every field has a
//! built-in default so the agent runs without one.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--device-id, --database, --port)
//! 2. Environment variables (via clap `env`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! The device id falls back to the host's `/etc/machine-id` when no other
//! source supplies one.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name searched in the standard locations
const CONFIG_FILE_NAME: &str = "agent.toml";

/// Application directory name under config/data roots
const APP_DIR: &str = "radio-revive";

const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Machine-id prefix length used as a device id
const MACHINE_ID_PREFIX_LEN: usize = 16;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Device identity (optional, see module docs for fallback)
    pub device_id: Option<String>,
    pub store: StoreConfig,
    pub renderer: RendererConfig,
    pub mixer: MixerConfig,
    pub timing: TimingConfig,
    pub bootstrap: BootstrapConfig,
    pub updates: UpdateConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Which document store backs the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    /// In-process only; useful for standalone trials
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Change-feed polling period for the SQLite backend
    pub poll_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            database_path: default_database_path(),
            poll_interval_ms: 1000,
        }
    }
}

impl StoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Audio renderer subprocess settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub program: String,
    pub audio_device: String,
    /// Extra arguments placed before the URL
    pub extra_args: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "mpv".to_string(),
            audio_device: "alsa".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// System mixer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub program: String,
    pub control: String,
    /// Raw value for 0 %
    pub raw_min: i64,
    /// Raw value for 100 %
    pub raw_max: i64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            program: "amixer".to_string(),
            control: "PCM".to_string(),
            raw_min: -10239,
            raw_max: 400,
        }
    }
}

/// Playback timing constants
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_secs: u64,
    /// How long a fresh subprocess must survive to count as started
    pub start_verify_ms: u64,
    /// Pause after killing a subprocess before spawning the next
    pub switch_settle_ms: u64,
    /// Base delay before looping or advancing after an exit
    pub restart_delay_ms: u64,
    /// Consecutive failed starts before giving up
    pub max_start_failures: u32,
    pub announcement_warmup_secs: u64,
    /// Pause between suspending music and starting an announcement
    pub announcement_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 5,
            start_verify_ms: 2000,
            switch_settle_ms: 1500,
            restart_delay_ms: 1000,
            max_start_failures: 5,
            announcement_warmup_secs: 60,
            announcement_settle_ms: 500,
        }
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn start_verify_delay(&self) -> Duration {
        Duration::from_millis(self.start_verify_ms)
    }

    pub fn switch_settle_delay(&self) -> Duration {
        Duration::from_millis(self.switch_settle_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn announcement_warmup(&self) -> Duration {
        Duration::from_secs(self.announcement_warmup_secs)
    }

    pub fn announcement_settle_delay(&self) -> Duration {
        Duration::from_millis(self.announcement_settle_ms)
    }
}

/// Auto-play retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub initial_delay_secs: u64,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub max_attempts: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 10,
            base_delay_secs: 5,
            max_delay_secs: 30,
            max_attempts: 10,
        }
    }
}

impl BootstrapConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Administrative update steps, each an argv vector
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub system_upgrade: Vec<String>,
    pub source_sync: Vec<String>,
    pub reboot: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect();
        Self {
            system_upgrade: argv(&["sudo", "sh", "-c", "apt-get update && apt-get -y upgrade"]),
            source_sync: argv(&["git", "-C", "/opt/radio-revive", "pull", "--ff-only"]),
            reboot: argv(&["sudo", "reboot"]),
        }
    }
}

/// Local status API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 5750,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR).join("revive.db"))
        .unwrap_or_else(|| PathBuf::from("/var/lib").join(APP_DIR).join("revive.db"))
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub device_id: Option<String>,
    pub database_path: Option<PathBuf>,
    pub port: Option<u16>,
}

/// Complete, resolved agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub device_id: String,
    /// File the settings came from, `None` for built-in defaults
    pub source: Option<PathBuf>,
    pub store: StoreConfig,
    pub renderer: RendererConfig,
    pub mixer: MixerConfig,
    pub timing: TimingConfig,
    pub bootstrap: BootstrapConfig,
    pub updates: UpdateConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration and apply overrides
    ///
    /// An explicit `path` must exist and parse. Without one, the standard
    /// locations are searched and a missing file means built-in defaults.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let (toml_config, source) = match path {
            Some(path) => (read_toml(path)?, Some(path.to_path_buf())),
            None => match search_paths().into_iter().find(|p| p.is_file()) {
                Some(found) => (read_toml(&found)?, Some(found)),
                None => (TomlConfig::default(), None),
            },
        };

        Self::resolve(toml_config, source, overrides, read_machine_id)
    }

    /// Merge TOML values with overrides; `machine_id` supplies the fallback id
    pub fn resolve(
        toml_config: TomlConfig,
        source: Option<PathBuf>,
        overrides: ConfigOverrides,
        machine_id: impl FnOnce() -> Option<String>,
    ) -> Result<Self> {
        let device_id = overrides
            .device_id
            .or(toml_config.device_id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(machine_id)
            .ok_or_else(|| {
                Error::Config(
                    "no device id: pass --device-id, set REVIVE_DEVICE_ID, or add device_id to the config file"
                        .to_string(),
                )
            })?;

        let mut store = toml_config.store;
        if let Some(database_path) = overrides.database_path {
            store.database_path = database_path;
        }

        let mut api = toml_config.api;
        if let Some(port) = overrides.port {
            api.port = port;
        }

        if toml_config.mixer.raw_min >= toml_config.mixer.raw_max {
            return Err(Error::Config(format!(
                "mixer raw_min ({}) must be below raw_max ({})",
                toml_config.mixer.raw_min, toml_config.mixer.raw_max
            )));
        }

        Ok(Config {
            device_id,
            source,
            store,
            renderer: toml_config.renderer,
            mixer: toml_config.mixer,
            timing: toml_config.timing,
            bootstrap: toml_config.bootstrap,
            updates: toml_config.updates,
            api,
            logging: toml_config.logging,
        })
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
    toml::from_str(&text).map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(APP_DIR).join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE_NAME));
    paths
}

fn read_machine_id() -> Option<String> {
    let raw = std::fs::read_to_string(MACHINE_ID_PATH).ok()?;
    machine_id_prefix(&raw)
}

fn machine_id_prefix(raw: &str) -> Option<String> {
    let id: String = raw.trim().chars().take(MACHINE_ID_PREFIX_LEN).collect();
    (!id.is_empty()).then_some(id)
}
