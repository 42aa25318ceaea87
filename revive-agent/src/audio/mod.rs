//! System mixer control

pub mod mixer;

pub use mixer::{AmixerBackend, AudioMixerControl, MixerBackend, MixerRange};
