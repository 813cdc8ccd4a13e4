//! gcodexec Settings Crate
//!
//! Handles engine configuration: loading, saving and validation.

pub mod config;
pub mod error;

pub use config::{
    ArcSettings, ChannelSettings, EngineConfig, EventSettings, FileSettings, MachineSettings,
    SegmentationSettings,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
