//! Configuration for the execution engine
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Machine description (axes, extruders, limits)
//! - Kinematic segmentation and mesh compensation
//! - Arc interpolation limits
//! - Channel behaviour (stack depth, report intervals, dialects)
//! - File locations and system macro names
//! - Event bus sizing

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
use gcodexec_core::{Compatibility, EventBusConfig, MachineType, MAX_AXES, MAX_EXTRUDERS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Machine description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSettings {
    /// Kind of machine
    pub machine_type: MachineType,
    /// Number of visible axes, starting from X
    pub visible_axes: usize,
    /// Number of extruder drives
    pub extruders: usize,
    /// Lower travel limit per axis in mm
    pub axis_min: Vec<f64>,
    /// Upper travel limit per axis in mm
    pub axis_max: Vec<f64>,
    /// Allow normal moves on axes that have not been homed
    pub allow_moves_before_homing: bool,
    /// Feed rate used for uncoordinated moves on non-FFF machines, in mm/min
    pub max_g0_feed_rate: f64,
    /// Feed rate assumed before the first F parameter, in mm/min
    pub default_feed_rate: f64,
    /// S value that means full laser power
    pub laser_max_power: f64,
}

impl Default for MachineSettings {
    fn default() -> Self {
        let mut axis_min = vec![-1000.0; MAX_AXES];
        let mut axis_max = vec![1000.0; MAX_AXES];
        axis_min[..3].copy_from_slice(&[0.0, 0.0, 0.0]);
        axis_max[..3].copy_from_slice(&[230.0, 210.0, 200.0]);

        Self {
            machine_type: MachineType::Fff,
            visible_axes: 3,
            extruders: 1,
            axis_min,
            axis_max,
            allow_moves_before_homing: false,
            max_g0_feed_rate: 18000.0,
            default_feed_rate: 3000.0,
            laser_max_power: 255.0,
        }
    }
}

/// Kinematic segmentation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Split straight moves into segments (needed by non-linear kinematics)
    pub enabled: bool,
    /// Target number of segments per second of motion
    pub segments_per_second: f64,
    /// Shortest segment length in mm
    pub min_segment_length: f64,
    /// Mesh compensation grid spacing in mm, if compensation is active
    pub mesh_spacing: Option<f64>,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            segments_per_second: 100.0,
            min_segment_length: 0.2,
            mesh_spacing: None,
        }
    }
}

/// Arc interpolation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcSettings {
    /// Maximum deviation of a chord from the true arc, in mm
    pub max_arc_deviation: f64,
    /// Shortest arc segment in mm
    pub min_arc_segment_length: f64,
    /// Longest arc segment in mm
    pub max_arc_segment_length: f64,
    /// Minimum number of arc segments per second at the commanded feed rate
    pub min_arc_segments_per_sec: f64,
    /// Segments between exact sine/cosine evaluations
    pub segments_per_full_calculation: u32,
}

impl Default for ArcSettings {
    fn default() -> Self {
        Self {
            max_arc_deviation: 0.005,
            min_arc_segment_length: 0.1,
            max_arc_segment_length: 2.0,
            min_arc_segments_per_sec: 50.0,
            segments_per_full_calculation: 8,
        }
    }
}

/// Channel behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Maximum number of machine-state frames per channel
    pub max_stack_depth: usize,
    /// Interval between unsolicited status reports in ms
    pub status_report_interval_ms: u64,
    /// Interval between runs of the daemon macro in ms
    pub daemon_interval_ms: u64,
    /// Dialect of every channel not listed below
    pub default_compatibility: Compatibility,
    /// Dialect of the USB channel
    pub usb_compatibility: Compatibility,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            max_stack_depth: 7,
            status_report_interval_ms: 1000,
            daemon_interval_ms: 1000,
            default_compatibility: Compatibility::RepRapFirmware,
            usb_compatibility: Compatibility::Marlin,
        }
    }
}

impl ChannelSettings {
    /// Status report interval as a `Duration`
    pub fn status_report_interval(&self) -> Duration {
        Duration::from_millis(self.status_report_interval_ms)
    }

    /// Daemon interval as a `Duration`
    pub fn daemon_interval(&self) -> Duration {
        Duration::from_millis(self.daemon_interval_ms)
    }
}

/// File locations and system macro names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Directory holding system macros
    pub system_dir: String,
    /// Directory holding print files
    pub gcode_dir: String,
    /// Run when a print pauses
    pub pause_macro: String,
    /// Run when a paused print resumes
    pub resume_macro: String,
    /// Run when a paused print is cancelled
    pub cancel_macro: String,
    /// Resume state written on every pause
    pub resume_state_file: String,
    /// Called from the resume state before re-homing
    pub resume_prologue_macro: String,
    /// Run periodically on the daemon channel
    pub daemon_macro: String,
    /// Run once at start-up
    pub config_file: String,
    /// Run by G28 with no axes
    pub home_all_macro: String,
    /// Run by M0
    pub stop_macro: String,
    /// Run by M1
    pub sleep_macro: String,
    /// Commands fed to the auto-pause channel after a power-fail pause
    pub power_fail_script: Option<String>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            system_dir: "sys".to_string(),
            gcode_dir: "gcodes".to_string(),
            pause_macro: "pause.g".to_string(),
            resume_macro: "resume.g".to_string(),
            cancel_macro: "cancel.g".to_string(),
            resume_state_file: "resurrect.g".to_string(),
            resume_prologue_macro: "resurrect-prologue.g".to_string(),
            daemon_macro: "daemon.g".to_string(),
            config_file: "config.g".to_string(),
            home_all_macro: "homeall.g".to_string(),
            stop_macro: "stop.g".to_string(),
            sleep_macro: "sleep.g".to_string(),
            power_fail_script: None,
        }
    }
}

impl FileSettings {
    /// Resolve a macro name against the system directory
    pub fn system_path(&self, name: &str) -> String {
        resolve(&self.system_dir, name)
    }

    /// Resolve a print file name against the G-code directory
    pub fn gcode_path(&self, name: &str) -> String {
        resolve(&self.gcode_dir, name)
    }
}

fn resolve(dir: &str, name: &str) -> String {
    if name.contains('/') || dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Event history kept by the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Keep a history of published events
    pub enable_history: bool,
    /// Maximum number of events kept in history
    pub max_history_size: usize,
    /// History retention in seconds
    pub history_retention_secs: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            enable_history: false,
            max_history_size: 500,
            history_retention_secs: 300,
        }
    }
}

impl EventSettings {
    /// Build the event bus configuration
    pub fn bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            enable_history: self.enable_history,
            max_history_size: self.max_history_size,
            history_retention: Duration::from_secs(self.history_retention_secs),
        }
    }
}

/// Complete engine configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Machine description
    pub machine: MachineSettings,
    /// Kinematic segmentation
    pub segmentation: SegmentationSettings,
    /// Arc interpolation
    pub arcs: ArcSettings,
    /// Channel behaviour
    pub channels: ChannelSettings,
    /// File locations
    pub files: FileSettings,
    /// Event bus sizing
    pub events: EventSettings,
}

impl EngineConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform-specific default location of the config file
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("gcodexec").join("engine.toml"))
            .ok_or_else(|| SettingsError::ConfigDirectory("no config directory".to_string()))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into());
        };

        config.validate()?;
        tracing::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Load config from file, falling back to defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self).map_err(|e| SettingsError::SaveError(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let machine = &self.machine;
        if machine.visible_axes < 2 || machine.visible_axes > MAX_AXES {
            return Err(ConfigError::out_of_range(
                "machine.visible_axes",
                machine.visible_axes,
            ));
        }
        if machine.extruders > MAX_EXTRUDERS {
            return Err(ConfigError::out_of_range(
                "machine.extruders",
                machine.extruders,
            ));
        }
        if machine.axis_min.len() < machine.visible_axes
            || machine.axis_max.len() < machine.visible_axes
        {
            return Err(ConfigError::Inconsistent(
                "axis limits must cover every visible axis".to_string(),
            ));
        }
        if let Some(axis) = (0..machine.visible_axes).find(|&a| machine.axis_min[a] > machine.axis_max[a])
        {
            return Err(ConfigError::Inconsistent(format!(
                "axis {} minimum is above its maximum",
                axis
            )));
        }
        if machine.max_g0_feed_rate <= 0.0 {
            return Err(ConfigError::out_of_range(
                "machine.max_g0_feed_rate",
                machine.max_g0_feed_rate,
            ));
        }
        if machine.default_feed_rate <= 0.0 {
            return Err(ConfigError::out_of_range(
                "machine.default_feed_rate",
                machine.default_feed_rate,
            ));
        }

        let seg = &self.segmentation;
        if seg.enabled && (seg.segments_per_second <= 0.0 || seg.min_segment_length <= 0.0) {
            return Err(ConfigError::Inconsistent(
                "segmentation needs positive segments_per_second and min_segment_length"
                    .to_string(),
            ));
        }
        if seg.mesh_spacing.is_some_and(|s| s <= 0.0) {
            return Err(ConfigError::out_of_range(
                "segmentation.mesh_spacing",
                seg.mesh_spacing.unwrap_or_default(),
            ));
        }

        let arcs = &self.arcs;
        if arcs.max_arc_deviation <= 0.0 {
            return Err(ConfigError::out_of_range(
                "arcs.max_arc_deviation",
                arcs.max_arc_deviation,
            ));
        }
        if arcs.min_arc_segment_length <= 0.0
            || arcs.max_arc_segment_length < arcs.min_arc_segment_length
        {
            return Err(ConfigError::Inconsistent(
                "arc segment lengths must satisfy 0 < min <= max".to_string(),
            ));
        }
        if arcs.min_arc_segments_per_sec <= 0.0 {
            return Err(ConfigError::out_of_range(
                "arcs.min_arc_segments_per_sec",
                arcs.min_arc_segments_per_sec,
            ));
        }

        if self.channels.max_stack_depth == 0 {
            return Err(ConfigError::out_of_range("channels.max_stack_depth", 0));
        }
        if self.events.enable_history && self.events.max_history_size == 0 {
            return Err(ConfigError::out_of_range("events.max_history_size", 0));
        }

        Ok(())
    }
}
