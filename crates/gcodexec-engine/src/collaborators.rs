//! Interfaces to the subsystems the engine drives but does not own
//!
//! The engine never touches step generation, heater control, tool drivers
//! or storage directly. It talks to them through these narrow traits so a
//! real machine, a simulator or a test double can be plugged in.

use crate::kinematics::Kinematics;
use crate::motion::SegmentSource;
use crate::restore::RestorePoint;
use gcodexec_core::{Coords, MAX_AXES};
use std::io;
use std::sync::Arc;

/// Trait for the motion system that consumes segments
pub trait MotionSink: Send + Sync {
    /// Give the motion system a chance to pull segments
    ///
    /// A motion system running on its own thread can leave this empty and
    /// pull from its own handle to the source instead.
    fn poll(&self, source: &SegmentSource);

    /// True when every queued move has finished
    fn all_moves_finished(&self) -> bool;

    /// Machine position at the end of the last queued move
    fn machine_position(&self) -> Coords;

    /// Declare the machine position, e.g. after homing or G92
    fn set_machine_position(&self, coords: &Coords);

    /// Discard queued moves back to a point where printing can resume
    ///
    /// Returns true if any move was discarded, in which case `rp` holds the
    /// machine coordinates and the state of the first discarded move.
    fn pause_print(&self, rp: &mut RestorePoint) -> bool;

    /// Stop as quickly as possible on power loss or a motor stall
    ///
    /// Same contract as [`MotionSink::pause_print`], except that moves are
    /// abandoned mid-way if necessary.
    fn low_power_or_stall_pause(&self, rp: &mut RestorePoint) -> bool;

    /// Stop every motor immediately and forget all queued moves
    fn emergency_stop(&self);
}

/// A tool as the engine needs to know it
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    /// Tool number
    pub number: u32,
    /// Display name
    pub name: String,
    /// Offset per axis in mm
    pub offsets: Coords,
    /// Extruder drives driven by this tool
    pub drives: Vec<usize>,
    /// Mix ratio per drive, same length as `drives`
    pub mix: Vec<f64>,
    /// Heaters belonging to the tool
    pub heaters: Vec<usize>,
    /// Axes the tool's X movement is mapped to
    pub x_axes: Vec<usize>,
    /// Axes the tool's Y movement is mapped to
    pub y_axes: Vec<usize>,
}

impl ToolInfo {
    /// A simple tool with one drive, one heater and no offsets
    pub fn new(number: u32, drive: usize, heater: usize) -> Self {
        Self {
            number,
            name: format!("T{}", number),
            offsets: [0.0; MAX_AXES],
            drives: vec![drive],
            mix: vec![1.0],
            heaters: vec![heater],
            x_axes: vec![0],
            y_axes: vec![1],
        }
    }
}

/// Trait for the tool, fan and spindle subsystem
pub trait ToolRegistry: Send + Sync {
    /// Currently selected tool
    fn current_tool(&self) -> Option<u32>;

    /// Look up a tool
    fn tool(&self, number: u32) -> Option<ToolInfo>;

    /// Make a tool current, or deselect all tools
    fn select_tool(&self, number: Option<u32>);

    /// Set a fan speed, 0..1
    fn set_fan_speed(&self, fan: usize, speed: f64);

    /// Current speed of a fan, 0..1
    fn fan_speed(&self, fan: usize) -> f64;

    /// Append commands that recreate tool settings to a resume file
    ///
    /// Returns false if the settings could not be written.
    fn write_resume_settings(&self, out: &mut String) -> bool {
        let _ = out;
        true
    }
}

/// Trait for heater control
pub trait HeaterController: Send + Sync {
    /// Set the active target of a heater in °C
    fn set_active_temperature(&self, heater: usize, temperature: f64);

    /// Active target of a heater in °C
    fn target_temperature(&self, heater: usize) -> f64;

    /// Measured temperature of a heater in °C
    fn current_temperature(&self, heater: usize) -> f64;

    /// True if a heater has reached its target
    fn at_temperature(&self, heater: usize) -> bool;

    /// True if every active heater has reached its target
    fn all_at_temperature(&self) -> bool;

    /// Turn every heater off
    fn switch_off_all(&self);

    /// Bed heater number, if the machine has one
    fn bed_heater(&self) -> Option<usize>;

    /// Temperatures of every heater, as reported by M105
    fn temperature_report(&self) -> String;

    /// Append commands that recreate heater settings to a resume file
    fn write_resume_settings(&self, out: &mut String) -> bool {
        let _ = out;
        true
    }
}

/// Trait for macro, print and resume-state file storage
pub trait FileStore: Send + Sync {
    /// Read a whole file
    fn read(&self, path: &str) -> io::Result<String>;

    /// Create or replace a file
    fn write(&self, path: &str, contents: &str) -> io::Result<()>;

    /// Delete a file
    fn delete(&self, path: &str) -> io::Result<()>;

    /// Check whether a file exists
    fn exists(&self, path: &str) -> bool;

    /// Names of the files in a directory, sorted
    fn list(&self, dir: &str) -> io::Result<Vec<String>>;
}

/// Every collaborator, bundled for injection into the engine
#[derive(Clone)]
pub struct Collaborators {
    /// Motion system
    pub motion: Arc<dyn MotionSink>,
    /// Tools, fans and spindles
    pub tools: Arc<dyn ToolRegistry>,
    /// Heaters
    pub heaters: Arc<dyn HeaterController>,
    /// File storage
    pub files: Arc<dyn FileStore>,
    /// Machine geometry
    pub kinematics: Arc<dyn Kinematics>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
