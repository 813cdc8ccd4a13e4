//! Restore points
//!
//! A restore point records where the print was and how it was moving, so
//! that a paused print, a tool change or an explicit `G60` can return to
//! exactly the same place later.

use gcodexec_core::{Coords, MAX_AXES};
use serde::Serialize;

/// Number of numbered restore points (`G60 S0` .. `G60 S5`)
pub const NUM_RESTORE_POINTS: usize = 6;

/// Restore point written when a print is paused
pub const PAUSE_RESTORE_POINT: usize = 1;

/// Restore point written before a tool change
pub const TOOL_CHANGE_RESTORE_POINT: usize = 2;

/// A saved position and the state that goes with it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestorePoint {
    /// User coordinates of every axis
    pub move_coords: Coords,
    /// Requested feed rate in mm/min
    pub feed_rate: f64,
    /// Extruder position as seen by the print file
    pub virtual_extruder_position: f64,
    /// How much of the interrupted move had already been done, 0..1
    pub proportion_done: f64,
    /// File offset of the command to restart from
    pub file_pos: Option<u64>,
    /// Start of the interrupted move on the first plane axis
    pub initial_user_c0: f64,
    /// Start of the interrupted move on the second plane axis
    pub initial_user_c1: f64,
    /// Tool in use, if any
    pub tool_number: Option<u32>,
    /// Print cooling fan speed, 0..1
    pub fan_speed: f64,
    /// Laser power
    pub laser_pwm: u16,
    /// IO port bits sent with each move
    pub io_bits: u16,
}

impl Default for RestorePoint {
    fn default() -> Self {
        Self {
            move_coords: [0.0; MAX_AXES],
            feed_rate: 3000.0,
            virtual_extruder_position: 0.0,
            proportion_done: 0.0,
            file_pos: None,
            initial_user_c0: 0.0,
            initial_user_c1: 0.0,
            tool_number: None,
            fan_speed: 0.0,
            laser_pwm: 0,
            io_bits: 0,
        }
    }
}

impl RestorePoint {
    /// Reset to the initial empty state
    pub fn init(&mut self) {
        *self = Self::default();
    }
}
