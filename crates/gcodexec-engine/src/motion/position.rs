//! Position bookkeeping shared by every move
//!
//! Machine coordinates are what the motion system sees. User coordinates
//! are what G-code sees: machine coordinates with the tool offset, axis
//! scaling, baby-stepping and Z hop taken out. Workplace offsets and
//! coordinate rotation sit on top of user coordinates.

use gcodexec_core::{AxesBitmap, Coords, ExtruderAmounts, MAX_AXES, MAX_EXTRUDERS};

/// Number of workplace coordinate systems, G54 to G59.3
pub const NUM_WORKPLACES: usize = 9;

/// G68 coordinate rotation about a centre in the XY plane
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotation {
    /// Angle in degrees, counter-clockwise
    pub angle: f64,
    /// Centre of rotation
    pub centre: [f64; 2],
}

impl Rotation {
    /// True if a rotation is in force
    pub fn is_active(&self) -> bool {
        self.angle != 0.0
    }
}

/// Everything that relates user coordinates to machine coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct MachinePosition {
    /// Number of visible axes
    pub num_axes: usize,
    /// Machine coordinates at the end of the last move
    pub machine: Coords,
    /// User coordinates at the end of the last move
    pub user: Coords,
    /// Workplace origins
    pub workplaces: [Coords; NUM_WORKPLACES],
    /// Index of the workplace in force
    pub current_workplace: usize,
    /// M579 scale factors
    pub axis_scale: Coords,
    /// Accumulated baby-stepping
    pub babystep: Coords,
    /// G68 rotation
    pub rotation: Rotation,
    /// Axes that have been homed
    pub axes_homed: AxesBitmap,
    /// Extruder position as the print file sees it
    pub virtual_extruder: f64,
    /// Total extrusion commanded since reset
    pub raw_extruder_total: f64,
    /// Total extrusion commanded per drive since reset
    pub raw_extruder_by_drive: ExtruderAmounts,
    /// Sticky laser power
    pub laser_pwm: u16,
    /// Sticky IO port bits
    pub io_bits: u16,
    /// M220 factor
    pub speed_factor: f64,
    /// M221 factors
    pub extrusion_factors: ExtruderAmounts,
    /// M200 factors
    pub volumetric_factors: ExtruderAmounts,
}

impl MachinePosition {
    /// Fresh state with every offset cleared
    pub fn new(num_axes: usize) -> Self {
        Self {
            num_axes: num_axes.clamp(1, MAX_AXES),
            machine: [0.0; MAX_AXES],
            user: [0.0; MAX_AXES],
            workplaces: [[0.0; MAX_AXES]; NUM_WORKPLACES],
            current_workplace: 0,
            axis_scale: [1.0; MAX_AXES],
            babystep: [0.0; MAX_AXES],
            rotation: Rotation::default(),
            axes_homed: AxesBitmap::new(),
            virtual_extruder: 0.0,
            raw_extruder_total: 0.0,
            raw_extruder_by_drive: [0.0; MAX_EXTRUDERS],
            laser_pwm: 0,
            io_bits: 0,
            speed_factor: 1.0,
            extrusion_factors: [1.0; MAX_EXTRUDERS],
            volumetric_factors: [1.0; MAX_EXTRUDERS],
        }
    }

    /// Origin of the workplace in force for one axis
    pub fn workplace_offset(&self, axis: usize) -> f64 {
        self.workplaces[self.current_workplace][axis]
    }

    /// Axis letters that still need homing, e.g. `XZ`
    pub fn unhomed_letters(&self, axes: AxesBitmap) -> String {
        axes.iter()
            .filter(|&axis| !self.axes_homed.is_set(axis))
            .filter_map(|axis| gcodexec_core::AXIS_LETTERS.get(axis))
            .collect()
    }
}

/// Extrusion multiplier turning cubic millimetres into filament length
pub fn volumetric_factor(diameter: f64) -> f64 {
    4.0 / (std::f64::consts::PI * diameter * diameter)
}

/// Filament diameter a volumetric factor was made from
pub fn filament_diameter(factor: f64) -> f64 {
    (4.0 / (std::f64::consts::PI * factor)).sqrt()
}
