//! Machine geometry
//!
//! The engine asks the kinematics whether a target position is reachable,
//! whether moves must be split into segments, and which axes have to be
//! homed before they may move.

use gcodexec_core::{AxesBitmap, Coords, MAX_AXES};
use gcodexec_settings::EngineConfig;

/// Outcome of a position limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitResult {
    /// Target and path are fine
    Ok,
    /// Target was clamped to the limits
    Adjusted,
    /// Target was clamped and the straight path to it is still unreachable
    AdjustedAndIntermediateUnreachable,
    /// Target is fine but the straight path to it leaves the work area
    IntermediateUnreachable,
}

/// How a kinematics wants moves split up
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segmentation {
    /// Segments per second of move time
    pub segments_per_second: f64,
    /// Shortest segment worth generating, in mm
    pub min_segment_length: f64,
    /// Segment uncoordinated moves too
    pub segment_g0: bool,
}

/// Trait for machine geometry
pub trait Kinematics: Send + Sync {
    /// Name shown in diagnostics
    fn name(&self) -> &str;

    /// Check a target against the work area, clamping it where allowed
    ///
    /// Only axes in `axes_to_limit` are clamped. `initial` is the start of
    /// the move when the path itself has to be checked.
    fn limit_position(
        &self,
        coords: &mut Coords,
        initial: Option<&Coords>,
        num_axes: usize,
        axes_to_limit: AxesBitmap,
        coordinated: bool,
        apply_limits: bool,
    ) -> LimitResult;

    /// Segmentation parameters, or `None` if moves are never segmented
    fn segmentation(&self) -> Option<Segmentation>;

    /// Axes that must be homed before `axes_moving` may move
    fn must_be_homed_axes(&self, axes_moving: AxesBitmap, disallow_before_homing: bool)
        -> AxesBitmap;

    /// Where the machine is assumed to be at power-up
    fn assumed_initial_position(&self, num_axes: usize) -> Coords {
        let _ = num_axes;
        [0.0; MAX_AXES]
    }

    /// Where an axis ends up after a homing move towards one end
    fn homing_position(&self, axis: usize, towards_max: bool) -> f64;
}

/// Independent linear axes with a box-shaped work area
#[derive(Debug, Clone, PartialEq)]
pub struct CartesianKinematics {
    axis_min: Coords,
    axis_max: Coords,
    segmentation: Option<Segmentation>,
}

impl CartesianKinematics {
    /// Build from the machine limits and segmentation settings
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut axis_min = [f64::MIN; MAX_AXES];
        let mut axis_max = [f64::MAX; MAX_AXES];
        for axis in 0..MAX_AXES {
            if let Some(&min) = config.machine.axis_min.get(axis) {
                axis_min[axis] = min;
            }
            if let Some(&max) = config.machine.axis_max.get(axis) {
                axis_max[axis] = max;
            }
        }
        let seg = &config.segmentation;
        let segmentation = seg.enabled.then_some(Segmentation {
            segments_per_second: seg.segments_per_second,
            min_segment_length: seg.min_segment_length,
            segment_g0: false,
        });
        Self {
            axis_min,
            axis_max,
            segmentation,
        }
    }

    /// Lower limit of an axis
    pub fn axis_min(&self, axis: usize) -> f64 {
        self.axis_min[axis]
    }

    /// Upper limit of an axis
    pub fn axis_max(&self, axis: usize) -> f64 {
        self.axis_max[axis]
    }
}

impl Kinematics for CartesianKinematics {
    fn name(&self) -> &str {
        "cartesian"
    }

    fn limit_position(
        &self,
        coords: &mut Coords,
        _initial: Option<&Coords>,
        num_axes: usize,
        axes_to_limit: AxesBitmap,
        _coordinated: bool,
        apply_limits: bool,
    ) -> LimitResult {
        if !apply_limits {
            return LimitResult::Ok;
        }
        let mut adjusted = false;
        for axis in axes_to_limit.iter().filter(|&axis| axis < num_axes) {
            let clamped = coords[axis].clamp(self.axis_min[axis], self.axis_max[axis]);
            if clamped != coords[axis] {
                coords[axis] = clamped;
                adjusted = true;
            }
        }
        if adjusted {
            LimitResult::Adjusted
        } else {
            LimitResult::Ok
        }
    }

    fn segmentation(&self) -> Option<Segmentation> {
        self.segmentation
    }

    fn must_be_homed_axes(
        &self,
        axes_moving: AxesBitmap,
        disallow_before_homing: bool,
    ) -> AxesBitmap {
        if disallow_before_homing {
            axes_moving
        } else {
            AxesBitmap::new()
        }
    }

    fn homing_position(&self, axis: usize, towards_max: bool) -> f64 {
        if towards_max {
            self.axis_max[axis]
        } else {
            self.axis_min[axis]
        }
    }
}
