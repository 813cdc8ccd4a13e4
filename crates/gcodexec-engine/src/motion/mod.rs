//! Move synthesis and the hand-off to the motion system
//!
//! A move command is turned into one [`MoveState`] describing the whole
//! move. Publishing it makes its segments available through
//! [`SegmentSource::try_take_next_segment`]; the motion system pulls them
//! one at a time until the move is used up, after which the next move may
//! be published.
//!
//! `segments_left` is the only field a consumer polls without the lock.
//! It is stored with release ordering after every other field has been
//! written and loaded with acquire ordering before any is read.

mod arc;
mod position;
mod straight;
mod transform;

pub use arc::{arc_centre_from_radius, arc_segment_count, arc_segment_length, arc_total_angle, ArcCentre};
pub use position::{filament_diameter, volumetric_factor, MachinePosition, Rotation, NUM_WORKPLACES};
pub use straight::{mesh_segment_count, straight_segment_count, MAX_SEGMENTS_PER_MOVE};
pub use transform::{rotate_coordinates, tool_offset_inverse_transform, tool_offset_transform, ToolMapping};

use crate::kinematics::{Kinematics, LimitResult};
use gcodexec_core::{AxesBitmap, Coords, ExtruderAmounts, MAX_AXES, MAX_EXTRUDERS};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Kind of move, from the H parameter of G0/G1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MoveType {
    /// Ordinary move
    #[default]
    Normal,
    /// H1: move until an endstop triggers, then set the axis position
    Homing,
    /// H2: raw motor move ignoring limits and homing
    Raw,
    /// H3: move until an endstop triggers and measure the axis
    MeasureAxis,
    /// H4: move until an endstop triggers, keep the position
    HomingNoPosition,
}

impl MoveType {
    /// Move type for an H parameter value
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Normal),
            1 => Some(Self::Homing),
            2 => Some(Self::Raw),
            3 => Some(Self::MeasureAxis),
            4 => Some(Self::HomingNoPosition),
            _ => None,
        }
    }

    /// True for moves that stop when an endstop triggers
    pub fn checks_endstops(&self) -> bool {
        matches!(self, Self::Homing | Self::MeasureAxis | Self::HomingNoPosition)
    }
}

/// Progress of a segmented move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SegmentedMoveState {
    /// No segmented move in progress
    #[default]
    Inactive,
    /// Segments are still being taken
    Active,
    /// An intermediate segment was out of reach and the rest was dropped
    Aborted,
}

/// Incremental arc interpolation state
#[derive(Debug, Clone, PartialEq)]
pub struct ArcState {
    /// Machine axes following the first plane axis (cosine)
    pub axes0: AxesBitmap,
    /// Machine axes following the second plane axis (sine)
    pub axes1: AxesBitmap,
    /// Arc centre per machine axis
    pub centre: Coords,
    /// Radius in user units
    pub radius: f64,
    /// Angle of the last generated point
    pub current_angle: f64,
    /// Signed angle per segment
    pub angle_increment: f64,
    /// sin of `angle_increment`
    pub sin_increment: f64,
    /// cos of `angle_increment`
    pub cos_increment: f64,
    /// sin of `current_angle`, maintained incrementally
    pub current_sin: f64,
    /// cos of `current_angle`, maintained incrementally
    pub current_cos: f64,
    /// Segments left until sin and cos are recomputed exactly
    pub segments_till_full_calc: u32,
    /// Interval between exact recomputations
    pub segments_per_full_calc: u32,
    /// Axis scale factors
    pub axis_scale: Coords,
}

impl ArcState {
    /// Advance one segment and return (sin, cos) of the new angle
    fn advance(&mut self) -> (f64, f64) {
        self.current_angle += self.angle_increment;
        if self.segments_till_full_calc == 0 {
            self.segments_till_full_calc = self.segments_per_full_calc;
            self.current_sin = self.current_angle.sin();
            self.current_cos = self.current_angle.cos();
        } else {
            let new_cos =
                self.current_cos * self.cos_increment - self.current_sin * self.sin_increment;
            let new_sin =
                self.current_sin * self.cos_increment + self.current_cos * self.sin_increment;
            self.current_cos = new_cos;
            self.current_sin = new_sin;
            self.segments_till_full_calc -= 1;
        }
        (self.current_sin, self.current_cos)
    }
}

/// The move being built or handed out segment by segment
#[derive(Debug, Clone, PartialEq)]
pub struct MoveState {
    /// Target machine coordinates
    pub coords: Coords,
    /// Machine coordinates at the start of the current segment
    pub initial_coords: Coords,
    /// Extrusion per drive for the whole move, then per segment once published
    pub extrusion: ExtruderAmounts,
    /// Feed rate in mm/s
    pub feed_rate: f64,
    /// H parameter
    pub move_type: MoveType,
    /// Axes move in a straight line together
    pub coordinated: bool,
    /// Stop when an endstop triggers
    pub check_endstops: bool,
    /// Apply pressure advance to this move
    pub use_pressure_advance: bool,
    /// The print may be paused after this move
    pub can_pause_after: bool,
    /// Laser power for the move
    pub laser_pwm: u16,
    /// IO port bits for the move
    pub io_bits: u16,
    /// File offset of the command that made the move
    pub file_pos: Option<u64>,
    /// Extruder position the print file sees after the move
    pub virtual_extruder_position: f64,
    /// Extruder position the print file saw before the move
    pub move_start_virtual_extruder: f64,
    /// Tool that made the move
    pub tool: Option<u32>,
    /// Axes that count as homed for the limit check
    pub axes_homed: AxesBitmap,
    /// Number of visible axes
    pub num_axes: usize,
    /// Clamp intermediate points to the work area
    pub apply_limits: bool,
    /// Segments in the whole move
    pub total_segments: u32,
    /// Segments before this count are skipped on resume
    pub segments_left_to_start_at: u32,
    /// Part of the first generated segment already done before a pause
    pub first_segment_fraction_to_skip: f64,
    /// User position on the first plane axis at the start of the move
    pub initial_user_c0: f64,
    /// User position on the second plane axis at the start of the move
    pub initial_user_c1: f64,
    /// Arc interpolation, for G2/G3
    pub arc: Option<ArcState>,
    /// Segmented move progress
    pub seg_state: SegmentedMoveState,
}

impl Default for MoveState {
    fn default() -> Self {
        Self {
            coords: [0.0; MAX_AXES],
            initial_coords: [0.0; MAX_AXES],
            extrusion: [0.0; MAX_EXTRUDERS],
            feed_rate: 0.0,
            move_type: MoveType::Normal,
            coordinated: true,
            check_endstops: false,
            use_pressure_advance: false,
            can_pause_after: true,
            laser_pwm: 0,
            io_bits: 0,
            file_pos: None,
            virtual_extruder_position: 0.0,
            move_start_virtual_extruder: 0.0,
            tool: None,
            axes_homed: AxesBitmap::new(),
            num_axes: 3,
            apply_limits: true,
            total_segments: 1,
            segments_left_to_start_at: 1,
            first_segment_fraction_to_skip: 0.0,
            initial_user_c0: 0.0,
            initial_user_c1: 0.0,
            arc: None,
            seg_state: SegmentedMoveState::Inactive,
        }
    }
}

impl MoveState {
    /// True if this is an arc move
    pub fn is_arc(&self) -> bool {
        self.arc.is_some()
    }

    /// Split the move up and set where to start, given how much was already done
    ///
    /// `fraction_done` comes from a restore point when a paused print resumes.
    pub fn set_segments(&mut self, total_segments: u32, fraction_done: f64) {
        let total = total_segments.max(1);
        self.total_segments = total;
        self.can_pause_after = !self.check_endstops && !self.is_arc();
        if total > 1 {
            self.seg_state = SegmentedMoveState::Active;
            for e in self.extrusion.iter_mut() {
                *e /= f64::from(total);
            }
            if fraction_done > 0.0 {
                let segments_done = (f64::from(total) * fraction_done).floor();
                self.segments_left_to_start_at = total - segments_done as u32;
                self.first_segment_fraction_to_skip =
                    fraction_done * f64::from(total) - segments_done;
            } else {
                self.segments_left_to_start_at = total;
                self.first_segment_fraction_to_skip = 0.0;
            }
        } else {
            self.seg_state = SegmentedMoveState::Inactive;
            self.segments_left_to_start_at = 1;
            self.first_segment_fraction_to_skip = fraction_done;
        }
    }

    fn apply_fraction_skip(&self, segment: &mut Segment) {
        if self.first_segment_fraction_to_skip != 0.0 {
            for e in segment.extrusion.iter_mut() {
                *e *= 1.0 - self.first_segment_fraction_to_skip;
            }
        }
    }
}

/// One unit of motion handed to the motion system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Machine coordinates at the end of the segment
    pub coords: Coords,
    /// Extrusion per drive
    pub extrusion: ExtruderAmounts,
    /// Feed rate in mm/s
    pub feed_rate: f64,
    /// H parameter of the move
    pub move_type: MoveType,
    /// Axes move in a straight line together
    pub coordinated: bool,
    /// Stop when an endstop triggers
    pub check_endstops: bool,
    /// Apply pressure advance
    pub use_pressure_advance: bool,
    /// The print may be paused after this segment
    pub can_pause_after: bool,
    /// Proportion of the move done at the start of the segment
    pub start_proportion: f64,
    /// Proportion of the move done at the end of the segment
    pub proportion_done: f64,
    /// File offset of the command that made the move
    pub file_pos: Option<u64>,
    /// Extruder position the print file sees after the move
    pub virtual_extruder_position: f64,
    /// Extruder position the print file saw before the move
    pub move_start_virtual_extruder: f64,
    /// User position on the first plane axis at the start of the move
    pub initial_user_c0: f64,
    /// User position on the second plane axis at the start of the move
    pub initial_user_c1: f64,
    /// Laser power
    pub laser_pwm: u16,
    /// IO port bits
    pub io_bits: u16,
    /// Tool that made the move
    pub tool: Option<u32>,
}

impl Segment {
    fn from_move(m: &MoveState) -> Self {
        Self {
            coords: m.coords,
            extrusion: m.extrusion,
            feed_rate: m.feed_rate,
            move_type: m.move_type,
            coordinated: m.coordinated,
            check_endstops: m.check_endstops,
            use_pressure_advance: m.use_pressure_advance,
            can_pause_after: m.can_pause_after,
            start_proportion: 0.0,
            proportion_done: 1.0,
            file_pos: m.file_pos,
            virtual_extruder_position: m.virtual_extruder_position,
            move_start_virtual_extruder: m.move_start_virtual_extruder,
            initial_user_c0: m.initial_user_c0,
            initial_user_c1: m.initial_user_c1,
            laser_pwm: m.laser_pwm,
            io_bits: m.io_bits,
            tool: m.tool,
        }
    }
}

/// The single pending move, shared between the engine and the motion system
pub struct SegmentSource {
    segments_left: AtomicU32,
    state: Mutex<MoveState>,
    kinematics: Arc<dyn Kinematics>,
}

impl std::fmt::Debug for SegmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentSource")
            .field("segments_left", &self.segments_left())
            .finish_non_exhaustive()
    }
}

impl SegmentSource {
    /// Create an empty source
    pub fn new(kinematics: Arc<dyn Kinematics>) -> Self {
        Self {
            segments_left: AtomicU32::new(0),
            state: Mutex::new(MoveState::default()),
            kinematics,
        }
    }

    /// Segments not yet taken; zero when no move is pending
    pub fn segments_left(&self) -> u32 {
        self.segments_left.load(Ordering::Acquire)
    }

    /// True if a move is waiting to be taken
    pub fn is_busy(&self) -> bool {
        self.segments_left() != 0
    }

    /// Progress of the pending segmented move
    pub fn seg_state(&self) -> SegmentedMoveState {
        self.state.lock().seg_state
    }

    /// Lock the pending move for inspection
    pub fn state(&self) -> MutexGuard<'_, MoveState> {
        self.state.lock()
    }

    /// Hand a fully built move over to the motion system
    ///
    /// Returns false, leaving the pending move untouched, if the previous
    /// move has not been used up yet.
    pub fn publish(&self, mv: MoveState) -> bool {
        let mut state = self.state.lock();
        if self.segments_left.load(Ordering::Acquire) != 0 {
            return false;
        }
        let total = mv.total_segments.max(1);
        *state = mv;
        self.segments_left.store(total, Ordering::Release);
        true
    }

    /// Forget the pending move
    pub fn clear(&self) {
        let mut state = self.state.lock();
        Self::clear_locked(&self.segments_left, &mut state);
    }

    /// Forget the pending move but leave an abort for the engine to report
    fn abort_locked(segments_left: &AtomicU32, state: &mut MoveState) {
        segments_left.store(0, Ordering::Release);
        state.arc = None;
        state.seg_state = SegmentedMoveState::Aborted;
    }

    fn clear_locked(segments_left: &AtomicU32, state: &mut MoveState) {
        segments_left.store(0, Ordering::Release);
        state.seg_state = SegmentedMoveState::Inactive;
        state.arc = None;
        state.check_endstops = false;
        state.move_type = MoveType::Normal;
        state.first_segment_fraction_to_skip = 0.0;
    }

    /// Acknowledge an aborted segmented move
    pub fn acknowledge_abort(&self) {
        let mut state = self.state.lock();
        if state.seg_state == SegmentedMoveState::Aborted {
            state.seg_state = SegmentedMoveState::Inactive;
        }
    }

    /// Take the next segment of the pending move, if there is one
    pub fn try_take_next_segment(&self) -> Option<Segment> {
        if self.segments_left.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut state = self.state.lock();
        loop {
            let left = self.segments_left.load(Ordering::Acquire);
            if left == 0 {
                return None;
            }
            let total = state.total_segments.max(1);
            let start_proportion = f64::from(total - left) / f64::from(total);

            if left == 1 {
                let mut segment = Segment::from_move(&state);
                if state.segments_left_to_start_at == 1 {
                    state.apply_fraction_skip(&mut segment);
                }
                segment.start_proportion = start_proportion;
                segment.proportion_done = 1.0;
                if state.is_arc() {
                    segment.can_pause_after = true;
                }
                Self::clear_locked(&self.segments_left, &mut state);
                return Some(segment);
            }

            let mut point = state.initial_coords;
            let arc_axes = match state.arc.as_mut() {
                Some(arc) => {
                    let (sin, cos) = arc.advance();
                    for axis in 0..MAX_AXES {
                        if arc.axes1.is_set(axis) {
                            point[axis] = arc.centre[axis] + arc.radius * arc.axis_scale[axis] * sin;
                        } else if arc.axes0.is_set(axis) {
                            point[axis] = arc.centre[axis] + arc.radius * arc.axis_scale[axis] * cos;
                        }
                    }
                    arc.axes0.union(arc.axes1)
                }
                None => AxesBitmap::new(),
            };
            for axis in (0..state.num_axes).filter(|&axis| !arc_axes.is_set(axis)) {
                let step = (state.coords[axis] - state.initial_coords[axis]) / f64::from(left);
                point[axis] = state.initial_coords[axis] + step;
            }
            state.initial_coords = point;

            if state.segments_left_to_start_at < left {
                self.segments_left.store(left - 1, Ordering::Release);
                continue;
            }

            if state.is_arc() {
                let mut checked = point;
                let result = self.kinematics.limit_position(
                    &mut checked,
                    None,
                    state.num_axes,
                    state.axes_homed,
                    true,
                    state.apply_limits,
                );
                if result != LimitResult::Ok {
                    tracing::warn!("arc segment out of reach, abandoning the rest of the arc");
                    Self::abort_locked(&self.segments_left, &mut state);
                    return None;
                }
            }

            let mut segment = Segment::from_move(&state);
            segment.coords = point;
            if state.segments_left_to_start_at == left {
                state.apply_fraction_skip(&mut segment);
            }
            let remaining = left - 1;
            self.segments_left.store(remaining, Ordering::Release);
            segment.start_proportion = start_proportion;
            segment.proportion_done = f64::from(total - remaining) / f64::from(total);
            segment.can_pause_after = !state.check_endstops && !state.is_arc();
            return Some(segment);
        }
    }
}
