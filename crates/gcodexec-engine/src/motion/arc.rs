//! G2/G3 arc moves
//!
//! The arc lies in the plane chosen by G17/G18/G19. Axes outside the plane
//! move linearly alongside it, so a helix is an arc with a Z word.

use super::{rotate_coordinates, tool_offset_transform, ArcState, MAX_SEGMENTS_PER_MOVE};
use crate::channel::ChannelId;
use crate::command::DecodedCommand;
use crate::engine::Engine;
use crate::kinematics::LimitResult;
use crate::reply::{CommandResult, Outcome};
use gcodexec_core::{AxesBitmap, CommandError, Plane, AXIS_LETTERS, MAX_AXES, X_AXIS, Y_AXIS};
use gcodexec_settings::ArcSettings;
use std::f64::consts::TAU;

/// Arc centre relative to the start point, in the two plane axes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcCentre {
    /// Offset along the first plane axis
    pub i: f64,
    /// Offset along the second plane axis
    pub j: f64,
    /// Signed distance of the centre from the chord midpoint, over the chord length
    pub h_div_d: f64,
}

/// Find the centre of an arc given by its radius
///
/// `delta0` and `delta1` run from the start point to the end point. A
/// positive radius takes the short way round, a negative one the long way.
/// A radius up to 1% too short for the chord is taken as a half circle.
pub fn arc_centre_from_radius(
    delta0: f64,
    delta1: f64,
    radius: f64,
    clockwise: bool,
) -> Result<ArcCentre, CommandError> {
    let d_squared = delta0 * delta0 + delta1 * delta1;
    if d_squared == 0.0 {
        return Err(CommandError::invalid(
            "G2/G3: distance between start and end points must not be zero when specifying a radius",
        ));
    }

    let h_squared = radius * radius - d_squared / 4.0;
    let mut h_div_d = if h_squared >= 0.0 {
        (h_squared / d_squared).sqrt()
    } else if h_squared < -0.02 * radius * radius {
        return Err(CommandError::unreachable(
            "G2/G3: radius is too small to reach endpoint",
        ));
    } else {
        // Rounding on a half circle
        0.0
    };

    if (clockwise && radius < 0.0) || (!clockwise && radius > 0.0) {
        h_div_d = -h_div_d;
    }
    Ok(ArcCentre {
        i: delta0 / 2.0 + delta1 * h_div_d,
        j: delta1 / 2.0 - delta0 * h_div_d,
        h_div_d,
    })
}

/// Angle swept going from `start_angle` to `final_angle` in the given direction
///
/// Always in `(0, 2π]`; a whole circle is exactly 2π.
pub fn arc_total_angle(start_angle: f64, final_angle: f64, clockwise: bool, whole_circle: bool) -> f64 {
    if whole_circle {
        return TAU;
    }
    let total = if clockwise {
        start_angle - final_angle
    } else {
        final_angle - start_angle
    };
    if total < 0.0 {
        total + TAU
    } else {
        total
    }
}

/// Chord length for arc segments
///
/// Short enough to keep within the allowed deviation from the true arc and
/// to give the minimum number of segments per second at `feed_rate` mm/s,
/// then held within the configured segment length range.
pub fn arc_segment_length(radius: f64, feed_rate: f64, settings: &ArcSettings) -> f64 {
    let by_deviation = (8.0 * radius * settings.max_arc_deviation).sqrt();
    let by_time = if settings.min_arc_segments_per_sec > 0.0 {
        feed_rate / settings.min_arc_segments_per_sec
    } else {
        f64::MAX
    };
    by_deviation
        .min(by_time)
        .clamp(settings.min_arc_segment_length, settings.max_arc_segment_length)
}

/// Number of segments for an arc, at least one
pub fn arc_segment_count(radius: f64, total_angle: f64, segment_length: f64) -> u32 {
    if segment_length <= 0.0 {
        return 1;
    }
    let count = (radius * total_angle / segment_length + 0.8).floor();
    if count.is_nan() || count < 1.0 {
        1
    } else {
        (count as u32).min(MAX_SEGMENTS_PER_MOVE)
    }
}

/// Machine axes that follow a plane axis under the current tool
fn mapped_axes(plane_axis: usize, x_axes: AxesBitmap, y_axes: AxesBitmap) -> AxesBitmap {
    match plane_axis {
        X_AXIS => x_axes,
        Y_AXIS => y_axes,
        axis => AxesBitmap::single(axis),
    }
}

impl Engine {
    /// G2 (clockwise) or G3
    ///
    /// The caller holds the movement lock and the previous move has been taken.
    pub(crate) fn do_arc_move(&mut self, id: ChannelId, cmd: &DecodedCommand, clockwise: bool) -> CommandResult {
        let frame = self.channels[id].latest();
        let plane = frame.plane;
        let relative = frame.axes_relative;
        let units = frame.units;
        let (axis0, axis1) = (plane.axis0(), plane.axis1());

        let mut mv = self.new_move(true);
        let restart = self.move_restart(id);
        let fraction = restart.fraction;
        if fraction > 0.0 {
            mv.initial_user_c0 = restart.initial_user_c0;
            mv.initial_user_c1 = restart.initial_user_c1;
        } else {
            mv.initial_user_c0 = self.position.user[axis0];
            mv.initial_user_c1 = self.position.user[axis1];
        }
        let start = [mv.initial_user_c0, mv.initial_user_c1];

        let mut end = start;
        for (k, &axis) in [axis0, axis1].iter().enumerate() {
            if let Some(value) = cmd.float(AXIS_LETTERS[axis])? {
                let arg = units.to_mm(value);
                end[k] = if relative {
                    arg + start[k]
                } else {
                    self.absolute_axis_target(id, cmd, axis, arg)
                };
            }
        }

        let (i, j) = match cmd.float('R')? {
            Some(r) => {
                let centre = arc_centre_from_radius(
                    end[0] - start[0],
                    end[1] - start[1],
                    units.to_mm(r),
                    clockwise,
                )?;
                (centre.i, centre.j)
            }
            None => {
                // I, J and K go with X, Y and Z
                let letter = |axis: usize| char::from(b'I' + axis as u8);
                if !cmd.seen(letter(axis0)) && !cmd.seen(letter(axis1)) {
                    return Err(CommandError::invalid("G2/G3: no I J K or R parameter"));
                }
                let offset = |axis: usize| -> Result<f64, CommandError> {
                    Ok(cmd.float(letter(axis))?.map_or(0.0, |v| units.to_mm(v)))
                };
                let (i, j) = (offset(axis0)?, offset(axis1)?);
                if i == 0.0 && j == 0.0 {
                    return Err(CommandError::invalid("G2/G3: arc radius is zero"));
                }
                (i, j)
            }
        };

        let mut centre = [start[0] + i, start[1] + j];
        let mut user = self.position.user;
        user[axis0] = end[0];
        user[axis1] = end[1];
        let whole_circle = end == start;

        let mut axes_mentioned = AxesBitmap::new();
        axes_mentioned.set(axis0);
        axes_mentioned.set(axis1);
        for axis in (0..self.position.num_axes).filter(|&axis| axis != axis0 && axis != axis1) {
            let Some(value) = cmd.float(AXIS_LETTERS[axis])? else {
                continue;
            };
            let arg = units.to_mm(value);
            user[axis] = if relative {
                user[axis] + arg * (1.0 - fraction)
            } else {
                self.absolute_axis_target(id, cmd, axis, arg)
            };
            axes_mentioned.set(axis);
        }

        if !self.enough_axes_homed(axes_mentioned) {
            return Err(CommandError::invalid("G2/G3: insufficient axes homed"));
        }

        let mut final_angle = (end[1] - centre[1]).atan2(end[0] - centre[0]);
        let radius = i.hypot(j);
        let mut start_angle = (-j).atan2(-i);

        let tool = self.current_tool_mapping();
        let mut rotated = user;
        if self.doing_coordinate_rotation(id, cmd) {
            rotate_coordinates(&self.position.rotation, &mut rotated);
            if plane == Plane::XY {
                let mut c = [0.0; MAX_AXES];
                c[X_AXIS] = centre[0];
                c[Y_AXIS] = centre[1];
                rotate_coordinates(&self.position.rotation, &mut c);
                centre = [c[X_AXIS], c[Y_AXIS]];
                let angle = self.position.rotation.angle.to_radians();
                final_angle += angle;
                start_angle += angle;
            }
        }
        tool_offset_transform(&self.position, tool.as_ref(), &rotated, &mut mv.coords, axes_mentioned);

        let mut limited = mv.coords;
        let limit = self.collab.kinematics.limit_position(
            &mut limited,
            None,
            mv.num_axes,
            mv.axes_homed,
            true,
            true,
        );
        if limit != LimitResult::Ok {
            return Err(CommandError::unreachable("G2/G3: outside machine limits"));
        }

        let (x_axes, y_axes) = match &tool {
            Some(t) => (t.x_axes, t.y_axes),
            None => (AxesBitmap::single(X_AXIS), AxesBitmap::single(Y_AXIS)),
        };
        let axes0 = mapped_axes(axis0, x_axes, y_axes);
        let axes1 = mapped_axes(axis1, x_axes, y_axes);
        let mut machine_centre = [0.0; MAX_AXES];
        for axis in 0..self.position.num_axes {
            let user_centre = if axes0.is_set(axis) {
                centre[0]
            } else if axes1.is_set(axis) {
                centre[1]
            } else {
                continue;
            };
            machine_centre[axis] = user_centre * self.position.axis_scale[axis]
                + self.position.babystep[axis]
                - self.current_tool_offset(axis);
        }

        self.load_laser_or_io_bits(cmd, &mut mv)?;
        let has_positive_extrusion = self.load_extrusion_and_feed_rate(id, cmd, &mut mv, true)?;
        mv.use_pressure_advance = has_positive_extrusion;

        let total_angle = arc_total_angle(start_angle, final_angle, clockwise, whole_circle);
        let segment_length = arc_segment_length(radius, mv.feed_rate, &self.config.arcs);
        let total_segments = arc_segment_count(radius, total_angle, segment_length);
        let mut increment = total_angle / f64::from(total_segments);
        if clockwise {
            increment = -increment;
        }
        let (current_sin, current_cos) = start_angle.sin_cos();
        mv.arc = Some(ArcState {
            axes0,
            axes1,
            centre: machine_centre,
            radius,
            current_angle: start_angle,
            angle_increment: increment,
            sin_increment: increment.sin(),
            cos_increment: increment.cos(),
            current_sin,
            current_cos,
            segments_till_full_calc: 0,
            segments_per_full_calc: self.config.arcs.segments_per_full_calculation,
            axis_scale: self.position.axis_scale,
        });

        self.position.user = user;
        tracing::debug!(
            "{}: arc radius {:.3}, {:.1} degrees in {} segments",
            id,
            radius,
            total_angle.to_degrees(),
            total_segments
        );
        self.finalise_move(id, mv, total_segments);
        Ok(Outcome::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_semicircle_from_ij() {
        // Start (0,0), end (10,0), centre offset I5 J0
        let (i, j): (f64, f64) = (5.0, 0.0);
        let start = (-j).atan2(-i);
        let end = (0.0 - j).atan2(10.0 - i);
        assert!(close(arc_total_angle(start, end, false, false), PI));
        assert!(close(arc_total_angle(start, end, true, false), PI));
    }

    #[test]
    fn test_whole_circle() {
        assert!(close(arc_total_angle(1.0, 1.0, false, true), 2.0 * PI));
        assert!(close(arc_total_angle(0.3, 0.3, true, true), 2.0 * PI));
    }

    #[test]
    fn test_quarter_arcs() {
        assert!(close(arc_total_angle(0.0, PI / 2.0, false, false), PI / 2.0));
        assert!(close(arc_total_angle(0.0, PI / 2.0, true, false), 1.5 * PI));
    }

    #[test]
    fn test_radius_half_circle() {
        let centre = arc_centre_from_radius(10.0, 0.0, 5.0, false).unwrap();
        assert_eq!(centre.h_div_d, 0.0);
        assert!(close(centre.i, 5.0));
        assert!(close(centre.j, 0.0));
    }

    #[test]
    fn test_radius_too_small() {
        let err = arc_centre_from_radius(10.0, 0.0, 4.0, false).unwrap_err();
        assert_eq!(err.to_string(), "G2/G3: radius is too small to reach endpoint");
        // Within 1% is taken as a half circle
        let centre = arc_centre_from_radius(10.0, 0.0, 4.99, true).unwrap();
        assert_eq!(centre.h_div_d, 0.0);
    }

    #[test]
    fn test_radius_zero_chord() {
        assert!(arc_centre_from_radius(0.0, 0.0, 5.0, false).is_err());
    }

    #[test]
    fn test_radius_sign_picks_short_or_long_arc() {
        // Chord of 10 along X, radius 10: the centre is off the chord
        let short_ccw = arc_centre_from_radius(10.0, 0.0, 10.0, false).unwrap();
        let long_ccw = arc_centre_from_radius(10.0, 0.0, -10.0, false).unwrap();
        assert!(close(short_ccw.i, 5.0));
        assert!(short_ccw.j > 0.0);
        assert!(long_ccw.j < 0.0);
        assert!(close(short_ccw.j.hypot(short_ccw.i), 10.0));

        let short_cw = arc_centre_from_radius(10.0, 0.0, 10.0, true).unwrap();
        assert!(short_cw.j < 0.0);
    }

    #[test]
    fn test_segment_length_limits() {
        let settings = ArcSettings::default();
        // Huge radius and fast feed: capped at the maximum
        assert_eq!(arc_segment_length(1.0e6, 1.0e6, &settings), settings.max_arc_segment_length);
        // Tiny radius: floored at the minimum
        assert_eq!(arc_segment_length(1.0e-6, 100.0, &settings), settings.min_arc_segment_length);
        // Slow feed limits by time
        let len = arc_segment_length(1000.0, 10.0, &settings);
        assert!(close(len, (10.0 / settings.min_arc_segments_per_sec).max(settings.min_arc_segment_length)));
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(arc_segment_count(10.0, PI, 1.0), 32);
        assert_eq!(arc_segment_count(0.001, 0.1, 1.0), 1);
        assert_eq!(arc_segment_count(10.0, PI, 0.0), 1);
    }
}
