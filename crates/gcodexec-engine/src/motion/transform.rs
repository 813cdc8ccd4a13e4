//! User to machine coordinate transforms

use super::position::{MachinePosition, Rotation};
use crate::collaborators::ToolInfo;
use gcodexec_core::{AxesBitmap, Coords, X_AXIS, Y_AXIS};

/// The parts of a tool that affect coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct ToolMapping {
    /// Offset per axis
    pub offsets: Coords,
    /// Axes following X
    pub x_axes: AxesBitmap,
    /// Axes following Y
    pub y_axes: AxesBitmap,
}

impl ToolMapping {
    /// Mapping for a tool
    pub fn from_tool(tool: &ToolInfo) -> Self {
        let bitmap = |axes: &[usize]| {
            axes.iter().fold(AxesBitmap::new(), |mut acc, &axis| {
                acc.set(axis);
                acc
            })
        };
        Self {
            offsets: tool.offsets,
            x_axes: bitmap(&tool.x_axes),
            y_axes: bitmap(&tool.y_axes),
        }
    }
}

/// Convert user coordinates to machine coordinates
///
/// With a tool selected, an axis mapped to X or Y takes its value from the
/// X or Y input unless it was given explicitly. X and Y themselves are left
/// untouched when the tool does not drive them.
pub fn tool_offset_transform(
    pos: &MachinePosition,
    tool: Option<&ToolMapping>,
    coords_in: &Coords,
    coords_out: &mut Coords,
    explicit_axes: AxesBitmap,
) {
    match tool {
        None => {
            for axis in 0..pos.num_axes {
                coords_out[axis] = coords_in[axis] * pos.axis_scale[axis] + pos.babystep[axis];
            }
        }
        Some(tool) => {
            for axis in 0..pos.num_axes {
                if (axis == X_AXIS && !tool.x_axes.is_set(X_AXIS))
                    || (axis == Y_AXIS && !tool.y_axes.is_set(Y_AXIS))
                {
                    continue;
                }
                let total_offset = pos.babystep[axis] - tool.offsets[axis];
                let input_axis = if explicit_axes.is_set(axis) {
                    axis
                } else if tool.x_axes.is_set(axis) {
                    X_AXIS
                } else if tool.y_axes.is_set(axis) {
                    Y_AXIS
                } else {
                    axis
                };
                coords_out[axis] = coords_in[input_axis] * pos.axis_scale[axis] + total_offset;
            }
        }
    }
}

/// Convert machine coordinates back to user coordinates
///
/// Where several axes follow X or Y, the user X or Y is their average.
pub fn tool_offset_inverse_transform(
    pos: &MachinePosition,
    tool: Option<&ToolMapping>,
    coords_in: &Coords,
) -> Coords {
    let mut out = *coords_in;
    match tool {
        None => {
            for axis in 0..pos.num_axes {
                out[axis] = (coords_in[axis] - pos.babystep[axis]) / pos.axis_scale[axis];
            }
        }
        Some(tool) => {
            let (mut x_sum, mut x_count) = (0.0, 0u32);
            let (mut y_sum, mut y_count) = (0.0, 0u32);
            for axis in 0..pos.num_axes {
                let total_offset = pos.babystep[axis] - tool.offsets[axis];
                let coord = (coords_in[axis] - total_offset) / pos.axis_scale[axis];
                out[axis] = coord;
                if tool.x_axes.is_set(axis) {
                    x_sum += coord;
                    x_count += 1;
                }
                if tool.y_axes.is_set(axis) {
                    y_sum += coord;
                    y_count += 1;
                }
            }
            if x_count != 0 {
                out[X_AXIS] = x_sum / f64::from(x_count);
            }
            if y_count != 0 {
                out[Y_AXIS] = y_sum / f64::from(y_count);
            }
        }
    }
    out
}

/// Rotate the X and Y coordinates counter-clockwise about the rotation centre
pub fn rotate_coordinates(rotation: &Rotation, coords: &mut Coords) {
    if !rotation.is_active() {
        return;
    }
    let (sin, cos) = rotation.angle.to_radians().sin_cos();
    let dx = coords[X_AXIS] - rotation.centre[0];
    let dy = coords[Y_AXIS] - rotation.centre[1];
    coords[X_AXIS] = dx * cos - dy * sin + rotation.centre[0];
    coords[Y_AXIS] = dx * sin + dy * cos + rotation.centre[1];
}
