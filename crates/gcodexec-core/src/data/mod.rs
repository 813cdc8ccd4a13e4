//! Data models for axes, coordinates, and machine information
//!
//! This module provides:
//! - Fixed-size coordinate arrays for up to nine logical axes
//! - Axis bitmaps used for homing and "axes mentioned" tracking
//! - Arc plane selection (G17/G18/G19)
//! - Machine type (additive, subtractive, laser)
//! - Channel reply dialects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of logical axes
pub const MAX_AXES: usize = 9;

/// Maximum number of extruder drives
pub const MAX_EXTRUDERS: usize = 6;

/// Axis letters in logical axis order
pub const AXIS_LETTERS: [char; MAX_AXES] = ['X', 'Y', 'Z', 'U', 'V', 'W', 'A', 'B', 'C'];

/// Index of the X axis
pub const X_AXIS: usize = 0;
/// Index of the Y axis
pub const Y_AXIS: usize = 1;
/// Index of the Z axis
pub const Z_AXIS: usize = 2;

/// Per-axis coordinates in millimetres
pub type Coords = [f64; MAX_AXES];

/// Per-extruder amounts in millimetres of filament
pub type ExtruderAmounts = [f64; MAX_EXTRUDERS];

/// Look up the logical axis index for an axis letter
pub fn axis_index(letter: char) -> Option<usize> {
    let upper = letter.to_ascii_uppercase();
    AXIS_LETTERS.iter().position(|&c| c == upper)
}

/// A set of logical axes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxesBitmap(u32);

impl AxesBitmap {
    /// The empty set
    pub const fn new() -> Self {
        Self(0)
    }

    /// The set containing the first `count` axes
    pub fn lowest(count: usize) -> Self {
        let count = count.min(MAX_AXES);
        Self((1u32 << count) - 1)
    }

    /// The set containing a single axis
    pub fn single(axis: usize) -> Self {
        Self(1u32 << axis)
    }

    /// Add an axis
    pub fn set(&mut self, axis: usize) {
        self.0 |= 1u32 << axis;
    }

    /// Remove an axis
    pub fn clear_bit(&mut self, axis: usize) {
        self.0 &= !(1u32 << axis);
    }

    /// Remove every axis
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Check whether an axis is present
    pub fn is_set(&self, axis: usize) -> bool {
        self.0 & (1u32 << axis) != 0
    }

    /// True if no axis is present
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Union of two sets
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Axes present in `self` but not in `other`
    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Raw bit pattern
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Iterate over the axis indices that are present
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_AXES).filter(move |&axis| self.is_set(axis))
    }
}

impl fmt::Display for AxesBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in self.iter() {
            write!(f, "{}", AXIS_LETTERS[axis])?;
        }
        Ok(())
    }
}

/// Arc plane (G17, G18, G19)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    /// G17
    #[default]
    XY,
    /// G18
    ZX,
    /// G19
    YZ,
}

impl Plane {
    /// Plane from its zero-based G-code index (G17 = 0)
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::XY),
            1 => Some(Self::ZX),
            2 => Some(Self::YZ),
            _ => None,
        }
    }

    /// Zero-based index, so that the G code is `17 + index`
    pub fn index(&self) -> u32 {
        match self {
            Self::XY => 0,
            Self::ZX => 1,
            Self::YZ => 2,
        }
    }

    /// The first axis of the plane: X for G17, Z for G18, Y for G19
    pub fn axis0(&self) -> usize {
        match self {
            Self::XY => X_AXIS,
            Self::ZX => Z_AXIS,
            Self::YZ => Y_AXIS,
        }
    }

    /// The second axis of the plane
    pub fn axis1(&self) -> usize {
        (self.axis0() + 1) % 3
    }
}

/// What sort of machine the engine is driving
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    /// Fused filament fabrication (3D printer)
    #[default]
    Fff,
    /// Subtractive machining
    Cnc,
    /// Laser cutter or engraver
    Laser,
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineType::Fff => write!(f, "FFF"),
            MachineType::Cnc => write!(f, "CNC"),
            MachineType::Laser => write!(f, "Laser"),
        }
    }
}

/// Reply dialect spoken on a channel (M555)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compatibility {
    /// Native replies
    #[default]
    Default,
    /// Native replies, selected explicitly
    RepRapFirmware,
    /// Marlin-style replies with an `ok` trailer
    Marlin,
    /// Teacup (not emulated)
    Teacup,
    /// Sprinter (not emulated)
    Sprinter,
    /// Repetier (not emulated)
    Repetier,
    /// Marlin-like replies for nanoDLP
    NanoDlp,
}

impl Compatibility {
    /// Dialect from its M555 P number
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Default),
            1 => Some(Self::RepRapFirmware),
            2 => Some(Self::Marlin),
            3 => Some(Self::Teacup),
            4 => Some(Self::Sprinter),
            5 => Some(Self::Repetier),
            6 => Some(Self::NanoDlp),
            _ => None,
        }
    }

    /// True for the dialects that end each reply with `ok`
    pub fn is_marlin_like(&self) -> bool {
        matches!(self, Self::Marlin | Self::NanoDlp)
    }
}

impl fmt::Display for Compatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::RepRapFirmware => write!(f, "RepRapFirmware"),
            Self::Marlin => write!(f, "Marlin"),
            Self::Teacup => write!(f, "Teacup"),
            Self::Sprinter => write!(f, "Sprinter"),
            Self::Repetier => write!(f, "Repetier"),
            Self::NanoDlp => write!(f, "nanoDLP"),
        }
    }
}

impl std::str::FromStr for Compatibility {
    type Err = String;

    // Names are matched case-insensitively, so "marlin" and "Marlin" are the same dialect.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "native" => Ok(Self::Default),
            "reprapfirmware" | "rrf" => Ok(Self::RepRapFirmware),
            "marlin" => Ok(Self::Marlin),
            "teacup" => Ok(Self::Teacup),
            "sprinter" => Ok(Self::Sprinter),
            "repetier" => Ok(Self::Repetier),
            "nanodlp" => Ok(Self::NanoDlp),
            _ => Err(format!("Unknown compatibility: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_index() {
        assert_eq!(axis_index('x'), Some(X_AXIS));
        assert_eq!(axis_index('Z'), Some(Z_AXIS));
        assert_eq!(axis_index('C'), Some(8));
        assert_eq!(axis_index('E'), None);
    }

    #[test]
    fn test_axes_bitmap() {
        let mut axes = AxesBitmap::new();
        axes.set(X_AXIS);
        axes.set(Z_AXIS);
        assert!(axes.is_set(X_AXIS));
        assert!(!axes.is_set(Y_AXIS));
        assert_eq!(axes.iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(axes.to_string(), "XZ");

        let all = AxesBitmap::lowest(3);
        assert_eq!(all.difference(axes), AxesBitmap::single(Y_AXIS));
        axes.clear_bit(X_AXIS);
        assert_eq!(axes, AxesBitmap::single(Z_AXIS));
    }

    #[test]
    fn test_compatibility_names() {
        assert_eq!("marlin".parse::<Compatibility>(), Ok(Compatibility::Marlin));
        assert_eq!("Marlin".parse::<Compatibility>(), Ok(Compatibility::Marlin));
        assert_eq!(Compatibility::from_index(6), Some(Compatibility::NanoDlp));
        assert!(Compatibility::NanoDlp.is_marlin_like());
        assert!(!Compatibility::RepRapFirmware.is_marlin_like());
    }

    #[test]
    fn test_plane_axes() {
        assert_eq!((Plane::XY.axis0(), Plane::XY.axis1()), (X_AXIS, Y_AXIS));
        assert_eq!((Plane::ZX.axis0(), Plane::ZX.axis1()), (Z_AXIS, X_AXIS));
        assert_eq!((Plane::YZ.axis0(), Plane::YZ.axis1()), (Y_AXIS, Z_AXIS));
        assert_eq!(Plane::from_index(2), Some(Plane::YZ));
        assert_eq!(Plane::from_index(3), None);
    }
}
