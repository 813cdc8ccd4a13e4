//! Unit conversion utilities
//!
//! Handles the G20/G21 distance mode and the feed rate conversions the
//! engine needs. Everything inside the engine is held in millimetres and
//! millimetres per minute.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimetres per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Distance units selected by G20/G21
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnits {
    /// G21
    #[default]
    Millimetres,
    /// G20
    Inches,
}

impl DistanceUnits {
    /// Convert a value given in these units to millimetres
    pub fn to_mm(&self, value: f64) -> f64 {
        match self {
            Self::Millimetres => value,
            Self::Inches => value * MM_PER_INCH,
        }
    }

    /// Convert a millimetre value to these units
    pub fn from_mm(&self, value_mm: f64) -> f64 {
        match self {
            Self::Millimetres => value_mm,
            Self::Inches => value_mm / MM_PER_INCH,
        }
    }

    /// The G code that selects these units
    pub fn gcode(&self) -> &'static str {
        match self {
            Self::Millimetres => "G21",
            Self::Inches => "G20",
        }
    }
}

impl fmt::Display for DistanceUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millimetres => write!(f, "mm"),
            Self::Inches => write!(f, "in"),
        }
    }
}

impl FromStr for DistanceUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mm" | "millimetres" | "metric" => Ok(Self::Millimetres),
            "in" | "inch" | "inches" | "imperial" => Ok(Self::Inches),
            _ => Err(format!("Unknown distance units: {}", s)),
        }
    }
}

/// Convert a feed rate in mm/min to mm/s
pub fn mm_per_min_to_mm_per_sec(feed_mm_per_min: f64) -> f64 {
    feed_mm_per_min / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inch_conversion() {
        assert_eq!(DistanceUnits::Inches.to_mm(2.0), 50.8);
        assert!((DistanceUnits::Inches.from_mm(25.4) - 1.0).abs() < 1e-12);
        assert_eq!(DistanceUnits::Millimetres.to_mm(3.5), 3.5);
    }

    #[test]
    fn test_parse_units() {
        assert_eq!("mm".parse::<DistanceUnits>(), Ok(DistanceUnits::Millimetres));
        assert_eq!("Inch".parse::<DistanceUnits>(), Ok(DistanceUnits::Inches));
        assert!("furlong".parse::<DistanceUnits>().is_err());
    }

    #[test]
    fn test_gcode_names() {
        assert_eq!(DistanceUnits::Inches.gcode(), "G20");
        assert_eq!(DistanceUnits::default().gcode(), "G21");
    }
}
