//! # gcodexec Core
//!
//! Core types, errors, and utilities for gcodexec.
//! Provides the axis and coordinate model, the error taxonomy shared by
//! every crate, and the event bus the engine publishes on.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod types;
pub mod units;

pub use data::{
    axis_index, AxesBitmap, Compatibility, Coords, ExtruderAmounts, MachineType, Plane, AXIS_LETTERS,
    MAX_AXES, MAX_EXTRUDERS, X_AXIS, Y_AXIS, Z_AXIS,
};

pub use error::{CommandError, EngineError, Error, Result};

pub use event_bus::{
    EngineEvent, EventBus, EventBusConfig, MachineEvent, MessageEvent, MessageLevel, PauseReason,
    PrintEvent, StopReason, TriggerEvent,
};

pub use types::{
    thread_safe, thread_safe_map, thread_safe_vec, ThreadSafe, ThreadSafeMap, ThreadSafeVec,
};

pub use units::DistanceUnits;
