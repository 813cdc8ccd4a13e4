//! Event type definitions for the event bus.
//!
//! Events are cloneable and serializable so that they can be logged or
//! replayed. Channels are identified by name so that this crate does not
//! depend on the engine's channel table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root event enum for all engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Print job lifecycle
    Print(PrintEvent),
    /// Machine-wide state changes
    Machine(MachineEvent),
    /// Trigger activity
    Trigger(TriggerEvent),
    /// Operator-facing messages
    Message(MessageEvent),
}

impl EngineEvent {
    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            EngineEvent::Print(e) => e.description(),
            EngineEvent::Machine(e) => e.description(),
            EngineEvent::Trigger(e) => e.description(),
            EngineEvent::Message(e) => e.text.clone(),
        }
    }

    /// Convenience constructor for an operator message
    pub fn message(level: MessageLevel, text: impl Into<String>) -> Self {
        EngineEvent::Message(MessageEvent {
            level,
            text: text.into(),
        })
    }
}

/// Why a print stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The file ran to its end
    NormalCompletion,
    /// The operator cancelled a paused print
    UserCancelled,
    /// The print was aborted by an error or emergency stop
    Abort,
}

/// Why a print paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// M25 from a user channel
    User,
    /// M226 in the print file
    GCode,
    /// External trigger 1
    Trigger,
    /// Filament or other monitor
    Filament,
    /// Motor stall detected
    Stall,
    /// Supply voltage dropped
    LowVoltage,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::User => write!(f, "user"),
            PauseReason::GCode => write!(f, "gcode"),
            PauseReason::Trigger => write!(f, "trigger"),
            PauseReason::Filament => write!(f, "filament"),
            PauseReason::Stall => write!(f, "stall"),
            PauseReason::LowVoltage => write!(f, "low voltage"),
        }
    }
}

/// Print job events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PrintEvent {
    /// A print file started
    Started {
        /// The file being printed.
        file: String,
        /// When the print started.
        at: DateTime<Utc>,
    },
    /// A print finished, was cancelled or aborted
    Stopped {
        /// The file that was printing.
        file: String,
        /// Why it stopped.
        reason: StopReason,
        /// Total elapsed time.
        elapsed: Duration,
    },
    /// A pause began
    Pausing {
        /// Why the print is pausing.
        reason: PauseReason,
        /// File offset the print will resume from.
        file_position: u64,
    },
    /// The pause sequence completed
    Paused,
    /// The print resumed
    Resumed,
}

impl PrintEvent {
    fn description(&self) -> String {
        match self {
            PrintEvent::Started { file, .. } => format!("Started printing {}", file),
            PrintEvent::Stopped { file, reason, .. } => {
                format!("Stopped printing {} ({:?})", file, reason)
            }
            PrintEvent::Pausing {
                reason,
                file_position,
            } => format!("Pausing ({}) at file offset {}", reason, file_position),
            PrintEvent::Paused => "Paused".to_string(),
            PrintEvent::Resumed => "Resumed".to_string(),
        }
    }
}

/// Machine-wide events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MachineEvent {
    /// Everything stopped; a reset is required
    EmergencyStop,
    /// A tool was selected (None = no tool)
    ToolChanged {
        /// The new tool number.
        tool: Option<u32>,
    },
    /// Axes finished homing
    Homed {
        /// Letters of the axes that are now homed.
        axes: String,
    },
    /// A blocking message is waiting for acknowledgement
    MessageBoxShown {
        /// The channel that is blocked.
        channel: String,
        /// The message text.
        text: String,
    },
}

impl MachineEvent {
    fn description(&self) -> String {
        match self {
            MachineEvent::EmergencyStop => "Emergency stop".to_string(),
            MachineEvent::ToolChanged { tool: Some(t) } => format!("Tool {} selected", t),
            MachineEvent::ToolChanged { tool: None } => "No tool selected".to_string(),
            MachineEvent::Homed { axes } => format!("Homed {}", axes),
            MachineEvent::MessageBoxShown { channel, text } => {
                format!("Message on {}: {}", channel, text)
            }
        }
    }
}

/// Trigger events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TriggerEvent {
    /// A trigger became pending
    Pending {
        /// The trigger number.
        number: usize,
    },
    /// A trigger was actioned
    Fired {
        /// The trigger number.
        number: usize,
    },
    /// A pause trigger was dropped because nothing was printing
    Discarded {
        /// The trigger number.
        number: usize,
    },
}

impl TriggerEvent {
    fn description(&self) -> String {
        match self {
            TriggerEvent::Pending { number } => format!("Trigger {} pending", number),
            TriggerEvent::Fired { number } => format!("Trigger {} fired", number),
            TriggerEvent::Discarded { number } => format!("Trigger {} discarded", number),
        }
    }
}

/// Severity of an operator message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    /// Informational
    Info,
    /// Something odd but recoverable
    Warning,
    /// Something failed
    Error,
}

/// Operator-facing message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Severity.
    pub level: MessageLevel,
    /// The message text.
    pub text: String,
}
