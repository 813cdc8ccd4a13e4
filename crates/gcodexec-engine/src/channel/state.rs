//! Per-command execution states and the print pause state

use std::fmt;
use std::time::Instant;

/// Where a channel is within a multi-step command
///
/// A channel in any state other than `Normal` is stepped by the state
/// machine on each poll instead of fetching a new command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GCodeState {
    /// Between commands
    #[default]
    Normal,
    /// A homing or raw motor move must finish before the command completes
    WaitingForSpecialMoveToComplete,
    /// Every segment of a segmented move must be taken by the motion system
    WaitingForSegmentedMoveToGo,
    /// Waiting for all queued motion to stop
    WaitingForMoves,
    /// G4 in progress
    Dwelling {
        /// When the dwell ends.
        until: Instant,
    },
    /// G28: run the homing macro for the next axes still to be homed
    Homing1,
    /// G28: homing macro finished, check what it homed
    Homing2,
    /// Tool change: free the old tool
    ToolChange0,
    /// Tool change: prepare the new tool
    ToolChange1,
    /// Tool change: select the new tool and run its post macro
    ToolChange2,
    /// Tool change: wait for motion, then finish
    ToolChangeComplete,
    /// Pause: wait for standstill, then run the pause macro
    Pausing1,
    /// Pause: pause macro finished
    Pausing2,
    /// Resume: resume macro finished, move back over the restore point
    Resuming1,
    /// Resume: lower onto the restore point
    Resuming2,
    /// Resume: restore feed rate and extrusion, carry on printing
    Resuming3,
    /// M0/M1 with a paused print: cancel macro running
    Cancelling,
    /// M0/M1 without a paused print: stop or sleep macro running
    Stopping,
    /// Auto-pause channel finishing a power-fail or stall pause
    PowerFailPausing1,
}

impl GCodeState {
    /// True while a pause or resume sequence is in progress
    pub fn is_pause_sequence(&self) -> bool {
        matches!(
            self,
            Self::Pausing1 | Self::Pausing2 | Self::Resuming1 | Self::Resuming2 | Self::Resuming3
        )
    }
}

impl fmt::Display for GCodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::WaitingForSpecialMoveToComplete => write!(f, "waitingForSpecialMoveToComplete"),
            Self::WaitingForSegmentedMoveToGo => write!(f, "waitingForSegmentedMoveToGo"),
            Self::WaitingForMoves => write!(f, "waitingForMoves"),
            Self::Dwelling { .. } => write!(f, "dwelling"),
            Self::Homing1 => write!(f, "homing1"),
            Self::Homing2 => write!(f, "homing2"),
            Self::ToolChange0 => write!(f, "toolChange0"),
            Self::ToolChange1 => write!(f, "toolChange1"),
            Self::ToolChange2 => write!(f, "toolChange2"),
            Self::ToolChangeComplete => write!(f, "toolChangeComplete"),
            Self::Pausing1 => write!(f, "pausing1"),
            Self::Pausing2 => write!(f, "pausing2"),
            Self::Resuming1 => write!(f, "resuming1"),
            Self::Resuming2 => write!(f, "resuming2"),
            Self::Resuming3 => write!(f, "resuming3"),
            Self::Cancelling => write!(f, "cancelling"),
            Self::Stopping => write!(f, "stopping"),
            Self::PowerFailPausing1 => write!(f, "powerFailPausing1"),
        }
    }
}

/// Print pause cycle
///
/// Ordered so that `state > PauseState::Pausing` means paused or resuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PauseState {
    /// Printing normally, or not printing at all
    #[default]
    NotPaused,
    /// Pause requested, pause macro not yet finished
    Pausing,
    /// Fully paused
    Paused,
    /// Resume macro and re-approach moves in progress
    Resuming,
}

impl fmt::Display for PauseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPaused => write!(f, "notPaused"),
            Self::Pausing => write!(f, "pausing"),
            Self::Paused => write!(f, "paused"),
            Self::Resuming => write!(f, "resuming"),
        }
    }
}
