//! # gcodexec Engine
//!
//! Multi-channel G-code execution engine.
//! Commands arrive on several input channels at once (print file, serial
//! hosts, network, triggers, a daemon). A cooperative dispatch loop gives
//! each channel a turn, arbitrates shared resources between them, turns
//! move commands into segmented moves for a motion system, and runs the
//! pause, resume and emergency-stop sequences.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gcodexec_engine::{sim::SimMachine, ChannelId, Engine};
//! use gcodexec_settings::EngineConfig;
//!
//! let config = EngineConfig::default();
//! let machine = SimMachine::new(&config);
//! let mut engine = Engine::new(config, machine.collaborators())?;
//! engine.submit(ChannelId::Usb, "G28");
//! engine.run_until_idle(10_000);
//! ```

pub mod channel;
pub mod collaborators;
pub mod command;
mod dispatch;
pub mod engine;
mod execute;
pub mod kinematics;
mod macros;
pub mod motion;
mod pause;
pub mod print;
pub mod reply;
pub mod resource;
pub mod restore;
mod resume_state;
pub mod signals;
pub mod sim;
mod state_machine;
pub mod store;
pub mod trigger;

pub use channel::{
    Channel, ChannelId, CommandStage, GCodeState, MachineState, MacroOrigin, PauseState,
    MAX_QUEUED_OUTPUT,
};
pub use collaborators::{Collaborators, FileStore, HeaterController, MotionSink, ToolInfo, ToolRegistry};
pub use command::DecodedCommand;
pub use engine::Engine;
pub use kinematics::{CartesianKinematics, Kinematics, LimitResult, Segmentation};
pub use motion::{MachinePosition, MoveState, MoveType, Segment, SegmentSource, SegmentedMoveState};
pub use print::PrintJob;
pub use reply::{format_reply, CommandResult, Outcome, Reply, ReplyContext, ReplyKind};
pub use resource::{Resource, ResourceLock, ResourceSet};
pub use restore::{RestorePoint, NUM_RESTORE_POINTS, PAUSE_RESTORE_POINT, TOOL_CHANGE_RESTORE_POINT};
pub use signals::EngineSignals;
pub use store::DirFileStore;
pub use trigger::{TriggerCondition, TriggerItem, Triggers, MAX_TRIGGERS};
