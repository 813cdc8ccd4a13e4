//! Input channels and their machine-state stacks
//!
//! A channel is one source of commands: a network connection, a serial
//! port, the print file, an internal queue. Every channel owns a stack of
//! [`MachineState`] frames, the command it is currently executing and the
//! replies waiting to be collected.

mod machine_state;
mod state;

pub use machine_state::{GcodeFile, MachineState, MacroOrigin};
pub use state::{GCodeState, PauseState};

use crate::command::DecodedCommand;
use gcodexec_core::{CommandError, Compatibility};
use gcodexec_settings::EngineConfig;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::time::Instant;

/// Number of channels, including the auto-pause channel
pub const NUM_CHANNELS: usize = 12;

/// Replies kept per channel until collected; older lines are dropped
pub const MAX_QUEUED_OUTPUT: usize = 64;

/// Identity of an input channel
///
/// Declaration order is the round-robin order; `AutoPause` is serviced
/// ahead of the others on every poll and is not part of the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    /// HTTP requests
    Http,
    /// Telnet sessions
    Telnet,
    /// The print file
    File,
    /// USB serial
    Usb,
    /// Aux serial (panel)
    Aux,
    /// Trigger macros and config.g
    Trigger,
    /// Commands queued behind moves
    Queue,
    /// LCD panel
    Lcd,
    /// Single-board-computer link
    Sbc,
    /// daemon.g
    Daemon,
    /// Second aux serial
    Aux2,
    /// Power-fail and stall pauses
    AutoPause,
}

impl ChannelId {
    /// Every channel in declaration order
    pub const ALL: [ChannelId; NUM_CHANNELS] = [
        Self::Http,
        Self::Telnet,
        Self::File,
        Self::Usb,
        Self::Aux,
        Self::Trigger,
        Self::Queue,
        Self::Lcd,
        Self::Sbc,
        Self::Daemon,
        Self::Aux2,
        Self::AutoPause,
    ];

    /// Channels taking part in round-robin polling
    pub const ROUND_ROBIN: [ChannelId; NUM_CHANNELS - 1] = [
        Self::Http,
        Self::Telnet,
        Self::File,
        Self::Usb,
        Self::Aux,
        Self::Trigger,
        Self::Queue,
        Self::Lcd,
        Self::Sbc,
        Self::Daemon,
        Self::Aux2,
    ];

    /// Position in [`ChannelId::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Channels whose empty replies are never sent anywhere
    pub fn suppresses_empty_replies(&self) -> bool {
        matches!(
            self,
            Self::File
                | Self::Queue
                | Self::Trigger
                | Self::AutoPause
                | Self::Daemon
                | Self::Aux
                | Self::Aux2
        )
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "HTTP",
            Self::Telnet => "Telnet",
            Self::File => "File",
            Self::Usb => "USB",
            Self::Aux => "Aux",
            Self::Trigger => "Trigger",
            Self::Queue => "Queue",
            Self::Lcd => "LCD",
            Self::Sbc => "SBC",
            Self::Daemon => "Daemon",
            Self::Aux2 => "Aux2",
            Self::AutoPause => "Autopause",
        };
        write!(f, "{}", name)
    }
}

/// Where the channel is in the fetch/execute cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandStage {
    /// No command held
    #[default]
    Idle,
    /// A decoded command is waiting to run
    Ready,
    /// The command returned "not finished" and will be re-entered
    Executing,
}

/// One input channel
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    frames: Vec<MachineState>,
    max_depth: usize,
    input: VecDeque<String>,
    output: VecDeque<String>,
    /// Command being executed
    pub command: Option<DecodedCommand>,
    /// Fetch/execute stage of `command`
    pub stage: CommandStage,
    /// File offset of the start of `command`, when it came from a file
    pub command_file_pos: Option<u64>,
    /// When the last unsolicited status report was sent
    pub last_report: Instant,
}

impl Channel {
    /// Create a channel with a single top-level frame
    pub fn new(id: ChannelId, config: &EngineConfig) -> Self {
        let compatibility = if id == ChannelId::Usb {
            config.channels.usb_compatibility
        } else {
            config.channels.default_compatibility
        };
        Self {
            id,
            frames: vec![MachineState::new(
                config.machine.default_feed_rate,
                compatibility,
            )],
            max_depth: config.channels.max_stack_depth.max(1),
            input: VecDeque::new(),
            output: VecDeque::new(),
            command: None,
            stage: CommandStage::Idle,
            command_file_pos: None,
            last_report: Instant::now(),
        }
    }

    /// Channel identity
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The frame commands currently execute in
    pub fn latest(&self) -> &MachineState {
        let top = self.frames.len() - 1;
        &self.frames[top]
    }

    /// Mutable access to the top frame
    pub fn latest_mut(&mut self) -> &mut MachineState {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    /// The frame below the top one, if any
    pub fn parent(&self) -> Option<&MachineState> {
        self.frames.len().checked_sub(2).map(|i| &self.frames[i])
    }

    /// The bottom frame
    pub fn original(&self) -> &MachineState {
        &self.frames[0]
    }

    /// Mutable access to the bottom frame
    pub fn original_mut(&mut self) -> &mut MachineState {
        &mut self.frames[0]
    }

    /// Every frame, bottom first
    pub fn frames(&self) -> &[MachineState] {
        &self.frames
    }

    /// Mutable access to every frame
    pub fn frames_mut(&mut self) -> &mut [MachineState] {
        &mut self.frames
    }

    /// Number of frames on the stack
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Current state of the command-level state machine
    pub fn state(&self) -> GCodeState {
        self.latest().state
    }

    /// Set the state of the top frame
    pub fn set_state(&mut self, state: GCodeState) {
        let id = self.id;
        let latest = self.latest_mut();
        if latest.state != state {
            tracing::trace!("{} state {} -> {}", id, latest.state, state);
            latest.state = state;
        }
    }

    /// Reply dialect of the top frame
    pub fn compatibility(&self) -> Compatibility {
        self.latest().compatibility
    }

    /// True if the top frame is reading a file
    pub fn is_doing_file(&self) -> bool {
        self.latest().file.is_some()
    }

    /// True if the top frame runs a macro file
    pub fn is_doing_file_macro(&self) -> bool {
        self.latest().doing_file_macro
    }

    /// True if some frame below the top one runs a macro file
    pub fn is_in_macro(&self) -> bool {
        self.frames.iter().any(|frame| frame.doing_file_macro)
    }

    /// Push a copy of the top frame
    ///
    /// With `within_same_file` the file moves up into the new frame, so
    /// reading continues where it left off.
    pub fn push(&mut self, within_same_file: bool) -> Result<(), CommandError> {
        if self.frames.len() >= self.max_depth {
            tracing::error!("{} macro stack overflow", self.id);
            return Err(CommandError::StackOverflow);
        }
        let mut child = MachineState::child_of(self.latest());
        if within_same_file {
            child.file = self.latest_mut().file.take();
        }
        self.frames.push(child);
        Ok(())
    }

    /// Pop the top frame, returning false if only the bottom frame is left
    pub fn pop(&mut self, within_same_file: bool) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        let popped = self.frames.pop();
        if within_same_file {
            if let Some(file) = popped.and_then(|frame| frame.file) {
                self.latest_mut().file = Some(file);
            }
        }
        true
    }

    /// Drop every frame above the bottom one
    pub fn unwind(&mut self) {
        self.frames.truncate(1);
    }

    /// Clear the command buffer
    pub fn init(&mut self) {
        self.command = None;
        self.stage = CommandStage::Idle;
        self.command_file_pos = None;
    }

    /// Abort everything: unwind, close files and reset the state machine
    pub fn abort(&mut self) {
        self.unwind();
        let original = self.original_mut();
        original.file = None;
        original.state = GCodeState::Normal;
        original.waiting_for_acknowledgement = false;
        original.message_acknowledged = false;
        original.message_cancelled = false;
        original.pending_reply = None;
        self.input.clear();
        self.init();
    }

    /// Queue a line of input
    pub fn submit(&mut self, line: impl Into<String>) {
        self.input.push_back(line.into());
    }

    /// Take the next line of input
    pub fn next_input(&mut self) -> Option<String> {
        self.input.pop_front()
    }

    /// True if input lines are queued
    pub fn has_input(&self) -> bool {
        !self.input.is_empty()
    }

    /// Queue a line of output, dropping the oldest once nobody collects
    pub fn write_output(&mut self, text: impl Into<String>) {
        if self.output.len() >= MAX_QUEUED_OUTPUT {
            self.output.pop_front();
        }
        self.output.push_back(text.into());
    }

    /// Collect everything written so far
    pub fn take_output(&mut self) -> Vec<String> {
        self.output.drain(..).collect()
    }

    /// True if output is waiting to be collected
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Nothing queued, nothing executing, no file open and no macro running
    pub fn is_completely_idle(&self) -> bool {
        self.frames.len() == 1
            && self.stage == CommandStage::Idle
            && self.latest().state == GCodeState::Normal
            && self.latest().file.is_none()
            && !self.latest().waiting_for_acknowledgement
            && self.input.is_empty()
    }
}

/// The channel table, indexable by [`ChannelId`]
#[derive(Debug)]
pub struct Channels {
    channels: [Channel; NUM_CHANNELS],
}

impl Channels {
    /// Create every channel
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            channels: std::array::from_fn(|i| Channel::new(ChannelId::ALL[i], config)),
        }
    }

    /// Iterate over every channel
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Iterate mutably over every channel
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }
}

impl Index<ChannelId> for Channels {
    type Output = Channel;

    fn index(&self, id: ChannelId) -> &Channel {
        &self.channels[id.index()]
    }
}

impl IndexMut<ChannelId> for Channels {
    fn index_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Channel {
        Channel::new(ChannelId::File, &EngineConfig::default())
    }

    #[test]
    fn test_channel_order() {
        for (i, id) in ChannelId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
        assert!(!ChannelId::ROUND_ROBIN.contains(&ChannelId::AutoPause));
        assert_eq!(ChannelId::AutoPause.to_string(), "Autopause");
    }

    #[test]
    fn test_usb_dialect_from_config() {
        let config = EngineConfig::default();
        let channels = Channels::new(&config);
        assert_eq!(
            channels[ChannelId::Usb].compatibility(),
            config.channels.usb_compatibility
        );
        assert_eq!(
            channels[ChannelId::Http].compatibility(),
            config.channels.default_compatibility
        );
    }

    #[test]
    fn test_output_is_bounded() {
        let mut ch = channel();
        for i in 0..MAX_QUEUED_OUTPUT + 10 {
            ch.write_output(format!("line {}", i));
        }
        let out = ch.take_output();
        assert_eq!(out.len(), MAX_QUEUED_OUTPUT);
        assert_eq!(out[0], "line 10");
        assert!(!ch.has_output());
    }

    #[test]
    fn test_push_pop() {
        let mut ch = channel();
        ch.latest_mut().axes_relative = true;
        ch.push(false).unwrap();
        assert_eq!(ch.depth(), 2);
        assert!(ch.latest().axes_relative);
        ch.latest_mut().axes_relative = false;
        assert!(ch.pop(false));
        assert!(ch.latest().axes_relative);
        assert!(!ch.pop(false));
    }

    #[test]
    fn test_push_within_same_file_moves_file() {
        let mut ch = channel();
        ch.latest_mut().file = Some(GcodeFile::new("print.g", "G1 X1\n".to_string()));
        ch.push(true).unwrap();
        assert!(ch.is_doing_file());
        assert!(ch.parent().is_some_and(|frame| frame.file.is_none()));
        assert!(ch.pop(true));
        assert!(ch.is_doing_file());
    }

    #[test]
    fn test_stack_overflow() {
        let mut ch = channel();
        let depth = EngineConfig::default().channels.max_stack_depth;
        for _ in 1..depth {
            ch.push(false).unwrap();
        }
        assert_eq!(ch.push(false), Err(CommandError::StackOverflow));
        assert_eq!(ch.depth(), depth);
    }

    #[test]
    fn test_abort_resets_channel() {
        let mut ch = channel();
        ch.submit("G1 X1");
        ch.latest_mut().file = Some(GcodeFile::new("print.g", String::new()));
        ch.push(false).unwrap();
        ch.set_state(GCodeState::Homing1);
        ch.abort();
        assert!(ch.is_completely_idle());
    }
}
