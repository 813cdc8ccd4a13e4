//! The engine context
//!
//! [`Engine`] owns every piece of shared state: the channel table, the
//! resource owner table, the pending move, the position bookkeeping and the
//! pause state. The dispatch loop, the move builders and the pause logic are
//! all `impl Engine` blocks in their own modules and reach that state
//! through `&mut self`, so there is no global state anywhere.

use crate::channel::{Channel, ChannelId, Channels, PauseState};
use crate::collaborators::{Collaborators, ToolInfo};
use crate::motion::{
    rotate_coordinates, tool_offset_inverse_transform, tool_offset_transform, MachinePosition,
    MoveType, SegmentSource, ToolMapping,
};
use crate::print::PrintJob;
use crate::resource::{Resource, ResourceLock};
use crate::restore::{RestorePoint, NUM_RESTORE_POINTS};
use crate::signals::EngineSignals;
use crate::trigger::Triggers;
use gcodexec_core::{AxesBitmap, Coords, EngineEvent, EventBus, MessageLevel};
use gcodexec_settings::{ConfigResult, EngineConfig};
use std::sync::Arc;
use std::time::Instant;

/// How far into a move a resumed print starts, from M26 P
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct PartialMove {
    pub fraction: f64,
    pub initial_user_c0: f64,
    pub initial_user_c1: f64,
}

/// Tool change macro selection bits of the T command's P parameter
pub(crate) const TFREE: u32 = 1;
pub(crate) const TPRE: u32 = 2;
pub(crate) const TPOST: u32 = 4;

/// A tool change in progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ToolChange {
    pub old_tool: Option<u32>,
    pub new_tool: Option<u32>,
    pub macros: u32,
}

impl Default for ToolChange {
    fn default() -> Self {
        Self {
            old_tool: None,
            new_tool: None,
            macros: TFREE | TPRE | TPOST,
        }
    }
}

/// A homing or raw motor move that must finish before the command completes
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SpecialMove {
    pub axes: AxesBitmap,
    pub towards_max: AxesBitmap,
    pub move_type: MoveType,
}

/// Multi-channel G-code execution engine
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) channels: Channels,
    pub(crate) locks: ResourceLock,
    pub(crate) segments: Arc<SegmentSource>,
    pub(crate) collab: Collaborators,
    pub(crate) events: Arc<EventBus>,
    pub(crate) signals: Arc<EngineSignals>,
    pub(crate) position: MachinePosition,
    pub(crate) restore_points: [RestorePoint; NUM_RESTORE_POINTS],
    pub(crate) triggers: Triggers,
    pub(crate) print: PrintJob,
    pub(crate) pause_state: PauseState,
    pub(crate) paused_in_macro: bool,
    pub(crate) power_fail_paused: bool,
    pub(crate) deferred_pause: bool,
    pub(crate) file_offset_to_print: u64,
    pub(crate) restart: PartialMove,
    pub(crate) print_file_position_at_macro_start: Option<u64>,
    pub(crate) next_channel: usize,
    pub(crate) running_config_file: bool,
    pub(crate) tool_change: ToolChange,
    pub(crate) special_move: Option<SpecialMove>,
    pub(crate) emergency_stopped: bool,
    pub(crate) last_daemon_run: Instant,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pause_state", &self.pause_state)
            .field("segments", &self.segments)
            .field("emergency_stopped", &self.emergency_stopped)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine driving the given collaborators
    ///
    /// Fails if the configuration does not validate.
    pub fn new(config: EngineConfig, collab: Collaborators) -> ConfigResult<Self> {
        config.validate()?;
        let segments = Arc::new(SegmentSource::new(Arc::clone(&collab.kinematics)));
        let events = Arc::new(EventBus::with_config(config.events.bus_config()));
        let mut engine = Self {
            channels: Channels::new(&config),
            locks: ResourceLock::new(),
            segments,
            collab,
            events,
            signals: Arc::new(EngineSignals::new()),
            position: MachinePosition::new(config.machine.visible_axes),
            restore_points: Default::default(),
            triggers: Triggers::new(),
            print: PrintJob::new(),
            pause_state: PauseState::NotPaused,
            paused_in_macro: false,
            power_fail_paused: false,
            deferred_pause: false,
            file_offset_to_print: 0,
            restart: PartialMove::default(),
            print_file_position_at_macro_start: None,
            next_channel: 0,
            running_config_file: false,
            tool_change: ToolChange::default(),
            special_move: None,
            emergency_stopped: false,
            last_daemon_run: Instant::now(),
            config,
        };
        engine.reset();
        Ok(engine)
    }

    /// Put every channel, the pending move and the position back to power-up state
    ///
    /// Output already queued on a channel survives so that it can still be
    /// collected.
    pub(crate) fn reset(&mut self) {
        for id in ChannelId::ALL {
            let output = self.channels[id].take_output();
            let channel = &mut self.channels[id];
            *channel = Channel::new(id, &self.config);
            for line in output {
                channel.write_output(line);
            }
        }
        self.locks.clear();
        self.segments.clear();
        self.next_channel = 0;

        self.position = MachinePosition::new(self.config.machine.visible_axes);
        self.position.machine = self
            .collab
            .kinematics
            .assumed_initial_position(self.position.num_axes);
        self.position.user = tool_offset_inverse_transform(&self.position, None, &self.position.machine);

        for rp in self.restore_points.iter_mut() {
            rp.init();
        }
        self.triggers.init();
        self.print = PrintJob::new();
        self.pause_state = PauseState::NotPaused;
        self.paused_in_macro = false;
        self.power_fail_paused = false;
        self.deferred_pause = false;
        self.file_offset_to_print = 0;
        self.restart = PartialMove::default();
        self.print_file_position_at_macro_start = None;
        self.running_config_file = false;
        self.tool_change = ToolChange::default();
        self.special_move = None;
        self.last_daemon_run = Instant::now();
    }

    /// Clear an emergency stop and start again from power-up state
    pub fn reset_after_emergency_stop(&mut self) {
        self.reset();
        self.emergency_stopped = false;
        tracing::info!("engine reset after emergency stop");
    }

    /// Configuration in force
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bus the engine publishes its events on
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Latch for asynchronous stop, power-fail, stall and trigger input signals
    pub fn signals(&self) -> Arc<EngineSignals> {
        Arc::clone(&self.signals)
    }

    /// The pending move, shared with the motion system
    pub fn segment_source(&self) -> Arc<SegmentSource> {
        Arc::clone(&self.segments)
    }

    /// Queue a line of input on a channel
    pub fn submit(&mut self, id: ChannelId, line: impl Into<String>) {
        self.channels[id].submit(line);
    }

    /// Collect the replies written to a channel
    pub fn take_output(&mut self, id: ChannelId) -> Vec<String> {
        self.channels[id].take_output()
    }

    /// Read-only view of a channel
    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id]
    }

    /// Pause state of the print
    pub fn pause_state(&self) -> PauseState {
        self.pause_state
    }

    /// Current user position of every axis, including workplace offsets
    pub fn user_position(&self) -> Coords {
        self.position.user
    }

    /// Machine position at the end of the last move
    pub fn machine_position(&self) -> Coords {
        self.position.machine
    }

    /// Position bookkeeping
    pub fn position(&self) -> &MachinePosition {
        &self.position
    }

    /// A numbered restore point
    pub fn restore_point(&self, number: usize) -> Option<&RestorePoint> {
        self.restore_points.get(number)
    }

    /// Channel owning a resource
    pub fn lock_owner(&self, resource: Resource) -> Option<ChannelId> {
        self.locks.owner(resource)
    }

    /// True after an emergency stop until the engine is reset
    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stopped
    }

    /// True while a file print is in progress, paused or not
    pub fn is_printing(&self) -> bool {
        self.print.is_active()
    }

    /// The print job
    pub fn print_job(&self) -> &PrintJob {
        &self.print
    }

    /// Axes that have been homed
    pub fn axes_homed(&self) -> AxesBitmap {
        self.position.axes_homed
    }

    /// True when no channel has work, no move is pending and the machine is still
    pub fn is_idle(&self) -> bool {
        self.channels.iter().all(|ch| ch.is_completely_idle())
            && !self.segments.is_busy()
            && self.collab.motion.all_moves_finished()
    }

    pub(crate) fn publish(&self, event: EngineEvent) {
        self.events.publish(event);
    }

    /// Log an operator message and publish it on the event bus
    pub(crate) fn message(&self, level: MessageLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            MessageLevel::Info => tracing::info!("{}", text),
            MessageLevel::Warning => tracing::warn!("{}", text),
            MessageLevel::Error => tracing::error!("{}", text),
        }
        self.publish(EngineEvent::message(level, text));
    }

    pub(crate) fn lock_resource(&mut self, id: ChannelId, resource: Resource) -> bool {
        self.locks.try_lock(&mut self.channels[id], resource)
    }

    pub(crate) fn lock_movement(&mut self, id: ChannelId) -> bool {
        self.lock_resource(id, Resource::Movement)
    }

    /// Partial-move restart for the next move on a channel; only the print file itself uses it
    pub(crate) fn move_restart(&self, id: ChannelId) -> PartialMove {
        if id == ChannelId::File && !self.channels[id].is_doing_file_macro() {
            self.restart
        } else {
            PartialMove::default()
        }
    }

    /// No move pending and the motion system has finished everything
    pub(crate) fn at_standstill(&self) -> bool {
        !self.segments.is_busy() && self.collab.motion.all_moves_finished()
    }

    /// Lock movement, wait for every move to finish, then refresh the user position
    pub(crate) fn lock_movement_and_wait_for_standstill(&mut self, id: ChannelId) -> bool {
        if !self.lock_movement(id) || !self.at_standstill() {
            return false;
        }
        self.update_user_position_from_machine();
        true
    }

    /// Re-derive the user position from where the motion system says the machine is
    pub(crate) fn update_user_position_from_machine(&mut self) {
        let machine = self.collab.motion.machine_position();
        self.position.machine = machine;
        let tool = self.current_tool_mapping();
        let mut user = tool_offset_inverse_transform(&self.position, tool.as_ref(), &machine);
        if self.position.rotation.is_active() {
            let mut inverse = self.position.rotation;
            inverse.angle = -inverse.angle;
            rotate_coordinates(&inverse, &mut user);
        }
        self.position.user = user;
    }

    /// Push the user position through to the machine position and tell the motion system
    pub(crate) fn set_machine_position_from_user(&mut self) {
        let tool = self.current_tool_mapping();
        let mut machine = self.position.machine;
        tool_offset_transform(
            &self.position,
            tool.as_ref(),
            &self.position.user,
            &mut machine,
            AxesBitmap::lowest(self.position.num_axes),
        );
        self.position.machine = machine;
        self.collab.motion.set_machine_position(&machine);
    }

    pub(crate) fn current_tool(&self) -> Option<ToolInfo> {
        self.collab
            .tools
            .current_tool()
            .and_then(|number| self.collab.tools.tool(number))
    }

    pub(crate) fn current_tool_mapping(&self) -> Option<ToolMapping> {
        self.current_tool().map(|tool| ToolMapping::from_tool(&tool))
    }

    /// Offset of the current tool on one axis
    pub(crate) fn current_tool_offset(&self, axis: usize) -> f64 {
        self.current_tool().map_or(0.0, |tool| tool.offsets[axis])
    }
}
