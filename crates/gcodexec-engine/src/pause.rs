//! Pause, resume, abort and emergency stop
//!
//! A pause captures where the print should carry on from in the pause
//! restore point, rewinds the print file to that point and runs the pause
//! macro. The capture works from whichever of these is most recent:
//!
//! 1. moves the motion system was able to throw away,
//! 2. the move still waiting to be taken,
//! 3. the print file position, unwinding any macro the file was in.
//!
//! In every case the restore point ends up in user coordinates.

use crate::channel::{ChannelId, GCodeState, MacroOrigin, PauseState};
use crate::engine::{Engine, PartialMove};
use crate::motion::{tool_offset_inverse_transform, tool_offset_transform, MoveState};
use crate::reply::{CommandResult, Outcome};
use crate::resource::Resource;
use crate::restore::{RestorePoint, PAUSE_RESTORE_POINT};
use gcodexec_core::{
    AxesBitmap, CommandError, EngineError, EngineEvent, MachineEvent, MessageLevel, PauseReason, PrintEvent,
    StopReason,
};

/// Feed rate of the moves back to the restore point, in mm/s
const REAPPROACH_FEED_RATE: f64 = 50.0;

/// Where the pause restore point comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseSource {
    /// M25/M226, trigger or filament pause
    Normal,
    /// Power failure or motor stall, moves may be cut short
    Emergency,
}

impl Engine {
    /// Pause the print
    ///
    /// The caller holds the movement lock. `id` is the channel that runs the
    /// pause macro afterwards.
    pub(crate) fn do_pause(&mut self, id: ChannelId, reason: PauseReason, message: Option<&str>) {
        let rp = if id == ChannelId::File {
            self.capture_from_file_channel()
        } else {
            self.capture_pause_point(PauseSource::Normal)
        };
        let file_position = rp.file_pos.unwrap_or(0);
        self.restore_points[PAUSE_RESTORE_POINT] = rp;

        self.save_resume_info(false);
        self.channels[id].set_state(GCodeState::Pausing1);
        self.pause_state = PauseState::Pausing;
        tracing::info!("pausing print ({}) at file position {}", reason, file_position);
        if let Some(text) = message {
            self.message(MessageLevel::Info, text);
        }
        self.publish(EngineEvent::Print(PrintEvent::Pausing {
            reason,
            file_position,
        }));
    }

    /// Pause at once on power failure or motor stall, without the pause macro
    ///
    /// Returns false if the auto-pause channel is still busy with an earlier
    /// emergency, in which case the caller retries later.
    pub(crate) fn do_emergency_pause(&mut self, reason: PauseReason) -> bool {
        if !self.channels[ChannelId::AutoPause].is_completely_idle() {
            return false;
        }
        self.locks
            .grab(&mut self.channels, ChannelId::AutoPause, Resource::Movement);

        let rp = self.capture_pause_point(PauseSource::Emergency);
        let file_position = rp.file_pos.unwrap_or(0);
        self.restore_points[PAUSE_RESTORE_POINT] = rp;
        self.pause_state = PauseState::Paused;
        tracing::warn!("emergency pause ({}) at file position {}", reason, file_position);
        self.publish(EngineEvent::Print(PrintEvent::Pausing {
            reason,
            file_position,
        }));
        true
    }

    /// Supply voltage is failing: stop printing and record how to resume
    ///
    /// Returns false if the pause must be retried on a later poll.
    pub(crate) fn low_voltage_pause(&mut self) -> bool {
        if self.power_fail_paused {
            return true;
        }
        self.collab.heaters.switch_off_all();
        match self.pause_state {
            PauseState::Resuming => return false,
            PauseState::Pausing | PauseState::Paused => {
                self.power_fail_paused = true;
                return true;
            }
            PauseState::NotPaused => {}
        }

        if self.is_really_printing() {
            if !self.do_emergency_pause(PauseReason::LowVoltage) {
                return false;
            }
            let channel = &mut self.channels[ChannelId::AutoPause];
            if let Some(script) = &self.config.files.power_fail_script {
                for line in script.lines() {
                    channel.submit(line);
                }
            }
            channel.set_state(GCodeState::PowerFailPausing1);
        }
        self.power_fail_paused = true;
        true
    }

    /// A motor stalled: pause at once if printing
    pub(crate) fn stall_pause(&mut self) -> bool {
        if !self.is_really_printing() {
            return true;
        }
        if !self.do_emergency_pause(PauseReason::Stall) {
            return false;
        }
        self.save_resume_info(false);
        self.locks
            .release_all(&mut self.channels[ChannelId::AutoPause]);
        self.message(MessageLevel::Warning, "Print paused due to motor stall");
        self.publish(EngineEvent::Print(PrintEvent::Paused));
        true
    }

    /// The print file paused itself: its own position is the restore point
    fn capture_from_file_channel(&mut self) -> RestorePoint {
        let mut rp = self.position_snapshot();
        let channel = &self.channels[ChannelId::File];
        rp.feed_rate = channel.latest().feed_rate;
        rp.file_pos = channel.original().file.as_ref().map(|f| f.position());
        self.restart_file_channel(rp.file_pos);
        rp
    }

    fn capture_pause_point(&mut self, source: PauseSource) -> RestorePoint {
        let mut rp = RestorePoint {
            feed_rate: self.channels[ChannelId::File].latest().feed_rate,
            ..RestorePoint::default()
        };

        let discarded = match source {
            PauseSource::Normal => self.collab.motion.pause_print(&mut rp),
            PauseSource::Emergency => self.collab.motion.low_power_or_stall_pause(&mut rp),
        };

        let pending_from_file = self.segments.is_busy() && self.segments.state().file_pos.is_some();
        if discarded {
            // The motion system handed back the machine position of the first discarded move
            let tool = self.current_tool_mapping();
            self.position.machine = rp.move_coords;
            self.position.user =
                tool_offset_inverse_transform(&self.position, tool.as_ref(), &rp.move_coords);
            self.segments.clear();
        } else if pending_from_file {
            let pending = self.segments.state().clone();
            let left = self.segments.segments_left();
            let total = pending.total_segments.max(1);
            rp.feed_rate = pending.feed_rate * 60.0;
            rp.virtual_extruder_position = pending.move_start_virtual_extruder;
            rp.proportion_done = f64::from(total - left.min(total)) / f64::from(total);
            rp.file_pos = pending.file_pos;
            rp.initial_user_c0 = pending.initial_user_c0;
            rp.initial_user_c1 = pending.initial_user_c1;
            rp.laser_pwm = pending.laser_pwm;
            rp.io_bits = pending.io_bits;
            let tool = self.current_tool_mapping();
            self.position.machine = pending.initial_coords;
            self.position.user = tool_offset_inverse_transform(
                &self.position,
                tool.as_ref(),
                &pending.initial_coords,
            );
            self.segments.clear();
        } else {
            rp.virtual_extruder_position = self.position.virtual_extruder;
            rp.proportion_done = 0.0;
            let channel = &self.channels[ChannelId::File];
            rp.file_pos = if channel.is_in_macro() {
                self.print_file_position_at_macro_start
            } else if channel.command.is_some() {
                channel.command_file_pos
            } else {
                channel.original().file.as_ref().map(|f| f.position())
            };
            if channel.is_in_macro() {
                self.paused_in_macro = true;
            }
            rp.laser_pwm = self.position.laser_pwm;
            rp.io_bits = self.position.io_bits;
        }

        rp.move_coords = self.position.user;
        rp.tool_number = self.collab.tools.current_tool();
        rp.fan_speed = self.collab.tools.fan_speed(0);
        if rp.file_pos.is_some() {
            self.restart_file_channel(rp.file_pos);
        }
        rp
    }

    /// Restore point fields that come from the current position and tools
    pub(crate) fn position_snapshot(&self) -> RestorePoint {
        RestorePoint {
            move_coords: self.position.user,
            virtual_extruder_position: self.position.virtual_extruder,
            laser_pwm: self.position.laser_pwm,
            io_bits: self.position.io_bits,
            tool_number: self.collab.tools.current_tool(),
            fan_speed: self.collab.tools.fan_speed(0),
            ..RestorePoint::default()
        }
    }

    /// Unwind the print file channel and point it back at a file offset
    fn restart_file_channel(&mut self, file_pos: Option<u64>) {
        let channel = &mut self.channels[ChannelId::File];
        channel.unwind();
        if let (Some(pos), Some(file)) = (file_pos, channel.original_mut().file.as_mut()) {
            file.seek(pos);
        }
        channel.original_mut().state = GCodeState::Normal;
        channel.init();
        self.locks
            .release_all(&mut self.channels[ChannelId::File]);
    }

    /// M25 from anywhere but the print file
    pub(crate) fn request_pause(&mut self, id: ChannelId) -> CommandResult {
        if id == ChannelId::File {
            return self.pause_from_file(id);
        }
        if self.pause_state != PauseState::NotPaused {
            return Ok(Outcome::ok("Printing is already paused"));
        }
        if !self.is_really_printing() {
            return Err(EngineError::NotPrinting.into());
        }
        if self.channels[ChannelId::File].is_doing_file_macro() {
            tracing::info!("pause deferred until the print leaves its macro");
            self.deferred_pause = true;
            return Ok(Outcome::done());
        }
        if !self.lock_movement(id) {
            return Ok(Outcome::NotFinished);
        }
        self.do_pause(id, PauseReason::User, None);
        Ok(Outcome::done())
    }

    /// M226, or M25 inside the print file
    pub(crate) fn pause_from_file(&mut self, id: ChannelId) -> CommandResult {
        if self.pause_state != PauseState::NotPaused || !self.print.is_active() {
            return Ok(Outcome::done());
        }
        if !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }
        self.do_pause(id, PauseReason::GCode, None);
        Ok(Outcome::done())
    }

    /// M24 with a paused print: run the resume macro, then move back
    pub(crate) fn resume_print(&mut self, id: ChannelId) -> CommandResult {
        match self.pause_state {
            PauseState::Paused => {}
            PauseState::NotPaused => return Err(CommandError::invalid("Print is not paused")),
            PauseState::Pausing | PauseState::Resuming => {
                return Err(CommandError::invalid("Cannot resume while pausing or resuming"))
            }
        }
        if !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }
        self.pause_state = PauseState::Resuming;
        self.channels[id].set_state(GCodeState::Resuming1);
        let name = self.config.files.resume_macro.clone();
        self.do_file_macro(id, &name, false, MacroOrigin::SystemHelper)?;
        tracing::info!("resuming print");
        Ok(Outcome::done())
    }

    /// Last step of resuming: restore what the pause changed and let the file run
    pub(crate) fn finish_resume(&mut self) {
        let rp = self.restore_points[PAUSE_RESTORE_POINT].clone();
        self.collab.tools.set_fan_speed(0, rp.fan_speed);
        self.channels[ChannelId::File].latest_mut().feed_rate = rp.feed_rate;
        self.position.virtual_extruder = rp.virtual_extruder_position;
        self.position.laser_pwm = rp.laser_pwm;
        self.position.io_bits = rp.io_bits;
        self.restart = PartialMove {
            fraction: rp.proportion_done,
            initial_user_c0: rp.initial_user_c0,
            initial_user_c1: rp.initial_user_c1,
        };
        self.power_fail_paused = false;
        self.paused_in_macro = false;
        self.pause_state = PauseState::NotPaused;
        tracing::info!("print resumed");
        self.publish(EngineEvent::Print(PrintEvent::Resumed));
    }

    /// Send one unsegmented move to user coordinates, used while resuming
    pub(crate) fn queue_reapproach_move(&mut self, user: gcodexec_core::Coords) {
        let tool = self.current_tool_mapping();
        let mut mv = MoveState {
            num_axes: self.position.num_axes,
            feed_rate: REAPPROACH_FEED_RATE,
            tool: self.collab.tools.current_tool(),
            virtual_extruder_position: self.position.virtual_extruder,
            move_start_virtual_extruder: self.position.virtual_extruder,
            axes_homed: self.position.axes_homed,
            coords: self.position.machine,
            initial_coords: self.position.machine,
            ..MoveState::default()
        };
        let mut target = mv.coords;
        tool_offset_transform(
            &self.position,
            tool.as_ref(),
            &user,
            &mut target,
            AxesBitmap::lowest(self.position.num_axes),
        );
        mv.coords = target;
        mv.set_segments(1, 0.0);
        if self.segments.publish(mv) {
            self.position.user = user;
            self.position.machine = target;
        }
    }

    /// M0/M1: cancel a paused print, or stop the machine
    pub(crate) fn stop_or_cancel(&mut self, id: ChannelId, sleep: bool) -> CommandResult {
        if self.pause_state == PauseState::Paused {
            self.channels[id].set_state(GCodeState::Cancelling);
            let name = self.config.files.cancel_macro.clone();
            self.do_file_macro(id, &name, false, MacroOrigin::SystemHelper)?;
            return Ok(Outcome::done());
        }
        if !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }
        if sleep {
            self.collab.heaters.switch_off_all();
        }
        self.channels[id].set_state(GCodeState::Stopping);
        let name = if sleep {
            self.config.files.sleep_macro.clone()
        } else {
            self.config.files.stop_macro.clone()
        };
        self.do_file_macro(id, &name, false, MacroOrigin::SystemHelper)?;
        Ok(Outcome::done())
    }

    /// Abort whatever a channel is doing and free its locks
    pub(crate) fn abort_print(&mut self, id: ChannelId) {
        if id == ChannelId::File {
            self.stop_print(StopReason::Abort);
        }
        self.channels[id].abort();
        self.locks.release_all(&mut self.channels[id]);
        tracing::error!("{} aborted", id);
    }

    /// Stop everything and reset to power-up state
    ///
    /// Repeating it without a reset in between leaves the same state.
    pub(crate) fn emergency_stop(&mut self) {
        let already_stopped = self.emergency_stopped;
        for id in ChannelId::ALL {
            if !self.channels[id].is_completely_idle() {
                self.abort_print(id);
            }
        }
        self.collab.motion.emergency_stop();
        self.collab.heaters.switch_off_all();
        self.reset();
        self.emergency_stopped = true;
        if !already_stopped {
            self.message(
                MessageLevel::Error,
                "Emergency Stop! Reset the controller to continue.",
            );
            self.publish(EngineEvent::Machine(MachineEvent::EmergencyStop));
        }
    }
}
