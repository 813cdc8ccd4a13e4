//! The cooperative dispatch loop
//!
//! One call to [`Engine::spin`] is one poll: the auto-pause channel first,
//! then the other channels round-robin from a remembered cursor until one
//! of them does real work. Nothing here ever blocks; a command that cannot
//! finish yet says so and is re-entered on the channel's next turn.

use crate::channel::{ChannelId, CommandStage, GCodeState, MacroOrigin, PauseState};
use crate::command::DecodedCommand;
use crate::engine::Engine;
use crate::reply::{format_reply, Outcome, Reply, ReplyContext, ReplyKind};
use gcodexec_core::{MessageLevel, StopReason};
use std::time::Instant;

enum Fetched {
    Line(Option<u64>, String),
    EndOfFile,
    Nothing,
}

impl Engine {
    /// Run one poll of every channel
    ///
    /// Returns true if anything happened that might let another poll make
    /// progress straight away.
    pub fn spin(&mut self) -> bool {
        if self.signals.take_emergency_stop() {
            self.emergency_stop();
            return true;
        }
        if self.emergency_stopped {
            return false;
        }

        self.collab.motion.poll(&self.segments);
        let mut did_something = false;

        if self.signals.peek_power_failure() && self.low_voltage_pause() {
            self.signals.clear_power_failure();
            did_something = true;
        }
        if self.signals.take_stall() {
            if self.stall_pause() {
                did_something = true;
            } else {
                // Auto-pause channel still busy, try again next poll
                self.signals.report_stall();
            }
        }

        did_something |= self.check_triggers();
        if self.emergency_stopped {
            return true;
        }

        if !self.channels[ChannelId::AutoPause].is_completely_idle() {
            did_something |= self.spin_channel(ChannelId::AutoPause);
        }

        let count = ChannelId::ROUND_ROBIN.len();
        for offset in 0..count {
            let index = (self.next_channel + offset) % count;
            if self.spin_channel(ChannelId::ROUND_ROBIN[index]) {
                self.next_channel = (index + 1) % count;
                did_something = true;
                break;
            }
            if self.emergency_stopped {
                return true;
            }
        }

        did_something |= self.spin_daemon();
        self.collab.motion.poll(&self.segments);
        did_something
    }

    /// Poll until every channel is idle and the machine is still
    ///
    /// Returns false if `max_polls` ran out first.
    pub fn run_until_idle(&mut self, max_polls: usize) -> bool {
        for _ in 0..max_polls {
            self.spin();
            if self.emergency_stopped || self.is_idle() {
                return true;
            }
        }
        tracing::warn!("engine still busy after {} polls", max_polls);
        false
    }

    /// Run config.g on the trigger channel
    pub fn run_config_file(&mut self) -> bool {
        let name = self.config.files.config_file.clone();
        match self.do_file_macro(ChannelId::Trigger, &name, true, MacroOrigin::AsyncSystem) {
            Ok(true) => {
                self.running_config_file = self.channels[ChannelId::Trigger].is_doing_file_macro();
                self.running_config_file
            }
            Ok(false) => false,
            Err(e) => {
                self.message(MessageLevel::Error, e.to_string());
                false
            }
        }
    }

    /// Give one channel its turn
    pub(crate) fn spin_channel(&mut self, id: ChannelId) -> bool {
        let did_something = if self.channels[id].latest().waiting_for_acknowledgement {
            self.check_acknowledgement(id)
        } else if self.channels[id].state() == GCodeState::Normal {
            self.start_next_gcode(id)
        } else {
            self.run_state_machine(id)
        };
        self.send_status_report(id);
        did_something
    }

    /// M292 handling for a channel parked by a blocking M291
    fn check_acknowledgement(&mut self, id: ChannelId) -> bool {
        let frame = self.channels[id].latest_mut();
        if !frame.message_acknowledged {
            return false;
        }
        let cancelled = frame.message_cancelled;
        frame.waiting_for_acknowledgement = false;
        frame.message_acknowledged = false;
        frame.message_cancelled = false;
        if !cancelled {
            return true;
        }

        tracing::info!("{} message box cancelled", id);
        if self.channels[id].is_doing_file_macro() {
            self.file_macro_cycles_return(id);
        } else if id == ChannelId::File && self.print.is_active() {
            self.stop_print(StopReason::UserCancelled);
        }
        true
    }

    /// Fetch, decode and execute the next command of a channel in its Normal state
    fn start_next_gcode(&mut self, id: ChannelId) -> bool {
        if id == ChannelId::File && self.file_held_back() {
            self.locks
                .release_all_except_inherited(&mut self.channels[ChannelId::File]);
            return false;
        }
        if self.channels[id].stage != CommandStage::Idle {
            return self.execute_command(id);
        }

        let fetched = {
            let channel = &mut self.channels[id];
            match channel.latest_mut().file.as_mut() {
                Some(file) => match file.next_line() {
                    Some((pos, line)) => Fetched::Line(Some(pos), line),
                    None => Fetched::EndOfFile,
                },
                None => match channel.next_input() {
                    Some(line) => Fetched::Line(None, line),
                    None => Fetched::Nothing,
                },
            }
        };

        match fetched {
            Fetched::Nothing => false,
            Fetched::EndOfFile => self.end_of_file(id),
            Fetched::Line(pos, line) => match DecodedCommand::parse(&line) {
                Ok(Some(command)) => {
                    let channel = &mut self.channels[id];
                    channel.command = Some(command);
                    channel.stage = CommandStage::Ready;
                    channel.command_file_pos = pos;
                    self.execute_command(id);
                    true
                }
                Ok(None) => true,
                Err(e) => {
                    tracing::debug!("{}: bad line '{}': {}", id, line, e);
                    self.emit_reply(id, "", &Reply::from(e));
                    true
                }
            },
        }
    }

    /// The print file must not run while a pause is pending or in force
    fn file_held_back(&self) -> bool {
        if self.pause_state > PauseState::Pausing {
            return true;
        }
        let in_macro = self.channels[ChannelId::File].is_doing_file_macro();
        !in_macro && (self.deferred_pause || self.pause_state == PauseState::Pausing)
    }

    fn end_of_file(&mut self, id: ChannelId) -> bool {
        if self.channels[id].is_doing_file_macro() {
            self.file_macro_cycles_return(id);
            return true;
        }
        if id == ChannelId::File && self.channels[id].depth() == 1 && self.print.is_active() {
            if !self.lock_movement_and_wait_for_standstill(id) {
                return false;
            }
            self.stop_print(StopReason::NormalCompletion);
            return true;
        }
        self.channels[id].latest_mut().file = None;
        true
    }

    /// Run the command held by a channel once
    pub(crate) fn execute_command(&mut self, id: ChannelId) -> bool {
        let Some(command) = self.channels[id].command.clone() else {
            self.channels[id].init();
            return false;
        };
        let code = command.code();
        let depth_before = self.channels[id].depth();
        let result = self.act_on_code(id, &command);
        if self.emergency_stopped {
            return true;
        }

        match result {
            Ok(Outcome::NotFinished) => {
                self.channels[id].stage = CommandStage::Executing;
                false
            }
            Ok(Outcome::Done(reply)) => {
                self.finish_command(id, &code, depth_before, reply);
                true
            }
            Err(e) if e.aborts_print() => {
                self.message(MessageLevel::Error, format!("{}: {}", code, e));
                self.abort_print(id);
                self.emit_reply(id, &code, &Reply::from(e));
                true
            }
            Err(e) => {
                self.finish_command(id, &code, depth_before, Reply::from(e));
                true
            }
        }
    }

    /// Clear the command buffer and send the reply, or hold it back
    ///
    /// A reply is held in the frame that issued the command while a macro
    /// it started is running or its state machine is still going.
    fn finish_command(&mut self, id: ChannelId, code: &str, depth_before: usize, reply: Reply) {
        let channel = &mut self.channels[id];
        channel.init();
        let depth = channel.depth();
        if depth < depth_before {
            if !reply.is_empty() {
                self.emit_reply(id, code, &reply);
            }
            return;
        }
        // M120 pushes a frame without starting anything that replies later
        let started_macro = depth > depth_before && code != "M120";
        if started_macro || channel.state() != GCodeState::Normal {
            if let Some(frame) = channel.frames_mut().get_mut(depth_before - 1) {
                frame.pending_reply = Some((code.to_string(), reply));
            }
            return;
        }
        self.emit_reply(id, code, &reply);
        self.locks.release_all_except_inherited(&mut self.channels[id]);
    }

    /// Render a reply in the channel's dialect and queue it
    pub(crate) fn emit_reply(&mut self, id: ChannelId, code: &str, reply: &Reply) {
        let channel = &mut self.channels[id];
        let ctx = ReplyContext {
            channel: id,
            compatibility: channel.compatibility(),
            in_macro: channel.is_doing_file_macro(),
            code,
        };
        if let Some(text) = format_reply(&ctx, reply) {
            if reply.long {
                for line in text.lines() {
                    channel.write_output(line);
                }
            } else {
                channel.write_output(text);
            }
        }

        // Nobody reads these channels, so problems go to the operator instead
        if id.suppresses_empty_replies() && !reply.is_empty() {
            match reply.kind {
                ReplyKind::Ok => {}
                ReplyKind::Warning => self.message(MessageLevel::Warning, reply.text.clone()),
                ReplyKind::Error => self.message(MessageLevel::Error, reply.text.clone()),
            }
        }
    }

    /// Return a channel to Normal and send the reply held for its command
    ///
    /// `reply` replaces the held reply when given.
    pub(crate) fn complete_state(&mut self, id: ChannelId, reply: Option<Reply>) {
        let channel = &mut self.channels[id];
        channel.set_state(GCodeState::Normal);
        let pending = channel.latest_mut().pending_reply.take();
        let to_send = match (pending, reply) {
            (Some((code, _)), Some(reply)) => Some((code, reply)),
            (Some(held), None) => Some(held),
            (None, Some(reply)) => Some((String::new(), reply)),
            (None, None) => None,
        };
        if let Some((code, reply)) = to_send {
            self.emit_reply(id, &code, &reply);
        }
        self.locks.release_all_except_inherited(&mut self.channels[id]);
    }

    /// Unsolicited temperature report for Marlin hosts that are kept waiting
    fn send_status_report(&mut self, id: ChannelId) {
        if id != ChannelId::Usb {
            return;
        }
        let interval = self.config.channels.status_report_interval();
        let channel = &self.channels[id];
        let busy = channel.stage == CommandStage::Executing || channel.state() != GCodeState::Normal;
        if !busy
            || !channel.compatibility().is_marlin_like()
            || channel.last_report.elapsed() < interval
        {
            return;
        }
        let report = self.collab.heaters.temperature_report();
        let channel = &mut self.channels[id];
        channel.write_output(report);
        channel.last_report = Instant::now();
    }

    /// Start daemon.g when it is due and the daemon channel is free
    fn spin_daemon(&mut self) -> bool {
        if self.last_daemon_run.elapsed() < self.config.channels.daemon_interval() {
            return false;
        }
        self.last_daemon_run = Instant::now();
        if !self.channels[ChannelId::Daemon].is_completely_idle() {
            return false;
        }
        let name = self.config.files.daemon_macro.clone();
        if !self.collab.files.exists(&self.config.files.system_path(&name)) {
            return false;
        }
        match self.do_file_macro(ChannelId::Daemon, &name, false, MacroOrigin::AsyncSystem) {
            Ok(started) => started,
            Err(e) => {
                self.message(MessageLevel::Error, format!("{}: {}", name, e));
                self.abort_print(ChannelId::Daemon);
                false
            }
        }
    }
}
