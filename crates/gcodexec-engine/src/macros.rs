//! Macro files
//!
//! Running a macro pushes a frame onto the channel's stack and points it at
//! the macro file. When the file runs out, or M99 is seen, the frame is
//! popped and the caller carries on.

use crate::channel::{ChannelId, CommandStage, GCodeState, GcodeFile, MacroOrigin};
use crate::command::DecodedCommand;
use crate::engine::Engine;
use gcodexec_core::{CommandError, EngineError, MessageLevel};

impl Engine {
    /// Start running a macro file on a channel
    ///
    /// Returns `Ok(false)` if the file does not exist, warning the operator
    /// first when `report_missing` is set. Fails only if the macro stack is
    /// full, which the caller must treat as fatal for the channel.
    pub(crate) fn do_file_macro(
        &mut self,
        id: ChannelId,
        name: &str,
        report_missing: bool,
        origin: MacroOrigin,
    ) -> Result<bool, CommandError> {
        let path = self.config.files.system_path(name);
        let data = match self.collab.files.read(&path) {
            Ok(data) => data,
            Err(e) => {
                if report_missing {
                    self.message(
                        MessageLevel::Warning,
                        EngineError::MacroNotFound { path: name.to_string() }.to_string(),
                    );
                } else {
                    tracing::debug!("optional macro {} not run: {}", path, e);
                }
                return Ok(false);
            }
        };

        let channel = &self.channels[id];
        if id == ChannelId::File && channel.depth() == 1 && origin != MacroOrigin::AsyncSystem {
            self.print_file_position_at_macro_start = channel
                .command_file_pos
                .or_else(|| channel.original().file.as_ref().map(GcodeFile::position));
        }

        let channel = &mut self.channels[id];
        channel.push(false)?;
        let frame = channel.latest_mut();
        frame.file = Some(GcodeFile::new(path, data));
        frame.doing_file_macro = true;
        if origin.is_system() {
            frame.running_system_macro = true;
        }
        frame.state = GCodeState::Normal;
        channel.init();
        tracing::debug!("{} running macro {} at depth {}", id, name, channel.depth());
        Ok(true)
    }

    /// Finish the macro on top of a channel's stack and return to its caller
    pub(crate) fn file_macro_cycles_return(&mut self, id: ChannelId) {
        if !self.channels[id].is_doing_file_macro() {
            return;
        }
        self.channels[id].latest_mut().file = None;
        if id == ChannelId::Trigger && self.running_config_file {
            self.finish_config_file_frame();
        }

        self.locks.release_all_except_inherited(&mut self.channels[id]);
        let channel = &mut self.channels[id];
        channel.pop(false);
        channel.init();
        tracing::debug!("{} macro returned, depth now {}", id, channel.depth());

        if channel.state() == GCodeState::Normal {
            self.complete_state(id, None);
        }

        if id == ChannelId::File
            && self.deferred_pause
            && !self.channels[id].is_doing_file_macro()
        {
            // Pause requested while the print was inside a macro
            self.deferred_pause = false;
            if let Ok(Some(command)) = DecodedCommand::parse("M226") {
                let channel = &mut self.channels[id];
                channel.command = Some(command);
                channel.stage = CommandStage::Ready;
            }
        }
    }

    /// Carry modal settings made by config.g down the stack, and to every
    /// channel once the outermost frame returns
    fn finish_config_file_frame(&mut self) {
        let channel = &mut self.channels[ChannelId::Trigger];
        let depth = channel.depth();
        let latest = channel.latest().clone();
        if let Some(parent) = channel.frames_mut().get_mut(depth.wrapping_sub(2)) {
            parent.copy_state_from(&latest);
        }
        if depth != 2 {
            return;
        }
        let settings = self.channels[ChannelId::Trigger].original().clone();
        for other in self.channels.iter_mut() {
            if other.id() != ChannelId::Trigger {
                other.original_mut().copy_state_from(&settings);
            }
        }
        self.running_config_file = false;
        tracing::info!("{} finished", self.config.files.config_file);
    }

    /// M98 P"file"
    pub(crate) fn call_macro(&mut self, id: ChannelId, name: &str) -> Result<(), CommandError> {
        self.do_file_macro(id, name, true, MacroOrigin::UserMacro)?;
        Ok(())
    }
}
