//! Command execution
//!
//! `act_on_code` is called with the decoded command each time the channel
//! gets its turn until it returns something other than
//! [`Outcome::NotFinished`]. Handlers must therefore check everything that
//! can make them wait before changing any state.

mod gcodes;
mod mcodes;
mod tools;

use crate::channel::ChannelId;
use crate::command::DecodedCommand;
use crate::engine::Engine;
use crate::reply::CommandResult;
use gcodexec_core::CommandError;

impl Engine {
    /// Execute one decoded command on behalf of a channel
    pub(crate) fn act_on_code(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        tracing::trace!("{} executing {}", id, cmd.raw);
        match cmd.letter {
            'G' => self.handle_gcode(id, cmd),
            'M' => self.handle_mcode(id, cmd),
            'T' => self.handle_tcode(id, cmd),
            _ => Err(unsupported(cmd)),
        }
    }
}

pub(crate) fn unsupported(cmd: &DecodedCommand) -> CommandError {
    CommandError::Unsupported { code: cmd.code() }
}
