//! Tool selection, heaters and fans

use crate::channel::{ChannelId, GCodeState};
use crate::command::DecodedCommand;
use crate::engine::{Engine, ToolChange, TFREE, TPOST, TPRE};
use crate::reply::{CommandResult, Outcome};
use crate::resource::Resource;
use crate::restore::TOOL_CHANGE_RESTORE_POINT;
use gcodexec_core::CommandError;

impl Engine {
    /// T<n> [P<macros>], or a bare T to report the selected tool
    pub(super) fn handle_tcode(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let current = self.collab.tools.current_tool();
        let Some(number) = cmd.number else {
            return Ok(Outcome::ok(match current {
                Some(tool) => format!("Tool {} is selected", tool),
                None => "No tool is selected".to_string(),
            }));
        };

        let new_tool = u32::try_from(number).ok();
        if let Some(tool) = new_tool {
            if self.collab.tools.tool(tool).is_none() {
                return Err(CommandError::invalid(format!("Invalid tool number {}", tool)));
            }
        }
        if new_tool == current {
            return Ok(Outcome::done());
        }
        let macros = cmd.uint('P')?.unwrap_or(TFREE | TPRE | TPOST);
        if !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }

        let mut rp = self.position_snapshot();
        rp.feed_rate = self.channels[id].latest().feed_rate;
        self.restore_points[TOOL_CHANGE_RESTORE_POINT] = rp;
        self.tool_change = ToolChange {
            old_tool: current,
            new_tool,
            macros,
        };
        tracing::debug!("{} changing tool {:?} -> {:?}", id, current, new_tool);
        self.channels[id].set_state(GCodeState::ToolChange0);
        Ok(Outcome::done())
    }

    /// M104/M109 S<temp> [T<tool>]
    pub(super) fn set_tool_temperature(&mut self, id: ChannelId, cmd: &DecodedCommand, wait: bool) -> CommandResult {
        let number = match cmd.uint('T')? {
            Some(t) => Some(t),
            None => self.collab.tools.current_tool(),
        };
        let Some(tool) = number.and_then(|n| self.collab.tools.tool(n)) else {
            return Err(CommandError::invalid(format!("{}: no tool selected", cmd.code())));
        };
        let temperature = match cmd.float('S')? {
            Some(s) => Some(s),
            None => cmd.float('R')?,
        };
        self.heat_and_maybe_wait(id, &tool.heaters, temperature, wait)
    }

    /// M140/M190 S<temp>
    pub(super) fn set_bed_temperature(&mut self, id: ChannelId, cmd: &DecodedCommand, wait: bool) -> CommandResult {
        let Some(bed) = self.collab.heaters.bed_heater() else {
            return Err(CommandError::invalid(format!("{}: no bed heater", cmd.code())));
        };
        let temperature = match cmd.float('S')? {
            Some(s) => Some(s),
            None => cmd.float('R')?,
        };
        self.heat_and_maybe_wait(id, &[bed], temperature, wait)
    }

    /// Set heaters and, when waiting, hold their locks until they are all at temperature
    fn heat_and_maybe_wait(
        &mut self,
        id: ChannelId,
        heaters: &[usize],
        temperature: Option<f64>,
        wait: bool,
    ) -> CommandResult {
        if wait {
            for &heater in heaters {
                if !self.lock_resource(id, Resource::Heater(heater)) {
                    return Ok(Outcome::NotFinished);
                }
            }
        }
        if let Some(t) = temperature {
            for &heater in heaters {
                if self.collab.heaters.target_temperature(heater) != t {
                    self.collab.heaters.set_active_temperature(heater, t);
                }
            }
        }
        if wait && !heaters.iter().all(|&h| self.collab.heaters.at_temperature(h)) {
            return Ok(Outcome::NotFinished);
        }
        Ok(Outcome::done())
    }

    /// M116
    pub(super) fn wait_for_all_heaters(&self) -> CommandResult {
        if self.collab.heaters.all_at_temperature() {
            Ok(Outcome::done())
        } else {
            Ok(Outcome::NotFinished)
        }
    }

    /// M106 [P<fan>] S<speed>, M107
    pub(super) fn set_fan(&mut self, cmd: &DecodedCommand, off: bool) -> CommandResult {
        let fan = cmd.uint('P')?.unwrap_or(0) as usize;
        if off {
            self.collab.tools.set_fan_speed(fan, 0.0);
            return Ok(Outcome::done());
        }
        let Some(speed) = cmd.float('S')? else {
            return Ok(Outcome::ok(format!(
                "Fan {} speed {:.0}%",
                fan,
                self.collab.tools.fan_speed(fan) * 100.0
            )));
        };
        // Values above 1 are on the 0..255 scale
        let speed = if speed > 1.0 { speed / 255.0 } else { speed };
        self.collab.tools.set_fan_speed(fan, speed.clamp(0.0, 1.0));
        Ok(Outcome::done())
    }
}
