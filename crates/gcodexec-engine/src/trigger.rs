//! Triggers
//!
//! A trigger watches input edges and fires an action when one is seen.
//! Trigger 0 is an emergency stop, trigger 1 pauses the print and every
//! other trigger runs `trigger<n>.g` on the trigger channel. When several
//! are pending only the lowest numbered one is actioned on a poll.

use crate::channel::{ChannelId, GCodeState, MacroOrigin};
use crate::engine::Engine;
use gcodexec_core::{EngineEvent, MessageLevel, PauseReason, TriggerEvent};

/// Number of triggers
pub const MAX_TRIGGERS: usize = 16;

/// Trigger that performs an emergency stop
pub const EMERGENCY_STOP_TRIGGER: usize = 0;

/// Trigger that pauses the print
pub const PAUSE_TRIGGER: usize = 1;

/// When a trigger is allowed to fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerCondition {
    /// Any time
    #[default]
    Always,
    /// Only while a file is printing
    WhilePrinting,
}

/// Edge configuration of one trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerItem {
    /// Inputs whose rising edge fires the trigger
    pub rising: u32,
    /// Inputs whose falling edge fires the trigger
    pub falling: u32,
    /// When the trigger may fire
    pub condition: TriggerCondition,
}

impl TriggerItem {
    /// True if no input is attached
    pub fn is_unused(&self) -> bool {
        self.rising == 0 && self.falling == 0
    }

    fn fires(&self, previous: u32, current: u32, printing: bool) -> bool {
        if self.condition == TriggerCondition::WhilePrinting && !printing {
            return false;
        }
        let rose = current & !previous;
        let fell = previous & !current;
        (rose & self.rising) != 0 || (fell & self.falling) != 0
    }

    fn at_active_level(&self, current: u32) -> bool {
        (current & self.rising) != 0 || (!current & self.falling) != 0
    }
}

/// Every trigger and the set of pending ones
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    items: [TriggerItem; MAX_TRIGGERS],
    pending: u32,
    last_inputs: u32,
}

impl Triggers {
    /// No trigger configured, none pending
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every configuration and pending trigger
    pub fn init(&mut self) {
        *self = Self::default();
    }

    /// Configuration of one trigger
    pub fn item(&self, number: usize) -> Option<&TriggerItem> {
        self.items.get(number)
    }

    /// Attach inputs to a trigger, or detach them when `edge` is `None`
    ///
    /// `edge` is true for rising edges and false for falling edges.
    pub fn configure(
        &mut self,
        number: usize,
        inputs: u32,
        edge: Option<bool>,
        condition: TriggerCondition,
    ) -> bool {
        let Some(item) = self.items.get_mut(number) else {
            return false;
        };
        item.rising &= !inputs;
        item.falling &= !inputs;
        match edge {
            Some(true) => item.rising |= inputs,
            Some(false) => item.falling |= inputs,
            None => {}
        }
        item.condition = condition;
        true
    }

    /// Pending triggers, one bit each
    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Mark a trigger pending
    pub fn set_pending(&mut self, number: usize) {
        if number < MAX_TRIGGERS {
            self.pending |= 1 << number;
        }
    }

    /// Clear a pending trigger
    pub fn clear_pending(&mut self, number: usize) {
        if number < MAX_TRIGGERS {
            self.pending &= !(1 << number);
        }
    }

    /// The pending trigger to action first
    pub fn lowest_pending(&self) -> Option<usize> {
        (self.pending != 0).then(|| self.pending.trailing_zeros() as usize)
    }

    /// Look for new edges, returning the triggers that became pending
    pub fn scan(&mut self, inputs: u32, printing: bool) -> Vec<usize> {
        let previous = self.last_inputs;
        self.last_inputs = inputs;
        if previous == inputs {
            return Vec::new();
        }
        let mut fired = Vec::new();
        for (number, item) in self.items.iter().enumerate() {
            if self.pending & (1 << number) == 0 && item.fires(previous, inputs, printing) {
                fired.push(number);
            }
        }
        for &number in &fired {
            self.pending |= 1 << number;
        }
        fired
    }

    /// M582: fire a trigger whose inputs are already at their active level
    pub fn check_levels(&mut self, number: usize, inputs: u32, printing: bool) -> bool {
        let Some(item) = self.items.get(number).copied() else {
            return false;
        };
        if item.condition == TriggerCondition::WhilePrinting && !printing {
            return false;
        }
        if item.at_active_level(inputs) {
            self.set_pending(number);
            return true;
        }
        false
    }
}

impl Engine {
    /// Mark a trigger pending as if its input had fired
    pub fn raise_trigger(&mut self, number: usize) {
        self.triggers.set_pending(number);
        self.publish(EngineEvent::Trigger(TriggerEvent::Pending { number }));
    }

    /// Pending triggers, one bit each
    pub fn pending_triggers(&self) -> u32 {
        self.triggers.pending()
    }

    /// True while the trigger channel runs config.g or a trigger macro
    pub(crate) fn is_trigger_busy(&self) -> bool {
        self.channels[ChannelId::Trigger].is_doing_file()
    }

    /// Scan for new edges and action the lowest pending trigger
    pub(crate) fn check_triggers(&mut self) -> bool {
        let printing = self.is_really_printing();
        let inputs = self.signals.inputs();
        for number in self.triggers.scan(inputs, printing) {
            tracing::debug!("trigger {} pending", number);
            self.publish(EngineEvent::Trigger(TriggerEvent::Pending { number }));
        }

        let Some(lowest) = self.triggers.lowest_pending() else {
            return false;
        };
        if lowest == EMERGENCY_STOP_TRIGGER {
            self.triggers.clear_pending(lowest);
            self.publish(EngineEvent::Trigger(TriggerEvent::Fired { number: lowest }));
            self.emergency_stop();
            return true;
        }
        if self.is_trigger_busy() || self.channels[ChannelId::Trigger].state() != GCodeState::Normal {
            return false;
        }

        if lowest == PAUSE_TRIGGER {
            if !printing {
                self.triggers.clear_pending(lowest);
                tracing::debug!("pause trigger ignored, not printing");
                self.publish(EngineEvent::Trigger(TriggerEvent::Discarded { number: lowest }));
                return false;
            }
            if !self.lock_movement(ChannelId::Trigger) {
                return false;
            }
            self.triggers.clear_pending(lowest);
            self.publish(EngineEvent::Trigger(TriggerEvent::Fired { number: lowest }));
            self.do_pause(
                ChannelId::Trigger,
                PauseReason::Trigger,
                Some("Print paused by external trigger"),
            );
            return true;
        }

        self.triggers.clear_pending(lowest);
        self.publish(EngineEvent::Trigger(TriggerEvent::Fired { number: lowest }));
        let name = format!("trigger{}.g", lowest);
        if let Err(e) = self.do_file_macro(ChannelId::Trigger, &name, true, MacroOrigin::AsyncSystem) {
            self.message(MessageLevel::Error, format!("{}: {}", name, e));
            self.abort_print(ChannelId::Trigger);
        }
        true
    }
}
