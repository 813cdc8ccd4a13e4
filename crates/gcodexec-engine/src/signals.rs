//! Asynchronous requests from outside the dispatch loop
//!
//! Interrupt handlers, watchdog threads and drivers cannot call into the
//! engine directly. They latch requests here and the dispatch loop picks
//! them up at the start of its next poll.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Latched requests shared with asynchronous writers
#[derive(Debug, Default)]
pub struct EngineSignals {
    emergency_stop: AtomicBool,
    power_failure: AtomicBool,
    stall: AtomicBool,
    inputs: AtomicU32,
}

impl EngineSignals {
    /// No requests, every input low
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an emergency stop
    pub fn request_emergency_stop(&self) {
        self.emergency_stop.store(true, Ordering::Release);
    }

    /// Report that supply voltage has dropped below the pause threshold
    pub fn report_power_failure(&self) {
        self.power_failure.store(true, Ordering::Release);
    }

    /// Report that a motor has stalled
    pub fn report_stall(&self) {
        self.stall.store(true, Ordering::Release);
    }

    /// Set the level of a trigger input
    pub fn set_input(&self, input: usize, high: bool) {
        if input >= 32 {
            return;
        }
        let mask = 1u32 << input;
        if high {
            self.inputs.fetch_or(mask, Ordering::AcqRel);
        } else {
            self.inputs.fetch_and(!mask, Ordering::AcqRel);
        }
    }

    /// Current levels of every trigger input, one bit each
    pub fn inputs(&self) -> u32 {
        self.inputs.load(Ordering::Acquire)
    }

    pub(crate) fn take_emergency_stop(&self) -> bool {
        self.emergency_stop.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn peek_power_failure(&self) -> bool {
        self.power_failure.load(Ordering::Acquire)
    }

    pub(crate) fn clear_power_failure(&self) {
        self.power_failure.store(false, Ordering::Release);
    }

    pub(crate) fn take_stall(&self) -> bool {
        self.stall.swap(false, Ordering::AcqRel)
    }
}
