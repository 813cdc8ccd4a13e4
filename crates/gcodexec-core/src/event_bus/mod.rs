//! # Event Bus Module
//!
//! Publish/subscribe distribution of engine events.
//!
//! - Publishers emit typed events without knowing subscribers
//! - Handlers run synchronously on the publishing thread
//! - An optional bounded history serves callers that poll instead
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gcodexec_core::event_bus::{EngineEvent, EventBus};
//!
//! let bus = EventBus::new();
//! bus.subscribe(|event| println!("{}", event.description()));
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
