//! # gcodexec
//!
//! A multi-channel G-code execution engine for 3D printers, laser cutters
//! and CNC machines, packaged with a simulated machine for running macro
//! trees and print files from the command line.
//!
//! ## Architecture
//!
//! gcodexec is organized as a workspace with multiple crates:
//!
//! 1. **gcodexec-core** - Axis model, errors, engine events and the event bus
//! 2. **gcodexec-settings** - Engine configuration: load, save, validate
//! 3. **gcodexec-engine** - Channels, resource locks, move synthesis,
//!    pause/resume, triggers and emergency stop
//! 4. **gcodexec** - This crate: logging setup and a runner binary

pub mod runner;

pub use gcodexec_core::{
    EngineEvent, EventBus, MachineEvent, MessageLevel, PauseReason, PrintEvent,
    StopReason, TriggerEvent,
};
pub use gcodexec_engine::{
    sim, ChannelId, Collaborators, DirFileStore, Engine, FileStore, PauseState,
};
pub use gcodexec_settings::EngineConfig;
pub use runner::Runner;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Environment variable selecting JSON log lines instead of pretty output
pub const LOG_FORMAT_ENV: &str = "GCODEXEC_LOG_FORMAT";

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support
/// - Pretty console output on stderr, or JSON lines when
///   `GCODEXEC_LOG_FORMAT=json`
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Replies go to stdout, so logs stay on stderr
    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .pretty();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
