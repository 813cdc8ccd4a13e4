//! Runs G-code against a simulated machine whose files live on disk
//!
//! The machine directory holds the same tree a controller's SD card
//! would: `sys/` for system macros and `gcodes/` for print files.

use anyhow::{bail, Context};
use gcodexec_core::{thread_safe_vec, Coords, EngineEvent, ThreadSafeVec};
use gcodexec_engine::sim::SimMachine;
use gcodexec_engine::{ChannelId, Collaborators, DirFileStore, Engine};
use gcodexec_settings::EngineConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Poll limit for one command before the runner gives up on it
pub const DEFAULT_MAX_POLLS: usize = 1_000_000;

/// An engine over a [`SimMachine`] with a [`DirFileStore`]
pub struct Runner {
    engine: Engine,
    machine: SimMachine,
    root: PathBuf,
    events: ThreadSafeVec<EngineEvent>,
    max_polls: usize,
}

impl Runner {
    /// Build a runner whose file store is rooted at `root`
    pub fn open(root: impl Into<PathBuf>, config: EngineConfig) -> anyhow::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("machine directory {} does not exist", root.display());
        }
        let machine = SimMachine::new(&config);
        let collab = Collaborators {
            files: Arc::new(DirFileStore::new(&root)),
            ..machine.collaborators()
        };
        let engine = Engine::new(config, collab)
            .with_context(|| format!("invalid configuration for {}", root.display()))?;

        let events = thread_safe_vec();
        let sink = Arc::clone(&events);
        engine.events().subscribe(move |event| {
            tracing::debug!("event: {}", event.description());
            sink.lock().push(event.clone());
        });

        tracing::info!("runner opened on {}", root.display());
        Ok(Self {
            engine,
            machine,
            root,
            events,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    /// Change the poll limit applied to each command
    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Run config.g to completion; false when there is none
    pub fn start(&mut self) -> anyhow::Result<bool> {
        let started = self.engine.run_config_file();
        self.settle()?;
        Ok(started)
    }

    /// Send one line on a channel and collect its replies
    pub fn send(&mut self, channel: ChannelId, line: &str) -> anyhow::Result<Vec<String>> {
        self.engine.submit(channel, line);
        self.settle()
            .with_context(|| format!("while running {:?} on {}", line, channel))?;
        Ok(self.engine.take_output(channel))
    }

    /// Send every non-blank line of a script, collecting replies in order
    pub fn send_script(&mut self, channel: ChannelId, script: &str) -> anyhow::Result<Vec<String>> {
        let mut replies = Vec::new();
        for line in script.lines().map(str::trim).filter(|l| !l.is_empty()) {
            replies.extend(self.send(channel, line)?);
        }
        Ok(replies)
    }

    fn settle(&mut self) -> anyhow::Result<()> {
        if !self.engine.run_until_idle(self.max_polls) {
            bail!("engine still busy after {} polls", self.max_polls);
        }
        Ok(())
    }

    /// Events published since the last call
    pub fn take_events(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Where the simulated head ended up
    pub fn head_position(&self) -> Coords {
        self.machine.motion.head_position()
    }

    /// Root of the file store
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}

/// Parse a host channel name as typed on the command line
pub fn parse_channel(name: &str) -> Option<ChannelId> {
    let id = match name.to_ascii_lowercase().as_str() {
        "http" => ChannelId::Http,
        "telnet" => ChannelId::Telnet,
        "usb" => ChannelId::Usb,
        "aux" => ChannelId::Aux,
        "aux2" => ChannelId::Aux2,
        "lcd" => ChannelId::Lcd,
        "sbc" => ChannelId::Sbc,
        _ => return None,
    };
    Some(id)
}
