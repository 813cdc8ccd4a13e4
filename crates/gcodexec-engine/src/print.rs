//! Print job tracking
//!
//! Which file is selected, when the print started, and which objects on
//! the bed have been cancelled.

use crate::channel::{ChannelId, GcodeFile, PauseState};
use crate::engine::Engine;
use chrono::{DateTime, Utc};
use gcodexec_core::{CommandError, EngineError, EngineEvent, MessageLevel, PrintEvent, StopReason};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct ActivePrint {
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// The print job, if any
#[derive(Debug, Clone, Default)]
pub struct PrintJob {
    selected: Option<String>,
    active: Option<ActivePrint>,
    current_object: Option<u32>,
    cancelled: BTreeSet<u32>,
}

impl PrintJob {
    /// No file selected
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the file M24 will print
    pub fn select(&mut self, name: impl Into<String>) {
        self.selected = Some(name.into());
    }

    /// File selected with M23 or M32
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Record the start of a print
    pub fn start(&mut self, name: impl Into<String>) -> DateTime<Utc> {
        let started_at = Utc::now();
        self.active = Some(ActivePrint {
            name: name.into(),
            started_at,
            started: Instant::now(),
        });
        started_at
    }

    /// Record the end of a print, returning its name and duration
    pub fn stop(&mut self) -> Option<(String, Duration)> {
        self.clear_objects();
        self.active
            .take()
            .map(|print| (print.name, print.started.elapsed()))
    }

    /// True while a print is in progress, paused or not
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Name of the file being printed
    pub fn file_name(&self) -> Option<&str> {
        self.active.as_ref().map(|print| print.name.as_str())
    }

    /// When the current print started
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.active.as_ref().map(|print| print.started_at)
    }

    /// M486 S: the object now being printed
    pub fn set_current_object(&mut self, object: Option<u32>) {
        self.current_object = object;
    }

    /// The object now being printed
    pub fn current_object(&self) -> Option<u32> {
        self.current_object
    }

    /// M486 P: stop printing an object
    pub fn cancel_object(&mut self, object: u32) {
        self.cancelled.insert(object);
    }

    /// M486 U: print an object again
    pub fn resume_object(&mut self, object: u32) {
        self.cancelled.remove(&object);
    }

    /// True if moves for the current object must not be sent
    pub fn current_object_cancelled(&self) -> bool {
        self.current_object
            .is_some_and(|object| self.cancelled.contains(&object))
    }

    /// Cancelled objects in ascending order
    pub fn cancelled_objects(&self) -> impl Iterator<Item = u32> + '_ {
        self.cancelled.iter().copied()
    }

    /// Forget every object
    pub fn clear_objects(&mut self) {
        self.current_object = None;
        self.cancelled.clear();
    }
}

impl Engine {
    /// M23: select a file for printing
    pub(crate) fn select_file(&mut self, name: &str) -> Result<(), CommandError> {
        let path = self.config.files.gcode_path(name);
        if !self.collab.files.exists(&path) {
            return Err(EngineError::FileNotFound { path: name.to_string() }.into());
        }
        self.print.select(name);
        self.file_offset_to_print = 0;
        Ok(())
    }

    /// M24 with nothing paused: start printing the selected file
    pub(crate) fn start_printing(&mut self) -> Result<(), CommandError> {
        let Some(name) = self.print.selected().map(str::to_string) else {
            return Err(EngineError::NoFileSelected.into());
        };
        let path = self.config.files.gcode_path(&name);
        let data = self
            .collab
            .files
            .read(&path)
            .map_err(|_| EngineError::FileNotFound { path: name.clone() })?;

        let mut file = GcodeFile::new(path, data);
        file.seek(self.file_offset_to_print);
        self.file_offset_to_print = 0;

        let channel = &mut self.channels[ChannelId::File];
        channel.abort();
        channel.original_mut().volumetric_extrusion = false;
        channel.original_mut().file = Some(file);
        self.pause_state = PauseState::NotPaused;
        self.paused_in_macro = false;

        let at = self.print.start(name.clone());
        tracing::info!("Started printing file {}", name);
        self.publish(EngineEvent::Print(PrintEvent::Started { file: name, at }));
        Ok(())
    }

    /// End the current print
    pub(crate) fn stop_print(&mut self, reason: StopReason) {
        self.segments.clear();
        self.pause_state = PauseState::NotPaused;
        self.paused_in_macro = false;
        self.power_fail_paused = false;
        self.deferred_pause = false;
        self.file_offset_to_print = 0;
        self.restart = Default::default();

        let channel = &mut self.channels[ChannelId::File];
        channel.unwind();
        channel.original_mut().file = None;
        channel.init();
        self.locks.release_all(&mut self.channels[ChannelId::File]);

        let Some((name, elapsed)) = self.print.stop() else {
            return;
        };
        if reason == StopReason::Abort {
            self.collab.heaters.switch_off_all();
        } else {
            let resume_file = self.config.files.system_path(&self.config.files.resume_state_file);
            if self.collab.files.exists(&resume_file) {
                if let Err(e) = self.collab.files.delete(&resume_file) {
                    tracing::warn!("Failed to delete {}: {}", resume_file, e);
                }
            }
        }

        let secs = elapsed.as_secs();
        let verb = if reason == StopReason::NormalCompletion {
            "Finished"
        } else {
            "Cancelled"
        };
        self.message(
            MessageLevel::Info,
            format!(
                "{} printing file {}, print time was {}h {}m",
                verb,
                name,
                secs / 3600,
                (secs % 3600) / 60
            ),
        );
        for id in [ChannelId::Usb, ChannelId::Telnet] {
            let channel = &mut self.channels[id];
            if channel.compatibility().is_marlin_like() {
                channel.write_output("Done printing file");
            }
        }
        self.publish(EngineEvent::Print(PrintEvent::Stopped {
            file: name,
            reason,
            elapsed,
        }));
    }

    /// True if a file is printing and not paused
    pub(crate) fn is_really_printing(&self) -> bool {
        self.print.is_active() && self.pause_state == PauseState::NotPaused
    }
}
