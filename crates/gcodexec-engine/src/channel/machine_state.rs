//! Machine-state frames
//!
//! Each channel keeps a stack of [`MachineState`] frames. A new frame is
//! pushed when a macro is invoked and popped when it returns, so modal
//! settings changed inside the macro (units, relative mode, feed rate) do
//! not leak back into the caller.

use super::state::GCodeState;
use crate::reply::Reply;
use crate::resource::ResourceSet;
use gcodexec_core::{Compatibility, DistanceUnits, Plane};

/// Why a macro frame was pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroOrigin {
    /// M98 from a user or print file
    UserMacro,
    /// Pause, resume, homing and similar helper macros
    SystemHelper,
    /// config.g, daemon.g and trigger macros
    AsyncSystem,
    /// tfree/tpre/tpost
    ToolChange,
}

impl MacroOrigin {
    /// System macros ignore workplace offsets
    pub fn is_system(&self) -> bool {
        !matches!(self, Self::UserMacro)
    }
}

/// A G-code file being read by a channel
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeFile {
    path: String,
    data: String,
    position: usize,
}

impl GcodeFile {
    /// Wrap file contents for line-by-line reading
    pub fn new(path: impl Into<String>, data: String) -> Self {
        Self {
            path: path.into(),
            data,
            position: 0,
        }
    }

    /// The path the file was opened from
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Byte offset of the next unread line
    pub fn position(&self) -> u64 {
        self.position as u64
    }

    /// Total length in bytes
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// True if the file has no content
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True once every line has been read
    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Read the next line, returning its starting offset and text without the line ending
    pub fn next_line(&mut self) -> Option<(u64, String)> {
        if self.is_eof() {
            return None;
        }
        let start = self.position;
        let rest = &self.data[start..];
        let (line, consumed) = match rest.find('\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.position += consumed;
        Some((start as u64, line.trim_end_matches('\r').to_string()))
    }

    /// Restart reading from a byte offset, clamped to the end of the file
    pub fn seek(&mut self, offset: u64) {
        let mut offset = (offset as usize).min(self.data.len());
        while offset > 0 && offset < self.data.len() && !self.data.is_char_boundary(offset) {
            offset += 1;
        }
        self.position = offset;
    }

    /// Skip the rest of the file (M99)
    pub fn finish(&mut self) {
        self.position = self.data.len();
    }
}

/// One frame of modal machine state
#[derive(Debug, Clone, PartialEq)]
pub struct MachineState {
    /// Requested feed rate in mm/min, before the speed factor
    pub feed_rate: f64,
    /// G20/G21
    pub units: DistanceUnits,
    /// G91 in force
    pub axes_relative: bool,
    /// M83 in force
    pub drives_relative: bool,
    /// M200 in force
    pub volumetric_extrusion: bool,
    /// G17/G18/G19
    pub plane: Plane,
    /// Reply dialect
    pub compatibility: Compatibility,
    /// Resources locked while this frame was on top
    pub locked_resources: ResourceSet,
    /// Command-level execution state
    pub state: GCodeState,
    /// File being read in this frame
    pub file: Option<GcodeFile>,
    /// Frame was pushed to run a macro file
    pub doing_file_macro: bool,
    /// Frame runs a system macro, so workplace offsets are ignored
    pub running_system_macro: bool,
    /// Frame is parked waiting for M292
    pub waiting_for_acknowledgement: bool,
    /// M292 received for this frame
    pub message_acknowledged: bool,
    /// M292 P1 received for this frame
    pub message_cancelled: bool,
    /// Command word and reply held back until this frame's state machine or macro finishes
    pub pending_reply: Option<(String, Reply)>,
}

impl MachineState {
    /// A top-level frame
    pub fn new(feed_rate: f64, compatibility: Compatibility) -> Self {
        Self {
            feed_rate,
            units: DistanceUnits::Millimetres,
            axes_relative: false,
            drives_relative: true,
            volumetric_extrusion: false,
            plane: Plane::XY,
            compatibility,
            locked_resources: ResourceSet::new(),
            state: GCodeState::Normal,
            file: None,
            doing_file_macro: false,
            running_system_macro: false,
            waiting_for_acknowledgement: false,
            message_acknowledged: false,
            message_cancelled: false,
            pending_reply: None,
        }
    }

    /// A child frame: every modal setting is copied down, the file is not
    pub fn child_of(parent: &MachineState) -> Self {
        Self {
            file: None,
            waiting_for_acknowledgement: false,
            message_acknowledged: false,
            message_cancelled: false,
            pending_reply: None,
            ..parent.clone_without_file()
        }
    }

    /// Take the settings that config.g is allowed to change
    pub fn copy_state_from(&mut self, other: &MachineState) {
        self.feed_rate = other.feed_rate;
        self.units = other.units;
        self.axes_relative = other.axes_relative;
        self.drives_relative = other.drives_relative;
        self.volumetric_extrusion = other.volumetric_extrusion;
    }

    /// Convert a parameter value in the current units to mm
    pub fn to_mm(&self, value: f64) -> f64 {
        self.units.to_mm(value)
    }

    fn clone_without_file(&self) -> Self {
        Self {
            feed_rate: self.feed_rate,
            units: self.units,
            axes_relative: self.axes_relative,
            drives_relative: self.drives_relative,
            volumetric_extrusion: self.volumetric_extrusion,
            plane: self.plane,
            compatibility: self.compatibility,
            locked_resources: self.locked_resources,
            state: self.state,
            file: None,
            doing_file_macro: self.doing_file_macro,
            running_system_macro: self.running_system_macro,
            waiting_for_acknowledgement: self.waiting_for_acknowledgement,
            message_acknowledged: self.message_acknowledged,
            message_cancelled: self.message_cancelled,
            pending_reply: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    #[test]
    fn test_file_lines() {
        let mut file = GcodeFile::new("a.g", "G1 X1\r\nG1 X2\nM400".to_string());
        assert_eq!(file.next_line(), Some((0, "G1 X1".to_string())));
        assert_eq!(file.next_line(), Some((7, "G1 X2".to_string())));
        assert_eq!(file.next_line(), Some((13, "M400".to_string())));
        assert_eq!(file.next_line(), None);
        assert!(file.is_eof());

        file.seek(7);
        assert_eq!(file.next_line().map(|(pos, _)| pos), Some(7));
        file.finish();
        assert!(file.is_eof());
    }

    #[test]
    fn test_child_frame_copies_modal_state() {
        let mut parent = MachineState::new(3000.0, Compatibility::Marlin);
        parent.axes_relative = true;
        parent.locked_resources.insert(Resource::Movement);
        parent.file = Some(GcodeFile::new("print.g", String::new()));

        let child = MachineState::child_of(&parent);
        assert!(child.axes_relative);
        assert_eq!(child.compatibility, Compatibility::Marlin);
        assert!(child.locked_resources.contains(Resource::Movement));
        assert!(child.file.is_none());
    }

    #[test]
    fn test_copy_state_from() {
        let mut a = MachineState::new(3000.0, Compatibility::Default);
        let mut b = MachineState::new(1200.0, Compatibility::Marlin);
        b.drives_relative = false;
        b.units = DistanceUnits::Inches;
        a.copy_state_from(&b);
        assert_eq!(a.feed_rate, 1200.0);
        assert!(!a.drives_relative);
        assert_eq!(a.units, DistanceUnits::Inches);
        assert_eq!(a.compatibility, Compatibility::Default);
    }
}
