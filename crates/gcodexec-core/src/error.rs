//! Error handling for gcodexec
//!
//! Provides the error types used across the engine:
//! - Command errors (the per-command result taxonomy reported back to a channel)
//! - Engine errors (files, print state, resume state)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Command error type
///
/// Represents the ways a single decoded command can fail. A command error
/// never escapes the channel that ran the command: the dispatcher renders it
/// as an error reply and the channel carries on with its next command.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Bad parameter value or a missing required parameter
    #[error("{message}")]
    Invalid {
        /// The text reported back to the channel.
        message: String,
    },

    /// The requested position cannot be reached
    #[error("{message}")]
    Unreachable {
        /// The text reported back to the channel.
        message: String,
    },

    /// Too many nested macro invocations
    #[error("Push(): stack overflow")]
    StackOverflow,

    /// Command is recognised but cannot be honoured in this build
    #[error("unsupported command {code}")]
    Unsupported {
        /// The command as written, e.g. `M999`.
        code: String,
    },

    /// A safety condition that escalates to an emergency stop
    #[error("{message}")]
    Fatal {
        /// The text reported back to the channel.
        message: String,
    },
}

impl CommandError {
    /// Create a validation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a reachability error
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Check if this error must abort the whole print on the channel
    pub fn aborts_print(&self) -> bool {
        matches!(self, Self::StackOverflow | Self::Fatal { .. })
    }
}

/// Engine error type
///
/// Failures of engine operations that are not tied to one command's
/// parameters: missing files, print state and the resume-state file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A print file could not be opened
    #[error("Failed to open file {path}")]
    FileNotFound {
        /// The file that was requested.
        path: String,
    },

    /// A macro file could not be found
    #[error("Macro file {path} not found")]
    MacroNotFound {
        /// The macro that was requested.
        path: String,
    },

    /// Writing the resume-state file failed
    #[error("Failed to write or close file {path}")]
    ResumeStateWrite {
        /// The resume-state file path.
        path: String,
    },

    /// A print was started with no file selected
    #[error("Cannot print, because no file is selected!")]
    NoFileSelected,

    /// A pause was requested with no print running
    #[error("Cannot pause print, because no file is being printed!")]
    NotPrinting,
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        CommandError::invalid(err.to_string())
    }
}

/// Main error type for gcodexec
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a command error
    pub fn is_command_error(&self) -> bool {
        matches!(self, Error::Command(_))
    }

    /// Check if this is an engine error
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Error::Engine(_))
    }

    /// Check if this error means a file was missing
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Engine(EngineError::FileNotFound { .. })
            | Error::Engine(EngineError::MacroNotFound { .. }) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = CommandError::invalid("G0/G1: insufficient axes homed");
        assert_eq!(err.to_string(), "G0/G1: insufficient axes homed");

        let err = CommandError::StackOverflow;
        assert_eq!(err.to_string(), "Push(): stack overflow");
        assert!(err.aborts_print());

        let err = CommandError::unreachable("G2/G3: outside machine limits");
        assert!(!err.aborts_print());
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::MacroNotFound {
            path: "sys/pause.g".to_string(),
        };
        assert_eq!(err.to_string(), "Macro file sys/pause.g not found");

        let err = CommandError::from(EngineError::FileNotFound {
            path: "part.g".to_string(),
        });
        assert_eq!(err, CommandError::invalid("Failed to open file part.g"));
        assert!(!err.aborts_print());
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = CommandError::StackOverflow.into();
        assert!(err.is_command_error());

        let err: Error = EngineError::FileNotFound {
            path: "gcodes/part.g".to_string(),
        }
        .into();
        assert!(err.is_engine_error());
        assert!(err.is_not_found());

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(err.is_not_found());
    }
}
