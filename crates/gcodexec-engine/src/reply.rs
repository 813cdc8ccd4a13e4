//! Command results and reply formatting
//!
//! Every command produces either a finished [`Reply`] or a request to be
//! polled again. Replies are rendered according to the dialect of the
//! channel that sent the command.

use crate::channel::ChannelId;
use gcodexec_core::{CommandError, Compatibility};

/// Severity of a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyKind {
    /// Success
    #[default]
    Ok,
    /// Success with a warning
    Warning,
    /// Failure
    Error,
}

/// Text sent back to the channel that ran a command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    /// Severity
    pub kind: ReplyKind,
    /// Reply text, possibly empty
    pub text: String,
    /// Sent line by line rather than as one message
    pub long: bool,
}

impl Reply {
    /// An empty success reply
    pub fn empty() -> Self {
        Self::default()
    }

    /// A success reply
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Ok,
            text: text.into(),
            long: false,
        }
    }

    /// A warning reply
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Warning,
            text: text.into(),
            long: false,
        }
    }

    /// An error reply
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Error,
            text: text.into(),
            long: false,
        }
    }

    /// A success reply streamed line by line
    pub fn long(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Ok,
            text: text.into(),
            long: true,
        }
    }

    /// True if there is no text to send
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn tagged_text(&self) -> String {
        match self.kind {
            ReplyKind::Ok => self.text.clone(),
            ReplyKind::Warning => format!("Warning: {}", self.text),
            ReplyKind::Error => format!("Error: {}", self.text),
        }
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::error(err.to_string())
    }
}

/// Result of one attempt at running a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The command completed
    Done(Reply),
    /// The command must be polled again
    NotFinished,
}

impl Outcome {
    /// Completed with an empty reply
    pub fn done() -> Self {
        Outcome::Done(Reply::empty())
    }

    /// Completed with a success reply
    pub fn ok(text: impl Into<String>) -> Self {
        Outcome::Done(Reply::ok(text))
    }
}

/// What a command handler returns
pub type CommandResult = Result<Outcome, CommandError>;

/// Context needed to render a reply
#[derive(Debug, Clone, Copy)]
pub struct ReplyContext<'a> {
    /// Channel the command came from
    pub channel: ChannelId,
    /// Dialect of the channel's top frame
    pub compatibility: Compatibility,
    /// The command ran inside a macro file
    pub in_macro: bool,
    /// Command word, e.g. `M105`
    pub code: &'a str,
}

/// Render a reply, or `None` if nothing should be sent
pub fn format_reply(ctx: &ReplyContext<'_>, reply: &Reply) -> Option<String> {
    if reply.is_empty() && (ctx.in_macro || ctx.channel.suppresses_empty_replies()) {
        return None;
    }
    let text = reply.tagged_text();

    match ctx.compatibility {
        Compatibility::Default | Compatibility::RepRapFirmware => Some(text),
        Compatibility::Marlin | Compatibility::NanoDlp => {
            if ctx.in_macro {
                return (!text.is_empty()).then_some(text);
            }
            let trailer = if ctx.code == "M998" { "rs" } else { "ok" };
            let rendered = match ctx.code {
                "M20" => format!("Begin file list\n{}\nEnd file list\n{}", text, trailer),
                "M28" => format!("{}\n{}", trailer, text),
                "M105" | "M998" => format!("{} {}", trailer, text),
                _ if text.is_empty() => trailer.to_string(),
                _ => format!("{}\n{}", text, trailer),
            };
            Some(rendered)
        }
        other => Some(format!("Emulation of {} is not supported", other)),
    }
}
