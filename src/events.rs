//! IPC message types exchanged with the controlling process.
//!
//! Both directions are closed tagged enums: outbound events carry a `type`
//! tag, inbound commands carry a `command` tag. Each value is one JSON object
//! on one line.

use serde::{Deserialize, Serialize};

/// Voice used when none is configured or a `change_voice` omits one.
pub const DEFAULT_VOICE: &str = "af_bella";

/// Events written to the parent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Finalized transcript of one user turn
    Transcription { text: String },
    /// A completed user/assistant exchange
    ConversationTurn {
        user_text: String,
        jarvis_response: String,
    },
    /// Text that is about to be spoken
    JarvisSpeaking { text: String },
    /// Machine-actionable instruction extracted from a model reply
    InstructionDetected { instruction: String },
    Listening,
    UserSpeaking,
    Muted,
    Unmuted,
    Error { message: String },
    Status { message: String },
    Debug { message: String },
    Ready,
    ShutdownComplete,
}

impl Event {
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Event::Status {
            message: message.into(),
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Event::Debug {
            message: message.into(),
        }
    }
}

/// Commands read from the parent process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Mute,
    Unmute,
    ResetContext,
    ChangeVoice {
        #[serde(default = "default_voice")]
        voice: String,
    },
    Shutdown,
    Announce(Announcement),
}

impl Command {
    /// Every recognised value of the `command` tag.
    pub const NAMES: [&'static str; 6] = [
        "mute",
        "unmute",
        "reset_context",
        "change_voice",
        "shutdown",
        "announce",
    ];
}

/// Structured completion summary to be read aloud.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Announcement {
    /// Free-text headline
    #[serde(default = "default_announcement_text")]
    pub text: String,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub next_questions: Vec<String>,
}

impl Announcement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            changes: Vec::new(),
            notes: Vec::new(),
            risks: Vec::new(),
            next_questions: Vec::new(),
        }
    }
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_announcement_text() -> String {
    "Task completed".to_string()
}
