//! Shared types for calls, transcripts, and the relay socket protocol.
//!
//! Kept in callie-core so consumers can use them without pulling in tokio,
//! reqwest, or axum.

use serde::{Deserialize, Serialize};

// ─── Call types ────────────────────────────────────────────────────────────

/// Lifecycle status reported by the telephony vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    Queued,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
}

impl CallStatus {
    /// Final statuses. A call never leaves one of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Busy | Self::Failed | Self::NoAnswer | Self::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Queued => "queued",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::NoAnswer => "no-answer",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answering-machine detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnsweredBy {
    Human,
    Machine,
    #[default]
    Unknown,
}

impl AnsweredBy {
    /// Map the vendor's detection string (`human`, `machine_start`,
    /// `machine_end_beep`, `fax`, ...) onto the coarse enum.
    pub fn from_vendor(value: Option<&str>) -> Self {
        match value {
            Some("human") => Self::Human,
            Some(v) if v.starts_with("machine") || v == "fax" => Self::Machine,
            _ => Self::Unknown,
        }
    }
}

/// Snapshot of one outbound call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub sid: String,
    pub status: CallStatus,
    pub direction: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Seconds, present once the call has ended.
    pub duration: Option<u32>,
    pub answered_by: AnsweredBy,
}

/// One observed status change while polling a call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub at: chrono::DateTime<chrono::Utc>,
    pub status: CallStatus,
    pub duration: Option<u32>,
    pub answered_by: AnsweredBy,
}

// ─── Transcript types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only list of user/assistant turns for a single call.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::assistant(content));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

// ─── Relay socket protocol ────────────────────────────────────────────────

/// Messages the relay sends to us.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayInbound {
    /// Recognized speech for one user utterance.
    Prompt {
        #[serde(rename = "voicePrompt", default)]
        voice_prompt: String,
    },
    /// The caller talked over the assistant.
    Interrupt {
        #[serde(rename = "utteranceUntilInterrupt", default)]
        utterance_until_interrupt: Option<String>,
    },
    End,
    /// `setup`, `dtmf`, `error`, and anything newer.
    #[serde(other)]
    Other,
}

/// Messages we send to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayOutbound {
    Text {
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        last: Option<bool>,
    },
    End,
}

impl RelayOutbound {
    pub fn token(token: impl Into<String>) -> Self {
        Self::Text {
            token: token.into(),
            last: None,
        }
    }

    /// Empty fragment flagged as final; marks the end of one reply.
    pub fn stream_end() -> Self {
        Self::Text {
            token: String::new(),
            last: Some(true),
        }
    }
}
