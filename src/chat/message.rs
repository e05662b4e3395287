//! Role-tagged messages and live stream fragments.
//!
//! The role of a message is decided exactly once, at the conversation-engine
//! boundary; everything downstream matches on the tag instead of inspecting
//! payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a persisted chat message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// Tool invocation notice.
    ToolStatus,
}

impl ChatRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolStatus => "tool_status",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool_status" => Ok(Self::ToolStatus),
            _ => Err(value.to_string()),
        }
    }
}

/// One persisted message within a thread.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message.
    pub role: ChatRole,
    /// Content payload.
    pub content: String,
    /// Timestamp for ordering.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a user message stamped now.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build an assistant message stamped now.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One fragment of live conversation-engine output.
///
/// Only `Assistant` fragments are chat content; `ToolStatus` fragments are
/// surfaced as progress notices, never as part of the reply text.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "text")]
pub enum ChatFragment {
    /// A piece of assistant reply text.
    Assistant(String),
    /// A tool-invocation progress notice.
    ToolStatus(String),
}
