//! Conversation state types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-chat dialogue state
///
/// Stored as a plain string. Values this build does not know about load as
/// `Unrecognized` so a corrupted or legacy row can be reset rather than
/// failing the whole request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConvState {
    /// Normal conversation
    #[default]
    Idle,

    /// A review was requested; the next genuine feedback gets captured
    AwaitingReview,

    /// Stored value this build cannot interpret
    Unrecognized { raw: String },
}

impl ConvState {
    pub fn as_str(&self) -> &str {
        match self {
            ConvState::Idle => "Idle",
            ConvState::AwaitingReview => "AwaitingReview",
            ConvState::Unrecognized { raw } => raw,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Idle" => ConvState::Idle,
            "AwaitingReview" => ConvState::AwaitingReview,
            other => ConvState::Unrecognized {
                raw: other.to_string(),
            },
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, ConvState::Unrecognized { .. })
    }
}

impl fmt::Display for ConvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ConvState {
    fn from(s: String) -> Self {
        ConvState::parse(&s)
    }
}

impl From<ConvState> for String {
    fn from(state: ConvState) -> Self {
        match state {
            ConvState::Unrecognized { raw } => raw,
            other => other.as_str().to_string(),
        }
    }
}
