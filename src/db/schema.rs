//! Database schema and types

pub use crate::state_machine::state::ConvState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversations (
    chat_id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'Idle',
    last_interaction_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    is_user_message BOOLEAN NOT NULL,
    text TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_chat ON message_history(chat_id, timestamp DESC, id DESC);

CREATE TABLE IF NOT EXISTS reviews (
    id TEXT PRIMARY KEY,
    customer_id INTEGER NOT NULL,
    chat_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_customer ON reviews(customer_id, received_at);
CREATE INDEX IF NOT EXISTS idx_reviews_chat ON reviews(chat_id, received_at);
";

/// Per-chat conversation record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub chat_id: i64,
    pub user_id: i64,
    pub state: ConvState,
    pub last_interaction_at: DateTime<Utc>,
}

impl Conversation {
    /// Default record for a chat seen for the first time
    pub fn new(chat_id: i64, user_id: i64) -> Self {
        Self {
            chat_id,
            user_id,
            state: ConvState::Idle,
            last_interaction_at: Utc::now(),
        }
    }
}

/// One line of the per-chat message log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub is_user_message: bool,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            is_user_message: true,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            is_user_message: false,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Captured customer feedback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    pub id: String,
    pub customer_id: i64,
    pub chat_id: i64,
    pub text: String,
    pub received_at: DateTime<Utc>,
}
