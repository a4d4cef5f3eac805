//! API request and response types

use crate::runtime::{HandleResult, IncomingMessage, TurnOutcome};
use crate::state_machine::ConvState;
use serde::{Deserialize, Serialize};

/// Inbound message from the messenger bridge
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub chat_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub user_name: String,
    pub text: String,
}

impl MessageRequest {
    /// Reject zero IDs and blank text
    pub fn validate(self) -> Result<IncomingMessage, &'static str> {
        if self.chat_id == 0 {
            return Err("chat_id must be non-zero");
        }
        if self.user_id == 0 {
            return Err("user_id must be non-zero");
        }
        if self.text.trim().is_empty() {
            return Err("text must not be empty");
        }
        Ok(IncomingMessage {
            chat_id: self.chat_id,
            user_id: self.user_id,
            user_name: self.user_name,
            text: self.text,
        })
    }
}

/// Reply to an inbound message
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub reply: String,
    pub outcome: TurnOutcome,
    /// Conversation state after the turn
    pub state: ConvState,
}

impl From<HandleResult> for MessageResponse {
    fn from(result: HandleResult) -> Self {
        Self {
            reply: result.reply,
            outcome: result.outcome,
            state: result.state,
        }
    }
}

/// Filter for review listing; exactly one field is set
#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    pub customer_id: Option<i64>,
    pub chat_id: Option<i64>,
}

/// Response for review listing
#[derive(Debug, Serialize)]
pub struct ReviewsResponse {
    pub reviews: Vec<crate::db::Review>,
}

/// Response for the development outbox
#[derive(Debug, Serialize)]
pub struct OutboxResponse {
    pub chat_id: i64,
    pub messages: Vec<String>,
}

/// Model information with metadata
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub description: String,
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
