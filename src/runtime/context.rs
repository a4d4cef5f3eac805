//! Oracle context building
//!
//! Turns the chat history window plus a purpose-built instruction into
//! `LlmRequest`s, and interprets what comes back.

use super::traits::LlmClient;
use crate::db::HistoryEntry;
use crate::llm::{LlmError, LlmMessage, LlmRequest, SystemContent};
use crate::prompts::{
    classification_instruction, reply_instruction, CLASSIFIER_PREAMBLE, CLASSIFY_MAX_TOKENS,
    PERSONA_PREAMBLE, REPLY_MAX_TOKENS, REPLY_TEMPERATURE,
};
use crate::state_machine::{Question, ReplyIntent, Verdict};

/// Number of history entries handed to the oracle
pub const HISTORY_WINDOW: usize = 10;

/// Order entries oldest first and keep the most recent window
///
/// Stores promise ascending order but this does not depend on it. The sort
/// is stable so entries sharing a timestamp keep their relative order.
pub fn history_window(mut entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    entries.sort_by_key(|entry| entry.timestamp);
    let excess = entries.len().saturating_sub(HISTORY_WINDOW);
    entries.split_off(excess)
}

/// Append an entry and re-apply the window bound
pub fn push_to_window(window: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    window.push(entry);
    if window.len() > HISTORY_WINDOW {
        window.remove(0);
    }
}

fn history_messages(window: &[HistoryEntry]) -> Vec<LlmMessage> {
    window
        .iter()
        .map(|entry| {
            if entry.is_user_message {
                LlmMessage::user(entry.text.clone())
            } else {
                LlmMessage::assistant(entry.text.clone())
            }
        })
        .collect()
}

/// Request for a YES/NO classification of `text`
pub fn classify_request(question: Question, window: &[HistoryEntry], text: &str) -> LlmRequest {
    let mut messages = history_messages(window);
    messages.push(LlmMessage::user(classification_instruction(question, text)));

    LlmRequest {
        system: vec![SystemContent::new(CLASSIFIER_PREAMBLE)],
        messages,
        max_tokens: Some(CLASSIFY_MAX_TOKENS),
        temperature: Some(0.0),
    }
}

/// Request for a reply serving `intent`
pub fn respond_request(
    intent: ReplyIntent,
    window: &[HistoryEntry],
    user_name: &str,
    text: &str,
) -> LlmRequest {
    let mut messages = history_messages(window);
    messages.push(LlmMessage::user(reply_instruction(intent, user_name, text)));

    LlmRequest {
        system: vec![SystemContent::new(PERSONA_PREAMBLE)],
        messages,
        max_tokens: Some(REPLY_MAX_TOKENS),
        temperature: Some(REPLY_TEMPERATURE),
    }
}

/// Run a classification request. Anything but a bare YES/NO is an error.
pub async fn classify<L: LlmClient + ?Sized>(
    client: &L,
    request: &LlmRequest,
) -> Result<Verdict, LlmError> {
    let response = client.complete(request).await?;
    if response.is_blank() {
        return Err(LlmError::empty_completion());
    }

    let answer = response.text();
    Verdict::parse(&answer)
        .ok_or_else(|| LlmError::unknown(format!("Unexpected classification answer: {answer:?}")))
}

/// Run a generation request and return the trimmed reply text
pub async fn generate<L: LlmClient + ?Sized>(
    client: &L,
    request: &LlmRequest,
) -> Result<String, LlmError> {
    let response = client.complete(request).await?;
    if response.is_blank() {
        return Err(LlmError::empty_completion());
    }
    if !response.end_turn {
        tracing::warn!(
            model = %client.model_id(),
            max_tokens = ?request.max_tokens,
            "Reply hit the token limit and may be cut short"
        );
    }
    Ok(response.text().trim().to_string())
}
