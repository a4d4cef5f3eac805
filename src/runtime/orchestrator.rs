//! Conversation orchestrator
//!
//! Drives one inbound message through the state machine: load the
//! conversation, classify, capture, generate, record history, deliver the
//! reply and save the conversation. Effects are executed here; decisions are
//! made by `transition`.

use super::capture::capture_review;
use super::context::{self, history_window, push_to_window, HISTORY_WINDOW};
use super::traits::{LlmClient, Notifier, Storage};
use super::ChatLocks;

use crate::db::{Conversation, HistoryEntry};
use crate::prompts::fallback_reply;
use crate::state_machine::{
    transition, ConvState, Effect, Event, Question, ReplyIntent, TransitionError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// An inbound user message. IDs are non-zero and text is non-empty; the
/// caller validates this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub text: String,
}

/// What a handled message did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutcome {
    Conversed,
    ReviewRequested,
    ReviewCaptured { review_id: String },
    CaptureFailed,
    Reprompted,
    Reset,
}

/// Successful handling of one message
#[derive(Debug)]
pub struct HandleResult {
    pub reply: String,
    pub outcome: TurnOutcome,
    pub state: ConvState,
    /// Failures after the reply was delivered. The user already has the
    /// reply, so these never fail the call.
    pub deferred_errors: Vec<OrchestratorError>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },
    #[error("Failed to deliver reply: {0}")]
    Delivery(String),
    #[error("Request cancelled")]
    Cancelled,
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl OrchestratorError {
    fn store(operation: &'static str) -> impl FnOnce(String) -> Self {
        move |message| OrchestratorError::Store { operation, message }
    }
}

/// Race `fut` against the caller's cancellation
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, OrchestratorError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(OrchestratorError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Where the state machine left a turn once a reply is due
struct TurnPlan {
    state: ConvState,
    intent: ReplyIntent,
    review_id: Option<String>,
    /// The fallback path already wrote the user entry
    user_recorded: bool,
}

impl TurnPlan {
    fn outcome(&self) -> TurnOutcome {
        match (self.intent, &self.review_id) {
            (ReplyIntent::ThankForReview, Some(review_id)) => TurnOutcome::ReviewCaptured {
                review_id: review_id.clone(),
            },
            (ReplyIntent::Conversational | ReplyIntent::ThankForReview, _) => TurnOutcome::Conversed,
            (ReplyIntent::RequestReview, _) => TurnOutcome::ReviewRequested,
            (ReplyIntent::CaptureApology, _) => TurnOutcome::CaptureFailed,
            (ReplyIntent::RepromptForReview, _) => TurnOutcome::Reprompted,
            (ReplyIntent::Generic, _) => TurnOutcome::Reset,
        }
    }
}

/// Generic orchestrator over any storage, oracle and delivery channel
pub struct ConversationOrchestrator<S, L, N>
where
    S: Storage,
    L: LlmClient,
    N: Notifier,
{
    storage: S,
    /// Oracle used for YES/NO calls
    classifier: L,
    /// Oracle used for reply text
    responder: L,
    notifier: N,
    locks: ChatLocks,
}

impl<S, L, N> ConversationOrchestrator<S, L, N>
where
    S: Storage,
    L: LlmClient,
    N: Notifier,
{
    pub fn new(storage: S, classifier: L, responder: L, notifier: N) -> Self {
        Self {
            storage,
            classifier,
            responder,
            notifier,
            locks: ChatLocks::default(),
        }
    }

    /// Handle one message and produce exactly one reply
    ///
    /// Messages for the same chat are processed one at a time; other chats
    /// proceed in parallel. An `Err` means no reply reached the user.
    pub async fn handle_message(
        &self,
        input: &IncomingMessage,
        cancel: &CancellationToken,
    ) -> Result<HandleResult, OrchestratorError> {
        let _chat_guard = until_cancelled(cancel, self.locks.acquire(input.chat_id)).await?;
        self.run_turn(input, cancel).await
    }

    async fn run_turn(
        &self,
        input: &IncomingMessage,
        cancel: &CancellationToken,
    ) -> Result<HandleResult, OrchestratorError> {
        let chat_id = input.chat_id;

        let mut conversation = until_cancelled(cancel, self.storage.find_by_chat_id(chat_id))
            .await?
            .map_err(OrchestratorError::store("load conversation"))?;
        let original_state = conversation.state.clone();
        conversation.user_id = input.user_id;

        let mut window = history_window(
            until_cancelled(cancel, self.storage.get_history(chat_id, HISTORY_WINDOW))
                .await?
                .map_err(OrchestratorError::store("load history"))?,
        );

        tracing::info!(chat_id, state = %original_state, "Handling message");

        let plan = self
            .plan_reply(original_state.clone(), &mut window, input, cancel)
            .await?;

        let reply = match self.deliver_reply(&plan, &window, input, cancel).await {
            Ok(reply) => reply,
            Err(e) => {
                if plan.review_id.is_some() {
                    // The review row exists; staying in AwaitingReview would capture it twice
                    self.save_captured_state(&mut conversation, &plan.state)
                        .await;
                }
                return Err(e);
            }
        };

        let deferred_errors = self
            .finish_turn(&mut conversation, &original_state, &plan, &reply, cancel)
            .await;

        let outcome = plan.outcome();
        tracing::info!(
            chat_id,
            from = %original_state,
            to = %plan.state,
            outcome = ?outcome,
            deferred = deferred_errors.len(),
            "Message handled"
        );

        Ok(HandleResult {
            reply,
            outcome,
            state: plan.state,
            deferred_errors,
        })
    }

    /// Run transitions and their effects until one asks for a reply
    async fn plan_reply(
        &self,
        mut state: ConvState,
        window: &mut Vec<HistoryEntry>,
        input: &IncomingMessage,
        cancel: &CancellationToken,
    ) -> Result<TurnPlan, OrchestratorError> {
        let chat_id = input.chat_id;
        let mut event = Event::MessageReceived;
        let mut user_recorded = false;
        let mut review_id = None;

        loop {
            let result = transition(&state, event)?;

            let mut next = None;
            for effect in result.effects.iter().take_while(|e| !e.is_terminal()) {
                match effect {
                    Effect::Classify(question) => {
                        next = Some(self.classify(*question, window, input, cancel).await?);
                    }
                    Effect::PersistUserMessage => {
                        let entry = HistoryEntry::user(input.text.clone());
                        until_cancelled(cancel, self.storage.save_history_entry(chat_id, &entry))
                            .await?
                            .map_err(OrchestratorError::store("save user message"))?;
                        push_to_window(window, entry);
                        user_recorded = true;
                    }
                    Effect::CaptureReview => {
                        match until_cancelled(cancel, capture_review(&self.storage, input)).await? {
                            Ok(review) => {
                                review_id = Some(review.id.clone());
                                next = Some(Event::CaptureSucceeded {
                                    review_id: review.id,
                                });
                            }
                            Err(e) => {
                                tracing::error!(chat_id, error = %e, "Review capture failed");
                                next = Some(Event::CaptureFailed);
                            }
                        }
                    }
                    Effect::Respond(_) => {}
                }
            }

            if let Some(intent) = result.reply_intent() {
                return Ok(TurnPlan {
                    state: result.new_state,
                    intent,
                    review_id,
                    user_recorded,
                });
            }

            state = result.new_state;
            event = next.ok_or_else(|| {
                TransitionError::InvalidTransition(format!(
                    "no follow-up event in state {state}"
                ))
            })?;
        }
    }

    /// Generate the reply, record the user message and send
    async fn deliver_reply(
        &self,
        plan: &TurnPlan,
        window: &[HistoryEntry],
        input: &IncomingMessage,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let chat_id = input.chat_id;
        let reply = self.generate(plan.intent, window, input, cancel).await?;

        if !plan.user_recorded {
            until_cancelled(
                cancel,
                self.storage
                    .save_history_entry(chat_id, &HistoryEntry::user(input.text.clone())),
            )
            .await?
            .map_err(OrchestratorError::store("save user message"))?;
        }

        if let Err(e) = until_cancelled(cancel, self.notifier.send(chat_id, &reply)).await? {
            tracing::error!(chat_id, error = %e, "Reply delivery failed");
            return Err(OrchestratorError::Delivery(e));
        }
        Ok(reply)
    }

    /// Best-effort save of the post-capture state when the turn is aborted.
    /// Not raced against cancellation.
    async fn save_captured_state(&self, conversation: &mut Conversation, state: &ConvState) {
        conversation.state = state.clone();
        conversation.last_interaction_at = Utc::now();
        if let Err(e) = self.storage.save_conversation(conversation).await {
            tracing::error!(
                chat_id = conversation.chat_id,
                error = %e,
                "Failed to save conversation after capture"
            );
        }
    }

    /// Bookkeeping once the user has the reply. Failures are returned, not raised.
    async fn finish_turn(
        &self,
        conversation: &mut Conversation,
        original_state: &ConvState,
        plan: &TurnPlan,
        reply: &str,
        cancel: &CancellationToken,
    ) -> Vec<OrchestratorError> {
        let chat_id = conversation.chat_id;
        let mut deferred_errors = Vec::new();

        let assistant = HistoryEntry::assistant(reply.to_string());
        match until_cancelled(cancel, self.storage.save_history_entry(chat_id, &assistant)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(chat_id, error = %e, "Failed to save assistant message");
                deferred_errors.push(OrchestratorError::Store {
                    operation: "save assistant message",
                    message: e,
                });
            }
            Err(e) => deferred_errors.push(e),
        }

        let state_changed = plan.state != *original_state;
        conversation.state = plan.state.clone();
        conversation.last_interaction_at = Utc::now();

        // After a capture the state save must land even if the caller went away
        let saved = if plan.review_id.is_some() {
            Ok(self.storage.save_conversation(conversation).await)
        } else {
            until_cancelled(cancel, self.storage.save_conversation(conversation)).await
        };

        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) if state_changed => {
                tracing::error!(chat_id, state = %plan.state, error = %e, "Failed to save conversation state");
                deferred_errors.push(OrchestratorError::Store {
                    operation: "save conversation",
                    message: e,
                });
            }
            Ok(Err(e)) => {
                tracing::warn!(chat_id, error = %e, "Failed to update last interaction time");
            }
            Err(e) => deferred_errors.push(e),
        }

        deferred_errors
    }

    /// Ask the classifier; oracle failure becomes `ClassificationFailed`
    async fn classify(
        &self,
        question: Question,
        window: &[HistoryEntry],
        input: &IncomingMessage,
        cancel: &CancellationToken,
    ) -> Result<Event, OrchestratorError> {
        let request = context::classify_request(question, window, &input.text);
        match until_cancelled(cancel, context::classify(&self.classifier, &request)).await? {
            Ok(verdict) => {
                tracing::debug!(
                    chat_id = input.chat_id,
                    model = %self.classifier.model_id(),
                    ?question,
                    ?verdict,
                    "Classified message"
                );
                Ok(Event::Classified(verdict))
            }
            Err(e) => {
                tracing::warn!(
                    chat_id = input.chat_id,
                    model = %self.classifier.model_id(),
                    ?question,
                    error = %e,
                    "Classification failed, falling back to conversation"
                );
                Ok(Event::ClassificationFailed)
            }
        }
    }

    /// Generate reply text, substituting the scripted fallback on failure
    async fn generate(
        &self,
        intent: ReplyIntent,
        window: &[HistoryEntry],
        input: &IncomingMessage,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let request = context::respond_request(intent, window, &input.user_name, &input.text);
        match until_cancelled(cancel, context::generate(&self.responder, &request)).await? {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::warn!(
                    chat_id = input.chat_id,
                    model = %self.responder.model_id(),
                    ?intent,
                    error = %e,
                    "Reply generation failed, using fallback"
                );
                Ok(fallback_reply(intent, &input.user_name))
            }
        }
    }
}
