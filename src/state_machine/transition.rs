//! Pure state transition function

use super::effect::{Question, ReplyIntent};
use super::event::Verdict;
use super::{ConvState, Effect, Event};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// The reply intent, if this result ends the turn
    pub fn reply_intent(&self) -> Option<ReplyIntent> {
        self.effects.iter().find_map(|effect| match effect {
            Effect::Respond(intent) => Some(*intent),
            _ => None,
        })
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same state and event it always produces the same result and
/// performs no I/O. A turn starts with `MessageReceived` and ends with the
/// first result carrying `Effect::Respond`.
pub fn transition(state: &ConvState, event: Event) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Message arrival
        // ============================================================
        (ConvState::Idle, Event::MessageReceived) => Ok(TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::Classify(Question::Satisfaction))),

        (ConvState::AwaitingReview, Event::MessageReceived) => {
            Ok(TransitionResult::new(ConvState::AwaitingReview)
                .with_effect(Effect::Classify(Question::GenuineFeedback)))
        }

        // Corrupted or legacy state: reset without asking the oracle
        (ConvState::Unrecognized { .. }, Event::MessageReceived) => {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::Respond(ReplyIntent::Generic)))
        }

        // ============================================================
        // Classification
        // ============================================================
        (ConvState::Idle, Event::Classified(Verdict::Yes)) => {
            Ok(TransitionResult::new(ConvState::AwaitingReview)
                .with_effect(Effect::Respond(ReplyIntent::RequestReview)))
        }

        (ConvState::Idle, Event::Classified(Verdict::No)) => Ok(TransitionResult::new(
            ConvState::Idle,
        )
        .with_effect(Effect::Respond(ReplyIntent::Conversational))),

        (ConvState::AwaitingReview, Event::Classified(Verdict::Yes)) => {
            Ok(TransitionResult::new(ConvState::AwaitingReview)
                .with_effect(Effect::CaptureReview))
        }

        (ConvState::AwaitingReview, Event::Classified(Verdict::No)) => {
            Ok(TransitionResult::new(ConvState::AwaitingReview)
                .with_effect(Effect::Respond(ReplyIntent::RepromptForReview)))
        }

        // Oracle could not decide: converse normally and stay put. The user
        // message is recorded before generating so it is never dropped.
        (
            state @ (ConvState::Idle | ConvState::AwaitingReview),
            Event::ClassificationFailed,
        ) => Ok(TransitionResult::new(state.clone())
            .with_effect(Effect::PersistUserMessage)
            .with_effect(Effect::Respond(ReplyIntent::Conversational))),

        // ============================================================
        // Review capture
        // ============================================================
        (ConvState::AwaitingReview, Event::CaptureSucceeded { .. }) => {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::Respond(ReplyIntent::ThankForReview)))
        }

        // The feedback text is not retried; see the capture policy
        (ConvState::AwaitingReview, Event::CaptureFailed) => {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::Respond(ReplyIntent::CaptureApology)))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {state}"
        ))),
    }
}
