//! Effects produced by state transitions

/// Classification question put to the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Question {
    /// Does the message express concluding satisfaction or gratitude?
    Satisfaction,
    /// Is the message genuine review feedback?
    GenuineFeedback,
}

/// What the reply should accomplish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyIntent {
    Conversational,
    RequestReview,
    ThankForReview,
    CaptureApology,
    RepromptForReview,
    Generic,
}

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ask the oracle a YES/NO question about the message
    Classify(Question),

    /// Append the user's message to history now rather than after the reply
    PersistUserMessage,

    /// Persist the message as a review
    CaptureReview,

    /// Generate the reply. Always the last effect of a turn.
    Respond(ReplyIntent),
}

impl Effect {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Effect::Respond(_))
    }
}
