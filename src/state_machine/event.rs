//! Events that can occur while handling a message

/// Answer to a classification question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
}

impl Verdict {
    /// Parse an oracle answer. Only a bare `YES` or `NO` (after trimming,
    /// any case) counts; everything else is a failed classification.
    pub fn parse(answer: &str) -> Option<Self> {
        match answer.trim().to_uppercase().as_str() {
            "YES" => Some(Verdict::Yes),
            "NO" => Some(Verdict::No),
            _ => None,
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A user message arrived for this chat
    MessageReceived,

    // Oracle events
    Classified(Verdict),
    ClassificationFailed,

    // Review capture events
    CaptureSucceeded { review_id: String },
    CaptureFailed,
}
