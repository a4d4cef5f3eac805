//! Prompt text for classification and reply generation
//!
//! The oracle never sees the raw user text as an instruction. Each call gets
//! a fixed preamble, the chat history, and an instruction built here that
//! quotes the message where needed.

use crate::state_machine::{Question, ReplyIntent};

/// Preamble for YES/NO classification calls
pub const CLASSIFIER_PREAMBLE: &str = "You analyze customer messages sent to a small business. \
You answer classification questions with a single word: YES or NO. \
Do not explain your answer.";

/// Preamble for reply generation
pub const PERSONA_PREAMBLE: &str = "You are a friendly small-business assistant chatting with a customer. \
Keep replies short, warm and specific to the conversation. \
Never invent order details, prices or policies you were not told about.";

/// Token budget for classification calls
pub const CLASSIFY_MAX_TOKENS: u32 = 5;

/// Token budget for generated replies
pub const REPLY_MAX_TOKENS: u32 = 300;

/// Sampling temperature for generated replies
pub const REPLY_TEMPERATURE: f32 = 0.7;

/// Instruction for a classification call about `text`
pub fn classification_instruction(question: Question, text: &str) -> String {
    match question {
        Question::Satisfaction => format!(
            "Does the following customer message express satisfaction or gratitude \
             that concludes their request (for example a thank-you after being helped)? \
             Answer YES or NO.\n\nMessage: \"{text}\""
        ),
        Question::GenuineFeedback => format!(
            "We asked this customer to review their experience. Is the following message \
             genuine review feedback about the service, rather than a question, a refusal \
             or a change of topic? Answer YES or NO.\n\nMessage: \"{text}\""
        ),
    }
}

/// Instruction describing the reply wanted for `intent`
pub fn reply_instruction(intent: ReplyIntent, user_name: &str, text: &str) -> String {
    let name = display_name(user_name);
    match intent {
        ReplyIntent::Conversational => format!(
            "Respond conversationally to {name}'s latest message: \"{text}\""
        ),
        ReplyIntent::RequestReview => format!(
            "{name} just thanked us. Thank them warmly and ask politely whether they would \
             leave a short review of their experience."
        ),
        ReplyIntent::ThankForReview => format!(
            "{name} just left this review: \"{text}\". Thank them sincerely for the feedback."
        ),
        ReplyIntent::CaptureApology => format!(
            "We could not save the feedback {name} just sent. Apologize briefly and let them \
             know something went wrong on our side."
        ),
        ReplyIntent::RepromptForReview => format!(
            "We asked {name} for a review but they replied: \"{text}\". Address their message \
             briefly, then gently ask again for a few words about their experience."
        ),
        ReplyIntent::Generic => format!(
            "Greet {name} and ask how you can help them today."
        ),
    }
}

/// Scripted reply used when generation fails
pub fn fallback_reply(intent: ReplyIntent, user_name: &str) -> String {
    let name = display_name(user_name);
    match intent {
        ReplyIntent::Conversational => {
            format!("Thanks for your message, {name}! How else can we help you today?")
        }
        ReplyIntent::RequestReview => format!(
            "Thanks, {name}! We appreciate your business. Would you mind leaving a quick \
             review about your experience?"
        ),
        ReplyIntent::ThankForReview => "Thanks for your feedback!".to_string(),
        ReplyIntent::CaptureApology => format!(
            "Sorry, {name}, we ran into a problem saving your feedback. Thank you for taking \
             the time to share it."
        ),
        ReplyIntent::RepromptForReview => format!(
            "No problem, {name}. Whenever you have a moment, we'd love a few words about \
             your experience."
        ),
        ReplyIntent::Generic => format!("Hi {name}! How can we help you today?"),
    }
}

fn display_name(user_name: &str) -> &str {
    let trimmed = user_name.trim();
    if trimmed.is_empty() {
        "there"
    } else {
        trimmed
    }
}
