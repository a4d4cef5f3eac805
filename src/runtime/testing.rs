//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::db::{Conversation, HistoryEntry, Review};
use crate::llm::{LlmError, LlmRequest, LlmResponse};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Delay before answering each request
    delay: Option<Duration>,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            delay: None,
            request_started: Arc::new(Notify::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a successful text response
    pub fn queue_text(&self, text: &str) {
        self.queue_response(LlmResponse::text_only(text));
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_waiters();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// Switches that make individual storage operations fail
#[derive(Default)]
pub struct FailPoints {
    conversation_load: AtomicBool,
    conversation_save: AtomicBool,
    history_load: AtomicBool,
    user_history_save: AtomicBool,
    assistant_history_save: AtomicBool,
    review_save: AtomicBool,
}

impl FailPoints {
    pub fn fail_conversation_load(&self, fail: bool) {
        self.conversation_load.store(fail, Ordering::SeqCst);
    }

    pub fn fail_conversation_save(&self, fail: bool) {
        self.conversation_save.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history_load(&self, fail: bool) {
        self.history_load.store(fail, Ordering::SeqCst);
    }

    pub fn fail_user_history_save(&self, fail: bool) {
        self.user_history_save.store(fail, Ordering::SeqCst);
    }

    pub fn fail_assistant_history_save(&self, fail: bool) {
        self.assistant_history_save.store(fail, Ordering::SeqCst);
    }

    pub fn fail_review_save(&self, fail: bool) {
        self.review_save.store(fail, Ordering::SeqCst);
    }
}

/// In-memory storage for testing
///
/// History reads come back newest first so callers cannot lean on store
/// ordering.
#[derive(Default)]
pub struct InMemoryStorage {
    conversations: Mutex<HashMap<i64, Conversation>>,
    history: Mutex<HashMap<i64, Vec<HistoryEntry>>>,
    reviews: Mutex<Vec<Review>>,
    fail_points: FailPoints,
    /// Delay on conversation loads, to widen race windows
    load_delay: Option<Duration>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn fail_points(&self) -> &FailPoints {
        &self.fail_points
    }

    pub fn conversation(&self, chat_id: i64) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(&chat_id).cloned()
    }

    /// Store a conversation directly, bypassing the orchestrator
    pub fn put_conversation(&self, conversation: Conversation) {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.chat_id, conversation);
    }

    /// Full history for a chat in insertion order
    pub fn history(&self, chat_id: i64) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn reviews(&self) -> Vec<Review> {
        self.reviews.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStorage {
    async fn find_by_chat_id(&self, chat_id: i64) -> Result<Conversation, String> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_points.conversation_load.load(Ordering::SeqCst) {
            return Err("conversation store unavailable".to_string());
        }
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .entry(chat_id)
            .or_insert_with(|| Conversation::new(chat_id, 0))
            .clone())
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), String> {
        if self.fail_points.conversation_save.load(Ordering::SeqCst) {
            return Err("conversation save failed".to_string());
        }
        if conversation.chat_id == 0 {
            return Err("cannot save conversation with zero chat id".to_string());
        }
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.chat_id, conversation.clone());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for InMemoryStorage {
    async fn save_history_entry(&self, chat_id: i64, entry: &HistoryEntry) -> Result<(), String> {
        let fail = if entry.is_user_message {
            &self.fail_points.user_history_save
        } else {
            &self.fail_points.assistant_history_save
        };
        if fail.load(Ordering::SeqCst) {
            return Err("history append failed".to_string());
        }
        self.history
            .lock()
            .unwrap()
            .entry(chat_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<HistoryEntry>, String> {
        if self.fail_points.history_load.load(Ordering::SeqCst) {
            return Err("history read failed".to_string());
        }
        // Native order of this store is newest first
        Ok(self
            .history(chat_id)
            .into_iter()
            .rev()
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl ReviewStore for InMemoryStorage {
    async fn save_review(&self, review: &Review) -> Result<(), String> {
        if self.fail_points.review_save.load(Ordering::SeqCst) {
            return Err("review insert failed".to_string());
        }
        if review.id.is_empty() {
            return Err("review ID cannot be empty".to_string());
        }
        let mut reviews = self.reviews.lock().unwrap();
        match reviews.iter_mut().find(|r| r.id == review.id) {
            Some(existing) => *existing = review.clone(),
            None => reviews.push(review.clone()),
        }
        Ok(())
    }
}

// ============================================================================
// Mock Notifier
// ============================================================================

/// Notifier that records what it sends
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(i64, String)>>,
    fail: AtomicBool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("messenger unreachable".to_string());
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

// ============================================================================
// Orchestrator Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;
    use crate::prompts::{fallback_reply, CLASSIFIER_PREAMBLE, PERSONA_PREAMBLE};
    use crate::runtime::{
        ConversationOrchestrator, IncomingMessage, OrchestratorError, TurnOutcome,
        HISTORY_WINDOW,
    };
    use crate::state_machine::{ConvState, ReplyIntent};
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    type TestOrchestrator =
        ConversationOrchestrator<Arc<InMemoryStorage>, Arc<MockLlmClient>, Arc<MockNotifier>>;

    struct Harness {
        storage: Arc<InMemoryStorage>,
        llm: Arc<MockLlmClient>,
        notifier: Arc<MockNotifier>,
        orchestrator: Arc<TestOrchestrator>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_parts(InMemoryStorage::new(), MockLlmClient::new("mock"))
        }

        fn with_parts(storage: InMemoryStorage, llm: MockLlmClient) -> Self {
            let storage = Arc::new(storage);
            let llm = Arc::new(llm);
            let notifier = Arc::new(MockNotifier::new());
            // One mock plays both roles so the call order is the queue order
            let orchestrator = Arc::new(ConversationOrchestrator::new(
                Arc::clone(&storage),
                Arc::clone(&llm),
                Arc::clone(&llm),
                Arc::clone(&notifier),
            ));
            Self {
                storage,
                llm,
                notifier,
                orchestrator,
            }
        }

        async fn send(
            &self,
            chat_id: i64,
            text: &str,
        ) -> Result<crate::runtime::HandleResult, OrchestratorError> {
            self.orchestrator
                .handle_message(&message(chat_id, text), &CancellationToken::new())
                .await
        }
    }

    fn message(chat_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id,
            user_id: 4001,
            user_name: "Alex".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_review_flow() {
        let h = Harness::new();

        // Message 1: ordinary conversation
        h.llm.queue_text("NO");
        h.llm.queue_text("Hi Alex! How can I help?");
        let first = h.send(3001, "Hello there").await.unwrap();
        assert_eq!(first.reply, "Hi Alex! How can I help?");
        assert_eq!(first.outcome, TurnOutcome::Conversed);
        assert_eq!(h.storage.conversation(3001).unwrap().state, ConvState::Idle);

        let history = h.storage.history(3001);
        assert_eq!(history.len(), 2);
        assert!(history[0].is_user_message);
        assert_eq!(history[0].text, "Hello there");
        assert!(!history[1].is_user_message);
        assert_eq!(history[1].text, "Hi Alex! How can I help?");

        // Message 2: satisfaction triggers a review request
        h.llm.queue_text("YES");
        h.llm.queue_text("Glad to help! Would you leave us a quick review?");
        let second = h.send(3001, "That was really helpful, thank you!").await.unwrap();
        assert_eq!(second.outcome, TurnOutcome::ReviewRequested);
        assert_eq!(
            h.storage.conversation(3001).unwrap().state,
            ConvState::AwaitingReview
        );

        // Message 3: feedback is captured
        h.llm.queue_text("YES");
        h.llm.queue_text("Thank you so much for the kind words!");
        let third = h
            .send(3001, "The service was excellent, very fast!")
            .await
            .unwrap();

        let reviews = h.storage.reviews();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].text, "The service was excellent, very fast!");
        assert_eq!(reviews[0].chat_id, 3001);
        assert_eq!(reviews[0].customer_id, 4001);
        assert_eq!(
            third.outcome,
            TurnOutcome::ReviewCaptured {
                review_id: reviews[0].id.clone()
            }
        );

        let conversation = h.storage.conversation(3001).unwrap();
        assert_eq!(conversation.state, ConvState::Idle);
        assert_eq!(conversation.user_id, 4001);
        assert_eq!(h.storage.history(3001).len(), 6);
        assert_eq!(h.notifier.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_first_contact_creates_idle_record_before_classifying() {
        let h = Harness::new();
        h.llm.queue_text("NO");
        h.llm.queue_text("Welcome!");

        h.send(77, "Hi").await.unwrap();

        let requests = h.llm.recorded_requests();
        assert_eq!(requests[0].system[0].text, CLASSIFIER_PREAMBLE);
        // No history yet: only the classification instruction
        assert_eq!(requests[0].messages.len(), 1);
        assert!(requests[0].messages[0].text.contains("satisfaction"));
        assert!(h.storage.conversation(77).is_some());
    }

    #[tokio::test]
    async fn test_review_request_is_not_plain_conversation() {
        let h = Harness::new();
        h.llm.queue_text("YES");
        h.llm.queue_text("Would you review us?");

        let result = h.send(5, "Thanks a lot!").await.unwrap();
        assert_eq!(result.outcome, TurnOutcome::ReviewRequested);

        let requests = h.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].system[0].text, PERSONA_PREAMBLE);
        assert!(requests[1].messages.last().unwrap().text.contains("review"));
    }

    #[tokio::test]
    async fn test_history_to_oracle_is_chronological_and_bounded() {
        let h = Harness::new();
        for i in 0..8 {
            h.llm.queue_text("NO");
            h.llm.queue_text(&format!("reply {i}"));
            h.send(9, &format!("question {i}")).await.unwrap();
        }
        assert_eq!(h.storage.history(9).len(), 16);

        h.llm.queue_text("NO");
        h.llm.queue_text("last reply");
        h.send(9, "final question").await.unwrap();

        let requests = h.llm.recorded_requests();
        let classify = &requests[requests.len() - 2];
        let context = &classify.messages[..classify.messages.len() - 1];
        assert_eq!(context.len(), HISTORY_WINDOW);
        // Oldest surviving entry is question 3; newest is reply 7
        assert_eq!(context[0].text, "question 3");
        assert_eq!(context[0].role, MessageRole::User);
        assert_eq!(context[HISTORY_WINDOW - 1].text, "reply 7");
        assert_eq!(context[HISTORY_WINDOW - 1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_classification_failure_in_idle_falls_back() {
        let h = Harness::new();
        h.llm.queue_error(LlmError::network("connection reset"));
        h.llm.queue_error(LlmError::server_error("overloaded"));

        let result = h.send(11, "Can you help me?").await.unwrap();
        assert_eq!(
            result.reply,
            fallback_reply(ReplyIntent::Conversational, "Alex")
        );
        assert!(!result.reply.is_empty());
        assert_eq!(result.outcome, TurnOutcome::Conversed);
        assert_eq!(result.state, ConvState::Idle);

        // User message recorded once despite the early write
        let history = h.storage.history(11);
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|e| e.is_user_message).count(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_classification_keeps_awaiting_state() {
        let h = Harness::new();
        let mut conv = Conversation::new(12, 4001);
        conv.state = ConvState::AwaitingReview;
        h.storage.put_conversation(conv);

        h.llm.queue_text("Probably yes");
        h.llm.queue_text("Sure, here's what I can tell you.");

        let result = h.send(12, "What are your hours?").await.unwrap();
        assert_eq!(result.outcome, TurnOutcome::Conversed);
        assert_eq!(
            h.storage.conversation(12).unwrap().state,
            ConvState::AwaitingReview
        );
        assert!(h.storage.reviews().is_empty());

        // The early-recorded user message is part of the reply context
        let requests = h.llm.recorded_requests();
        let respond = &requests[1];
        let n = respond.messages.len();
        assert_eq!(respond.messages[n - 2].text, "What are your hours?");
    }

    #[tokio::test]
    async fn test_awaiting_review_reprompts_on_non_feedback() {
        let h = Harness::new();
        let mut conv = Conversation::new(13, 4001);
        conv.state = ConvState::AwaitingReview;
        h.storage.put_conversation(conv);

        h.llm.queue_text("NO");
        h.llm.queue_text("No worries! When you have a moment, a few words would help.");

        let result = h.send(13, "Do you open on Sundays?").await.unwrap();
        assert_eq!(result.outcome, TurnOutcome::Reprompted);
        assert_eq!(result.state, ConvState::AwaitingReview);
        assert!(h.storage.reviews().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_thanks_is_judged_as_feedback() {
        let h = Harness::new();

        h.llm.queue_text("YES");
        h.llm.queue_text("Would you leave a review?");
        h.send(14, "Thank you!").await.unwrap();

        h.llm.queue_text("NO");
        h.llm.queue_text("We'd still love a review!");
        let second = h.send(14, "Thank you!").await.unwrap();
        assert_eq!(second.outcome, TurnOutcome::Reprompted);

        // Second message was asked the feedback question, not satisfaction
        let requests = h.llm.recorded_requests();
        assert!(requests[2].messages.last().unwrap().text.contains("genuine review"));
        assert_eq!(
            h.storage.conversation(14).unwrap().state,
            ConvState::AwaitingReview
        );
    }

    #[tokio::test]
    async fn test_capture_failure_resets_with_apology() {
        let h = Harness::new();
        let mut conv = Conversation::new(15, 4001);
        conv.state = ConvState::AwaitingReview;
        h.storage.put_conversation(conv);
        h.storage.fail_points().fail_review_save(true);

        h.llm.queue_text("YES");
        h.llm.queue_error(LlmError::empty_completion());

        let result = h.send(15, "Great experience overall").await.unwrap();
        assert_eq!(result.outcome, TurnOutcome::CaptureFailed);
        assert_eq!(result.reply, fallback_reply(ReplyIntent::CaptureApology, "Alex"));
        assert_eq!(h.storage.conversation(15).unwrap().state, ConvState::Idle);
        assert!(h.storage.reviews().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_state_resets_without_classification() {
        let h = Harness::new();
        let mut conv = Conversation::new(16, 4001);
        conv.state = ConvState::parse("PendingSurvey");
        h.storage.put_conversation(conv);

        h.llm.queue_text("Hi Alex, what can I do for you?");

        let result = h.send(16, "hello?").await.unwrap();
        assert_eq!(result.outcome, TurnOutcome::Reset);
        assert_eq!(h.llm.recorded_requests().len(), 1);
        assert_eq!(h.storage.conversation(16).unwrap().state, ConvState::Idle);
    }

    #[tokio::test]
    async fn test_store_failure_before_reply_aborts() {
        let h = Harness::new();
        h.storage.fail_points().fail_conversation_load(true);

        let err = h.send(17, "hi").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Store { .. }));
        assert!(h.notifier.sent().is_empty());
        assert!(h.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_history_load_failure_aborts() {
        let h = Harness::new();
        h.storage.fail_points().fail_history_load(true);

        let err = h.send(24, "hi").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Store {
                operation: "load history",
                ..
            }
        ));
        assert!(h.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_user_history_failure_aborts_before_send() {
        let h = Harness::new();
        h.storage.fail_points().fail_user_history_save(true);
        h.llm.queue_text("NO");
        h.llm.queue_text("hello");

        let err = h.send(18, "hi").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Store {
                operation: "save user message",
                ..
            }
        ));
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_an_error_and_keeps_state() {
        let h = Harness::new();
        h.notifier.fail_sends(true);
        h.llm.queue_text("YES");
        h.llm.queue_text("Would you review us?");

        let err = h.send(19, "Thanks!").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Delivery(_)));

        // No assistant entry and no state change
        let history = h.storage.history(19);
        assert!(history.iter().all(|e| e.is_user_message));
        assert_eq!(h.storage.conversation(19).unwrap().state, ConvState::Idle);
    }

    #[tokio::test]
    async fn test_delivery_failure_after_capture_moves_to_idle() {
        let h = Harness::new();
        let mut conv = Conversation::new(20, 4001);
        conv.state = ConvState::AwaitingReview;
        h.storage.put_conversation(conv);
        h.notifier.fail_sends(true);

        h.llm.queue_text("YES");
        h.llm.queue_text("Thanks for the review!");

        let err = h.send(20, "Loved it").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Delivery(_)));
        assert_eq!(h.storage.reviews().len(), 1);
        assert_eq!(h.storage.conversation(20).unwrap().state, ConvState::Idle);
    }

    #[tokio::test]
    async fn test_failures_after_send_are_deferred() {
        let h = Harness::new();
        h.storage.fail_points().fail_assistant_history_save(true);
        h.storage.fail_points().fail_conversation_save(true);
        h.llm.queue_text("YES");
        h.llm.queue_text("Would you review us?");

        let result = h.send(21, "Thank you so much").await.unwrap();
        assert_eq!(result.reply, "Would you review us?");
        assert_eq!(result.deferred_errors.len(), 2);
        assert_eq!(h.notifier.sent(), vec![(21, "Would you review us?".to_string())]);
    }

    #[tokio::test]
    async fn test_timestamp_only_save_failure_is_not_recorded() {
        let h = Harness::new();
        h.llm.queue_text("NO");
        h.llm.queue_text("first");
        h.send(22, "hi").await.unwrap();
        let before = h.storage.conversation(22).unwrap().last_interaction_at;

        h.storage.fail_points().fail_conversation_save(true);
        h.llm.queue_text("NO");
        h.llm.queue_text("second");
        let result = h.send(22, "more").await.unwrap();

        assert!(result.deferred_errors.is_empty());
        assert_eq!(h.storage.conversation(22).unwrap().last_interaction_at, before);
    }

    #[tokio::test]
    async fn test_timestamp_advances_when_state_unchanged() {
        let h = Harness::new();
        let mut conv = Conversation::new(23, 4001);
        conv.last_interaction_at = Utc::now() - chrono::Duration::hours(2);
        let stale = conv.last_interaction_at;
        h.storage.put_conversation(conv);

        h.llm.queue_text("NO");
        h.llm.queue_text("reply");
        h.send(23, "hi").await.unwrap();

        assert!(h.storage.conversation(23).unwrap().last_interaction_at > stale);
    }

    #[tokio::test]
    async fn test_same_chat_messages_are_serialized() {
        let h = Harness::with_parts(
            InMemoryStorage::new().with_load_delay(Duration::from_millis(20)),
            MockLlmClient::new("mock"),
        );
        // First to run: satisfaction -> review request
        h.llm.queue_text("YES");
        h.llm.queue_text("Would you review us?");
        // Second must see AwaitingReview and get the feedback question
        h.llm.queue_text("YES");
        h.llm.queue_text("Thanks for the review!");

        let a = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .handle_message(&message(30, "Thanks, great help"), &CancellationToken::new())
                    .await
            })
        };
        let b = {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .handle_message(&message(30, "Super fast service"), &CancellationToken::new())
                    .await
            })
        };

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        let mut outcomes = [a.outcome, b.outcome];
        outcomes.sort_by_key(|o| matches!(o, TurnOutcome::ReviewCaptured { .. }));
        assert_eq!(outcomes[0], TurnOutcome::ReviewRequested);
        assert!(matches!(outcomes[1], TurnOutcome::ReviewCaptured { .. }));
        assert_eq!(h.storage.reviews().len(), 1);
        assert_eq!(h.storage.conversation(30).unwrap().state, ConvState::Idle);
    }

    #[tokio::test]
    async fn test_different_chats_run_concurrently() {
        let h = Harness::with_parts(
            InMemoryStorage::new(),
            MockLlmClient::new("mock").with_delay(Duration::from_millis(100)),
        );
        // Both classifications complete before either reply is generated
        h.llm.queue_text("NO");
        h.llm.queue_text("NO");
        h.llm.queue_text("hello");
        h.llm.queue_text("hello");

        let start = tokio::time::Instant::now();
        let runs = [31, 32].map(|chat_id| {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .handle_message(&message(chat_id, "hi"), &CancellationToken::new())
                    .await
            })
        });
        for run in runs {
            run.await.unwrap().unwrap();
        }

        // Two oracle calls each; serial execution would take 400ms
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_cancellation_stops_oracle_call() {
        let h = Harness::with_parts(
            InMemoryStorage::new(),
            MockLlmClient::new("mock").with_delay(Duration::from_secs(30)),
        );
        h.llm.queue_text("NO");

        let cancel = CancellationToken::new();
        let started = h.llm.request_started.notified();
        let run = {
            let orchestrator = Arc::clone(&h.orchestrator);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_message(&message(33, "hi"), &cancel)
                    .await
            })
        };

        started.await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
        assert!(h.notifier.sent().is_empty());
        assert!(h.storage.history(33).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let h = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .orchestrator
            .handle_message(&message(34, "hi"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
        assert!(h.storage.conversation(34).is_none());
        assert!(h.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_capture_does_not_capture_twice() {
        let storage = Arc::new(InMemoryStorage::new());
        let classifier = Arc::new(MockLlmClient::new("classifier"));
        let responder =
            Arc::new(MockLlmClient::new("responder").with_delay(Duration::from_secs(30)));
        let notifier = Arc::new(MockNotifier::new());
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            Arc::clone(&storage),
            Arc::clone(&classifier),
            Arc::clone(&responder),
            Arc::clone(&notifier),
        ));

        let mut conv = Conversation::new(50, 4001);
        conv.state = ConvState::AwaitingReview;
        storage.put_conversation(conv);

        // Review is captured, then the caller goes away while the reply is generated
        classifier.queue_text("YES");
        let cancel = CancellationToken::new();
        let started = responder.request_started.notified();
        let run = {
            let orchestrator = Arc::clone(&orchestrator);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_message(&message(50, "Great service, quick and friendly"), &cancel)
                    .await
            })
        };

        started.await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
        assert!(notifier.sent().is_empty());
        assert_eq!(storage.reviews().len(), 1);
        assert_eq!(storage.conversation(50).unwrap().state, ConvState::Idle);

        // A retry of the same message is treated as fresh conversation
        let retry_llm = Arc::new(MockLlmClient::new("mock"));
        retry_llm.queue_text("NO");
        retry_llm.queue_text("Glad to hear it!");
        let retry_orchestrator = ConversationOrchestrator::new(
            Arc::clone(&storage),
            Arc::clone(&retry_llm),
            Arc::clone(&retry_llm),
            Arc::clone(&notifier),
        );
        let retry = retry_orchestrator
            .handle_message(
                &message(50, "Great service, quick and friendly"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(retry.outcome, TurnOutcome::Conversed);
        assert_eq!(storage.reviews().len(), 1);
    }
}
