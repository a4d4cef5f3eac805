//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the orchestrator with mock implementations.

use crate::db::{Conversation, HistoryEntry, Review};
use crate::llm::{LlmError, LlmRequest, LlmResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// Storage for per-chat conversation records
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load the conversation, creating and persisting a default `Idle`
    /// record when the chat has never been seen
    async fn find_by_chat_id(&self, chat_id: i64) -> Result<Conversation, String>;

    /// Upsert keyed by chat ID
    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), String>;
}

/// Append-only per-chat message log
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_history_entry(&self, chat_id: i64, entry: &HistoryEntry) -> Result<(), String>;

    /// Most recent `limit` entries, oldest first
    async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<HistoryEntry>, String>;
}

/// Storage for captured reviews
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Upsert keyed by review ID
    async fn save_review(&self, review: &Review) -> Result<(), String>;
}

/// Delivery of replies to the end user
#[async_trait]
pub trait Notifier: Send + Sync {
    /// An error means the user did not receive the text
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete an LLM request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Combined storage trait for convenience
pub trait Storage: ConversationStore + HistoryStore + ReviewStore {}
impl<T: ConversationStore + HistoryStore + ReviewStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn find_by_chat_id(&self, chat_id: i64) -> Result<Conversation, String> {
        (**self).find_by_chat_id(chat_id).await
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), String> {
        (**self).save_conversation(conversation).await
    }
}

#[async_trait]
impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    async fn save_history_entry(&self, chat_id: i64, entry: &HistoryEntry) -> Result<(), String> {
        (**self).save_history_entry(chat_id, entry).await
    }

    async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<HistoryEntry>, String> {
        (**self).get_history(chat_id, limit).await
    }
}

#[async_trait]
impl<T: ReviewStore + ?Sized> ReviewStore for Arc<T> {
    async fn save_review(&self, review: &Review) -> Result<(), String> {
        (**self).save_review(review).await
    }
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), String> {
        (**self).send(chat_id, text).await
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

use crate::db::Database;
use crate::llm::{LlmService, ModelRegistry};

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStorage {
    async fn find_by_chat_id(&self, chat_id: i64) -> Result<Conversation, String> {
        self.db
            .find_or_create_conversation(chat_id)
            .map_err(|e| e.to_string())
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), String> {
        self.db
            .save_conversation(conversation)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl HistoryStore for DatabaseStorage {
    async fn save_history_entry(&self, chat_id: i64, entry: &HistoryEntry) -> Result<(), String> {
        self.db
            .add_history_entry(chat_id, entry)
            .map_err(|e| e.to_string())
    }

    async fn get_history(&self, chat_id: i64, limit: usize) -> Result<Vec<HistoryEntry>, String> {
        self.db
            .get_recent_history(chat_id, limit)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ReviewStore for DatabaseStorage {
    async fn save_review(&self, review: &Review) -> Result<(), String> {
        self.db.save_review(review).map_err(|e| e.to_string())
    }
}

/// Which registry model a client resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// Cheap model for YES/NO calls
    Classifier,
    /// Default model for replies
    Responder,
}

/// Adapter to use ModelRegistry as LlmClient
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
    role: ModelRole,
    model_id: String,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>, role: ModelRole) -> Self {
        let model_id = Self::resolve(&registry, role)
            .map_or_else(|| registry.default_model_id().to_string(), |m| m.model_id().to_string());
        Self {
            registry,
            role,
            model_id,
        }
    }

    fn resolve(registry: &ModelRegistry, role: ModelRole) -> Option<Arc<dyn LlmService>> {
        match role {
            ModelRole::Classifier => registry.get_cheap_model(),
            ModelRole::Responder => registry.default(),
        }
    }
}

#[async_trait]
impl LlmClient for RegistryLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let llm = Self::resolve(&self.registry, self.role)
            .ok_or_else(|| LlmError::network("No LLM available"))?;
        llm.complete(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
