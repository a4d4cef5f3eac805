//! Runtime for handling conversations
//!
//! Wires the pure state machine to storage, the oracle and the delivery
//! channel, and serializes work per chat.

mod capture;
mod context;
mod orchestrator;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use context::HISTORY_WINDOW;
pub use orchestrator::{
    ConversationOrchestrator, HandleResult, IncomingMessage, OrchestratorError, TurnOutcome,
};
pub use traits::*;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Type alias for production orchestrator with concrete implementations
pub type ProductionOrchestrator =
    ConversationOrchestrator<DatabaseStorage, RegistryLlmClient, Arc<dyn Notifier>>;

type ChatLock = Arc<tokio::sync::Mutex<()>>;

/// Keyed async locks, one per chat with work in flight
///
/// Entries are created on demand and removed when the last holder or waiter
/// lets go, so the map only ever holds busy chats.
#[derive(Default)]
pub struct ChatLocks {
    locks: Mutex<HashMap<i64, ChatLock>>,
}

impl ChatLocks {
    /// Wait for exclusive access to `chat_id`
    pub async fn acquire(&self, chat_id: i64) -> ChatGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(chat_id).or_default())
        };

        // Built before waiting so a dropped waiter still releases its entry
        let mut chat_guard = ChatGuard {
            locks: self,
            chat_id,
            guard: None,
        };
        chat_guard.guard = Some(lock.lock_owned().await);
        chat_guard
    }

    /// Number of chats currently holding or waiting on a lock
    #[cfg(test)]
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, chat_id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: nobody holds or waits
        if locks
            .get(&chat_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&chat_id);
        }
    }
}

/// Exclusive access to one chat; released on drop
pub struct ChatGuard<'a> {
    locks: &'a ChatLocks,
    chat_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChatGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(self.chat_id);
    }
}
