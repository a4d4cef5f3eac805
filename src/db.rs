//! Database module for the review bot
//!
//! Provides persistence for conversations, message history and reviews.

mod schema;

pub use schema::*;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Database connection lock poisoned")]
    LockPoisoned,
    #[error("Cannot save conversation with zero chat id")]
    InvalidChatId,
    #[error("Review id cannot be empty")]
    InvalidReviewId,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Conversation Operations ====================

    /// Get conversation by chat ID
    pub fn get_conversation(&self, chat_id: i64) -> DbResult<Option<Conversation>> {
        let conn = self.conn()?;
        let conversation = conn
            .query_row(
                "SELECT chat_id, user_id, state, last_interaction_at
                 FROM conversations WHERE chat_id = ?1",
                params![chat_id],
                parse_conversation_row,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Get the conversation for a chat, creating and persisting a default
    /// `Idle` record when none exists yet
    pub fn find_or_create_conversation(&self, chat_id: i64) -> DbResult<Conversation> {
        if let Some(conversation) = self.get_conversation(chat_id)? {
            tracing::debug!(chat_id, state = %conversation.state, "Found conversation");
            return Ok(conversation);
        }

        tracing::info!(chat_id, "Creating default conversation");
        let conversation = Conversation::new(chat_id, 0);
        self.save_conversation(&conversation)?;
        Ok(conversation)
    }

    /// Upsert a conversation keyed by chat ID
    pub fn save_conversation(&self, conversation: &Conversation) -> DbResult<()> {
        if conversation.chat_id == 0 {
            return Err(DbError::InvalidChatId);
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO conversations (chat_id, user_id, state, last_interaction_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (chat_id) DO UPDATE SET
                user_id = excluded.user_id,
                state = excluded.state,
                last_interaction_at = excluded.last_interaction_at",
            params![
                conversation.chat_id,
                conversation.user_id,
                conversation.state.as_str(),
                format_datetime(&conversation.last_interaction_at),
            ],
        )?;
        Ok(())
    }

    // ==================== History Operations ====================

    /// Append an entry to a chat's message log
    pub fn add_history_entry(&self, chat_id: i64, entry: &HistoryEntry) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO message_history (chat_id, is_user_message, text, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                chat_id,
                entry.is_user_message,
                entry.text,
                format_datetime(&entry.timestamp),
            ],
        )?;
        Ok(())
    }

    /// Most recent `limit` entries for a chat, oldest first
    pub fn get_recent_history(&self, chat_id: i64, limit: usize) -> DbResult<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT is_user_message, text, timestamp
             FROM message_history
             WHERE chat_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![chat_id, limit], |row| {
            Ok(HistoryEntry {
                is_user_message: row.get(0)?,
                text: row.get(1)?,
                timestamp: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;

        let mut history = rows.collect::<Result<Vec<_>, _>>()?;
        // Query walks newest first
        history.reverse();
        Ok(history)
    }

    // ==================== Review Operations ====================

    /// Upsert a review keyed by review ID
    pub fn save_review(&self, review: &Review) -> DbResult<()> {
        if review.id.is_empty() {
            return Err(DbError::InvalidReviewId);
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reviews (id, customer_id, chat_id, text, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                customer_id = excluded.customer_id,
                chat_id = excluded.chat_id,
                text = excluded.text,
                received_at = excluded.received_at",
            params![
                review.id,
                review.customer_id,
                review.chat_id,
                review.text,
                format_datetime(&review.received_at),
            ],
        )?;
        Ok(())
    }

    /// All reviews left by a customer, oldest first
    pub fn list_reviews_by_customer(&self, customer_id: i64) -> DbResult<Vec<Review>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, customer_id, chat_id, text, received_at
             FROM reviews WHERE customer_id = ?1
             ORDER BY received_at ASC",
        )?;
        let rows = stmt.query_map(params![customer_id], parse_review_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// All reviews captured in a chat, oldest first
    pub fn list_reviews_by_chat(&self, chat_id: i64) -> DbResult<Vec<Review>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, customer_id, chat_id, text, received_at
             FROM reviews WHERE chat_id = ?1
             ORDER BY received_at ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], parse_review_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn parse_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let state: String = row.get(2)?;
    Ok(Conversation {
        chat_id: row.get(0)?,
        user_id: row.get(1)?,
        state: ConvState::parse(&state),
        last_interaction_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn parse_review_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        chat_id: row.get(2)?,
        text: row.get(3)?,
        received_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

/// Fixed-width UTC form so text ordering matches time ordering
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
