//! Chat persistence
//!
//! Stores conversations and their message history. The workflow never
//! reads or writes here; the binary loads history before an invocation and
//! persists the exchange after it.

mod schema;

pub use schema::{Conversation, StoredMessage, SCHEMA};

use crate::llm::MessageRole;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Conversation already exists: {0}")]
    ConversationExists(String),
    #[error("Unknown message role: {0}")]
    InvalidRole(String),
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
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Conversation Operations ====================

    pub fn create_conversation(&self, id: &str, source_url: &str) -> DbResult<Conversation> {
        let conn = self.lock();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO conversations (id, source_url, created_at) VALUES (?1, ?2, ?3)",
            params![id, source_url, now.to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::ConversationExists(id.to_string())
            }
            other => DbError::Sqlite(other),
        })?;

        Ok(Conversation {
            id: id.to_string(),
            source_url: source_url.to_string(),
            created_at: now,
        })
    }

    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.lock();
        Self::get_conversation_locked(&conn, id)
    }

    fn get_conversation_locked(conn: &Connection, id: &str) -> DbResult<Conversation> {
        conn.query_row(
            "SELECT id, source_url, created_at FROM conversations WHERE id = ?1",
            params![id],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    source_url: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::ConversationNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    // ==================== Message Operations ====================

    /// Append a message at the end of a conversation's log
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> DbResult<StoredMessage> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        Self::get_conversation_locked(&tx, conversation_id)?;

        let sequence_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sequence_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                conversation_id,
                sequence_id,
                role.as_str(),
                content,
                now.to_rfc3339()
            ],
        )?;
        tx.commit()?;

        Ok(StoredMessage {
            id,
            conversation_id: conversation_id.to_string(),
            sequence_id,
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// All messages of a conversation in sequence order
    pub fn list_messages(&self, conversation_id: &str) -> DbResult<Vec<StoredMessage>> {
        let conn = self.lock();
        Self::get_conversation_locked(&conn, conversation_id)?;

        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, role, content, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, conversation_id, sequence_id, role, content, created_at) = row?;
            let role = MessageRole::parse(&role).ok_or(DbError::InvalidRole(role))?;
            messages.push(StoredMessage {
                id,
                conversation_id,
                sequence_id,
                role,
                content,
                created_at: parse_datetime(&created_at),
            });
        }
        Ok(messages)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
