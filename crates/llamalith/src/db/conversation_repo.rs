//! Conversation repository — append-only message log per conversation.
//!
//! Messages are never mutated or deleted; the transcript consumed by
//! generation is the append order, `(timestamp, id)` ascending.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Row};

use crate::prompt::Role;

use super::{Database, DatabaseError};

/// A message row from the `messages` table.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

impl StoredMessage {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let role_str: String = row.get("role")?;
        let role = Role::parse(&role_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown role '{}'", role_str).into(),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            role,
            content: row.get("content")?,
            timestamp: row.get("timestamp")?,
        })
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Creates the conversation if it doesn't exist yet.
pub fn ensure(db: &Database, conversation_id: &str, title: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, title, created_at) VALUES (?1, ?2, ?3)",
            params![
                conversation_id,
                if title.is_empty() {
                    "New Conversation"
                } else {
                    title
                },
                now_rfc3339()
            ],
        )?;
        Ok(())
    })
}

/// Creates a brand new conversation with a generated UUID.
pub fn create(db: &Database, title: &str) -> Result<String, DatabaseError> {
    let id = uuid::Uuid::new_v4().to_string();
    ensure(db, &id, title)?;
    Ok(id)
}

/// Appends one message to a conversation's transcript.
pub fn append(
    db: &Database,
    conversation_id: &str,
    role: Role,
    content: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role.as_str(), content, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Lists a conversation's transcript in append order.
pub fn list(db: &Database, conversation_id: &str) -> Result<Vec<StoredMessage>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, timestamp
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows: Vec<StoredMessage> = stmt
            .query_map(params![conversation_id], StoredMessage::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the most recent system prompt seen in a conversation, if any.
pub fn last_system_prompt(
    db: &Database,
    conversation_id: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT content FROM messages
             WHERE conversation_id = ?1 AND role = 'system'
             ORDER BY timestamp DESC, id DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![conversation_id], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(content)) => Ok(Some(content)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}
