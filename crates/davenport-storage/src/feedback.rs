//! Answer feedback persistence.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::Row;
use uuid::Uuid;

use davenport_core::error::DavenportError;
use davenport_core::types::{FeedbackEntry, FeedbackRating};

use crate::db::Database;

/// Repository for thumbs-up/down feedback on answers.
pub struct FeedbackRepository {
    db: Arc<Database>,
}

impl FeedbackRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn save(&self, entry: &FeedbackEntry) -> Result<(), DavenportError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feedback (id, conversation_id, question, answer, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    entry.id.to_string(),
                    entry.conversation_id,
                    entry.question,
                    entry.answer,
                    entry.rating.as_str(),
                    entry.comment,
                    entry.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| DavenportError::Storage(format!("Failed to save feedback: {}", e)))?;
            Ok(())
        })
    }

    /// Most recent entries first.
    pub fn list_recent(&self, limit: u32) -> Result<Vec<FeedbackEntry>, DavenportError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, question, answer, rating, comment, created_at
                     FROM feedback
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?1",
                )
                .map_err(|e| DavenportError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![limit], |row| Ok(row_to_entry(row)))
                .map_err(|e| DavenportError::Storage(e.to_string()))?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row.map_err(|e| DavenportError::Storage(e.to_string()))??);
            }
            Ok(entries)
        })
    }

    pub fn count(&self) -> Result<u64, DavenportError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM feedback", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(|e| DavenportError::Storage(e.to_string()))
        })
    }
}

fn row_to_entry(row: &Row<'_>) -> Result<FeedbackEntry, DavenportError> {
    let get_err = |e: rusqlite::Error| DavenportError::Storage(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let rating: String = row.get(4).map_err(get_err)?;
    let created_ms: i64 = row.get(6).map_err(get_err)?;

    Ok(FeedbackEntry {
        id: Uuid::parse_str(&id)
            .map_err(|e| DavenportError::Storage(format!("Invalid feedback id '{}': {}", id, e)))?,
        conversation_id: row.get(1).map_err(get_err)?,
        question: row.get(2).map_err(get_err)?,
        answer: row.get(3).map_err(get_err)?,
        rating: rating
            .parse::<FeedbackRating>()
            .map_err(DavenportError::Storage)?,
        comment: row.get(5).map_err(get_err)?,
        created_at: Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .ok_or_else(|| DavenportError::Storage(format!("Invalid timestamp {}", created_ms)))?,
    })
}
