//! Database schema migrations.
//!
//! Each version is applied once and recorded in `schema_migrations`.

use rusqlite::Connection;
use tracing::info;

use davenport_core::error::DavenportError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), DavenportError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| DavenportError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| DavenportError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: feedback");
    }
    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: voice_memos");
    }

    Ok(())
}

/// Version 1: answer feedback.
fn apply_v1(conn: &Connection) -> Result<(), DavenportError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS feedback (
            id              TEXT PRIMARY KEY NOT NULL,
            conversation_id TEXT,
            question        TEXT,
            answer          TEXT,
            rating          TEXT NOT NULL CHECK (rating IN ('up', 'down')),
            comment         TEXT,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_feedback_created_at
            ON feedback (created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_feedback_conversation
            ON feedback (conversation_id);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'feedback');
        ",
    )
    .map_err(|e| DavenportError::Storage(format!("Failed to apply migration v1: {}", e)))
}

/// Version 2: voice memo metadata. Audio lives on disk at `file_path`.
fn apply_v2(conn: &Connection) -> Result<(), DavenportError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS voice_memos (
            id              TEXT PRIMARY KEY NOT NULL,
            conversation_id TEXT,
            content_type    TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL CHECK (size_bytes > 0),
            file_path       TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_voice_memos_created_at
            ON voice_memos (created_at DESC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (2, 'voice_memos');
        ",
    )
    .map_err(|e| DavenportError::Storage(format!("Failed to apply migration v2: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let (version, rows): (i64, i64) = conn
            .query_row(
                "SELECT MAX(version), COUNT(*) FROM schema_migrations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_feedback_rating_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO feedback (id, rating, created_at) VALUES ('ok', 'down', 0)",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO feedback (id, rating, created_at) VALUES ('bad', 'meh', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_voice_memo_size_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO voice_memos (id, content_type, size_bytes, file_path, created_at)
             VALUES ('empty', 'audio/webm', 0, '/tmp/x.webm', 0)",
            [],
        );
        assert!(result.is_err());
    }
}
