//! Voice memo storage.
//!
//! Audio is written to `<dir>/<id>.<ext>`; the row in `voice_memos` is the
//! index. A memo is only recorded once its file is fully written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use davenport_core::error::DavenportError;

use crate::db::Database;

/// Stored voice memo metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceMemo {
    pub id: Uuid,
    pub conversation_id: Option<String>,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(skip)]
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

pub struct VoiceMemoStore {
    db: Arc<Database>,
    dir: PathBuf,
}

impl VoiceMemoStore {
    /// Create the store, making `dir` if it does not exist.
    pub fn new(db: Arc<Database>, dir: impl Into<PathBuf>) -> Result<Self, DavenportError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { db, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one recording. `content_type` must be an `audio/*` type.
    pub fn save(
        &self,
        conversation_id: Option<&str>,
        content_type: &str,
        audio: &[u8],
    ) -> Result<VoiceMemo, DavenportError> {
        if audio.is_empty() {
            return Err(DavenportError::InvalidInput(
                "voice memo body is empty".to_string(),
            ));
        }
        let content_type = normalize_content_type(content_type).ok_or_else(|| {
            DavenportError::InvalidInput(format!(
                "unsupported voice memo content type '{}'",
                content_type
            ))
        })?;

        let id = Uuid::new_v4();
        let file_path = self
            .dir
            .join(format!("{}.{}", id, extension_for(&content_type)));
        std::fs::write(&file_path, audio)?;

        let memo = VoiceMemo {
            id,
            conversation_id: conversation_id
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            content_type,
            size_bytes: audio.len() as u64,
            file_path,
            created_at: Utc::now(),
        };

        let recorded = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO voice_memos (id, conversation_id, content_type, size_bytes, file_path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    memo.id.to_string(),
                    memo.conversation_id,
                    memo.content_type,
                    memo.size_bytes as i64,
                    memo.file_path.to_string_lossy().into_owned(),
                    memo.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| DavenportError::Storage(format!("Failed to record voice memo: {}", e)))
        });

        if let Err(e) = recorded {
            if let Err(cleanup) = std::fs::remove_file(&memo.file_path) {
                warn!(error = %cleanup, "Failed to remove orphaned voice memo file");
            }
            return Err(e);
        }

        info!(
            memo_id = %memo.id,
            bytes = memo.size_bytes,
            content_type = %memo.content_type,
            "Stored voice memo"
        );
        Ok(memo)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<VoiceMemo>, DavenportError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, conversation_id, content_type, size_bytes, file_path, created_at
                     FROM voice_memos WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| DavenportError::Storage(e.to_string()))?;

            let Some((conversation_id, content_type, size, path, created_ms)) = row else {
                return Ok(None);
            };
            let created_at = Utc
                .timestamp_millis_opt(created_ms)
                .single()
                .ok_or_else(|| DavenportError::Storage(format!("Invalid timestamp {}", created_ms)))?;

            Ok(Some(VoiceMemo {
                id,
                conversation_id,
                content_type,
                size_bytes: size as u64,
                file_path: PathBuf::from(path),
                created_at,
            }))
        })
    }
}

/// Lowercased media type without parameters, if it is `audio/*`.
fn normalize_content_type(raw: &str) -> Option<String> {
    let essence = raw.split(';').next()?.trim().to_ascii_lowercase();
    let subtype = essence.strip_prefix("audio/")?;
    (!subtype.is_empty()).then_some(essence)
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => "m4a",
        _ => "bin",
    }
}
