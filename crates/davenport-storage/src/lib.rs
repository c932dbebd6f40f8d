//! Davenport storage crate - SQLite persistence for answer feedback and
//! voice memos.
//!
//! Provides a WAL-mode SQLite database with versioned migrations, the
//! feedback repository, and a voice-memo store that keeps audio blobs on
//! disk with their metadata in the database.

pub mod db;
pub mod feedback;
pub mod migrations;
pub mod voice_memo;

pub use db::Database;
pub use feedback::FeedbackRepository;
pub use voice_memo::{VoiceMemo, VoiceMemoStore};
