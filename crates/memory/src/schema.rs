//! Row types for the index database and the migration runner.
use chrono::{DateTime, Utc};

use crate::{error::Result, files::Category};

/// File metadata as written to `memory_files`.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub file_path: String,
    pub title: String,
    pub category: Category,
    pub file_hash: String,
    pub word_count: i64,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

/// A `memory_files` row.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: i64,
    pub file_path: String,
    pub title: String,
    pub category: Category,
    pub file_hash: String,
    pub word_count: i64,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chunk as written to `memory_chunks`. `chunk_index` is dense and
/// 0-based within its file.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_index: i32,
    pub content: String,
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub header_path: Vec<String>,
    pub section_level: i32,
}

/// Sync lifecycle state for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "syncing" => Some(Self::Syncing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A `sync_status` row joined with its file path.
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub file_id: i64,
    pub file_path: String,
    pub last_synced_hash: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
}

/// Aggregate counts for status reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexCounts {
    pub files: i64,
    pub chunks: i64,
    pub pending: i64,
    pub syncing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Run database migrations for the index store.
///
/// Creates `memory_files`, `memory_chunks` (with the generated tsvector
/// column) and `sync_status`, plus the search indexes and the `rrf_score`
/// SQL function.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| crate::error::Error::StorageUnavailable(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_round_trip() {
        for s in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Completed,
            SyncStatus::Failed,
        ] {
            assert_eq!(SyncStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SyncStatus::parse("unknown"), None);
    }
}
