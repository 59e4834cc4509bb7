//! The `IndexStore` seam between the memory manager and the database.
use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    schema::{ChunkRecord, FileMeta, FileRow, IndexCounts, SyncRecord},
    search::{SearchFilters, SearchHit},
};

/// Vector + full-text index over the markdown tree.
///
/// The Postgres implementation lives in [`crate::store_postgres`]; file-only
/// mode uses [`NullIndexStore`], which refuses every call with
/// `StorageUnavailable` so callers degrade uniformly.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or update a file's metadata row, returning its id.
    async fn upsert_file(&self, meta: &FileMeta) -> Result<i64>;

    async fn get_file(&self, path: &str) -> Result<Option<FileRow>>;

    /// Paths of every indexed file; the sweep uses this to catch deletions
    /// that bypassed the service.
    async fn list_paths(&self) -> Result<Vec<String>>;

    /// Update just the tag set of an already-indexed file. Missing rows are
    /// a no-op; the next reconcile carries the tags anyway.
    async fn set_tags(&self, path: &str, tags: &[String]) -> Result<()>;

    /// Delete a file row; chunks and the sync record cascade.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Replace the full chunk set of a file in one transaction.
    async fn replace_chunks(&self, file_id: i64, chunks: &[ChunkRecord]) -> Result<()>;

    /// Top-`k` chunks by cosine similarity, best first. `score` is the raw
    /// similarity in `[-1, 1]`; ranks are positions in the returned list.
    async fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>>;

    /// Top-`k` chunks by `ts_rank_cd` against the English tsvector.
    async fn fulltext_search(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>>;

    async fn sync_record(&self, path: &str) -> Result<Option<SyncRecord>>;

    /// Transition a file's sync record to `syncing`.
    async fn begin_sync(&self, file_id: i64) -> Result<()>;

    /// Mark a reconcile finished: `completed`, hash and timestamp recorded.
    async fn finish_sync(&self, file_id: i64, hash: &str) -> Result<()>;

    /// Mark a reconcile failed, keeping whatever chunks were there before.
    async fn fail_sync(&self, file_id: i64, message: &str) -> Result<()>;

    async fn counts(&self) -> Result<IndexCounts>;

    /// Empty all index tables (reset path).
    async fn truncate(&self) -> Result<()>;
}

/// File-only mode: every operation reports the index as unavailable.
pub struct NullIndexStore;

fn unavailable<T>() -> Result<T> {
    Err(Error::StorageUnavailable(
        "running in file-only mode (USE_DATABASE=false)".into(),
    ))
}

#[async_trait]
impl IndexStore for NullIndexStore {
    async fn upsert_file(&self, _meta: &FileMeta) -> Result<i64> {
        unavailable()
    }

    async fn get_file(&self, _path: &str) -> Result<Option<FileRow>> {
        unavailable()
    }

    async fn list_paths(&self) -> Result<Vec<String>> {
        unavailable()
    }

    async fn set_tags(&self, _path: &str, _tags: &[String]) -> Result<()> {
        unavailable()
    }

    async fn delete_file(&self, _path: &str) -> Result<()> {
        unavailable()
    }

    async fn replace_chunks(&self, _file_id: i64, _chunks: &[ChunkRecord]) -> Result<()> {
        unavailable()
    }

    async fn vector_search(
        &self,
        _query: &[f32],
        _k: usize,
        _filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        unavailable()
    }

    async fn fulltext_search(
        &self,
        _query: &str,
        _k: usize,
        _filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        unavailable()
    }

    async fn sync_record(&self, _path: &str) -> Result<Option<SyncRecord>> {
        unavailable()
    }

    async fn begin_sync(&self, _file_id: i64) -> Result<()> {
        unavailable()
    }

    async fn finish_sync(&self, _file_id: i64, _hash: &str) -> Result<()> {
        unavailable()
    }

    async fn fail_sync(&self, _file_id: i64, _message: &str) -> Result<()> {
        unavailable()
    }

    async fn counts(&self) -> Result<IndexCounts> {
        unavailable()
    }

    async fn truncate(&self) -> Result<()> {
        unavailable()
    }
}

/// In-memory `IndexStore` used by tests across the crate: cosine similarity
/// computed in-process, full-text scored by matched query terms.
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod testing {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, Ordering},
    };

    use super::*;
    use crate::schema::SyncStatus;

    #[derive(Default)]
    struct State {
        next_file_id: i64,
        next_chunk_id: i64,
        files: HashMap<String, (FileRow, serde_json::Value)>,
        chunks: HashMap<i64, Vec<(i64, ChunkRecord)>>,
        sync: HashMap<i64, SyncRecord>,
    }

    #[derive(Default)]
    pub struct MemIndexStore {
        state: std::sync::Mutex<State>,
        pub fail_vector: AtomicBool,
        pub fail_fulltext: AtomicBool,
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
    }

    fn passes(filters: &SearchFilters, file: &FileRow) -> bool {
        if let Some(cats) = &filters.categories
            && !cats.contains(&file.category)
        {
            return false;
        }
        if !filters.tags.iter().all(|t| file.tags.contains(t)) {
            return false;
        }
        if let Some(path) = &filters.file_path
            && *path != file.file_path
        {
            return false;
        }
        true
    }

    impl MemIndexStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn collect_hits<F>(&self, filters: &SearchFilters, score: F) -> Vec<SearchHit>
        where
            F: Fn(&ChunkRecord) -> Option<f32>,
        {
            let state = self.state.lock().unwrap();
            let mut hits = Vec::new();
            for (file, _) in state.files.values() {
                for (chunk_id, record) in state.chunks.get(&file.id).into_iter().flatten() {
                    if !passes(filters, file) {
                        continue;
                    }
                    let Some(score) = score(record) else { continue };
                    hits.push(SearchHit {
                        chunk_id: *chunk_id,
                        file_path: file.file_path.clone(),
                        title: file.title.clone(),
                        category: file.category,
                        content: record.content.clone(),
                        header_path: record.header_path.clone(),
                        score,
                    });
                }
            }
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.chunk_id.cmp(&b.chunk_id))
            });
            hits
        }
    }

    #[async_trait]
    impl IndexStore for MemIndexStore {
        async fn upsert_file(&self, meta: &FileMeta) -> Result<i64> {
            let mut state = self.state.lock().unwrap();
            if let Some((row, stored_meta)) = state.files.get_mut(&meta.file_path) {
                row.title = meta.title.clone();
                row.category = meta.category;
                row.file_hash = meta.file_hash.clone();
                row.word_count = meta.word_count;
                row.tags = meta.tags.clone();
                row.updated_at = chrono::Utc::now();
                *stored_meta = meta.metadata.clone();
                return Ok(row.id);
            }
            state.next_file_id += 1;
            let id = state.next_file_id;
            state.files.insert(
                meta.file_path.clone(),
                (
                    FileRow {
                        id,
                        file_path: meta.file_path.clone(),
                        title: meta.title.clone(),
                        category: meta.category,
                        file_hash: meta.file_hash.clone(),
                        word_count: meta.word_count,
                        tags: meta.tags.clone(),
                        created_at: chrono::Utc::now(),
                        updated_at: chrono::Utc::now(),
                    },
                    meta.metadata.clone(),
                ),
            );
            Ok(id)
        }

        async fn get_file(&self, path: &str) -> Result<Option<FileRow>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .files
                .get(path)
                .map(|(row, _)| row.clone()))
        }

        async fn list_paths(&self) -> Result<Vec<String>> {
            let mut paths: Vec<String> =
                self.state.lock().unwrap().files.keys().cloned().collect();
            paths.sort();
            Ok(paths)
        }

        async fn set_tags(&self, path: &str, tags: &[String]) -> Result<()> {
            if let Some((row, _)) = self.state.lock().unwrap().files.get_mut(path) {
                row.tags = tags.to_vec();
            }
            Ok(())
        }

        async fn delete_file(&self, path: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some((row, _)) = state.files.remove(path) {
                state.chunks.remove(&row.id);
                state.sync.remove(&row.id);
            }
            Ok(())
        }

        async fn replace_chunks(&self, file_id: i64, chunks: &[ChunkRecord]) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            let mut stored = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                state.next_chunk_id += 1;
                stored.push((state.next_chunk_id, chunk.clone()));
            }
            state.chunks.insert(file_id, stored);
            Ok(())
        }

        async fn vector_search(
            &self,
            query: &[f32],
            k: usize,
            filters: &SearchFilters,
        ) -> Result<Vec<SearchHit>> {
            if self.fail_vector.load(Ordering::SeqCst) {
                return Err(Error::StorageUnavailable("vector index down".into()));
            }
            let mut hits = self.collect_hits(filters, |record| {
                record.embedding.as_ref().map(|e| cosine(query, e))
            });
            hits.truncate(k);
            Ok(hits)
        }

        async fn fulltext_search(
            &self,
            query: &str,
            k: usize,
            filters: &SearchFilters,
        ) -> Result<Vec<SearchHit>> {
            if self.fail_fulltext.load(Ordering::SeqCst) {
                return Err(Error::StorageUnavailable("fts down".into()));
            }
            let terms: Vec<String> = query
                .to_lowercase()
                .split_whitespace()
                .map(ToOwned::to_owned)
                .collect();
            let mut hits = self.collect_hits(filters, |record| {
                let content = record.content.to_lowercase();
                let matched = terms.iter().filter(|t| content.contains(*t)).count();
                (matched > 0).then_some(matched as f32)
            });
            hits.truncate(k);
            Ok(hits)
        }

        async fn sync_record(&self, path: &str) -> Result<Option<SyncRecord>> {
            let state = self.state.lock().unwrap();
            let Some((row, _)) = state.files.get(path) else {
                return Ok(None);
            };
            Ok(state.sync.get(&row.id).cloned())
        }

        async fn begin_sync(&self, file_id: i64) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            let path = state
                .files
                .values()
                .find(|(r, _)| r.id == file_id)
                .map(|(r, _)| r.file_path.clone())
                .unwrap_or_default();
            let record = state.sync.entry(file_id).or_insert(SyncRecord {
                file_id,
                file_path: path,
                last_synced_hash: None,
                last_synced_at: None,
                status: SyncStatus::Pending,
                error_message: None,
            });
            record.status = SyncStatus::Syncing;
            record.error_message = None;
            Ok(())
        }

        async fn finish_sync(&self, file_id: i64, hash: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(record) = state.sync.get_mut(&file_id) {
                record.status = SyncStatus::Completed;
                record.last_synced_hash = Some(hash.to_string());
                record.last_synced_at = Some(chrono::Utc::now());
                record.error_message = None;
            }
            Ok(())
        }

        async fn fail_sync(&self, file_id: i64, message: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            let record = state.sync.entry(file_id).or_insert(SyncRecord {
                file_id,
                file_path: String::new(),
                last_synced_hash: None,
                last_synced_at: None,
                status: SyncStatus::Pending,
                error_message: None,
            });
            record.status = SyncStatus::Failed;
            record.error_message = Some(message.to_string());
            Ok(())
        }

        async fn counts(&self) -> Result<IndexCounts> {
            let state = self.state.lock().unwrap();
            let mut counts = IndexCounts {
                files: state.files.len() as i64,
                chunks: state.chunks.values().map(Vec::len).sum::<usize>() as i64,
                ..Default::default()
            };
            for record in state.sync.values() {
                match record.status {
                    SyncStatus::Pending => counts.pending += 1,
                    SyncStatus::Syncing => counts.syncing += 1,
                    SyncStatus::Completed => counts.completed += 1,
                    SyncStatus::Failed => counts.failed += 1,
                }
            }
            Ok(counts)
        }

        async fn truncate(&self) -> Result<()> {
            *self.state.lock().unwrap() = State::default();
            Ok(())
        }
    }

    impl MemIndexStore {
        /// All chunks currently stored for a path, in index order.
        pub async fn chunks_for(&self, path: &str) -> Vec<ChunkRecord> {
            let state = self.state.lock().unwrap();
            let Some((row, _)) = state.files.get(path) else {
                return Vec::new();
            };
            state
                .chunks
                .get(&row.id)
                .map(|v| v.iter().map(|(_, c)| c.clone()).collect())
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_store_reports_unavailable() {
        let store = NullIndexStore;
        let err = store.get_file("main.md").await.unwrap_err();
        assert_eq!(err.kind(), "StorageUnavailable");
        let err = store
            .fulltext_search("x", 10, &SearchFilters::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StorageUnavailable");
    }
}
