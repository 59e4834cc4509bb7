//! Postgres + pgvector implementation of the `IndexStore` trait.
use async_trait::async_trait;
use {sqlx::PgPool, tracing::warn};

use crate::{
    error::{Error, Result},
    files::Category,
    schema::{ChunkRecord, FileMeta, FileRow, IndexCounts, SyncRecord, SyncStatus},
    search::{SearchFilters, SearchHit},
    store::IndexStore,
};

pub struct PgIndexStore {
    pool: PgPool,
}

impl PgIndexStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Align the `embedding` column with the provider's dimension. A
    /// mismatch drops existing chunks (the sweep re-embeds them) and alters
    /// the column in place.
    pub async fn ensure_embedding_dimension(&self, dim: usize) -> Result<()> {
        let (current,): (i32,) = sqlx::query_as(
            "SELECT atttypmod FROM pg_attribute
             WHERE attrelid = 'memory_chunks'::regclass AND attname = 'embedding'",
        )
        .fetch_one(&self.pool)
        .await?;

        if current == dim as i32 {
            return Ok(());
        }
        warn!(
            current,
            wanted = dim,
            "embedding column dimension mismatch, re-creating chunk embeddings"
        );
        sqlx::query("DELETE FROM memory_chunks")
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            "ALTER TABLE memory_chunks ALTER COLUMN embedding TYPE vector({dim})"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE sync_status SET sync_status = 'pending', last_synced_hash = NULL")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_category(raw: &str) -> Result<Category> {
    raw.parse()
        .map_err(|_| Error::Internal(format!("corrupt category value {raw:?} in memory_files")))
}

/// Bind-ready filter columns: `NULL` disables the corresponding predicate.
fn filter_binds(
    filters: &SearchFilters,
) -> (Option<Vec<String>>, Option<Vec<String>>, Option<String>) {
    let categories = filters
        .categories
        .as_ref()
        .map(|cats| cats.iter().map(|c| c.as_str().to_string()).collect());
    let tags = (!filters.tags.is_empty()).then(|| filters.tags.clone());
    (categories, tags, filters.file_path.clone())
}

type HitRow = (i64, String, String, String, String, Vec<String>, f64);

fn hit_from_row(row: HitRow) -> Result<SearchHit> {
    let (chunk_id, file_path, title, category, content, header_path, score) = row;
    Ok(SearchHit {
        chunk_id,
        file_path,
        title,
        category: parse_category(&category)?,
        content,
        header_path,
        score: score as f32,
    })
}

#[async_trait]
impl IndexStore for PgIndexStore {
    async fn upsert_file(&self, meta: &FileMeta) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO memory_files (file_path, title, category, file_hash, word_count, tags, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (file_path) DO UPDATE SET
               title = excluded.title, category = excluded.category,
               file_hash = excluded.file_hash, word_count = excluded.word_count,
               tags = excluded.tags, metadata = excluded.metadata, updated_at = now()
             RETURNING id",
        )
        .bind(&meta.file_path)
        .bind(&meta.title)
        .bind(meta.category.as_str())
        .bind(&meta.file_hash)
        .bind(meta.word_count)
        .bind(&meta.tags)
        .bind(&meta.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_file(&self, path: &str) -> Result<Option<FileRow>> {
        type Row = (
            i64,
            String,
            String,
            String,
            String,
            i32,
            Vec<String>,
            chrono::DateTime<chrono::Utc>,
            chrono::DateTime<chrono::Utc>,
        );
        let row: Option<Row> = sqlx::query_as(
            "SELECT id, file_path, title, category, file_hash, word_count, tags, created_at, updated_at
             FROM memory_files WHERE file_path = $1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(
            |(id, file_path, title, category, file_hash, word_count, tags, created_at, updated_at)| {
                Ok(FileRow {
                    id,
                    file_path,
                    title,
                    category: parse_category(&category)?,
                    file_hash,
                    word_count: word_count as i64,
                    tags,
                    created_at,
                    updated_at,
                })
            },
        )
        .transpose()
    }

    async fn list_paths(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT file_path FROM memory_files ORDER BY file_path")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    async fn set_tags(&self, path: &str, tags: &[String]) -> Result<()> {
        sqlx::query("UPDATE memory_files SET tags = $2, updated_at = now() WHERE file_path = $1")
            .bind(path)
            .bind(tags)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM memory_files WHERE file_path = $1")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_chunks(&self, file_id: i64, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM memory_chunks WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            let embedding = chunk
                .embedding
                .as_ref()
                .map(|v| pgvector::Vector::from(v.clone()));
            sqlx::query(
                "INSERT INTO memory_chunks
                   (file_id, chunk_index, content, content_hash, embedding, header_path, section_level)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(file_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(embedding)
            .bind(&chunk.header_path)
            .bind(chunk.section_level)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let (categories, tags, file_path) = filter_binds(filters);
        let query_vec = pgvector::Vector::from(query.to_vec());
        let rows: Vec<HitRow> = sqlx::query_as(
            "SELECT c.id, f.file_path, f.title, f.category, c.content, c.header_path,
                    (1 - (c.embedding <=> $1))::float8 AS similarity
             FROM memory_chunks c
             JOIN memory_files f ON f.id = c.file_id
             WHERE c.embedding IS NOT NULL
               AND ($2::text[] IS NULL OR f.category = ANY($2))
               AND ($3::text[] IS NULL OR f.tags @> $3)
               AND ($4::text IS NULL OR f.file_path = $4)
             ORDER BY c.embedding <=> $1, c.id
             LIMIT $5",
        )
        .bind(&query_vec)
        .bind(&categories)
        .bind(&tags)
        .bind(&file_path)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(hit_from_row).collect()
    }

    async fn fulltext_search(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let (categories, tags, file_path) = filter_binds(filters);
        let rows: Vec<HitRow> = sqlx::query_as(
            "SELECT c.id, f.file_path, f.title, f.category, c.content, c.header_path,
                    ts_rank_cd(c.content_tsvector, plainto_tsquery('english', $1))::float8 AS score
             FROM memory_chunks c
             JOIN memory_files f ON f.id = c.file_id
             WHERE c.content_tsvector @@ plainto_tsquery('english', $1)
               AND ($2::text[] IS NULL OR f.category = ANY($2))
               AND ($3::text[] IS NULL OR f.tags @> $3)
               AND ($4::text IS NULL OR f.file_path = $4)
             ORDER BY score DESC, c.id
             LIMIT $5",
        )
        .bind(query)
        .bind(&categories)
        .bind(&tags)
        .bind(&file_path)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(hit_from_row).collect()
    }

    async fn sync_record(&self, path: &str) -> Result<Option<SyncRecord>> {
        type Row = (
            i64,
            String,
            Option<String>,
            Option<chrono::DateTime<chrono::Utc>>,
            String,
            Option<String>,
        );
        let row: Option<Row> = sqlx::query_as(
            "SELECT f.id, f.file_path, s.last_synced_hash, s.last_synced_at, s.sync_status, s.error_message
             FROM memory_files f
             JOIN sync_status s ON s.file_id = f.id
             WHERE f.file_path = $1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(
            |(file_id, file_path, last_synced_hash, last_synced_at, status, error_message)| {
                let status = SyncStatus::parse(&status).ok_or_else(|| {
                    Error::Internal(format!("corrupt sync_status value {status:?}"))
                })?;
                Ok(SyncRecord {
                    file_id,
                    file_path,
                    last_synced_hash,
                    last_synced_at,
                    status,
                    error_message,
                })
            },
        )
        .transpose()
    }

    async fn begin_sync(&self, file_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_status (file_id, sync_status) VALUES ($1, 'syncing')
             ON CONFLICT (file_id) DO UPDATE SET sync_status = 'syncing', error_message = NULL",
        )
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_sync(&self, file_id: i64, hash: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_status
             SET sync_status = 'completed', last_synced_hash = $2,
                 last_synced_at = now(), error_message = NULL
             WHERE file_id = $1",
        )
        .bind(file_id)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_sync(&self, file_id: i64, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_status (file_id, sync_status, error_message)
             VALUES ($1, 'failed', $2)
             ON CONFLICT (file_id) DO UPDATE SET sync_status = 'failed', error_message = $2",
        )
        .bind(file_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counts(&self) -> Result<IndexCounts> {
        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            "SELECT (SELECT count(*) FROM memory_files),
                    (SELECT count(*) FROM memory_chunks),
                    count(*) FILTER (WHERE sync_status = 'pending'),
                    count(*) FILTER (WHERE sync_status = 'syncing'),
                    count(*) FILTER (WHERE sync_status = 'completed'),
                    count(*) FILTER (WHERE sync_status = 'failed')
             FROM sync_status",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(IndexCounts {
            files: row.0,
            chunks: row.1,
            pending: row.2,
            syncing: row.3,
            completed: row.4,
            failed: row.5,
        })
    }

    async fn truncate(&self) -> Result<()> {
        sqlx::query("TRUNCATE memory_files, memory_chunks, sync_status RESTART IDENTITY CASCADE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::run_migrations};

    #[test]
    fn filter_binds_null_out_empty_filters() {
        let (cats, tags, path) = filter_binds(&SearchFilters::default());
        assert!(cats.is_none());
        assert!(tags.is_none());
        assert!(path.is_none());

        let filters = SearchFilters {
            categories: Some(vec![Category::Project, Category::Concept]),
            tags: vec!["x".into()],
            file_path: Some("projects/p1.md".into()),
        };
        let (cats, tags, path) = filter_binds(&filters);
        assert_eq!(cats.unwrap(), vec!["project", "concept"]);
        assert_eq!(tags.unwrap(), vec!["x"]);
        assert_eq!(path.unwrap(), "projects/p1.md");
    }

    async fn connect() -> PgIndexStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL for store tests");
        let pool = PgPool::connect(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = PgIndexStore::new(pool);
        store.truncate().await.unwrap();
        store
    }

    fn meta(path: &str) -> FileMeta {
        FileMeta {
            file_path: path.into(),
            title: "T".into(),
            category: Category::Project,
            file_hash: "h".into(),
            word_count: 1,
            tags: vec![],
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    #[ignore = "requires a postgres instance with pgvector (set DATABASE_URL)"]
    async fn file_and_chunk_round_trip() {
        let store = connect().await;
        let id = store.upsert_file(&meta("projects/p1.md")).await.unwrap();

        store
            .replace_chunks(
                id,
                &[ChunkRecord {
                    chunk_index: 0,
                    content: "alpha beta".into(),
                    content_hash: "ch".into(),
                    embedding: None,
                    header_path: vec!["P1".into()],
                    section_level: 1,
                }],
            )
            .await
            .unwrap();

        let hits = store
            .fulltext_search("alpha", 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "projects/p1.md");

        store.delete_file("projects/p1.md").await.unwrap();
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.files, 0);
        assert_eq!(counts.chunks, 0);
    }

    #[tokio::test]
    #[ignore = "requires a postgres instance with pgvector (set DATABASE_URL)"]
    async fn sync_record_lifecycle() {
        let store = connect().await;
        let id = store.upsert_file(&meta("projects/p2.md")).await.unwrap();
        assert!(store.sync_record("projects/p2.md").await.unwrap().is_none());

        store.begin_sync(id).await.unwrap();
        let rec = store.sync_record("projects/p2.md").await.unwrap().unwrap();
        assert_eq!(rec.status, SyncStatus::Syncing);

        store.finish_sync(id, "abc").await.unwrap();
        let rec = store.sync_record("projects/p2.md").await.unwrap().unwrap();
        assert_eq!(rec.status, SyncStatus::Completed);
        assert_eq!(rec.last_synced_hash.as_deref(), Some("abc"));

        store.fail_sync(id, "boom").await.unwrap();
        let rec = store.sync_record("projects/p2.md").await.unwrap().unwrap();
        assert_eq!(rec.status, SyncStatus::Failed);
        assert_eq!(rec.error_message.as_deref(), Some("boom"));
    }
}
