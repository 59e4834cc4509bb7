//! Atomic `files_index.json` mirror of file metadata.
//!
//! The index is the metadata store in file-only mode and the fast listing
//! path in indexed mode. Every mutation rewrites the whole document through
//! a temp-file rename, so readers observe either the prior or the next
//! fully-valid document. The index can always be rebuilt from the tree.
use std::path::PathBuf;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tokio::io::AsyncWriteExt,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    files::{
        self, Category, FileStore, INDEX_FILE,
    },
};

const INDEX_VERSION: &str = "1.0";

/// One file's metadata as mirrored in `files_index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub file_path: String,
    pub title: String,
    pub category: Category,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub word_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: String,
    last_updated: DateTime<Utc>,
    files: Vec<IndexEntry>,
}

/// In-memory view of the index with a single-writer mutex. Mutations rewrite
/// the document on disk before returning.
pub struct JsonIndex {
    path: PathBuf,
    entries: tokio::sync::Mutex<Vec<IndexEntry>>,
}

impl JsonIndex {
    /// Load the index from disk, rebuilding from the tree when the file is
    /// missing or fails validation.
    pub async fn load(store: &FileStore) -> Result<Self> {
        let path = store.root().join(INDEX_FILE);
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<IndexDocument>(&raw) {
                Ok(doc) if doc.version == INDEX_VERSION => doc.files,
                Ok(doc) => {
                    warn!(version = %doc.version, "files_index.json has unknown version, rebuilding");
                    Self::rebuild_entries(store).await?
                },
                Err(e) => {
                    warn!(error = %e, "files_index.json failed validation, rebuilding");
                    Self::rebuild_entries(store).await?
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::rebuild_entries(store).await?
            },
            Err(e) => return Err(e.into()),
        };

        let index = Self {
            path,
            entries: tokio::sync::Mutex::new(entries),
        };
        Ok(index)
    }

    /// Derive entries from the markdown tree alone. Tags and metadata are
    /// not recoverable from file bytes and come back empty.
    async fn rebuild_entries(store: &FileStore) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        for rel in store.list() {
            let content = store.read(&rel).await?;
            let category = files::category_from_path(&rel)?;
            let modified: DateTime<Utc> = tokio::fs::metadata(store.abs(&rel)?)
                .await?
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());
            entries.push(IndexEntry {
                title: files::title_from_content(&content)
                    .unwrap_or_else(|| default_title(&rel)),
                category,
                description: files::description_from_content(&content),
                tags: Vec::new(),
                metadata: serde_json::Map::new(),
                created_at: modified,
                updated_at: modified,
                word_count: files::word_count(&content),
                file_path: rel,
            });
        }
        info!(files = entries.len(), "rebuilt files_index.json from tree");
        Ok(entries)
    }

    async fn persist(&self, entries: &[IndexEntry]) -> Result<()> {
        let doc = IndexDocument {
            version: INDEX_VERSION.to_string(),
            last_updated: Utc::now(),
            files: entries.to_vec(),
        };
        let raw = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::Internal(format!("serializing files_index.json: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(raw.as_bytes()).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Insert or replace the entry for `entry.file_path`.
    pub async fn upsert(&self, entry: IndexEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.retain(|e| e.file_path != entry.file_path);
        entries.push(entry);
        entries.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        self.persist(&entries).await
    }

    /// Remove the entry for `path`. Missing entries are a no-op.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.file_path != path);
        if entries.len() == before {
            return Ok(());
        }
        self.persist(&entries).await
    }

    /// Replace the whole entry set (reset path).
    pub async fn replace_all(&self, new_entries: Vec<IndexEntry>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        *entries = new_entries;
        entries.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        self.persist(&entries).await
    }

    pub async fn get(&self, path: &str) -> Option<IndexEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.file_path == path)
            .cloned()
    }

    /// Snapshot of all entries, sorted by path.
    pub async fn all(&self) -> Vec<IndexEntry> {
        self.entries.lock().await.clone()
    }

    /// Persist the current in-memory state (used right after `load` when the
    /// file was missing or rebuilt).
    pub async fn flush(&self) -> Result<()> {
        let entries = self.entries.lock().await;
        self.persist(&entries).await
    }
}

fn default_title(rel: &str) -> String {
    rel.rsplit('/')
        .next()
        .unwrap_or(rel)
        .trim_end_matches(".md")
        .replace('_', " ")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn entry(path: &str, title: &str) -> IndexEntry {
        IndexEntry {
            file_path: path.into(),
            title: title.into(),
            category: files::category_from_path(path).unwrap(),
            description: String::new(),
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            word_count: 0,
        }
    }

    #[tokio::test]
    async fn upsert_get_remove() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());
        let index = JsonIndex::load(&store).await.unwrap();

        index.upsert(entry("projects/p1.md", "P1")).await.unwrap();
        assert_eq!(index.get("projects/p1.md").await.unwrap().title, "P1");

        index.upsert(entry("projects/p1.md", "P1 renamed")).await.unwrap();
        assert_eq!(index.all().await.len(), 1);
        assert_eq!(
            index.get("projects/p1.md").await.unwrap().title,
            "P1 renamed"
        );

        index.remove("projects/p1.md").await.unwrap();
        assert!(index.get("projects/p1.md").await.is_none());
        // Removing again is a no-op.
        index.remove("projects/p1.md").await.unwrap();
    }

    #[tokio::test]
    async fn survives_reload() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());
        {
            let index = JsonIndex::load(&store).await.unwrap();
            let mut e = entry("concepts/rrf.md", "RRF");
            e.tags = vec!["search".into()];
            index.upsert(e).await.unwrap();
        }
        let index = JsonIndex::load(&store).await.unwrap();
        let e = index.get("concepts/rrf.md").await.unwrap();
        assert_eq!(e.title, "RRF");
        assert_eq!(e.tags, vec!["search"]);
    }

    #[tokio::test]
    async fn rebuilds_from_tree_on_corruption() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());
        store
            .write("projects/p1.md", "# P1\n\nAlpha beta.")
            .await
            .unwrap();
        tokio::fs::write(tmp.path().join(INDEX_FILE), "{not json")
            .await
            .unwrap();

        let index = JsonIndex::load(&store).await.unwrap();
        let e = index.get("projects/p1.md").await.unwrap();
        assert_eq!(e.title, "P1");
        assert_eq!(e.category, Category::Project);
        assert_eq!(e.description, "Alpha beta.");
        assert_eq!(e.word_count, 3);
        assert!(e.tags.is_empty());
    }

    #[tokio::test]
    async fn document_schema_fields() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());
        let index = JsonIndex::load(&store).await.unwrap();
        index.upsert(entry("other/x.md", "X")).await.unwrap();

        let raw = tokio::fs::read_to_string(tmp.path().join(INDEX_FILE))
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["version"], "1.0");
        assert!(doc["last_updated"].is_string());
        assert_eq!(doc["files"][0]["file_path"], "other/x.md");
        assert_eq!(doc["files"][0]["category"], "other");
        assert!(doc["files"][0]["word_count"].is_number());
    }
}
