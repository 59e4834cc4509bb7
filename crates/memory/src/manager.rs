//! Memory manager: orchestrates the file store, the JSON index and the sync
//! service for every high-level operation.
//!
//! Every mutation goes file store → JSON index → sync enqueue, in that
//! order. The JSON index and the database are eventually consistent with the
//! tree; the tree itself is the source of truth.
use std::{collections::BTreeMap, sync::Arc};

use {
    chrono::Utc,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    config::MemoryConfig,
    edit::{self, InsertPosition, SectionInfo, SectionMode},
    embeddings::EmbeddingProvider,
    error::{Error, Result},
    files::{self, Category, FileStore, MAIN_FILE, PathLocks},
    json_index::{IndexEntry, JsonIndex},
    mainfile::{self, ListAction},
    schema::IndexCounts,
    search::{SearchEngine, SearchFilters, SearchMode, SearchResponse},
    store::IndexStore,
    sync::{Reconciler, SyncHandle, SyncService},
};

/// Result of a file mutation, echoed back to the caller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileInfo {
    pub file_path: String,
    pub title: String,
    pub category: Category,
    pub word_count: usize,
    /// True when the write still awaits reconciliation into the index.
    pub sync_pending: bool,
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub title: String,
    pub category: String,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One `edit` tool operation.
#[derive(Debug, Clone)]
pub enum EditOp {
    Section {
        section_header: String,
        mode: SectionMode,
        text: String,
    },
    FindReplace {
        find: String,
        replace: String,
        use_regex: bool,
        max_replacements: i64,
    },
    Insert {
        text: String,
        position: InsertPosition,
        marker: Option<String>,
    },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EditOutcome {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacements: Option<usize>,
    pub word_count: usize,
    pub sync_pending: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ListedFiles {
    /// Number of files excluding the `main.md` sentinel.
    pub total: usize,
    pub files: Vec<IndexEntry>,
    pub tree: BTreeMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStatus {
    pub initialized: bool,
    pub mode: &'static str,
    pub total_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_indexed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_indexed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_failed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

struct Backend {
    store: Arc<dyn IndexStore>,
    engine: SearchEngine,
    sync: SyncHandle,
    embedding_model: String,
}

pub struct MemoryManager {
    files: Arc<FileStore>,
    index: Arc<JsonIndex>,
    locks: Arc<PathLocks>,
    backend: Option<Backend>,
    default_search_limit: usize,
}

impl MemoryManager {
    /// File-only mode: search and sync report `StorageUnavailable`.
    pub async fn file_only(cfg: MemoryConfig) -> Result<Self> {
        let (files, index, locks) = Self::open_tree(&cfg).await?;
        Ok(Self {
            files,
            index,
            locks,
            backend: None,
            default_search_limit: cfg.search_limit,
        })
    }

    /// Indexed mode: spawns the background sync workers against `store`.
    pub async fn indexed(
        cfg: MemoryConfig,
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let (files, index, locks) = Self::open_tree(&cfg).await?;
        let engine = SearchEngine::new(Arc::clone(&store), Arc::clone(&embedder), cfg.rrf_k);
        let embedding_model = embedder.model_name().to_string();
        let default_search_limit = cfg.search_limit;
        let reconciler = Arc::new(Reconciler {
            cfg,
            store_files: Arc::clone(&files),
            index: Arc::clone(&index),
            store: Arc::clone(&store),
            embedder,
            locks: Arc::clone(&locks),
        });
        let sync = SyncService::spawn(reconciler, shutdown);
        Ok(Self {
            files,
            index,
            locks,
            backend: Some(Backend {
                store,
                engine,
                sync,
                embedding_model,
            }),
            default_search_limit,
        })
    }

    async fn open_tree(cfg: &MemoryConfig) -> Result<(Arc<FileStore>, Arc<JsonIndex>, Arc<PathLocks>)> {
        tokio::fs::create_dir_all(&cfg.files_path).await?;
        let files = Arc::new(FileStore::new(cfg.files_path.clone()));
        let index = Arc::new(JsonIndex::load(&files).await?);
        Ok((files, index, Arc::new(PathLocks::new())))
    }

    #[must_use]
    pub fn file_store(&self) -> &FileStore {
        &self.files
    }

    /// Default result limit for search (`SEARCH_LIMIT`).
    #[must_use]
    pub fn default_search_limit(&self) -> usize {
        self.default_search_limit
    }

    fn sync_pending(&self) -> bool {
        self.backend.is_some()
    }

    fn enqueue_sync(&self, path: &str) {
        if let Some(backend) = &self.backend {
            backend.sync.enqueue(path);
        }
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    pub async fn is_initialized(&self) -> Result<bool> {
        self.files.exists(MAIN_FILE).await
    }

    /// Create `main.md` and `files_index.json` if absent. Returns true when
    /// the tree was freshly initialized.
    pub async fn initialize(&self) -> Result<bool> {
        let _guard = self.locks.acquire(MAIN_FILE).await;
        let created = if self.files.exists(MAIN_FILE).await? {
            false
        } else {
            self.files.write(MAIN_FILE, mainfile::TEMPLATE).await?;
            info!("initialized memory tree");
            true
        };
        let content = self.files.read(MAIN_FILE).await?;
        self.index
            .upsert(self.build_entry(MAIN_FILE, &content, Some("Main Memory".into()), None))
            .await?;
        self.index.flush().await?;
        self.enqueue_sync(MAIN_FILE);
        Ok(created)
    }

    /// Delete every file except the base state and truncate the index
    /// tables. `main.md` is rewritten to its template.
    pub async fn reset(&self) -> Result<usize> {
        let mut removed = 0usize;
        for path in self.files.list() {
            if path == MAIN_FILE {
                continue;
            }
            let _guard = self.locks.acquire(&path).await;
            self.files.remove(&path).await?;
            removed += 1;
        }

        {
            let _guard = self.locks.acquire(MAIN_FILE).await;
            self.files.write(MAIN_FILE, mainfile::TEMPLATE).await?;
        }

        let main_entry =
            self.build_entry(MAIN_FILE, mainfile::TEMPLATE, Some("Main Memory".into()), None);
        self.index.replace_all(vec![main_entry]).await?;

        if let Some(backend) = &self.backend {
            backend.store.truncate().await?;
        }
        self.enqueue_sync(MAIN_FILE);
        info!(removed, "reset memory tree to base state");
        Ok(removed)
    }

    // ── file CRUD ───────────────────────────────────────────────────────

    pub async fn create(&self, req: CreateRequest) -> Result<FileInfo> {
        let category: Category = req.category.parse()?;
        if category == Category::Main {
            return Err(Error::InvalidArgument(
                "main.md is managed by memory initialize/reset".into(),
            ));
        }
        let slug = files::slugify(&req.title);
        let path = files::file_path_for(category, &slug)?;

        {
            let _guard = self.locks.acquire(&path).await;
            if self.files.exists(&path).await? {
                return Err(Error::AlreadyExists(format!("file {path:?}")));
            }
            self.files.write(&path, &req.content).await?;
            let mut entry =
                self.build_entry(&path, &req.content, Some(req.title.clone()), None);
            entry.tags = normalize_tags(req.tags);
            entry.metadata = req.metadata;
            self.index.upsert(entry).await?;
        }

        self.upsert_main_link(&req.title, &path).await?;
        self.enqueue_sync(&path);

        Ok(FileInfo {
            file_path: path,
            title: req.title,
            category,
            word_count: files::word_count(&req.content),
            sync_pending: self.sync_pending(),
        })
    }

    pub async fn read(&self, path: &str) -> Result<(String, Option<IndexEntry>)> {
        files::category_from_path(path)?;
        let content = self.files.read(path).await?;
        Ok((content, self.index.get(path).await))
    }

    pub async fn update(&self, path: &str, content: &str, mode: SectionMode) -> Result<FileInfo> {
        files::category_from_path(path)?;
        let _guard = self.locks.acquire(path).await;
        let existing = self.files.read(path).await?;
        let new_content = match mode {
            SectionMode::Replace => content.to_string(),
            SectionMode::Append => {
                let mut out = existing;
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(content);
                out
            },
            SectionMode::Prepend => {
                let mut out = content.to_string();
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&existing);
                out
            },
        };
        self.files.write(path, &new_content).await?;
        let entry = self.refresh_entry(path, &new_content).await?;
        self.enqueue_sync(path);
        Ok(self.file_info(path, &entry, &new_content))
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        if path == MAIN_FILE {
            return Err(Error::InvalidArgument(
                "main.md cannot be deleted; use memory reset".into(),
            ));
        }
        files::category_from_path(path)?;
        {
            let _guard = self.locks.acquire(path).await;
            self.files.remove(path).await?;
            self.index.remove(path).await?;
        }
        if let Some(backend) = &self.backend
            && let Err(e) = backend.store.delete_file(path).await
        {
            warn!(path, error = %e, "index delete failed; sweep will retry");
            self.enqueue_sync(path);
        }
        self.remove_main_link(path).await?;
        Ok(())
    }

    /// Rename: recompute the slug from a new title, keep the category.
    pub async fn rename(&self, path: &str, new_title: &str) -> Result<FileInfo> {
        let category = files::category_from_path(path)?;
        if category == Category::Main {
            return Err(Error::InvalidArgument("main.md cannot be renamed".into()));
        }
        let new_path = files::file_path_for(category, &files::slugify(new_title))?;
        self.relocate(path, &new_path, Some(new_title)).await
    }

    /// Move: change the category directory, keep the slug.
    pub async fn move_file(&self, path: &str, new_category: &str) -> Result<FileInfo> {
        let category = files::category_from_path(path)?;
        if category == Category::Main {
            return Err(Error::InvalidArgument("main.md cannot be moved".into()));
        }
        let target: Category = new_category.parse()?;
        if target == Category::Main {
            return Err(Error::InvalidArgument("cannot move a file into main".into()));
        }
        let slug = path
            .rsplit('/')
            .next()
            .and_then(|f| f.strip_suffix(".md"))
            .ok_or_else(|| Error::InvalidArgument(format!("invalid path {path:?}")))?;
        let new_path = files::file_path_for(target, slug)?;
        self.relocate(path, &new_path, None).await
    }

    async fn relocate(&self, path: &str, new_path: &str, new_title: Option<&str>) -> Result<FileInfo> {
        if path == new_path {
            return Err(Error::InvalidArgument(
                "source and destination are the same file".into(),
            ));
        }
        // Lock both paths in lexicographic order.
        let (first, second) = if path < new_path {
            (path, new_path)
        } else {
            (new_path, path)
        };
        let _guard_a = self.locks.acquire(first).await;
        let _guard_b = self.locks.acquire(second).await;

        let content = self.files.read(path).await?;
        if self.files.exists(new_path).await? {
            return Err(Error::AlreadyExists(format!("file {new_path:?}")));
        }
        self.files.write(new_path, &content).await?;
        self.files.remove(path).await?;

        let old_entry = self.index.get(path).await;
        let title = new_title
            .map(ToOwned::to_owned)
            .or_else(|| old_entry.as_ref().map(|e| e.title.clone()))
            .or_else(|| files::title_from_content(&content))
            .unwrap_or_else(|| new_path.to_string());
        let entry = self.build_entry(new_path, &content, Some(title.clone()), old_entry);
        self.index.remove(path).await?;
        self.index.upsert(entry.clone()).await?;

        if let Some(backend) = &self.backend
            && let Err(e) = backend.store.delete_file(path).await
        {
            warn!(path, error = %e, "index delete of old path failed; sweep will retry");
        }

        self.remove_main_link(path).await?;
        self.upsert_main_link(&title, new_path).await?;
        self.enqueue_sync(new_path);

        Ok(self.file_info(new_path, &entry, &content))
    }

    /// Copy a file, optionally into another category and/or under a new
    /// title. Defaults to "<title> Copy" in the same category.
    pub async fn copy(
        &self,
        path: &str,
        new_title: Option<&str>,
        new_category: Option<&str>,
    ) -> Result<FileInfo> {
        let source_category = files::category_from_path(path)?;
        let (content, entry) = self.read(path).await?;
        let title = match new_title {
            Some(t) => t.to_string(),
            None => {
                let base = entry
                    .as_ref()
                    .map(|e| e.title.clone())
                    .or_else(|| files::title_from_content(&content))
                    .unwrap_or_else(|| path.to_string());
                if new_category.is_some() {
                    base
                } else {
                    format!("{base} Copy")
                }
            },
        };
        let category = match new_category {
            Some(c) => c.to_string(),
            None => source_category.as_str().to_string(),
        };
        self.create(CreateRequest {
            title,
            category,
            content,
            tags: entry.as_ref().map(|e| e.tags.clone()).unwrap_or_default(),
            metadata: entry.map(|e| e.metadata).unwrap_or_default(),
        })
        .await
    }

    // ── tags ────────────────────────────────────────────────────────────

    pub async fn tags_add(&self, path: &str, tags: &[String]) -> Result<Vec<String>> {
        self.mutate_tags(path, |current| {
            current.extend(tags.iter().cloned());
        })
        .await
    }

    pub async fn tags_remove(&self, path: &str, tags: &[String]) -> Result<Vec<String>> {
        self.mutate_tags(path, |current| {
            current.retain(|t| !tags.contains(t));
        })
        .await
    }

    pub async fn tags_get(&self, path: &str) -> Result<Vec<String>> {
        files::category_from_path(path)?;
        if !self.files.exists(path).await? {
            return Err(Error::NotFound(format!("file {path:?}")));
        }
        Ok(self
            .index
            .get(path)
            .await
            .map(|e| e.tags)
            .unwrap_or_default())
    }

    async fn mutate_tags<F>(&self, path: &str, mutate: F) -> Result<Vec<String>>
    where
        F: FnOnce(&mut Vec<String>),
    {
        files::category_from_path(path)?;
        let _guard = self.locks.acquire(path).await;
        let content = self.files.read(path).await?;
        let mut entry = match self.index.get(path).await {
            Some(entry) => entry,
            None => self.build_entry(path, &content, None, None),
        };
        mutate(&mut entry.tags);
        entry.tags = normalize_tags(std::mem::take(&mut entry.tags));
        entry.updated_at = Utc::now();
        let tags = entry.tags.clone();
        self.index.upsert(entry).await?;

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.store.set_tags(path, &tags).await {
                warn!(path, error = %e, "tag update not yet in index");
            }
            backend.sync.enqueue(path);
        }
        Ok(tags)
    }

    // ── edits ───────────────────────────────────────────────────────────

    pub async fn edit(&self, path: &str, op: EditOp) -> Result<EditOutcome> {
        files::category_from_path(path)?;
        let _guard = self.locks.acquire(path).await;
        let content = self.files.read(path).await?;
        let (new_content, replacements) = match op {
            EditOp::Section {
                section_header,
                mode,
                text,
            } => (edit::edit_section(&content, &section_header, mode, &text)?, None),
            EditOp::FindReplace {
                find,
                replace,
                use_regex,
                max_replacements,
            } => {
                let (out, n) =
                    edit::find_replace(&content, &find, &replace, use_regex, max_replacements)?;
                (out, Some(n))
            },
            EditOp::Insert {
                text,
                position,
                marker,
            } => (edit::insert(&content, &text, position, marker.as_deref())?, None),
        };
        self.files.write(path, &new_content).await?;
        self.refresh_entry(path, &new_content).await?;
        self.enqueue_sync(path);
        Ok(EditOutcome {
            file_path: path.to_string(),
            replacements,
            word_count: files::word_count(&new_content),
            sync_pending: self.sync_pending(),
        })
    }

    // ── main.md operations ──────────────────────────────────────────────

    pub async fn main_append(&self, text: &str) -> Result<()> {
        self.edit_main(|content| mainfile::append_update(content, text, &today()))
            .await
    }

    pub async fn main_goal(&self, action: ListAction, text: &str) -> Result<()> {
        self.edit_main(|content| match action {
            ListAction::Add => mainfile::add_entry(content, mainfile::GOALS_SECTION, text),
            ListAction::Complete => {
                mainfile::complete_entry(content, mainfile::GOALS_SECTION, text, &today())
            },
            ListAction::Remove => mainfile::remove_entry(content, mainfile::GOALS_SECTION, text),
        })
        .await
    }

    pub async fn main_task(&self, action: ListAction, text: &str) -> Result<()> {
        self.edit_main(|content| match action {
            ListAction::Add => mainfile::add_entry(content, mainfile::TASKS_SECTION, text),
            ListAction::Complete => {
                mainfile::complete_entry(content, mainfile::TASKS_SECTION, text, &today())
            },
            ListAction::Remove => mainfile::remove_entry(content, mainfile::TASKS_SECTION, text),
        })
        .await
    }

    pub async fn main_plan(&self, action: ListAction, text: &str) -> Result<()> {
        self.edit_main(|content| match action {
            ListAction::Add => mainfile::add_plan(content, text),
            ListAction::Complete => mainfile::complete_plan(content, text),
            ListAction::Remove => Err(Error::InvalidArgument(
                "plan entries support add and complete".into(),
            )),
        })
        .await
    }

    async fn edit_main<F>(&self, transform: F) -> Result<()>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let _guard = self.locks.acquire(MAIN_FILE).await;
        let content = self.files.read(MAIN_FILE).await.map_err(|_| {
            Error::NotFound("main.md (memory is not initialized)".into())
        })?;
        let new_content = transform(&content)?;
        self.files.write(MAIN_FILE, &new_content).await?;
        self.refresh_entry(MAIN_FILE, &new_content).await?;
        self.enqueue_sync(MAIN_FILE);
        Ok(())
    }

    // ── listing / extraction ────────────────────────────────────────────

    pub async fn list_files(&self) -> Result<ListedFiles> {
        let entries: Vec<IndexEntry> = self
            .index
            .all()
            .await
            .into_iter()
            .filter(|e| e.file_path != MAIN_FILE)
            .collect();
        let mut tree: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
        for entry in &entries {
            tree.entry(entry.category.as_str().to_string())
                .or_default()
                .push(entry.clone());
        }
        Ok(ListedFiles {
            total: entries.len(),
            files: entries,
            tree,
        })
    }

    pub async fn list_sections(&self, path: &str) -> Result<Vec<SectionInfo>> {
        let (content, _) = self.read(path).await?;
        Ok(edit::outline(&content))
    }

    pub async fn extract_section(&self, path: &str, section_header: &str) -> Result<String> {
        let (content, _) = self.read(path).await?;
        edit::extract_section(&content, section_header)
    }

    // ── search / status ─────────────────────────────────────────────────

    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchResponse> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            Error::StorageUnavailable("search requires USE_DATABASE=true".into())
        })?;
        backend.engine.search(query, mode, limit, filters).await
    }

    /// Enqueue every file on disk for reconciliation. Returns the number of
    /// paths queued.
    pub fn request_sync_all(&self) -> Result<usize> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            Error::StorageUnavailable("sync requires USE_DATABASE=true".into())
        })?;
        let paths = self.files.list();
        for path in &paths {
            backend.sync.enqueue(path);
        }
        Ok(paths.len())
    }

    /// Number of reconciles still queued.
    #[must_use]
    pub fn sync_backlog(&self) -> usize {
        self.backend
            .as_ref()
            .map_or(0, |backend| backend.sync.queued_len())
    }

    pub async fn status(&self) -> Result<MemoryStatus> {
        let listed = self.list_files().await?;
        let counts: Option<IndexCounts> = match &self.backend {
            Some(backend) => Some(backend.store.counts().await?),
            None => None,
        };
        Ok(MemoryStatus {
            initialized: self.is_initialized().await?,
            mode: if self.backend.is_some() {
                "indexed"
            } else {
                "file-only"
            },
            total_files: listed.total,
            files_indexed: counts.map(|c| c.files),
            chunks_indexed: counts.map(|c| c.chunks),
            sync_failed: counts.map(|c| c.failed),
            embedding_model: self
                .backend
                .as_ref()
                .map(|b| b.embedding_model.clone()),
        })
    }

    // ── helpers ─────────────────────────────────────────────────────────

    fn build_entry(
        &self,
        path: &str,
        content: &str,
        title: Option<String>,
        previous: Option<IndexEntry>,
    ) -> IndexEntry {
        let now = Utc::now();
        let category = files::category_from_path(path).unwrap_or(Category::Other);
        IndexEntry {
            file_path: path.to_string(),
            title: title
                .or_else(|| previous.as_ref().map(|p| p.title.clone()))
                .or_else(|| files::title_from_content(content))
                .unwrap_or_else(|| path.to_string()),
            category,
            description: files::description_from_content(content),
            tags: previous.as_ref().map(|p| p.tags.clone()).unwrap_or_default(),
            metadata: previous
                .as_ref()
                .map(|p| p.metadata.clone())
                .unwrap_or_default(),
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
            word_count: files::word_count(content),
        }
    }

    async fn refresh_entry(&self, path: &str, content: &str) -> Result<IndexEntry> {
        let previous = self.index.get(path).await;
        let entry = self.build_entry(path, content, None, previous);
        self.index.upsert(entry.clone()).await?;
        Ok(entry)
    }

    fn file_info(&self, path: &str, entry: &IndexEntry, content: &str) -> FileInfo {
        FileInfo {
            file_path: path.to_string(),
            title: entry.title.clone(),
            category: entry.category,
            word_count: files::word_count(content),
            sync_pending: self.sync_pending(),
        }
    }

    async fn upsert_main_link(&self, title: &str, path: &str) -> Result<()> {
        self.touch_main_link(|content| mainfile::upsert_file_link(content, title, path))
            .await
    }

    async fn remove_main_link(&self, path: &str) -> Result<()> {
        self.touch_main_link(|content| mainfile::remove_file_link(content, path))
            .await
    }

    /// Best-effort File Index maintenance: skipped when memory is not
    /// initialized yet.
    async fn touch_main_link<F>(&self, transform: F) -> Result<()>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let _guard = self.locks.acquire(MAIN_FILE).await;
        let content = match self.files.read(MAIN_FILE).await {
            Ok(content) => content,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let new_content = transform(&content)?;
        if new_content != content {
            self.files.write(MAIN_FILE, &new_content).await?;
            self.refresh_entry(MAIN_FILE, &new_content).await?;
            self.enqueue_sync(MAIN_FILE);
        }
        Ok(())
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
