//! File→index reconciliation: a bounded queue of paths drained by a worker
//! pool, plus a periodic sweep that catches external edits and deletions.
//!
//! At most one reconcile runs per path (the per-path lock), and a path is
//! queued at most once at a time (the `queued` set); the reconcile re-reads
//! the file under the lock, so the latest observed bytes always win.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    dashmap::DashMap,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    chunker::chunk_markdown,
    config::MemoryConfig,
    embeddings::EmbeddingProvider,
    error::{Error, Result},
    files::{self, FileStore, PathLocks},
    json_index::JsonIndex,
    schema::{ChunkRecord, FileMeta, SyncStatus},
    store::IndexStore,
};

/// Cap on the exponential retry backoff for failing files.
const BACKOFF_CAP: Duration = Duration::from_secs(300);
const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// What a single reconcile did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Updated,
    Unchanged,
    Removed,
}

/// The per-file reconcile procedure with its collaborators.
pub(crate) struct Reconciler {
    pub cfg: MemoryConfig,
    pub store_files: Arc<FileStore>,
    pub index: Arc<JsonIndex>,
    pub store: Arc<dyn IndexStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub locks: Arc<PathLocks>,
}

impl Reconciler {
    /// Bring the index in line with the file's current bytes.
    pub async fn reconcile(&self, path: &str, shutdown: &CancellationToken) -> Result<Outcome> {
        let _guard = self.locks.acquire(path).await;

        let content = match self.store_files.read(path).await {
            Ok(content) => content,
            Err(Error::NotFound(_)) => {
                self.store.delete_file(path).await?;
                debug!(path, "removed deleted file from index");
                return Ok(Outcome::Removed);
            },
            Err(e) => return Err(e),
        };
        let new_hash = files::sha256_hex(&content);

        if let Some(record) = self.store.sync_record(path).await?
            && record.status == SyncStatus::Completed
            && record.last_synced_hash.as_deref() == Some(new_hash.as_str())
        {
            return Ok(Outcome::Unchanged);
        }

        let entry = self.index.get(path).await;
        let meta = FileMeta {
            file_path: path.to_string(),
            title: entry
                .as_ref()
                .map(|e| e.title.clone())
                .or_else(|| files::title_from_content(&content))
                .unwrap_or_else(|| path.to_string()),
            category: files::category_from_path(path)?,
            file_hash: new_hash.clone(),
            word_count: files::word_count(&content) as i64,
            tags: entry.as_ref().map(|e| e.tags.clone()).unwrap_or_default(),
            metadata: entry
                .map(|e| serde_json::Value::Object(e.metadata))
                .unwrap_or_else(|| serde_json::json!({})),
        };
        let file_id = self.store.upsert_file(&meta).await?;
        self.store.begin_sync(file_id).await?;

        let chunk_and_embed = async {
            let chunks = chunk_markdown(&content, self.cfg.chunk_size, self.cfg.chunk_overlap);
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            let records: Vec<ChunkRecord> = chunks
                .into_iter()
                .zip(embeddings)
                .enumerate()
                .map(|(i, (chunk, embedding))| ChunkRecord {
                    chunk_index: i as i32,
                    content_hash: files::sha256_hex(&chunk.content),
                    content: chunk.content,
                    embedding: Some(embedding),
                    header_path: chunk.header_path,
                    section_level: chunk.section_level as i32,
                })
                .collect();
            self.store.replace_chunks(file_id, &records).await?;
            self.store.finish_sync(file_id, &new_hash).await?;
            Ok::<usize, Error>(records.len())
        };

        let result = tokio::select! {
            _ = shutdown.cancelled() => Err(Error::Cancelled),
            res = chunk_and_embed => res,
        };

        match result {
            Ok(chunks) => {
                info!(path, chunks, "synced file");
                Ok(Outcome::Updated)
            },
            Err(e) => {
                // Prior chunks stay in place; the record carries the failure.
                if let Err(mark_err) = self.store.fail_sync(file_id, &e.to_string()).await {
                    warn!(path, error = %mark_err, "failed to record sync failure");
                }
                Err(e)
            },
        }
    }
}

struct SyncInner {
    tx: mpsc::Sender<String>,
    queued: DashMap<String, ()>,
    backoff: DashMap<String, (u32, Instant)>,
}

/// Handle for enqueueing reconciles. The disabled variant (file-only mode)
/// drops every event.
#[derive(Clone)]
pub struct SyncHandle {
    inner: Option<Arc<SyncInner>>,
}

impl SyncHandle {
    #[must_use]
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Queue a path for reconciliation. Duplicate events for a path already
    /// queued coalesce; a full queue drops the event (the sweep retries it).
    pub fn enqueue(&self, path: &str) {
        let Some(inner) = &self.inner else { return };
        if inner.queued.insert(path.to_string(), ()).is_some() {
            return;
        }
        if let Err(e) = inner.tx.try_send(path.to_string()) {
            inner.queued.remove(path);
            warn!(path, error = %e, "sync queue full, dropping event until next sweep");
        }
    }

    /// Whether a file's reconcile is still pending or in flight.
    #[must_use]
    pub fn is_pending(&self, path: &str) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.queued.contains_key(path))
    }

    /// Number of paths currently queued.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.queued.len())
    }
}

/// Background sync service: worker pool plus periodic sweep.
pub struct SyncService;

impl SyncService {
    /// Spawn workers and the sweep task; returns the enqueue handle.
    pub(crate) fn spawn(reconciler: Arc<Reconciler>, shutdown: CancellationToken) -> SyncHandle {
        let (tx, rx) = mpsc::channel::<String>(reconciler.cfg.sync_queue_capacity);
        let inner = Arc::new(SyncInner {
            tx,
            queued: DashMap::new(),
            backoff: DashMap::new(),
        });
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker in 0..reconciler.cfg.sync_workers.max(1) {
            let rx = Arc::clone(&rx);
            let inner = Arc::clone(&inner);
            let reconciler = Arc::clone(&reconciler);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let path = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        path = async { rx.lock().await.recv().await } => match path {
                            Some(path) => path,
                            None => break,
                        },
                    };
                    inner.queued.remove(&path);
                    match reconciler.reconcile(&path, &shutdown).await {
                        Ok(_) => {
                            inner.backoff.remove(&path);
                        },
                        Err(e) => {
                            let attempts = inner
                                .backoff
                                .get(&path)
                                .map(|entry| entry.0)
                                .unwrap_or(0)
                                .saturating_add(1);
                            let delay =
                                (BACKOFF_BASE * 2u32.pow(attempts.min(8))).min(BACKOFF_CAP);
                            inner
                                .backoff
                                .insert(path.clone(), (attempts, Instant::now() + delay));
                            warn!(worker, path, error = %e, attempts, "reconcile failed");
                        },
                    }
                }
                debug!(worker, "sync worker stopped");
            });
        }

        // Periodic sweep: re-enqueue changed and failed files, catch
        // deletions that bypassed the service.
        {
            let inner = Arc::clone(&inner);
            let reconciler = Arc::clone(&reconciler);
            let shutdown = shutdown.clone();
            let handle = SyncHandle {
                inner: Some(Arc::clone(&inner)),
            };
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(reconciler.cfg.sweep_interval);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {},
                    }
                    sweep(&reconciler, &inner, &handle).await;
                }
            });
        }

        SyncHandle { inner: Some(inner) }
    }
}

async fn sweep(reconciler: &Reconciler, inner: &SyncInner, handle: &SyncHandle) {
    let now = Instant::now();
    let mut enqueued = 0usize;

    let on_disk = reconciler.store_files.list();
    for path in &on_disk {
        if let Some(entry) = inner.backoff.get(path)
            && entry.1 > now
        {
            continue;
        }
        handle.enqueue(path);
        enqueued += 1;
    }

    // Indexed files no longer on disk: reconcile observes the missing file
    // and deletes the index rows.
    match reconciler.store.list_paths().await {
        Ok(indexed) => {
            for path in indexed {
                if !on_disk.contains(&path) {
                    handle.enqueue(&path);
                    enqueued += 1;
                }
            }
        },
        Err(e) => warn!(error = %e, "sweep could not list indexed files"),
    }

    debug!(enqueued, "sweep pass complete");
}
