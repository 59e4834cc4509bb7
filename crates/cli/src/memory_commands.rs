use std::sync::Arc;

use {
    anyhow::Context,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use mnemo_memory::{
    config::MemoryConfig,
    embeddings::provider_from_config,
    manager::MemoryManager,
    search::{SearchFilters, SearchMode},
    store_postgres::PgIndexStore,
};

/// Build the manager from the environment: indexed when `USE_DATABASE=true`
/// (pool, migrations, embedding provider), file-only otherwise.
pub async fn build_manager() -> anyhow::Result<(Arc<MemoryManager>, CancellationToken)> {
    let cfg = MemoryConfig::from_env()?;
    let shutdown = CancellationToken::new();

    let manager = if cfg.use_database {
        let url = cfg
            .database_url
            .clone()
            .context("USE_DATABASE=true requires DATABASE_URL")?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .min_connections(5)
            .max_connections(20)
            .connect(&url)
            .await
            .context("connecting to postgres")?;
        mnemo_memory::run_migrations(&pool).await?;

        let embedder = provider_from_config(&cfg)?;
        let store = PgIndexStore::new(pool);
        store.ensure_embedding_dimension(embedder.dimensions()).await?;
        info!(
            provider = embedder.name(),
            model = embedder.model_name(),
            "memory index enabled"
        );
        MemoryManager::indexed(cfg, Arc::new(store), embedder, shutdown.clone()).await?
    } else {
        info!("running in file-only mode (USE_DATABASE=false)");
        MemoryManager::file_only(cfg).await?
    };

    Ok((Arc::new(manager), shutdown))
}

pub async fn init() -> anyhow::Result<()> {
    let (manager, shutdown) = build_manager().await?;
    let created = manager.initialize().await?;
    if created {
        println!("Initialized memory at {}", manager.file_store().root().display());
    } else {
        println!("Memory already initialized.");
    }
    shutdown.cancel();
    Ok(())
}

pub async fn sync() -> anyhow::Result<()> {
    let (manager, shutdown) = build_manager().await?;
    let queued = manager.request_sync_all()?;
    println!("Queued {queued} files for reconciliation…");
    while manager.sync_backlog() > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    let status = manager.status().await?;
    println!(
        "Done: {} files, {} chunks indexed ({} failed).",
        status.files_indexed.unwrap_or(0),
        status.chunks_indexed.unwrap_or(0),
        status.sync_failed.unwrap_or(0),
    );
    shutdown.cancel();
    Ok(())
}

pub async fn search(query: &str, limit: usize, mode: &str, json: bool) -> anyhow::Result<()> {
    let (manager, shutdown) = build_manager().await?;
    let mode: SearchMode = mode.parse()?;
    let resp = manager
        .search(query, mode, limit, &SearchFilters::default())
        .await?;
    shutdown.cancel();

    if resp.hits.is_empty() {
        if json {
            println!("[]");
        } else {
            println!("No results found.");
        }
        return Ok(());
    }

    if json {
        let items: Vec<serde_json::Value> = resp
            .hits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "score": h.score,
                    "file_path": h.file_path,
                    "title": h.title,
                    "header_path": h.header_path,
                    "content": h.content,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        if resp.degraded {
            eprintln!("(degraded: one search backend was unavailable)");
        }
        for hit in &resp.hits {
            let context = if hit.header_path.is_empty() {
                hit.file_path.clone()
            } else {
                format!("{} › {}", hit.file_path, hit.header_path.join(" › "))
            };
            println!("[{:.3}] {context}", hit.score);
            for line in hit.content.lines().take(3) {
                println!("    {line}");
            }
            println!();
        }
    }
    Ok(())
}

pub async fn status(json: bool) -> anyhow::Result<()> {
    let (manager, shutdown) = build_manager().await?;
    let status = manager.status().await?;
    shutdown.cancel();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Mode:        {}", status.mode);
    println!("Initialized: {}", status.initialized);
    println!("Files:       {}", status.total_files);
    if let (Some(files), Some(chunks)) = (status.files_indexed, status.chunks_indexed) {
        println!("Indexed:     {files} files, {chunks} chunks");
    }
    if let Some(failed) = status.sync_failed
        && failed > 0
    {
        println!("Failed sync: {failed}");
    }
    if let Some(model) = &status.embedding_model {
        println!("Embeddings:  {model}");
    }
    Ok(())
}
