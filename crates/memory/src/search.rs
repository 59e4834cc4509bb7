//! Vector, full-text and hybrid retrieval with reciprocal rank fusion.
use std::{collections::HashMap, sync::Arc};

use tracing::warn;

use crate::{
    embeddings::EmbeddingProvider,
    error::{Error, Result},
    files::Category,
    store::IndexStore,
};

/// Both backends are queried at least this deep so fusion has headroom.
const FUSION_FETCH_FLOOR: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Vector,
    Fulltext,
    #[default]
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "fulltext" => Ok(Self::Fulltext),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::InvalidArgument(format!(
                "unknown search_mode {other:?} (expected vector, fulltext or hybrid)"
            ))),
        }
    }
}

/// Optional narrowing applied inside the index queries.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to these categories.
    pub categories: Option<Vec<Category>>,
    /// Every listed tag must be present on the file.
    pub tags: Vec<String>,
    /// Scope to a single file.
    pub file_path: Option<String>,
}

/// One ranked chunk, carrying enough file context to render a result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: i64,
    pub file_path: String,
    pub title: String,
    pub category: Category,
    pub content: String,
    pub header_path: Vec<String>,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// True when hybrid fell back to a single surviving backend.
    pub degraded: bool,
}

/// Fuse two ranked lists by reciprocal rank: `Σ 1/(k + rank)` over the lists
/// a chunk appears in. Ties break by the smaller best rank, then by chunk id.
fn rrf_fuse(vector: Vec<SearchHit>, fulltext: Vec<SearchHit>, rrf_k: u32) -> Vec<SearchHit> {
    struct Fused {
        hit: SearchHit,
        score: f64,
        best_rank: usize,
    }

    let mut fused: HashMap<i64, Fused> = HashMap::new();
    for list in [vector, fulltext] {
        for (idx, hit) in list.into_iter().enumerate() {
            let rank = idx + 1;
            let term = 1.0 / f64::from(rrf_k + rank as u32);
            fused
                .entry(hit.chunk_id)
                .and_modify(|f| {
                    f.score += term;
                    f.best_rank = f.best_rank.min(rank);
                })
                .or_insert(Fused {
                    hit,
                    score: term,
                    best_rank: rank,
                });
        }
    }

    let mut out: Vec<Fused> = fused.into_values().collect();
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.best_rank.cmp(&b.best_rank))
            .then(a.hit.chunk_id.cmp(&b.hit.chunk_id))
    });
    out.into_iter()
        .map(|f| {
            let mut hit = f.hit;
            hit.score = f.score as f32;
            hit
        })
        .collect()
}

/// Rescale raw cosine similarity from `[-1, 1]` into `[0, 1]`.
fn rescale_similarity(hits: &mut [SearchHit]) {
    for hit in hits {
        hit.score = ((hit.score + 1.0) / 2.0).clamp(0.0, 1.0);
    }
}

pub struct SearchEngine {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    rrf_k: u32,
}

impl SearchEngine {
    #[must_use]
    pub fn new(store: Arc<dyn IndexStore>, embedder: Arc<dyn EmbeddingProvider>, rrf_k: u32) -> Self {
        Self {
            store,
            embedder,
            rrf_k,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(Error::InvalidArgument("empty search query".into()));
        }
        if limit == 0 {
            return Ok(SearchResponse::default());
        }
        let fetch = limit.max(FUSION_FETCH_FLOOR);

        match mode {
            SearchMode::Vector => {
                let mut hits = self.vector_hits(query, fetch, filters).await?;
                rescale_similarity(&mut hits);
                hits.truncate(limit);
                Ok(SearchResponse {
                    hits,
                    degraded: false,
                })
            },
            SearchMode::Fulltext => {
                let mut hits = self.store.fulltext_search(query, fetch, filters).await?;
                hits.truncate(limit);
                Ok(SearchResponse {
                    hits,
                    degraded: false,
                })
            },
            SearchMode::Hybrid => {
                let (vector, fulltext) = tokio::join!(
                    self.vector_hits(query, fetch, filters),
                    self.store.fulltext_search(query, fetch, filters),
                );
                match (vector, fulltext) {
                    (Ok(vector), Ok(fulltext)) => {
                        let mut hits = rrf_fuse(vector, fulltext, self.rrf_k);
                        hits.truncate(limit);
                        Ok(SearchResponse {
                            hits,
                            degraded: false,
                        })
                    },
                    (Err(e), Ok(mut fulltext)) => {
                        warn!(error = %e, "vector search failed, degrading to full-text");
                        fulltext.truncate(limit);
                        Ok(SearchResponse {
                            hits: fulltext,
                            degraded: true,
                        })
                    },
                    (Ok(mut vector), Err(e)) => {
                        warn!(error = %e, "full-text search failed, degrading to vector");
                        rescale_similarity(&mut vector);
                        vector.truncate(limit);
                        Ok(SearchResponse {
                            hits: vector,
                            degraded: true,
                        })
                    },
                    (Err(vector_err), Err(fulltext_err)) => {
                        warn!(error = %fulltext_err, "both search backends failed");
                        Err(vector_err)
                    },
                }
            },
        }
    }

    async fn vector_hits(
        &self,
        query: &str,
        fetch: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = self.embedder.embed_query(query).await?;
        self.store.vector_search(&query_vec, fetch, filters).await
    }
}
