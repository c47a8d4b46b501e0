//! Vector index adapters behind [`VectorBackend`].

use std::{sync::Arc, time::Duration};

use parley_config::{Backend, Config, EmbeddingProviderConfig};
use parley_domain::{candidate::Candidate, normalize::Constraints};
use parley_providers::{SearchHit, qdrant::QdrantSearch, weaviate};

use crate::{BackendQuery, BoxFuture, EmbeddingProvider, Error, Result, VectorBackend};

/// Dense search: embeds the query, then runs a nearest-neighbour query.
pub struct QdrantBackend {
	name: String,
	timeout: Duration,
	search: QdrantSearch,
	embedding: Arc<dyn EmbeddingProvider>,
	embedding_cfg: EmbeddingProviderConfig,
}
impl QdrantBackend {
	pub fn new(
		cfg: &Backend,
		embedding: Arc<dyn EmbeddingProvider>,
		embedding_cfg: EmbeddingProviderConfig,
	) -> Result<Self> {
		Ok(Self {
			name: cfg.name.clone(),
			timeout: Duration::from_millis(cfg.timeout_ms),
			search: QdrantSearch::new(cfg)?,
			embedding,
			embedding_cfg,
		})
	}
}
impl VectorBackend for QdrantBackend {
	fn name(&self) -> &str {
		&self.name
	}

	fn timeout(&self) -> Duration {
		self.timeout
	}

	fn search<'a>(&'a self, query: &'a BackendQuery) -> BoxFuture<'a, Result<Vec<Candidate>>> {
		Box::pin(async move {
			let texts = vec![query.text.clone()];
			let vectors = self.embedding.embed(&self.embedding_cfg, &texts).await?;
			let Some(vector) = vectors.into_iter().next() else {
				return Err(Error::Provider {
					message: "Embedding provider returned no vector.".to_string(),
				});
			};
			let hits = self.search.search(vector, query.top_k).await?;

			Ok(into_candidates(&self.name, hits, &query.constraints))
		})
	}
}

/// Hybrid keyword and vector search through Weaviate's GraphQL API.
pub struct WeaviateBackend {
	cfg: Backend,
}
impl WeaviateBackend {
	pub fn new(cfg: &Backend) -> Self {
		Self { cfg: cfg.clone() }
	}
}
impl VectorBackend for WeaviateBackend {
	fn name(&self) -> &str {
		&self.cfg.name
	}

	fn timeout(&self) -> Duration {
		Duration::from_millis(self.cfg.timeout_ms)
	}

	fn search<'a>(&'a self, query: &'a BackendQuery) -> BoxFuture<'a, Result<Vec<Candidate>>> {
		Box::pin(async move {
			let hits = weaviate::hybrid_search(&self.cfg, &query.text, query.top_k).await?;

			Ok(into_candidates(&self.cfg.name, hits, &query.constraints))
		})
	}
}

/// Builds one backend per `[[backends]]` entry, in configured order.
pub fn from_config(
	cfg: &Config,
	embedding: Arc<dyn EmbeddingProvider>,
) -> Result<Vec<Arc<dyn VectorBackend>>> {
	cfg.backends
		.iter()
		.map(|backend| -> Result<Arc<dyn VectorBackend>> {
			match backend.kind.as_str() {
				"qdrant" => Ok(Arc::new(QdrantBackend::new(
					backend,
					embedding.clone(),
					cfg.providers.embedding.clone(),
				)?)),
				"weaviate" => Ok(Arc::new(WeaviateBackend::new(backend))),
				other => Err(Error::InvalidRequest {
					message: format!("Unsupported backend kind {other:?} for {}.", backend.name),
				}),
			}
		})
		.collect()
}

/// Converts hits, dropping those whose metadata contradicts the query's constraints.
fn into_candidates(
	backend: &str,
	hits: Vec<SearchHit>,
	constraints: &Constraints,
) -> Vec<Candidate> {
	let total = hits.len();
	let candidates: Vec<Candidate> = hits
		.into_iter()
		.filter(|hit| constraints.admits(&hit.metadata))
		.map(|hit| Candidate::new(hit.id, backend, hit.score, hit.text).with_metadata(hit.metadata))
		.collect();

	if candidates.len() < total {
		tracing::debug!(
			backend,
			dropped = total - candidates.len(),
			"Hits filtered out by query constraints."
		);
	}

	candidates
}
