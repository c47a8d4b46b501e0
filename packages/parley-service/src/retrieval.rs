//! Concurrent fan-out over every configured backend, then dedup and merge.

use std::{collections::HashMap, time::Duration};

use tokio::task::JoinSet;

use parley_domain::{
	candidate::{self, Candidate},
	normalize::NormalizedQuery,
};

use crate::{BackendFailure, BackendQuery, Error, ParleyService, Result};

#[derive(Clone, Debug)]
pub struct Retrieved {
	/// Deduplicated, ordered by raw score descending then doc id.
	pub candidates: Vec<Candidate>,
	pub failures: Vec<BackendFailure>,
}
impl Retrieved {
	/// At least one backend failed but another one answered.
	pub fn is_partial(&self) -> bool {
		!self.failures.is_empty()
	}
}

impl ParleyService {
	/// Queries all backends concurrently, each bounded by its own timeout and by `budget`.
	///
	/// Fails with [`Error::RetrievalExhausted`] only when every backend failed.
	pub async fn retrieve(&self, query: &NormalizedQuery, budget: Duration) -> Result<Retrieved> {
		self.retrieve_expanded(query, None, budget).await
	}

	/// Like [`Self::retrieve`], but also searches every backend with `hypothetical`.
	///
	/// A backend counts as failed only when all of its searches failed. Hits are merged in
	/// backend order, canonical query first.
	pub async fn retrieve_expanded(
		&self,
		query: &NormalizedQuery,
		hypothetical: Option<&str>,
		budget: Duration,
	) -> Result<Retrieved> {
		let mut texts = vec![query.canonical.clone()];

		texts.extend(hypothetical.map(str::to_string));

		let variants = texts.len();
		let mut tasks = JoinSet::new();

		for (backend_idx, backend) in self.backends.iter().enumerate() {
			for (variant, text) in texts.iter().enumerate() {
				let backend = backend.clone();
				let backend_query = BackendQuery {
					text: text.clone(),
					constraints: query.constraints.clone(),
					top_k: self.cfg.pipeline.top_k_per_backend,
				};
				let timeout = backend.timeout().min(budget);

				tasks.spawn(async move {
					let search = tokio::time::timeout(timeout, backend.search(&backend_query));
					let outcome = match search.await {
						Ok(Ok(candidates)) => Ok(candidates),
						Ok(Err(err)) => Err(err.to_string()),
						Err(_) => Err(format!("timed out after {} ms", timeout.as_millis())),
					};

					(backend_idx * variants + variant, outcome)
				});
			}
		}

		let mut outcomes: Vec<Option<Result<Vec<Candidate>, String>>> =
			vec![None; self.backends.len() * variants];

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
				Err(err) => tracing::error!(error = %err, "Backend search task aborted."),
			}
		}

		let mut batches = Vec::with_capacity(outcomes.len());
		let mut failures = Vec::new();
		let mut outcomes = outcomes.into_iter();

		for backend in &self.backends {
			let name = backend.name().to_string();
			let mut answered = false;
			let mut reasons = Vec::new();

			for outcome in outcomes.by_ref().take(variants) {
				match outcome {
					Some(Ok(candidates)) => {
						tracing::debug!(
							backend = %name,
							hits = candidates.len(),
							"Backend answered."
						);

						answered = true;

						batches.push(candidates);
					},
					Some(Err(reason)) => reasons.push(reason),
					None => reasons.push("task aborted".to_string()),
				}
			}

			if reasons.is_empty() {
				continue;
			}

			let reason = reasons.join("; ");

			if answered {
				tracing::warn!(
					backend = %name,
					reason = %reason,
					"Expanded backend search failed."
				);
			} else {
				tracing::warn!(backend = %name, reason = %reason, "Backend search failed.");

				failures.push(BackendFailure { backend: name, reason });
			}
		}

		if batches.is_empty() {
			return Err(Error::RetrievalExhausted { failures });
		}

		Ok(Retrieved { candidates: merge_candidates(batches), failures })
	}
}

/// Collapses hits for the same document across backends.
///
/// Two hits are the same document when they share a doc id or their non-blank snippets share a
/// content hash. The merged candidate carries the best raw score (and that hit's snippet), plus
/// every contributing backend in batch order. Batches must be in configured backend order.
pub fn merge_candidates(batches: Vec<Vec<Candidate>>) -> Vec<Candidate> {
	let mut merged: Vec<Candidate> = Vec::new();
	let mut by_doc_id: HashMap<String, usize> = HashMap::new();
	let mut by_hash: HashMap<String, usize> = HashMap::new();

	for hit in batches.into_iter().flatten() {
		// Blank snippets carry no identity of their own.
		let hash = (!hit.snippet_text.trim().is_empty())
			.then(|| candidate::content_hash(&hit.snippet_text));
		let existing = by_doc_id
			.get(&hit.doc_id)
			.or_else(|| hash.as_ref().and_then(|hash| by_hash.get(hash)))
			.copied();
		let Some(slot) = existing else {
			by_doc_id.insert(hit.doc_id.clone(), merged.len());

			if let Some(hash) = hash {
				by_hash.insert(hash, merged.len());
			}

			merged.push(hit);

			continue;
		};
		let current = &mut merged[slot];

		for backend in &hit.contributing_backends {
			if !current.contributing_backends.contains(backend) {
				current.contributing_backends.push(backend.clone());
			}
		}

		by_doc_id.entry(hit.doc_id.clone()).or_insert(slot);

		if let Some(hash) = hash {
			by_hash.entry(hash).or_insert(slot);
		}

		if hit.raw_score > current.raw_score {
			let contributing = std::mem::take(&mut current.contributing_backends);

			*current = Candidate { contributing_backends: contributing, ..hit };
		}
	}

	merged.sort_by(|left, right| {
		right.raw_score.total_cmp(&left.raw_score).then_with(|| left.doc_id.cmp(&right.doc_id))
	});

	merged
}
