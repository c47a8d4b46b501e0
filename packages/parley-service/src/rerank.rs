//! Relevance reranking with a raw-score fallback.

use std::time::Duration;

use parley_domain::{
	candidate::{Candidate, RerankedCandidate},
	ranking,
};

use crate::ParleyService;

#[derive(Clone, Debug, PartialEq)]
pub enum RerankMode {
	/// Every candidate received a relevance score.
	Scored,
	/// Some candidates came back without a usable score and were ranked after the scored ones.
	Partial { missing: usize },
	/// The scorer failed; candidates are in raw-score order.
	Fallback { reason: String },
}

#[derive(Clone, Debug)]
pub struct Reranked {
	pub ranked: Vec<RerankedCandidate>,
	pub mode: RerankMode,
}
impl Reranked {
	pub fn is_degraded(&self) -> bool {
		self.mode != RerankMode::Scored
	}
}

impl ParleyService {
	/// Orders `candidates` by relevance to `query` and keeps at most `limit`. Never fails.
	pub async fn rerank(
		&self,
		query: &str,
		candidates: Vec<Candidate>,
		limit: usize,
		budget: Duration,
	) -> Reranked {
		if candidates.is_empty() {
			return Reranked { ranked: Vec::new(), mode: RerankMode::Scored };
		}

		let max_chars = self.cfg.rerank.max_doc_chars as usize;
		let docs: Vec<String> = candidates
			.iter()
			.map(|candidate| truncate_chars(&candidate.snippet_text, max_chars))
			.collect();
		let scores = match tokio::time::timeout(
			budget,
			self.providers.scorer.score(&self.cfg.providers.rerank, query, &docs),
		)
		.await
		{
			Ok(Ok(scores)) => Ok(scores),
			Ok(Err(err)) => Err(err.to_string()),
			Err(_) => Err(format!("timed out after {} ms", budget.as_millis())),
		};

		apply_scores(candidates, scores, limit)
	}
}

/// Pairs scores with candidates, or falls back to raw-score order.
pub fn apply_scores(
	candidates: Vec<Candidate>,
	scores: Result<Vec<Option<f32>>, String>,
	limit: usize,
) -> Reranked {
	let scores = match scores {
		Ok(scores) if scores.len() == candidates.len() => scores,
		Ok(scores) => {
			let reason = format!(
				"scorer returned {} scores for {} documents",
				scores.len(),
				candidates.len()
			);

			return fallback(candidates, reason, limit);
		},
		Err(reason) => return fallback(candidates, reason, limit),
	};
	let scored: Vec<(Candidate, Option<f32>)> = candidates
		.into_iter()
		.zip(scores)
		.map(|(candidate, score)| (candidate, score.and_then(ranking::clamp_relevance)))
		.collect();
	let missing = scored.iter().filter(|(_, score)| score.is_none()).count();

	if missing == scored.len() {
		let candidates = scored.into_iter().map(|(candidate, _)| candidate).collect();

		return fallback(candidates, "scorer returned no usable scores".to_string(), limit);
	}
	if missing > 0 {
		tracing::warn!(missing, "Some candidates have no relevance score.");
	}

	let mode = if missing == 0 { RerankMode::Scored } else { RerankMode::Partial { missing } };

	Reranked { ranked: ranking::rank(scored, limit), mode }
}

fn fallback(candidates: Vec<Candidate>, reason: String, limit: usize) -> Reranked {
	tracing::warn!(reason = %reason, "Reranking degraded to raw-score order.");

	Reranked {
		ranked: ranking::rank_by_raw_score(candidates, limit),
		mode: RerankMode::Fallback { reason },
	}
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
	match text.char_indices().nth(max_chars) {
		Some((end, _)) => text[..end].to_string(),
		None => text.to_string(),
	}
}
