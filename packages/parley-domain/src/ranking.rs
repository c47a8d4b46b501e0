//! Deterministic candidate ordering shared by the reranker and its fallback path.

use std::cmp::Ordering;

use crate::candidate::{Candidate, RerankedCandidate};

/// Maps a model score into `[0, 1]`. Non-finite scores count as missing.
pub fn clamp_relevance(score: f32) -> Option<f32> {
	if !score.is_finite() {
		return None;
	}

	Some(score.clamp(0.0, 1.0))
}

/// Relevance descending with missing scores last, then raw score descending, then doc id.
pub fn compare(
	left: &Candidate,
	left_relevance: Option<f32>,
	right: &Candidate,
	right_relevance: Option<f32>,
) -> Ordering {
	let by_relevance = match (left_relevance, right_relevance) {
		(Some(left), Some(right)) => right.total_cmp(&left),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal,
	};

	by_relevance
		.then_with(|| right.raw_score.total_cmp(&left.raw_score))
		.then_with(|| left.doc_id.cmp(&right.doc_id))
}

/// Sorts scored candidates, keeps the first `limit`, and assigns 1-based ranks.
pub fn rank(mut scored: Vec<(Candidate, Option<f32>)>, limit: usize) -> Vec<RerankedCandidate> {
	scored.sort_by(|(left, left_score), (right, right_score)| {
		compare(left, *left_score, right, *right_score)
	});
	scored.truncate(limit);

	scored
		.into_iter()
		.enumerate()
		.map(|(idx, (candidate, relevance_score))| RerankedCandidate {
			candidate,
			relevance_score,
			rank: idx as u32 + 1,
		})
		.collect()
}

/// Raw-score order used when no relevance judgment is available.
pub fn rank_by_raw_score(candidates: Vec<Candidate>, limit: usize) -> Vec<RerankedCandidate> {
	rank(candidates.into_iter().map(|candidate| (candidate, None)).collect(), limit)
}
