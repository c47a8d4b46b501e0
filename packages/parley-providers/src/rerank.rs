use serde_json::Value;

use crate::{Error, Result};

/// Scores `docs` against `query` with a cross-encoder rerank endpoint.
///
/// The result is aligned with `docs`. A document the endpoint left out, or scored with a
/// non-numeric value, comes back as `None`.
pub async fn score(
	cfg: &parley_config::ProviderConfig,
	query: &str,
	docs: &[String],
) -> Result<Vec<Option<f32>>> {
	let client = crate::client(cfg.timeout_ms)?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": docs });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(json, docs.len())
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<Option<f32>>> {
	let mut scores = vec![None; doc_count];
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Rerank response is missing results array.".to_string(),
		})?;

	for item in results {
		let index = item.get("index").and_then(|v| v.as_u64()).ok_or_else(|| {
			Error::InvalidResponse { message: "Rerank result missing index.".to_string() }
		})? as usize;

		if index >= doc_count {
			return Err(Error::InvalidResponse {
				message: format!(
					"Rerank result index {index} is out of range for {doc_count} documents."
				),
			});
		}

		scores[index] = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.map(|v| v as f32);
	}

	Ok(scores)
}
