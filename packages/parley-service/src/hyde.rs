//! Hypothetical-answer query expansion.
//!
//! A short generated answer to the question is embedded and searched next to the canonical
//! query; community posts tend to sit closer to answers than to questions.

use std::time::Duration;

use serde_json::json;

use parley_domain::normalize::NormalizedQuery;

use crate::ParleyService;

const HYDE_INSTRUCTIONS: &str = "\
You are a shopping assistant. Generate concise hypothetical answers to shopping questions. \
Write as if from a Reddit discussion with product recommendations, key features, and practical \
advice. Be brief but informative and focus on the most important points only.";
const HYDE_TEMPERATURE: f32 = 0.5;
const HYDE_MAX_TOKENS: u32 = 200;
const MAX_HYPOTHETICAL_CHARS: usize = 2_000;

#[derive(Clone, Debug, PartialEq)]
pub struct Expansion {
	/// Extra search text, when expansion is enabled and succeeded.
	pub hypothetical: Option<String>,
	/// Expansion was attempted and produced nothing usable.
	pub degraded: bool,
}

impl ParleyService {
	/// Writes a hypothetical answer to `query` for use as a second search text. Never fails.
	pub async fn expand_query(&self, query: &NormalizedQuery, budget: Duration) -> Expansion {
		if !self.cfg.pipeline.hyde_enabled || query.canonical.is_empty() {
			return Expansion { hypothetical: None, degraded: false };
		}

		let mut llm = self.cfg.providers.llm.clone();

		llm.temperature = HYDE_TEMPERATURE;
		llm.max_tokens = Some(HYDE_MAX_TOKENS);

		let messages = vec![
			json!({ "role": "system", "content": HYDE_INSTRUCTIONS }),
			json!({
				"role": "user",
				"content": format!(
					"Given this shopping question, write a brief hypothetical answer with key \
					 product recommendations and main points.\n\nQuestion: {}\n\nHypothetical Answer:",
					query.canonical
				),
			}),
		];
		let reply =
			match tokio::time::timeout(budget, self.providers.generator.generate(&llm, &messages))
				.await
			{
				Ok(Ok(text)) => clean_hypothetical(&text),
				Ok(Err(err)) => {
					tracing::warn!(error = %err, "Query expansion failed.");

					None
				},
				Err(_) => {
					tracing::warn!(
						timeout_ms = budget.as_millis() as u64,
						"Query expansion timed out."
					);

					None
				},
			};

		match reply {
			Some(text) if text != query.canonical =>
				Expansion { hypothetical: Some(text), degraded: false },
			Some(_) => Expansion { hypothetical: None, degraded: false },
			None => Expansion { hypothetical: None, degraded: true },
		}
	}
}

fn clean_hypothetical(text: &str) -> Option<String> {
	let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

	if text.is_empty() {
		return None;
	}

	Some(match text.char_indices().nth(MAX_HYPOTHETICAL_CHARS) {
		Some((end, _)) => text[..end].to_string(),
		None => text,
	})
}
