//! Query normalization with an optional context-aware rewrite.

use std::time::Duration;

use serde_json::{Value, json};

use parley_domain::{
	normalize::{self, NormalizedQuery},
	session::{ChatTurn, Role},
};

use crate::ParleyService;

const REWRITE_INSTRUCTIONS: &str = "\
You turn the latest message of a shopping conversation into a standalone search query. \
Resolve pronouns and references such as \"it\", \"those\" or \"the cheaper one\" using the \
earlier turns. Keep product names, prices and other constraints. If the message already stands \
on its own, return it unchanged. Reply with the query only, without quotes or commentary.";
const MAX_REWRITE_CHARS: usize = 512;

#[derive(Clone, Debug)]
pub struct Normalized {
	pub query: NormalizedQuery,
	/// The rewrite was attempted and fell back to the deterministic query.
	pub degraded: bool,
}

impl ParleyService {
	/// Canonicalizes `raw` and, when there is history to resolve against, asks the language
	/// model for a standalone rewrite. Never fails.
	pub async fn normalize_query(
		&self,
		raw: &str,
		history: &[ChatTurn],
		budget: Duration,
	) -> Normalized {
		let base = normalize::normalize(raw);

		if !self.cfg.pipeline.rewrite_enabled || history.is_empty() || base.canonical.is_empty() {
			return Normalized { query: base, degraded: false };
		}

		let messages = rewrite_messages(history, &base.canonical);
		let rewritten = match tokio::time::timeout(
			budget,
			self.providers.generator.generate(&self.cfg.providers.llm, &messages),
		)
		.await
		{
			Ok(Ok(text)) => clean_rewrite(&text),
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Query rewrite failed; using the canonical query.");

				None
			},
			Err(_) => {
				tracing::warn!(
					timeout_ms = budget.as_millis() as u64,
					"Query rewrite timed out; using the canonical query."
				);

				None
			},
		};
		let Some(rewritten) = rewritten else {
			return Normalized { query: base, degraded: true };
		};

		Normalized { query: merge_rewrite(base, &rewritten), degraded: false }
	}
}

fn rewrite_messages(history: &[ChatTurn], canonical: &str) -> Vec<Value> {
	let mut messages = Vec::with_capacity(history.len() + 2);

	messages.push(json!({ "role": "system", "content": REWRITE_INSTRUCTIONS }));

	for turn in history {
		let role = match turn.role {
			Role::Assistant => "assistant",
			Role::User | Role::System => "user",
		};

		messages.push(json!({ "role": role, "content": turn.text }));
	}

	messages.push(json!({
		"role": "user",
		"content": format!("Rewrite this message as a standalone search query: {canonical}"),
	}));

	messages
}

/// First non-empty line, without surrounding quotes. Overlong output counts as a failed rewrite.
fn clean_rewrite(text: &str) -> Option<String> {
	let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
	let line = line.trim_matches(|ch| matches!(ch, '"' | '\'' | '`')).trim();

	if line.is_empty() || line.chars().count() > MAX_REWRITE_CHARS {
		return None;
	}

	Some(line.to_string())
}

/// Constraints stated in the original wording fill gaps the rewrite left open.
fn merge_rewrite(base: NormalizedQuery, rewritten: &str) -> NormalizedQuery {
	let canonical = normalize::canonicalize(rewritten);
	let mut constraints = normalize::extract_constraints(&canonical);

	if constraints.price_min.is_none() {
		constraints.price_min = base.constraints.price_min;
	}
	if constraints.price_max.is_none() {
		constraints.price_max = base.constraints.price_max;
	}
	if constraints.category.is_none() {
		constraints.category = base.constraints.category;
	}

	NormalizedQuery { raw: base.raw, canonical, constraints, rewritten: true }
}
