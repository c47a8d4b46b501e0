//! Grounded answer generation over the reranked top candidates.

use std::{collections::HashSet, sync::LazyLock, time::Duration};

use regex::Regex;
use serde_json::{Value, json};
use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;

use parley_domain::{
	answer::Answer,
	candidate::RerankedCandidate,
	message::InboundMessage,
	normalize::NormalizedQuery,
	session::{ChatTurn, Role},
};

use crate::{Error, ParleyService, Result};

const PERSONA: &str = "\
You are a friendly shopping assistant who recommends products based on what real people say in \
online community discussions. Ground every recommendation in the numbered sources you are given \
and cite them inline as [n]. When the sources do not cover the question, say so plainly instead \
of guessing. Keep answers concise and practical, and mention trade-offs such as price, comfort \
or battery life when the sources discuss them.";

static CITATION_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\[(\d{1,3})\]").expect("Citation pattern must compile."));

/// One numbered source handed to the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextEntry {
	/// 1-based marker the model cites as `[n]`.
	pub number: usize,
	pub doc_id: String,
	pub text: String,
}

impl ParleyService {
	/// Generates the answer for `message` from `top` (already in rank order).
	pub async fn compose(
		&self,
		message: &InboundMessage,
		query: &NormalizedQuery,
		history: &[ChatTurn],
		top: &[RerankedCandidate],
		budget: Duration,
	) -> Result<Answer> {
		let context = build_context(top, self.cfg.compose.context_char_budget as usize);
		let messages = build_messages(message, query, history, &context);
		let text = match tokio::time::timeout(
			budget,
			self.providers.generator.generate(&self.cfg.providers.llm, &messages),
		)
		.await
		{
			Ok(Ok(text)) => text,
			Ok(Err(err)) => return Err(Error::CompositionFailed { message: err.to_string() }),
			Err(_) =>
				return Err(Error::CompositionFailed {
					message: format!("generation timed out after {} ms", budget.as_millis()),
				}),
		};
		let text = text.trim().to_string();

		if text.is_empty() {
			return Err(Error::CompositionFailed {
				message: "generation returned empty text".to_string(),
			});
		}

		let cited_doc_ids = cited_doc_ids(&text, &context);

		tracing::debug!(
			message_id = %message.message_id,
			context = context.len(),
			cited = cited_doc_ids.len(),
			"Answer composed."
		);

		Ok(Answer {
			session_id: message.session_id.clone(),
			message_id: message.message_id.clone(),
			text,
			cited_doc_ids,
			generated_at: OffsetDateTime::now_utc(),
		})
	}
}

/// Numbers the candidates that fit in `char_budget`.
///
/// Lowest-ranked candidates are dropped first. A lone candidate that still exceeds the budget is
/// cut on a grapheme boundary.
pub fn build_context(top: &[RerankedCandidate], char_budget: usize) -> Vec<ContextEntry> {
	let mut kept: Vec<&RerankedCandidate> = top.iter().collect();
	let mut total: usize =
		kept.iter().map(|item| item.candidate.snippet_text.chars().count()).sum();

	while total > char_budget && kept.len() > 1 {
		if let Some(dropped) = kept.pop() {
			total -= dropped.candidate.snippet_text.chars().count();
		}
	}

	kept.into_iter()
		.enumerate()
		.map(|(idx, item)| ContextEntry {
			number: idx + 1,
			doc_id: item.candidate.doc_id.clone(),
			text: truncate_graphemes(&item.candidate.snippet_text, char_budget),
		})
		.collect()
}

/// Context entries referenced as `[n]`, in order of first reference. Falls back to every entry
/// when the answer cites nothing.
pub fn cited_doc_ids(answer: &str, context: &[ContextEntry]) -> Vec<String> {
	let mut seen = HashSet::new();
	let cited: Vec<String> = CITATION_RE
		.captures_iter(answer)
		.filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
		.filter_map(|number| context.iter().find(|entry| entry.number == number))
		.filter(|entry| seen.insert(entry.number))
		.map(|entry| entry.doc_id.clone())
		.collect();

	if cited.is_empty() {
		return context.iter().map(|entry| entry.doc_id.clone()).collect();
	}

	cited
}

fn build_messages(
	message: &InboundMessage,
	query: &NormalizedQuery,
	history: &[ChatTurn],
	context: &[ContextEntry],
) -> Vec<Value> {
	let mut messages = vec![json!({ "role": "system", "content": PERSONA })];

	for turn in history {
		let role = match turn.role {
			Role::System => "system",
			Role::User => "user",
			Role::Assistant => "assistant",
		};

		messages.push(json!({ "role": role, "content": turn.text }));
	}

	messages.push(json!({ "role": "system", "content": render_sources(context) }));

	if query.rewritten {
		messages.push(json!({
			"role": "system",
			"content": format!("The user's message was interpreted as: {}", query.canonical),
		}));
	}
	if let Some(constraints) = query.constraints.describe() {
		messages.push(json!({
			"role": "system",
			"content": format!("User constraints: {constraints}."),
		}));
	}

	messages.push(json!({ "role": "user", "content": message.raw_text.trim() }));

	messages
}

fn render_sources(context: &[ContextEntry]) -> String {
	if context.is_empty() {
		return "No community discussions matched this question.".to_string();
	}

	let mut out = String::from("Relevant community discussions:");

	for entry in context {
		out.push_str(&format!("\n\n[{}] {}", entry.number, entry.text));
	}

	out
}

fn truncate_graphemes(text: &str, max_chars: usize) -> String {
	let mut out = String::new();
	let mut used = 0;

	for grapheme in text.graphemes(true) {
		let width = grapheme.chars().count();

		if used + width > max_chars {
			break;
		}

		out.push_str(grapheme);

		used += width;
	}

	out
}
