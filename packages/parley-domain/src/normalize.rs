//! Deterministic query normalization.
//!
//! Everything here is pure. The optional language-model rewrite lives in the service layer and
//! falls back to [`normalize`] when it fails.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

const GREETINGS: &[&str] = &["hi", "hello", "hey", "yo"];
const ABBREVIATIONS: &[(&str, &str)] = &[
	("w/", "with"),
	("w/o", "without"),
	("anc", "active noise cancelling"),
	("bt", "bluetooth"),
	("rec", "recommendation"),
	("recs", "recommendations"),
	("tws", "true wireless"),
	("wfh", "work from home"),
	("diy", "do it yourself"),
	("pls", "please"),
	("thx", "thanks"),
];
const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
	("earbuds", "audio"),
	("earbud", "audio"),
	("earphones", "audio"),
	("headphones", "audio"),
	("headphone", "audio"),
	("headset", "audio"),
	("speaker", "audio"),
	("speakers", "audio"),
	("soundbar", "audio"),
	("laptop", "computers"),
	("laptops", "computers"),
	("monitor", "computers"),
	("keyboard", "computers"),
	("mouse", "computers"),
	("phone", "phones"),
	("phones", "phones"),
	("smartphone", "phones"),
	("camera", "cameras"),
	("cameras", "cameras"),
	("tv", "televisions"),
	("television", "televisions"),
	("vacuum", "home"),
	("mattress", "home"),
	("blender", "kitchen"),
	("coffee", "kitchen"),
	("espresso", "kitchen"),
];

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"(?i)(?:between\s+\$?(\d+(?:\.\d+)?)\s+and\s+\$?(\d+(?:\.\d+)?))|(?:\$(\d+(?:\.\d+)?)\s*(?:-|to)\s*\$?(\d+(?:\.\d+)?))",
	)
	.expect("Range pattern must compile.")
});
static MAX_RE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"(?i)\b(?:under|below|less than|cheaper than|at most|up to|max(?:imum)?)\s+\$?(\d+(?:\.\d+)?)",
	)
	.expect("Max price pattern must compile.")
});
static MIN_RE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)\b(?:over|above|more than|at least|min(?:imum)?)\s+\$?(\d+(?:\.\d+)?)")
		.expect("Min price pattern must compile.")
});

/// Structured hints extracted from the user's wording.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
	pub price_min: Option<f64>,
	pub price_max: Option<f64>,
	pub category: Option<String>,
}
impl Constraints {
	pub fn is_empty(&self) -> bool {
		self.price_min.is_none() && self.price_max.is_none() && self.category.is_none()
	}

	/// Human-readable summary for prompts, e.g. `price at most $50; category: audio`.
	pub fn describe(&self) -> Option<String> {
		let mut parts = Vec::new();

		match (self.price_min, self.price_max) {
			(Some(min), Some(max)) => parts.push(format!("price between ${min} and ${max}")),
			(None, Some(max)) => parts.push(format!("price at most ${max}")),
			(Some(min), None) => parts.push(format!("price at least ${min}")),
			(None, None) => {},
		}

		if let Some(category) = self.category.as_ref() {
			parts.push(format!("category: {category}"));
		}

		if parts.is_empty() { None } else { Some(parts.join("; ")) }
	}

	/// Whether a hit's metadata is compatible with these constraints.
	///
	/// Only a `price` (number, or a string such as `"$49.99"`) and a `category` string are
	/// checked. A hit that lacks a field, or carries one that does not parse, is kept.
	pub fn admits(&self, metadata: &Map<String, Value>) -> bool {
		if let Some(price) = metadata.get("price").and_then(price_value) {
			if self.price_min.is_some_and(|min| price < min) {
				return false;
			}
			if self.price_max.is_some_and(|max| price > max) {
				return false;
			}
		}
		if let (Some(wanted), Some(category)) =
			(self.category.as_deref(), metadata.get("category").and_then(Value::as_str))
			&& !category.trim().eq_ignore_ascii_case(wanted)
		{
			return false;
		}

		true
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuery {
	pub raw: String,
	/// Query text sent to the retrieval backends.
	pub canonical: String,
	pub constraints: Constraints,
	/// Whether `canonical` came from a context-aware rewrite.
	pub rewritten: bool,
}

pub fn normalize(raw: &str) -> NormalizedQuery {
	let canonical = canonicalize(raw);
	let constraints = extract_constraints(&canonical);

	NormalizedQuery { raw: raw.to_string(), canonical, constraints, rewritten: false }
}

pub fn canonicalize(raw: &str) -> String {
	let cleaned = clean_text(raw);
	let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
	let greeting_len = leading_greeting_len(&tokens);

	if greeting_len < tokens.len() {
		tokens.drain(..greeting_len);
	}

	let expanded: Vec<String> = tokens.into_iter().map(expand_token).collect();

	expanded.join(" ")
}

pub fn extract_constraints(text: &str) -> Constraints {
	let mut constraints = Constraints::default();

	if let Some(caps) = RANGE_RE.captures(text) {
		let low = caps.get(1).or_else(|| caps.get(3)).and_then(|m| m.as_str().parse::<f64>().ok());
		let high = caps.get(2).or_else(|| caps.get(4)).and_then(|m| m.as_str().parse::<f64>().ok());

		if let (Some(low), Some(high)) = (low, high) {
			constraints.price_min = Some(low.min(high));
			constraints.price_max = Some(low.max(high));
		}
	}
	if constraints.price_max.is_none() {
		constraints.price_max = first_number(&MAX_RE, text);
	}
	if constraints.price_min.is_none() {
		constraints.price_min = first_number(&MIN_RE, text);
	}

	let lowered = text.to_lowercase();

	constraints.category = lowered
		.split(|ch: char| !ch.is_alphanumeric())
		.filter(|word| !word.is_empty())
		.find_map(|word| {
			CATEGORY_KEYWORDS
				.iter()
				.find(|(keyword, _)| *keyword == word)
				.map(|(_, category)| (*category).to_string())
		});

	constraints
}

fn price_value(value: &Value) -> Option<f64> {
	match value {
		Value::Number(number) => number.as_f64(),
		Value::String(raw) => raw.trim().trim_start_matches('$').replace(',', "").parse().ok(),
		_ => None,
	}
}

fn first_number(pattern: &Regex, text: &str) -> Option<f64> {
	pattern.captures(text).and_then(|caps| caps.get(1)).and_then(|m| m.as_str().parse().ok())
}

fn clean_text(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	let mut last: Option<char> = None;

	for ch in raw.nfkc() {
		if is_zero_width(ch) {
			continue;
		}

		let ch = if ch.is_control() { ' ' } else { ch };

		// Collapse "!!!" and "???" but keep a single mark.
		if matches!(ch, '!' | '?' | '.') && last == Some(ch) {
			continue;
		}

		out.push(ch);

		last = Some(ch);
	}

	out
}

fn is_zero_width(ch: char) -> bool {
	matches!(
		ch,
		'\u{00AD}' | '\u{034F}' | '\u{180E}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}'
			| '\u{FEFF}'
	)
}

fn leading_greeting_len(tokens: &[&str]) -> usize {
	let Some(first) = tokens.first() else {
		return 0;
	};

	if !GREETINGS.contains(&bare_word(first).as_str()) {
		return 0;
	}
	if tokens.get(1).map(|next| bare_word(next) == "there").unwrap_or(false) {
		return 2;
	}

	1
}

fn bare_word(token: &str) -> String {
	token.trim_matches(|ch: char| matches!(ch, ',' | '!' | '.' | '?' | ':' | ';')).to_lowercase()
}

fn expand_token(token: &str) -> String {
	let core = token.trim_end_matches(|ch: char| matches!(ch, ',' | '!' | '.' | '?' | ';' | ':'));
	let suffix = &token[core.len()..];
	let lowered = core.to_lowercase();

	match ABBREVIATIONS.iter().find(|(short, _)| *short == lowered) {
		Some((_, long)) => format!("{long}{suffix}"),
		None => token.to_string(),
	}
}
