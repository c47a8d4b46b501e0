use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A retrieval hit. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
	pub doc_id: String,
	/// Backend whose hit supplied `raw_score` and `snippet_text`.
	pub source_backend: String,
	/// Every backend that returned this document, in merge order.
	pub contributing_backends: Vec<String>,
	pub raw_score: f32,
	pub snippet_text: String,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}
impl Candidate {
	pub fn new(
		doc_id: impl Into<String>,
		source_backend: impl Into<String>,
		raw_score: f32,
		snippet_text: impl Into<String>,
	) -> Self {
		let source_backend = source_backend.into();

		Self {
			doc_id: doc_id.into(),
			contributing_backends: vec![source_backend.clone()],
			source_backend,
			raw_score,
			snippet_text: snippet_text.into(),
			metadata: Map::new(),
		}
	}

	pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
		self.metadata = metadata;

		self
	}

	pub fn content_hash(&self) -> String {
		content_hash(&self.snippet_text)
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RerankedCandidate {
	#[serde(flatten)]
	pub candidate: Candidate,
	/// `None` when the relevance model gave no usable score for this document.
	pub relevance_score: Option<f32>,
	/// 1-based.
	pub rank: u32,
}

/// Stable identity of a snippet's text, insensitive to whitespace layout.
pub fn content_hash(text: &str) -> String {
	let mut hasher = blake3::Hasher::new();

	for (idx, word) in text.split_whitespace().enumerate() {
		if idx > 0 {
			hasher.update(b" ");
		}

		hasher.update(word.as_bytes());
	}

	hasher.finalize().to_hex().to_string()
}
