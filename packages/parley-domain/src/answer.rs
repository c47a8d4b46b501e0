use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Answer {
	pub session_id: String,
	pub message_id: String,
	pub text: String,
	/// Documents backing the answer, in citation order.
	pub cited_doc_ids: Vec<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub generated_at: OffsetDateTime,
}
