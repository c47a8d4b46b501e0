use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One user utterance as handed over by the ingress collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
	/// Deduplication key for the processing ledger.
	pub message_id: String,
	pub session_id: String,
	pub raw_text: String,
	#[serde(with = "time::serde::rfc3339")]
	pub enqueued_at: OffsetDateTime,
	#[serde(default)]
	pub delivery_attempt_count: u32,
}
