use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::answer::Answer;

pub const PROCESSING_NOTICE: &str = "Processing your message...";
pub const ERROR_NOTICE: &str = "Sorry, there was an error processing your request.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
	Processing,
	Message,
	Error,
}

/// A frame pushed to a client connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundPayload {
	#[serde(rename = "type")]
	pub kind: PayloadKind,
	pub message_id: String,
	pub content: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub cited_doc_ids: Vec<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}
impl OutboundPayload {
	pub fn processing(message_id: impl Into<String>, now: OffsetDateTime) -> Self {
		Self {
			kind: PayloadKind::Processing,
			message_id: message_id.into(),
			content: PROCESSING_NOTICE.to_string(),
			cited_doc_ids: Vec::new(),
			timestamp: now,
		}
	}

	pub fn answer(answer: &Answer) -> Self {
		Self {
			kind: PayloadKind::Message,
			message_id: answer.message_id.clone(),
			content: answer.text.clone(),
			cited_doc_ids: answer.cited_doc_ids.clone(),
			timestamp: answer.generated_at,
		}
	}

	pub fn error(
		message_id: impl Into<String>,
		notice: impl Into<String>,
		now: OffsetDateTime,
	) -> Self {
		Self {
			kind: PayloadKind::Error,
			message_id: message_id.into(),
			content: notice.into(),
			cited_doc_ids: Vec::new(),
			timestamp: now,
		}
	}
}
