use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::answer::Answer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
	InProgress,
	Completed,
	Failed,
}
impl ProcessingStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::InProgress => "in_progress",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"in_progress" => Some(Self::InProgress),
			"completed" => Some(Self::Completed),
			"failed" => Some(Self::Failed),
			_ => None,
		}
	}

	pub fn is_terminal(self) -> bool {
		!matches!(self, Self::InProgress)
	}
}

/// Why a pipeline run ended in `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
	RetrievalExhausted,
	CompositionFailed,
	DeliveryFailed,
	/// The pipeline-wide deadline ran out.
	Timeout,
	SessionNotFound,
	Internal,
}
impl FailureReason {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::RetrievalExhausted => "retrieval_exhausted",
			Self::CompositionFailed => "composition_failed",
			Self::DeliveryFailed => "delivery_failed",
			Self::Timeout => "timeout",
			Self::SessionNotFound => "session_not_found",
			Self::Internal => "internal",
		}
	}
}

/// What a terminal ledger record replays on redelivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingResult {
	Answered { answer: Answer },
	Failed { reason: FailureReason, notice: String },
}
impl ProcessingResult {
	pub fn status(&self) -> ProcessingStatus {
		match self {
			Self::Answered { .. } => ProcessingStatus::Completed,
			Self::Failed { .. } => ProcessingStatus::Failed,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
	pub message_id: String,
	pub session_id: String,
	pub status: ProcessingStatus,
	pub result: Option<ProcessingResult>,
	/// Number of admissions, including lease takeovers.
	pub attempts: u32,
	#[serde(with = "time::serde::rfc3339")]
	pub started_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub lease_expires_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339::option")]
	pub completed_at: Option<OffsetDateTime>,
}

/// Outcome of the ledger gate for one delivery of a message.
#[derive(Clone, Debug, PartialEq)]
pub enum Admission {
	/// The caller owns this attempt and must commit a terminal status.
	Admitted { attempt: u32 },
	/// Another worker holds a live lease on the message.
	AlreadyInProgress,
	/// The message already reached a terminal status; replay the stored result.
	AlreadyDone(ProcessingRecord),
}
