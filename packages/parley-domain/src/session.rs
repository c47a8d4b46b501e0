use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	System,
	User,
	Assistant,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::System => "system",
			Self::User => "user",
			Self::Assistant => "assistant",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
	pub role: Role,
	pub text: String,
	#[serde(with = "time::serde::rfc3339")]
	pub at: OffsetDateTime,
}
impl ChatTurn {
	pub fn user(text: impl Into<String>, at: OffsetDateTime) -> Self {
		Self { role: Role::User, text: text.into(), at }
	}

	pub fn assistant(text: impl Into<String>, at: OffsetDateTime) -> Self {
		Self { role: Role::Assistant, text: text.into(), at }
	}
}

/// Durable conversation state keyed by `session_id`.
///
/// A session outlives its connection: disconnecting clears `connection_id` and stamps
/// `disconnected_at`, and the session stays resumable until the grace period runs out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
	pub session_id: String,
	pub connection_id: Option<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub last_activity_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339::option")]
	pub disconnected_at: Option<OffsetDateTime>,
	pub history: Vec<ChatTurn>,
	/// Optimistic concurrency token, bumped by every conditional update.
	pub version: i64,
}
impl Session {
	pub fn new(
		session_id: impl Into<String>,
		connection_id: Option<String>,
		now: OffsetDateTime,
	) -> Self {
		Self {
			session_id: session_id.into(),
			connection_id,
			created_at: now,
			last_activity_at: now,
			disconnected_at: None,
			history: Vec::new(),
			version: 0,
		}
	}

	/// The last `n` turns in chronological order.
	pub fn recent_turns(&self, n: usize) -> &[ChatTurn] {
		let start = self.history.len().saturating_sub(n);

		&self.history[start..]
	}

	pub fn is_connected(&self) -> bool {
		self.connection_id.is_some()
	}

	pub fn is_expired(&self, now: OffsetDateTime, grace: Duration) -> bool {
		match (self.connection_id.as_ref(), self.disconnected_at) {
			(None, Some(disconnected_at)) => disconnected_at + grace <= now,
			_ => false,
		}
	}

	/// Appends turns and keeps at most `max_turns` of the newest ones.
	pub fn push_turns(&mut self, turns: &[ChatTurn], max_turns: usize, now: OffsetDateTime) {
		self.history.extend_from_slice(turns);

		if self.history.len() > max_turns {
			let overflow = self.history.len() - max_turns;

			self.history.drain(..overflow);
		}

		self.last_activity_at = now;
	}
}
