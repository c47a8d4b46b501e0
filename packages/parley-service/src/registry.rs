//! Connection-to-session bookkeeping and per-session conversation history.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use parley_domain::session::{ChatTurn, Session};
use parley_storage::SessionStore;

use crate::{Error, Result};

const MAX_UPDATE_ATTEMPTS: usize = 8;

#[derive(Clone, Debug, PartialEq)]
pub struct Connected {
	pub session: Session,
	/// `true` when the connection attached to a session that already existed.
	pub resumed: bool,
}

pub struct SessionRegistry {
	store: Arc<dyn SessionStore>,
	grace: Duration,
	max_history_turns: usize,
	append_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}
impl SessionRegistry {
	pub fn new(store: Arc<dyn SessionStore>, grace: Duration, max_history_turns: usize) -> Self {
		Self { store, grace, max_history_turns, append_locks: Mutex::new(HashMap::new()) }
	}

	/// Binds `connection_id` to a session.
	///
	/// Reconnecting with a known `resume_session_id` inside the grace period reattaches that
	/// session and replaces any previous connection. Otherwise a fresh session is created.
	/// Repeating a connect for an already bound connection returns the bound session.
	pub async fn connect(
		&self,
		connection_id: &str,
		resume_session_id: Option<&str>,
	) -> Result<Connected> {
		if let Some(session) = self.store.find_by_connection(connection_id).await? {
			return Ok(Connected { session, resumed: true });
		}
		if let Some(session_id) = resume_session_id {
			let now = OffsetDateTime::now_utc();
			let grace = self.grace;
			let resumed = self
				.update_with(session_id, |session| {
					if session.is_expired(now, grace) {
						return false;
					}

					session.connection_id = Some(connection_id.to_string());
					session.disconnected_at = None;
					session.last_activity_at = now;

					true
				})
				.await?;

			if let Some(session) = resumed
				&& session.connection_id.as_deref() == Some(connection_id)
			{
				tracing::info!(session_id, connection_id, "Session resumed.");

				return Ok(Connected { session, resumed: true });
			}

			tracing::info!(session_id, "Requested session is unknown or expired.");
		}

		let session = Session::new(
			Uuid::new_v4().to_string(),
			Some(connection_id.to_string()),
			OffsetDateTime::now_utc(),
		);

		if !self.store.insert(&session).await? {
			return Err(Error::Conflict {
				message: format!("Session {} already exists.", session.session_id),
			});
		}

		tracing::info!(session_id = %session.session_id, connection_id, "Session created.");

		Ok(Connected { session, resumed: false })
	}

	/// Detaches `connection_id`. The session stays resumable for the grace period.
	pub async fn disconnect(&self, connection_id: &str) -> Result<Option<String>> {
		let Some(session) = self.store.find_by_connection(connection_id).await? else {
			return Ok(None);
		};

		self.release_connection(&session.session_id, connection_id).await?;

		tracing::info!(session_id = %session.session_id, connection_id, "Connection closed.");

		Ok(Some(session.session_id))
	}

	/// Clears `connection_id` from the session if it is still the bound connection.
	pub async fn release_connection(&self, session_id: &str, connection_id: &str) -> Result<()> {
		let now = OffsetDateTime::now_utc();

		self.update_with(session_id, |session| {
			if session.connection_id.as_deref() != Some(connection_id) {
				return false;
			}

			session.connection_id = None;
			session.disconnected_at = Some(now);

			true
		})
		.await?;

		Ok(())
	}

	pub async fn session(&self, session_id: &str) -> Result<Option<Session>> {
		Ok(self.store.get(session_id).await?)
	}

	pub async fn connection_for(&self, session_id: &str) -> Result<Option<String>> {
		Ok(self.store.get(session_id).await?.and_then(|session| session.connection_id))
	}

	/// Appends turns to the session history, serialized per session.
	pub async fn append_turns(&self, session_id: &str, turns: &[ChatTurn]) -> Result<Session> {
		let lock = self.append_lock(session_id);
		let _guard = lock.lock().await;
		let max_turns = self.max_history_turns;
		let now = OffsetDateTime::now_utc();
		let updated = self
			.update_with(session_id, |session| {
				session.push_turns(turns, max_turns, now);

				true
			})
			.await?;

		updated.ok_or_else(|| Error::NotFound { message: format!("Session {session_id}.") })
	}

	/// Deletes sessions whose grace period ended.
	pub async fn purge_expired(&self) -> Result<u64> {
		let removed =
			self.store.delete_expired(OffsetDateTime::now_utc() - self.grace).await?;
		let mut locks = self.append_locks.lock().unwrap_or_else(|err| err.into_inner());

		locks.retain(|_, lock| Arc::strong_count(lock) > 1);

		Ok(removed)
	}

	fn append_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.append_locks.lock().unwrap_or_else(|err| err.into_inner());

		locks.entry(session_id.to_string()).or_default().clone()
	}

	/// Read-modify-write with optimistic version checks.
	///
	/// `apply` returns `false` to leave the session untouched. Returns `None` when the session
	/// does not exist.
	async fn update_with<F>(&self, session_id: &str, mut apply: F) -> Result<Option<Session>>
	where
		F: FnMut(&mut Session) -> bool,
	{
		for _ in 0..MAX_UPDATE_ATTEMPTS {
			let Some(mut session) = self.store.get(session_id).await? else {
				return Ok(None);
			};

			if !apply(&mut session) {
				return Ok(Some(session));
			}
			if self.store.update_if_version(&session).await? {
				session.version += 1;

				return Ok(Some(session));
			}

			tracing::debug!(session_id, "Session version moved; retrying update.");
		}

		Err(Error::Conflict {
			message: format!("Session {session_id} kept changing during update."),
		})
	}
}
