//! Process-local stores for single-node deployments and tests.

use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard},
};

use time::OffsetDateTime;

use parley_domain::{
	ledger::{Admission, ProcessingRecord, ProcessingResult, ProcessingStatus},
	session::Session,
};

use crate::{BoxFuture, Error, LedgerStore, Result, SessionStore};

#[derive(Default)]
pub struct MemorySessionStore {
	sessions: Mutex<HashMap<String, Session>>,
}
impl MemorySessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
		self.sessions.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn insert_now(&self, session: &Session) -> Result<bool> {
		let mut sessions = self.lock();

		if sessions.contains_key(&session.session_id) {
			return Ok(false);
		}

		ensure_connection_free(&sessions, session)?;
		sessions.insert(session.session_id.clone(), session.clone());

		Ok(true)
	}

	fn update_now(&self, session: &Session) -> Result<bool> {
		let mut sessions = self.lock();
		let Some(stored) = sessions.get(&session.session_id) else {
			return Ok(false);
		};

		if stored.version != session.version {
			return Ok(false);
		}

		ensure_connection_free(&sessions, session)?;

		let mut next = session.clone();

		next.version += 1;
		sessions.insert(next.session_id.clone(), next);

		Ok(true)
	}
}
impl SessionStore for MemorySessionStore {
	fn get<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Option<Session>>> {
		let session = self.lock().get(session_id).cloned();

		Box::pin(async move { Ok(session) })
	}

	fn find_by_connection<'a>(
		&'a self,
		connection_id: &'a str,
	) -> BoxFuture<'a, Result<Option<Session>>> {
		let session = self
			.lock()
			.values()
			.find(|session| session.connection_id.as_deref() == Some(connection_id))
			.cloned();

		Box::pin(async move { Ok(session) })
	}

	fn insert<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>> {
		let result = self.insert_now(session);

		Box::pin(async move { result })
	}

	fn update_if_version<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>> {
		let result = self.update_now(session);

		Box::pin(async move { result })
	}

	fn delete_expired<'a>(
		&'a self,
		disconnected_before: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		let mut sessions = self.lock();
		let before = sessions.len();

		sessions.retain(|_, session| {
			session.connection_id.is_some()
				|| session.disconnected_at.map(|at| at >= disconnected_before).unwrap_or(true)
		});

		let removed = (before - sessions.len()) as u64;

		Box::pin(async move { Ok(removed) })
	}
}

fn ensure_connection_free(sessions: &HashMap<String, Session>, session: &Session) -> Result<()> {
	let Some(connection_id) = session.connection_id.as_deref() else {
		return Ok(());
	};
	let taken = sessions.values().any(|other| {
		other.session_id != session.session_id
			&& other.connection_id.as_deref() == Some(connection_id)
	});

	if taken {
		return Err(Error::Conflict(format!(
			"Connection {connection_id} is already bound to another session."
		)));
	}

	Ok(())
}

#[derive(Default)]
pub struct MemoryLedgerStore {
	records: Mutex<HashMap<String, ProcessingRecord>>,
}
impl MemoryLedgerStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, ProcessingRecord>> {
		self.records.lock().unwrap_or_else(|err| err.into_inner())
	}
}
impl LedgerStore for MemoryLedgerStore {
	fn begin<'a>(
		&'a self,
		message_id: &'a str,
		session_id: &'a str,
		now: OffsetDateTime,
		lease_until: OffsetDateTime,
	) -> BoxFuture<'a, Result<Admission>> {
		let admission = {
			let mut records = self.lock();

			match records.get_mut(message_id) {
				None => {
					records.insert(
						message_id.to_string(),
						ProcessingRecord {
							message_id: message_id.to_string(),
							session_id: session_id.to_string(),
							status: ProcessingStatus::InProgress,
							result: None,
							attempts: 1,
							started_at: now,
							lease_expires_at: lease_until,
							completed_at: None,
						},
					);

					Admission::Admitted { attempt: 1 }
				},
				Some(record) if record.status.is_terminal() =>
					Admission::AlreadyDone(record.clone()),
				Some(record) if record.lease_expires_at <= now => {
					record.attempts += 1;
					record.started_at = now;
					record.lease_expires_at = lease_until;

					Admission::Admitted { attempt: record.attempts }
				},
				Some(_) => Admission::AlreadyInProgress,
			}
		};

		Box::pin(async move { Ok(admission) })
	}

	fn finish<'a>(
		&'a self,
		message_id: &'a str,
		attempt: u32,
		result: &'a ProcessingResult,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		let finished = {
			let mut records = self.lock();

			match records.get_mut(message_id) {
				Some(record)
					if record.status == ProcessingStatus::InProgress
						&& record.attempts == attempt =>
				{
					record.status = result.status();
					record.result = Some(result.clone());
					record.completed_at = Some(now);

					true
				},
				_ => false,
			}
		};

		Box::pin(async move { Ok(finished) })
	}

	fn get<'a>(&'a self, message_id: &'a str) -> BoxFuture<'a, Result<Option<ProcessingRecord>>> {
		let record = self.lock().get(message_id).cloned();

		Box::pin(async move { Ok(record) })
	}

	fn purge_before<'a>(&'a self, cutoff: OffsetDateTime) -> BoxFuture<'a, Result<u64>> {
		let mut records = self.lock();
		let before = records.len();

		records.retain(|_, record| record.completed_at.unwrap_or(record.started_at) >= cutoff);

		let removed = (before - records.len()) as u64;

		Box::pin(async move { Ok(removed) })
	}
}
