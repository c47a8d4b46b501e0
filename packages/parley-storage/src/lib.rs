pub mod db;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod schema;
pub mod sessions;

mod error;

pub use error::{Error, Result};

use std::{future::Future, pin::Pin};

use time::OffsetDateTime;

use parley_domain::{
	ledger::{Admission, ProcessingRecord, ProcessingResult},
	session::Session,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Keyed session persistence with optimistic concurrency.
pub trait SessionStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Option<Session>>>;

	fn find_by_connection<'a>(
		&'a self,
		connection_id: &'a str,
	) -> BoxFuture<'a, Result<Option<Session>>>;

	/// Returns `false` when a session with the same id already exists.
	fn insert<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>>;

	/// Stores `session` only if the stored version still equals `session.version`.
	///
	/// On success the stored copy carries `session.version + 1`. Returns `false` on a version
	/// mismatch or when the session no longer exists.
	fn update_if_version<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>>;

	/// Deletes sessions that have been disconnected since before `disconnected_before`.
	fn delete_expired<'a>(
		&'a self,
		disconnected_before: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>>;
}

/// Per-message processing records keyed by `message_id`.
pub trait LedgerStore
where
	Self: Send + Sync,
{
	/// Atomically admits the first caller for `message_id`.
	///
	/// An `in_progress` record whose lease ended before `now` is taken over by exactly one
	/// caller.
	fn begin<'a>(
		&'a self,
		message_id: &'a str,
		session_id: &'a str,
		now: OffsetDateTime,
		lease_until: OffsetDateTime,
	) -> BoxFuture<'a, Result<Admission>>;

	/// Moves an `in_progress` record to its terminal status, but only for the owner of `attempt`.
	///
	/// Returns `false` if the record was missing, already terminal, or taken over by a later
	/// attempt.
	fn finish<'a>(
		&'a self,
		message_id: &'a str,
		attempt: u32,
		result: &'a ProcessingResult,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>>;

	fn get<'a>(&'a self, message_id: &'a str) -> BoxFuture<'a, Result<Option<ProcessingRecord>>>;

	/// Deletes records completed (or, if never completed, started) before `cutoff`.
	fn purge_before<'a>(&'a self, cutoff: OffsetDateTime) -> BoxFuture<'a, Result<u64>>;
}
