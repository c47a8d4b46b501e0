use sqlx::types::Json;
use time::OffsetDateTime;

use parley_domain::ledger::{Admission, ProcessingRecord, ProcessingResult};

use crate::{BoxFuture, LedgerStore, Result, db::Db, models::ProcessingRow};

pub struct PgLedgerStore {
	db: Db,
}
impl PgLedgerStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}

	async fn begin_record(
		&self,
		message_id: &str,
		session_id: &str,
		now: OffsetDateTime,
		lease_until: OffsetDateTime,
	) -> Result<Admission> {
		let inserted = sqlx::query(
			"\
INSERT INTO processing_records (
	message_id,
	session_id,
	status,
	attempts,
	started_at,
	lease_expires_at
)
VALUES ($1, $2, 'in_progress', 1, $3, $4)
ON CONFLICT (message_id) DO NOTHING",
		)
		.bind(message_id)
		.bind(session_id)
		.bind(now)
		.bind(lease_until)
		.execute(&self.db.pool)
		.await?;

		if inserted.rows_affected() == 1 {
			return Ok(Admission::Admitted { attempt: 1 });
		}

		let taken_over: Option<i32> = sqlx::query_scalar(
			"\
UPDATE processing_records
SET attempts = attempts + 1,
	started_at = $2,
	lease_expires_at = $3
WHERE message_id = $1
	AND status = 'in_progress'
	AND lease_expires_at <= $2
RETURNING attempts",
		)
		.bind(message_id)
		.bind(now)
		.bind(lease_until)
		.fetch_optional(&self.db.pool)
		.await?;

		if let Some(attempts) = taken_over {
			return Ok(Admission::Admitted { attempt: u32::try_from(attempts).unwrap_or(0) });
		}

		match self.fetch_record(message_id).await? {
			Some(record) if record.status.is_terminal() => Ok(Admission::AlreadyDone(record)),
			// Either a live lease or a record purged between the statements.
			_ => Ok(Admission::AlreadyInProgress),
		}
	}

	async fn finish_record(
		&self,
		message_id: &str,
		attempt: u32,
		result: &ProcessingResult,
		now: OffsetDateTime,
	) -> Result<bool> {
		let updated = sqlx::query(
			"\
UPDATE processing_records
SET status = $2,
	result = $3,
	completed_at = $4
WHERE message_id = $1
	AND status = 'in_progress'
	AND attempts = $5",
		)
		.bind(message_id)
		.bind(result.status().as_str())
		.bind(Json(result))
		.bind(now)
		.bind(i32::try_from(attempt).unwrap_or(i32::MAX))
		.execute(&self.db.pool)
		.await?;

		Ok(updated.rows_affected() == 1)
	}

	async fn fetch_record(&self, message_id: &str) -> Result<Option<ProcessingRecord>> {
		let row: Option<ProcessingRow> = sqlx::query_as(
			"\
SELECT
	message_id,
	session_id,
	status,
	result,
	attempts,
	started_at,
	lease_expires_at,
	completed_at
FROM processing_records
WHERE message_id = $1",
		)
		.bind(message_id)
		.fetch_optional(&self.db.pool)
		.await?;

		row.map(ProcessingRecord::try_from).transpose()
	}

	async fn purge_records(&self, cutoff: OffsetDateTime) -> Result<u64> {
		let deleted = sqlx::query(
			"\
DELETE FROM processing_records
WHERE COALESCE(completed_at, started_at) < $1",
		)
		.bind(cutoff)
		.execute(&self.db.pool)
		.await?;

		Ok(deleted.rows_affected())
	}
}
impl LedgerStore for PgLedgerStore {
	fn begin<'a>(
		&'a self,
		message_id: &'a str,
		session_id: &'a str,
		now: OffsetDateTime,
		lease_until: OffsetDateTime,
	) -> BoxFuture<'a, Result<Admission>> {
		Box::pin(self.begin_record(message_id, session_id, now, lease_until))
	}

	fn finish<'a>(
		&'a self,
		message_id: &'a str,
		attempt: u32,
		result: &'a ProcessingResult,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.finish_record(message_id, attempt, result, now))
	}

	fn get<'a>(&'a self, message_id: &'a str) -> BoxFuture<'a, Result<Option<ProcessingRecord>>> {
		Box::pin(self.fetch_record(message_id))
	}

	fn purge_before<'a>(&'a self, cutoff: OffsetDateTime) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.purge_records(cutoff))
	}
}
