use sqlx::types::Json;
use time::OffsetDateTime;

use parley_domain::{
	ledger::{ProcessingRecord, ProcessingResult, ProcessingStatus},
	session::{ChatTurn, Session},
};

use crate::{Error, Result};

#[derive(Debug, sqlx::FromRow)]
pub struct SessionRow {
	pub session_id: String,
	pub connection_id: Option<String>,
	pub created_at: OffsetDateTime,
	pub last_activity_at: OffsetDateTime,
	pub disconnected_at: Option<OffsetDateTime>,
	pub history: Json<Vec<ChatTurn>>,
	pub version: i64,
}
impl From<SessionRow> for Session {
	fn from(row: SessionRow) -> Self {
		Self {
			session_id: row.session_id,
			connection_id: row.connection_id,
			created_at: row.created_at,
			last_activity_at: row.last_activity_at,
			disconnected_at: row.disconnected_at,
			history: row.history.0,
			version: row.version,
		}
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct ProcessingRow {
	pub message_id: String,
	pub session_id: String,
	pub status: String,
	pub result: Option<Json<ProcessingResult>>,
	pub attempts: i32,
	pub started_at: OffsetDateTime,
	pub lease_expires_at: OffsetDateTime,
	pub completed_at: Option<OffsetDateTime>,
}
impl TryFrom<ProcessingRow> for ProcessingRecord {
	type Error = Error;

	fn try_from(row: ProcessingRow) -> Result<Self> {
		let status = ProcessingStatus::parse(&row.status).ok_or_else(|| {
			Error::InvalidData(format!(
				"Processing record {} has unknown status {}.",
				row.message_id, row.status
			))
		})?;

		Ok(Self {
			message_id: row.message_id,
			session_id: row.session_id,
			status,
			result: row.result.map(|json| json.0),
			attempts: u32::try_from(row.attempts).unwrap_or(0),
			started_at: row.started_at,
			lease_expires_at: row.lease_expires_at,
			completed_at: row.completed_at,
		})
	}
}
