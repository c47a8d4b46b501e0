use sqlx::types::Json;
use time::OffsetDateTime;

use parley_domain::session::Session;

use crate::{BoxFuture, Result, SessionStore, db::Db, models::SessionRow};

const SELECT_SESSION: &str = "\
SELECT session_id, connection_id, created_at, last_activity_at, disconnected_at, history, version
FROM chat_sessions";

pub struct PgSessionStore {
	db: Db,
}
impl PgSessionStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}

	async fn fetch_one(&self, column: &str, value: &str) -> Result<Option<Session>> {
		let sql = format!("{SELECT_SESSION}\nWHERE {column} = $1");
		let row: Option<SessionRow> =
			sqlx::query_as(&sql).bind(value).fetch_optional(&self.db.pool).await?;

		Ok(row.map(Session::from))
	}

	async fn insert_session(&self, session: &Session) -> Result<bool> {
		let result = sqlx::query(
			"\
INSERT INTO chat_sessions (
	session_id,
	connection_id,
	created_at,
	last_activity_at,
	disconnected_at,
	history,
	version
)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (session_id) DO NOTHING",
		)
		.bind(session.session_id.as_str())
		.bind(session.connection_id.as_deref())
		.bind(session.created_at)
		.bind(session.last_activity_at)
		.bind(session.disconnected_at)
		.bind(Json(&session.history))
		.bind(session.version)
		.execute(&self.db.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	async fn update_session(&self, session: &Session) -> Result<bool> {
		let result = sqlx::query(
			"\
UPDATE chat_sessions
SET connection_id = $2,
	last_activity_at = $3,
	disconnected_at = $4,
	history = $5,
	version = version + 1
WHERE session_id = $1
	AND version = $6",
		)
		.bind(session.session_id.as_str())
		.bind(session.connection_id.as_deref())
		.bind(session.last_activity_at)
		.bind(session.disconnected_at)
		.bind(Json(&session.history))
		.bind(session.version)
		.execute(&self.db.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	async fn delete_disconnected(&self, disconnected_before: OffsetDateTime) -> Result<u64> {
		let result = sqlx::query(
			"\
DELETE FROM chat_sessions
WHERE connection_id IS NULL
	AND disconnected_at < $1",
		)
		.bind(disconnected_before)
		.execute(&self.db.pool)
		.await?;

		Ok(result.rows_affected())
	}
}
impl SessionStore for PgSessionStore {
	fn get<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Option<Session>>> {
		Box::pin(self.fetch_one("session_id", session_id))
	}

	fn find_by_connection<'a>(
		&'a self,
		connection_id: &'a str,
	) -> BoxFuture<'a, Result<Option<Session>>> {
		Box::pin(self.fetch_one("connection_id", connection_id))
	}

	fn insert<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.insert_session(session))
	}

	fn update_if_version<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.update_session(session))
	}

	fn delete_expired<'a>(
		&'a self,
		disconnected_before: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.delete_disconnected(disconnected_before))
	}
}
