//! Scratch Postgres databases for the storage integration suites.
//!
//! The server DSN comes from `PARLEY_PG_DSN`; suites skip themselves when it is unset.

mod error;

pub use error::{Error, Result};

use std::{env, str::FromStr, thread};

use sqlx::{
	ConnectOptions, Connection, Executor,
	postgres::{PgConnectOptions, PgConnection},
};
use uuid::Uuid;

pub const DSN_VAR: &str = "PARLEY_PG_DSN";

/// Databases tried, in order, for CREATE and DROP statements.
const MAINTENANCE_DATABASES: [&str; 2] = ["postgres", "template1"];

/// A uniquely named database dropped on [`ScratchDatabase::dispose`] or, failing that, on drop.
pub struct ScratchDatabase {
	name: String,
	dsn: String,
	maintenance: PgConnectOptions,
	disposed: bool,
}
impl ScratchDatabase {
	/// Creates a fresh database on the server behind `server_dsn`.
	pub async fn provision(server_dsn: &str) -> Result<Self> {
		let server = PgConnectOptions::from_str(server_dsn)
			.map_err(|err| Error::Message(format!("Invalid {DSN_VAR}: {err}.")))?;
		let (maintenance, mut conn) = maintenance_connection(&server).await?;
		let name = format!("parley_scratch_{}", Uuid::new_v4().simple());

		conn.execute(format!(r#"CREATE DATABASE "{name}""#).as_str()).await?;

		let dsn = server.database(&name).to_url_lossy().to_string();

		Ok(Self { name, dsn, maintenance, disposed: false })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Drops the database now and reports failures to the caller.
	pub async fn dispose(mut self) -> Result<()> {
		self.disposed = true;

		drop_database(&self.name, &self.maintenance).await
	}
}
impl Drop for ScratchDatabase {
	fn drop(&mut self) {
		if self.disposed {
			return;
		}

		let name = self.name.clone();
		let maintenance = self.maintenance.clone();
		// The test runtime may be shutting down; use a private one on a plain thread.
		let worker = thread::spawn(move || {
			let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build();
			let outcome = match runtime {
				Ok(runtime) => runtime.block_on(drop_database(&name, &maintenance)),
				Err(err) => Err(Error::Message(err.to_string())),
			};

			if let Err(err) = outcome {
				eprintln!("Leaked scratch database {name}: {err}.");
			}
		});

		let _ = worker.join();
	}
}

/// Provisions a scratch database when `PARLEY_PG_DSN` is set.
///
/// Returns `None` after printing a skip notice naming `suite` otherwise.
pub async fn scratch_from_env(suite: &str) -> Option<ScratchDatabase> {
	let Ok(server_dsn) = env::var(DSN_VAR) else {
		eprintln!("Skipping {suite}; set {DSN_VAR} to run it.");

		return None;
	};

	match ScratchDatabase::provision(&server_dsn).await {
		Ok(db) => Some(db),
		Err(err) => panic!("Failed to provision a scratch database for {suite}: {err}."),
	}
}

async fn maintenance_connection(
	server: &PgConnectOptions,
) -> Result<(PgConnectOptions, PgConnection)> {
	let mut failures = Vec::new();

	for database in MAINTENANCE_DATABASES {
		let options = server.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => failures.push(format!("{database}: {err}")),
		}
	}

	Err(Error::Message(format!("No maintenance database reachable ({}).", failures.join("; "))))
}

async fn drop_database(name: &str, maintenance: &PgConnectOptions) -> Result<()> {
	let mut conn = PgConnection::connect_with(maintenance).await?;

	// Lingering pool connections would block the DROP.
	sqlx::query(
		"SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
		 WHERE datname = $1 AND pid <> pg_backend_pid()",
	)
	.bind(name)
	.execute(&mut conn)
	.await?;
	conn.execute(format!(r#"DROP DATABASE IF EXISTS "{name}""#).as_str()).await?;

	Ok(())
}
