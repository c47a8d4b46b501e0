pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error("Invalid stored data: {0}")]
	InvalidData(String),
	#[error("Conflict: {0}")]
	Conflict(String),
}
