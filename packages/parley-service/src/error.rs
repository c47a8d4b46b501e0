pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("All retrieval backends failed: {}.", describe_failures(failures))]
	RetrievalExhausted { failures: Vec<BackendFailure> },
	#[error("Composition failed: {message}")]
	CompositionFailed { message: String },
}
impl From<parley_storage::Error> for Error {
	fn from(err: parley_storage::Error) -> Self {
		match err {
			parley_storage::Error::Conflict(message) => Self::Conflict { message },
			parley_storage::Error::InvalidData(message) => Self::Storage { message },
			parley_storage::Error::Sqlx(err) => Self::Storage { message: err.to_string() },
		}
	}
}
impl From<parley_providers::Error> for Error {
	fn from(err: parley_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

/// One backend that produced no candidates for a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendFailure {
	pub backend: String,
	pub reason: String,
}

fn describe_failures(failures: &[BackendFailure]) -> String {
	failures
		.iter()
		.map(|failure| format!("{} ({})", failure.backend, failure.reason))
		.collect::<Vec<_>>()
		.join(", ")
}
