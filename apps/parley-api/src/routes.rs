use axum::{
	Json, Router,
	extract::{Path, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use parley_domain::{ledger::ProcessingRecord, message::InboundMessage};
use parley_service::Error;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
	pub connection_id: String,
	#[serde(default)]
	pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
	pub session_id: String,
	pub resumed: bool,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
	pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
	pub session_id: String,
	pub text: String,
	#[serde(default)]
	pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageAccepted {
	pub message_id: String,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/connections", post(connect))
		.route("/v1/connections/{connection_id}", delete(disconnect))
		.route("/v1/messages", post(submit_message))
		.route("/v1/messages/{message_id}", get(message_status))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn connect(
	State(state): State<AppState>,
	Json(payload): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
	if payload.connection_id.trim().is_empty() {
		return Err(ApiError::invalid("connection_id must be non-empty.", "$.connection_id"));
	}

	let connected = state
		.service
		.registry
		.connect(&payload.connection_id, payload.session_id.as_deref())
		.await?;

	Ok(Json(ConnectResponse {
		session_id: connected.session.session_id,
		resumed: connected.resumed,
	}))
}

async fn disconnect(
	State(state): State<AppState>,
	Path(connection_id): Path<String>,
) -> Result<Json<DisconnectResponse>, ApiError> {
	let session_id = state.service.registry.disconnect(&connection_id).await?;

	Ok(Json(DisconnectResponse { session_id }))
}

async fn submit_message(
	State(state): State<AppState>,
	Json(payload): Json<MessageRequest>,
) -> Result<(StatusCode, Json<MessageAccepted>), ApiError> {
	if payload.session_id.trim().is_empty() {
		return Err(ApiError::invalid("session_id must be non-empty.", "$.session_id"));
	}
	if payload.text.trim().is_empty() {
		return Err(ApiError::invalid("text must be non-empty.", "$.text"));
	}

	let message_id = payload
		.message_id
		.filter(|message_id| !message_id.trim().is_empty())
		.unwrap_or_else(|| Uuid::new_v4().to_string());
	let message = InboundMessage {
		message_id: message_id.clone(),
		session_id: payload.session_id,
		raw_text: payload.text,
		enqueued_at: OffsetDateTime::now_utc(),
		delivery_attempt_count: 0,
	};
	let receipt = state.service.acknowledge_receipt(&message).await;

	tracing::debug!(message_id = %message_id, outcome = ?receipt, "Receipt acknowledged.");

	state.queue.enqueue(message);

	Ok((StatusCode::ACCEPTED, Json(MessageAccepted { message_id })))
}

async fn message_status(
	State(state): State<AppState>,
	Path(message_id): Path<String>,
) -> Result<Json<ProcessingRecord>, ApiError> {
	match state.service.ledger.record(&message_id).await? {
		Some(record) => Ok(Json(record)),
		None => Err(ApiError::new(
			StatusCode::NOT_FOUND,
			"NOT_FOUND",
			format!("No processing record for message {message_id}."),
			None,
		)),
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), fields }
	}

	fn invalid(message: &str, field: &str) -> Self {
		let fields = Some(vec![field.to_string()]);

		Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message, fields)
	}
}
impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		let (status, code) = match &err {
			Error::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
			Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
			Error::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
			Error::Provider { .. }
			| Error::RetrievalExhausted { .. }
			| Error::CompositionFailed { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
			Error::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
		};

		if status.is_server_error() {
			tracing::error!(error = %err, "Request failed.");
		}

		Self::new(status, code, err.to_string(), None)
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}
