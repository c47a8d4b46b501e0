use reqwest::StatusCode;
use serde_json::Value;

use crate::Result;

/// What the connection management endpoint said about one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendStatus {
	Sent,
	/// The connection no longer exists.
	Gone,
	Rejected { status: u16 },
}

/// Posts one frame to `{endpoint}/@connections/{connection_id}`.
pub async fn post_to_connection(
	cfg: &parley_config::Delivery,
	connection_id: &str,
	payload: &Value,
) -> Result<SendStatus> {
	let client = crate::client(cfg.timeout_ms)?;
	let url = format!("{}/@connections/{connection_id}", cfg.endpoint.trim_end_matches('/'));
	let res = client
		.post(url)
		.headers(crate::extra_headers(&cfg.default_headers)?)
		.json(payload)
		.send()
		.await?;

	Ok(classify_status(res.status()))
}

fn classify_status(status: StatusCode) -> SendStatus {
	if status.is_success() {
		return SendStatus::Sent;
	}
	if status == StatusCode::GONE || status == StatusCode::NOT_FOUND {
		return SendStatus::Gone;
	}

	SendStatus::Rejected { status: status.as_u16() }
}
