use serde_json::Value;

use crate::Result;

/// Posts an alert document to a webhook.
pub async fn post_webhook(url: &str, timeout_ms: u64, body: &Value) -> Result<()> {
	let client = crate::client(timeout_ms)?;

	client.post(url).json(body).send().await?.error_for_status()?;

	Ok(())
}
