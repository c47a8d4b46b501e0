//! Operator alerts for pipeline runs that end in `Failed`.

use serde::Serialize;
use time::OffsetDateTime;

use parley_domain::ledger::FailureReason;

use crate::{BoxFuture, pipeline::Stage};

#[derive(Clone, Debug, Serialize)]
pub struct Alert {
	pub message_id: String,
	pub session_id: String,
	/// Stage that was running when the pipeline failed.
	pub stage: Stage,
	pub reason: FailureReason,
	pub detail: String,
	#[serde(with = "time::serde::rfc3339")]
	pub raised_at: OffsetDateTime,
}

/// Fire-and-forget alert sink. Implementations swallow their own errors.
pub trait Alerter
where
	Self: Send + Sync,
{
	fn alert<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, ()>;
}

/// Writes alerts to the log only.
pub struct LogAlerter;
impl Alerter for LogAlerter {
	fn alert<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, ()> {
		Box::pin(async move {
			tracing::error!(
				message_id = %alert.message_id,
				session_id = %alert.session_id,
				stage = ?alert.stage,
				reason = alert.reason.as_str(),
				detail = %alert.detail,
				"Pipeline failed."
			);
		})
	}
}

/// Posts alerts as JSON to a webhook, after logging them.
pub struct WebhookAlerter {
	url: String,
	timeout_ms: u64,
}
impl WebhookAlerter {
	pub fn new(url: String, timeout_ms: u64) -> Self {
		Self { url, timeout_ms }
	}
}
impl Alerter for WebhookAlerter {
	fn alert<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, ()> {
		Box::pin(async move {
			LogAlerter.alert(alert).await;

			let body = match serde_json::to_value(alert) {
				Ok(body) => body,
				Err(err) => {
					tracing::warn!(error = %err, "Failed to encode alert.");

					return;
				},
			};

			if let Err(err) =
				parley_providers::alert::post_webhook(&self.url, self.timeout_ms, &body).await
			{
				tracing::warn!(
					error = %err,
					message_id = %alert.message_id,
					"Alert webhook failed."
				);
			}
		})
	}
}
