//! Pushes frames to whatever connection currently serves a session.

use std::time::Duration;

use time::OffsetDateTime;

use parley_domain::{message::InboundMessage, payload::OutboundPayload};

use crate::{ParleyService, SendOutcome};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
	Delivered,
	/// The session has no live connection. Not an error for the pipeline.
	ConnectionGone,
	DeliveryFailed { reason: String },
}

impl ParleyService {
	/// Sends `payload` to the session's connection.
	///
	/// A transport failure is retried once after the configured backoff, resolving the
	/// connection again first. A "gone" response clears the stale connection.
	pub async fn deliver(&self, session_id: &str, payload: &OutboundPayload) -> DeliveryOutcome {
		let timeout = Duration::from_millis(self.cfg.delivery.timeout_ms);
		let mut last_reason = String::new();

		for attempt in 0..2 {
			if attempt > 0 {
				tokio::time::sleep(Duration::from_millis(self.cfg.delivery.retry_backoff_ms)).await;
			}

			let connection_id = match self.registry.connection_for(session_id).await {
				Ok(Some(connection_id)) => connection_id,
				Ok(None) => {
					tracing::info!(
						session_id,
						message_id = %payload.message_id,
						"No live connection."
					);

					return DeliveryOutcome::ConnectionGone;
				},
				Err(err) => {
					tracing::warn!(error = %err, session_id, "Connection lookup failed.");

					last_reason = err.to_string();

					continue;
				},
			};
			let outcome = tokio::time::timeout(
				timeout,
				self.providers.transport.send(&connection_id, payload),
			)
			.await
			.unwrap_or_else(|_| SendOutcome::Failed {
				reason: format!("send timed out after {} ms", timeout.as_millis()),
			});

			match outcome {
				SendOutcome::Sent => return DeliveryOutcome::Delivered,
				SendOutcome::Gone => {
					tracing::info!(
						session_id,
						connection_id = %connection_id,
						"Connection is gone."
					);

					if let Err(err) =
						self.registry.release_connection(session_id, &connection_id).await
					{
						tracing::warn!(
							error = %err,
							session_id,
							"Failed to clear stale connection."
						);
					}

					return DeliveryOutcome::ConnectionGone;
				},
				SendOutcome::Failed { reason } => {
					tracing::warn!(
						session_id,
						connection_id = %connection_id,
						attempt = attempt + 1,
						reason = %reason,
						"Delivery attempt failed."
					);

					last_reason = reason;
				},
			}
		}

		DeliveryOutcome::DeliveryFailed { reason: last_reason }
	}

	/// Best-effort `processing` frame sent when a message is accepted.
	pub async fn acknowledge_receipt(&self, message: &InboundMessage) -> DeliveryOutcome {
		let payload = OutboundPayload::processing(&message.message_id, OffsetDateTime::now_utc());

		self.deliver(&message.session_id, &payload).await
	}
}
