//! Bounded worker pool pulling from an [`Ingress`], plus periodic maintenance.

use std::{sync::Arc, time::Duration};

use tokio::{
	sync::{OwnedSemaphorePermit, Semaphore},
	time::Instant,
};

use crate::{
	Error, ParleyService, Result,
	ingress::{Envelope, Ingress},
	pipeline::HandleOutcome,
};

#[derive(Clone)]
pub struct WorkerState {
	pub service: Arc<ParleyService>,
	pub ingress: Arc<dyn Ingress>,
}

/// Runs until the task is dropped or the semaphore is closed.
pub async fn run_worker(state: WorkerState) -> Result<()> {
	let worker = &state.service.cfg.worker;
	let poll_interval = Duration::from_millis(worker.poll_interval_ms);
	let batch_size = worker.batch_size as usize;
	let semaphore = Arc::new(Semaphore::new(worker.concurrency as usize));
	let purge_interval = Duration::from_secs(state.service.cfg.ledger.purge_interval_seconds);
	let mut last_purge = Instant::now();

	tracing::info!(concurrency = worker.concurrency, "Worker started.");

	loop {
		if last_purge.elapsed() >= purge_interval {
			run_maintenance(&state.service).await;

			last_purge = Instant::now();
		}

		let available = semaphore.available_permits().min(batch_size);

		if available == 0 {
			tokio::time::sleep(poll_interval).await;

			continue;
		}

		let envelopes = match state.ingress.receive(available).await {
			Ok(envelopes) => envelopes,
			Err(err) => {
				tracing::error!(error = %err, "Receiving inbound messages failed.");
				tokio::time::sleep(poll_interval).await;

				continue;
			},
		};

		if envelopes.is_empty() {
			tokio::time::sleep(poll_interval).await;

			continue;
		}

		for envelope in envelopes {
			let permit = semaphore.clone().acquire_owned().await.map_err(|_| Error::Conflict {
				message: "Worker pool was shut down.".to_string(),
			})?;

			tokio::spawn(process_envelope(state.clone(), envelope, permit));
		}
	}
}

/// Handles one delivery and acknowledges it once the outcome is durable.
pub async fn process_envelope(
	state: WorkerState,
	envelope: Envelope,
	_permit: OwnedSemaphorePermit,
) {
	let message_id = envelope.message.message_id.clone();

	match state.service.handle_message(&envelope.message).await {
		Ok(outcome) => {
			match &outcome {
				HandleOutcome::Processed(report) => tracing::debug!(
					message_id = %message_id,
					stage = ?report.stage,
					"Pipeline run committed."
				),
				HandleOutcome::InProgressElsewhere => tracing::debug!(
					message_id = %message_id,
					"Delivery skipped; message in progress."
				),
				HandleOutcome::Replayed { status, .. } => tracing::debug!(
					message_id = %message_id,
					status = status.as_str(),
					"Delivery replayed."
				),
			}

			if let Err(err) = state.ingress.ack(envelope.receipt).await {
				tracing::warn!(error = %err, message_id = %message_id, "Acknowledgement failed.");
			}
		},
		Err(err) => {
			// Left unacknowledged so the ingress redelivers it.
			tracing::error!(error = %err, message_id = %message_id, "Message handling failed.");
		},
	}
}

/// Purges expired ledger records and sessions past their grace period.
pub async fn run_maintenance(service: &ParleyService) {
	match service.ledger.purge_expired().await {
		Ok(removed) if removed > 0 => tracing::info!(removed, "Purged expired ledger records."),
		Ok(_) => {},
		Err(err) => tracing::error!(error = %err, "Ledger purge failed."),
	}
	match service.registry.purge_expired().await {
		Ok(removed) if removed > 0 => tracing::info!(removed, "Purged expired sessions."),
		Ok(_) => {},
		Err(err) => tracing::error!(error = %err, "Session purge failed."),
	}
}
