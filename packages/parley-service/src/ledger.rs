//! Idempotency gate in front of the pipeline.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use parley_domain::ledger::{Admission, ProcessingRecord, ProcessingResult};
use parley_storage::LedgerStore;

use crate::Result;

pub struct ProcessingLedger {
	store: Arc<dyn LedgerStore>,
	lease: Duration,
	retention: Duration,
}
impl ProcessingLedger {
	pub fn new(store: Arc<dyn LedgerStore>, lease: Duration, retention: Duration) -> Self {
		Self { store, lease, retention }
	}

	/// Exactly one concurrent caller per `message_id` gets [`Admission::Admitted`].
	pub async fn begin(&self, message_id: &str, session_id: &str) -> Result<Admission> {
		let now = OffsetDateTime::now_utc();
		let admission = self.store.begin(message_id, session_id, now, now + self.lease).await?;

		if let Admission::Admitted { attempt } = &admission
			&& *attempt > 1
		{
			tracing::warn!(
				message_id,
				attempt = *attempt,
				"Taking over a message whose previous lease expired."
			);
		}

		Ok(admission)
	}

	/// Records the terminal result for the run admitted as `attempt`.
	///
	/// Returns `false`, and leaves the record alone, when the record is already terminal or a
	/// later attempt took it over after this one's lease expired.
	pub async fn commit(
		&self,
		message_id: &str,
		attempt: u32,
		result: &ProcessingResult,
	) -> Result<bool> {
		let finished =
			self.store.finish(message_id, attempt, result, OffsetDateTime::now_utc()).await?;

		if !finished {
			tracing::warn!(
				message_id,
				attempt,
				status = result.status().as_str(),
				"Ledger record was missing, already terminal, or owned by a later attempt."
			);
		}

		Ok(finished)
	}

	pub async fn record(&self, message_id: &str) -> Result<Option<ProcessingRecord>> {
		Ok(self.store.get(message_id).await?)
	}

	pub async fn purge_expired(&self) -> Result<u64> {
		let cutoff = OffsetDateTime::now_utc() - self.retention;

		Ok(self.store.purge_before(cutoff).await?)
	}
}
