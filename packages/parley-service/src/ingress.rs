//! At-least-once inbound message delivery.

use std::{
	collections::{HashMap, VecDeque},
	sync::{Mutex, MutexGuard},
	time::Duration,
};

use tokio::time::Instant;

use parley_domain::message::InboundMessage;

use crate::{BoxFuture, Error, Result};

/// A received message plus the handle used to acknowledge it.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
	pub receipt: u64,
	pub message: InboundMessage,
}

/// Source of inbound messages. Deliveries that are not acknowledged become visible again.
pub trait Ingress
where
	Self: Send + Sync,
{
	/// Returns up to `max` messages without waiting; an empty batch means nothing is ready.
	fn receive<'a>(&'a self, max: usize) -> BoxFuture<'a, Result<Vec<Envelope>>>;

	fn ack<'a>(&'a self, receipt: u64) -> BoxFuture<'a, Result<()>>;
}

struct InFlight {
	message: InboundMessage,
	visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
	next_receipt: u64,
	ready: VecDeque<InboundMessage>,
	in_flight: HashMap<u64, InFlight>,
}

/// In-process queue with a visibility timeout.
pub struct MemoryQueue {
	state: Mutex<QueueState>,
	visibility_timeout: Duration,
}
impl MemoryQueue {
	pub fn new(visibility_timeout: Duration) -> Self {
		Self { state: Mutex::new(QueueState::default()), visibility_timeout }
	}

	pub fn enqueue(&self, message: InboundMessage) {
		self.lock().ready.push_back(message);
	}

	/// Messages waiting to be received, including expired in-flight ones.
	pub fn pending(&self) -> usize {
		let state = self.lock();
		let now = Instant::now();

		state.ready.len()
			+ state.in_flight.values().filter(|entry| entry.visible_at <= now).count()
	}

	pub fn in_flight(&self) -> usize {
		self.lock().in_flight.len()
	}

	fn lock(&self) -> MutexGuard<'_, QueueState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn receive_now(&self, max: usize) -> Vec<Envelope> {
		let mut state = self.lock();
		let now = Instant::now();
		let mut expired: Vec<u64> = state
			.in_flight
			.iter()
			.filter(|(_, entry)| entry.visible_at <= now)
			.map(|(receipt, _)| *receipt)
			.collect();

		expired.sort_unstable();

		for receipt in expired.into_iter().rev() {
			if let Some(entry) = state.in_flight.remove(&receipt) {
				tracing::debug!(
					message_id = %entry.message.message_id,
					"Unacknowledged delivery became visible again."
				);

				state.ready.push_front(entry.message);
			}
		}

		let mut batch = Vec::new();

		while batch.len() < max {
			let Some(mut message) = state.ready.pop_front() else {
				break;
			};

			message.delivery_attempt_count += 1;
			state.next_receipt += 1;

			let receipt = state.next_receipt;

			state.in_flight.insert(
				receipt,
				InFlight { message: message.clone(), visible_at: now + self.visibility_timeout },
			);
			batch.push(Envelope { receipt, message });
		}

		batch
	}

	fn ack_now(&self, receipt: u64) -> Result<()> {
		match self.lock().in_flight.remove(&receipt) {
			Some(_) => Ok(()),
			None => Err(Error::NotFound {
				message: format!("Receipt {receipt} is unknown or expired."),
			}),
		}
	}
}
impl Ingress for MemoryQueue {
	fn receive<'a>(&'a self, max: usize) -> BoxFuture<'a, Result<Vec<Envelope>>> {
		let batch = self.receive_now(max);

		Box::pin(async move { Ok(batch) })
	}

	fn ack<'a>(&'a self, receipt: u64) -> BoxFuture<'a, Result<()>> {
		let result = self.ack_now(receipt);

		Box::pin(async move { result })
	}
}
