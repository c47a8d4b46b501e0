//! The per-message state machine and the ledger gate in front of it.

use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use parley_domain::{
	answer::Answer,
	candidate::RerankedCandidate,
	ledger::{Admission, FailureReason, ProcessingResult, ProcessingStatus},
	message::InboundMessage,
	normalize::NormalizedQuery,
	payload::{ERROR_NOTICE, OutboundPayload},
	session::ChatTurn,
};

use crate::{
	Error, ParleyService, Result, alert::Alert, delivery::DeliveryOutcome, rerank::RerankMode,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
	Received,
	Normalizing,
	Retrieving,
	Reranking,
	Composing,
	Delivering,
	Completed,
	Failed,
}

/// A non-fatal condition the run recovered from.
#[derive(Clone, Debug, PartialEq)]
pub enum Degradation {
	NormalizationDegraded,
	/// The hypothetical-answer search text could not be generated.
	ExpansionDegraded,
	RetrievalPartial { failed_backends: Vec<String> },
	RerankDegraded { mode: RerankMode },
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageFailure {
	pub stage: Stage,
	pub reason: FailureReason,
	pub detail: String,
}

/// What one admitted run did.
#[derive(Clone, Debug)]
pub struct PipelineReport {
	pub message_id: String,
	pub session_id: String,
	/// `Completed` or `Failed` once the run returns.
	pub stage: Stage,
	pub failure: Option<StageFailure>,
	pub degradations: Vec<Degradation>,
	/// Candidates left after the cross-backend merge.
	pub candidate_count: usize,
	/// Reranked order, best first.
	pub ranked_doc_ids: Vec<String>,
	pub answer: Option<Answer>,
	/// Outcome of the last frame sent for this run: the answer, or the error notice.
	pub delivery: Option<DeliveryOutcome>,
}
impl PipelineReport {
	fn new(message: &InboundMessage) -> Self {
		Self {
			message_id: message.message_id.clone(),
			session_id: message.session_id.clone(),
			stage: Stage::Received,
			failure: None,
			degradations: Vec::new(),
			candidate_count: 0,
			ranked_doc_ids: Vec::new(),
			answer: None,
			delivery: None,
		}
	}

	/// The ledger record this run commits.
	pub fn to_result(&self) -> ProcessingResult {
		match (self.stage, self.answer.as_ref()) {
			(Stage::Completed, Some(answer)) =>
				ProcessingResult::Answered { answer: answer.clone() },
			_ => ProcessingResult::Failed {
				reason: self
					.failure
					.as_ref()
					.map(|failure| failure.reason)
					.unwrap_or(FailureReason::Internal),
				notice: ERROR_NOTICE.to_string(),
			},
		}
	}

	fn enter(&mut self, stage: Stage) {
		tracing::debug!(message_id = %self.message_id, stage = ?stage, "Entering stage.");

		self.stage = stage;
	}
}

#[derive(Clone, Debug)]
pub enum HandleOutcome {
	/// This call ran the pipeline and committed its result.
	Processed(PipelineReport),
	/// Another worker holds the message.
	InProgressElsewhere,
	/// The message was already terminal; its stored result was sent again.
	Replayed { status: ProcessingStatus, delivery: Option<DeliveryOutcome> },
}

/// Pipeline-wide time limit.
#[derive(Clone, Copy, Debug)]
struct Deadline {
	at: Instant,
}
impl Deadline {
	fn after(limit: Duration) -> Self {
		Self { at: Instant::now() + limit }
	}

	fn remaining(&self) -> Option<Duration> {
		let left = self.at.saturating_duration_since(Instant::now());

		if left.is_zero() { None } else { Some(left) }
	}

	/// A stage timeout shortened to what is left of the deadline.
	fn clamp(&self, stage_timeout: Duration) -> Option<Duration> {
		self.remaining().map(|left| left.min(stage_timeout))
	}

	fn expired(&self) -> bool {
		self.remaining().is_none()
	}
}

impl ParleyService {
	/// Runs `message` through the ledger gate and, if admitted, the pipeline.
	///
	/// Returns an error only when the ledger itself is unavailable; the caller must then leave
	/// the delivery unacknowledged.
	pub async fn handle_message(&self, message: &InboundMessage) -> Result<HandleOutcome> {
		match self.ledger.begin(&message.message_id, &message.session_id).await? {
			Admission::AlreadyInProgress => {
				tracing::info!(
					message_id = %message.message_id,
					"Message is being processed by another worker."
				);

				Ok(HandleOutcome::InProgressElsewhere)
			},
			Admission::AlreadyDone(record) => {
				tracing::info!(
					message_id = %message.message_id,
					status = record.status.as_str(),
					"Replaying stored result for a redelivered message."
				);

				let payload = match record.result.as_ref() {
					Some(ProcessingResult::Answered { answer }) =>
						Some(OutboundPayload::answer(answer)),
					Some(ProcessingResult::Failed { notice, .. }) => Some(OutboundPayload::error(
						&record.message_id,
						notice.as_str(),
						OffsetDateTime::now_utc(),
					)),
					None => None,
				};
				let delivery = match payload {
					Some(payload) => Some(self.deliver(&message.session_id, &payload).await),
					None => None,
				};

				Ok(HandleOutcome::Replayed { status: record.status, delivery })
			},
			Admission::Admitted { attempt } => {
				tracing::debug!(message_id = %message.message_id, attempt, "Message admitted.");

				let report = self.run_pipeline(message).await;

				self.ledger.commit(&message.message_id, attempt, &report.to_result()).await?;

				Ok(HandleOutcome::Processed(report))
			},
		}
	}

	/// Normalize, retrieve, rerank, compose, deliver. Always ends in `Completed` or `Failed`.
	pub async fn run_pipeline(&self, message: &InboundMessage) -> PipelineReport {
		let deadline = Deadline::after(Duration::from_millis(self.cfg.pipeline.deadline_ms));
		let mut report = PipelineReport::new(message);

		report.enter(Stage::Normalizing);

		let session = match self.registry.session(&message.session_id).await {
			Ok(Some(session)) => session,
			Ok(None) =>
				return self
					.fail(report, FailureReason::SessionNotFound, "Session is unknown.".to_string())
					.await,
			Err(err) => return self.fail(report, FailureReason::Internal, err.to_string()).await,
		};
		let history = session.recent_turns(self.cfg.pipeline.history_turns as usize).to_vec();
		let Some(budget) =
			deadline.clamp(Duration::from_millis(self.cfg.pipeline.rewrite_timeout_ms))
		else {
			return self.deadline_exceeded(report).await;
		};
		let normalized = self.normalize_query(&message.raw_text, &history, budget).await;

		if normalized.degraded {
			report.degradations.push(Degradation::NormalizationDegraded);
		}

		let query = normalized.query;

		report.enter(Stage::Retrieving);

		let Some(budget) = deadline.clamp(Duration::from_millis(self.cfg.pipeline.hyde_timeout_ms))
		else {
			return self.deadline_exceeded(report).await;
		};
		let expansion = self.expand_query(&query, budget).await;

		if expansion.degraded {
			report.degradations.push(Degradation::ExpansionDegraded);
		}

		let Some(budget) = deadline.remaining() else {
			return self.deadline_exceeded(report).await;
		};
		let retrieved = match self
			.retrieve_expanded(&query, expansion.hypothetical.as_deref(), budget)
			.await
		{
			Ok(retrieved) => retrieved,
			Err(err) => {
				let reason = if deadline.expired() {
					FailureReason::Timeout
				} else {
					FailureReason::RetrievalExhausted
				};

				return self.fail(report, reason, err.to_string()).await;
			},
		};

		if retrieved.is_partial() {
			report.degradations.push(Degradation::RetrievalPartial {
				failed_backends: retrieved
					.failures
					.iter()
					.map(|failure| failure.backend.clone())
					.collect(),
			});
		}

		report.candidate_count = retrieved.candidates.len();
		report.enter(Stage::Reranking);

		let Some(budget) = deadline.clamp(Duration::from_millis(self.cfg.rerank.timeout_ms)) else {
			return self.deadline_exceeded(report).await;
		};
		let reranked = self
			.rerank(&query.canonical, retrieved.candidates, self.cfg.rerank.limit as usize, budget)
			.await;

		if reranked.is_degraded() {
			report.degradations.push(Degradation::RerankDegraded { mode: reranked.mode.clone() });
		}

		report.ranked_doc_ids =
			reranked.ranked.iter().map(|item| item.candidate.doc_id.clone()).collect();
		report.enter(Stage::Composing);

		let top_k = (self.cfg.compose.top_k as usize).min(reranked.ranked.len());
		let top = &reranked.ranked[..top_k];
		let answer = match self.compose_within(message, &query, &history, top, deadline).await {
			Ok(answer) => answer,
			Err(err) => {
				let reason = if deadline.expired() {
					FailureReason::Timeout
				} else {
					FailureReason::CompositionFailed
				};

				return self.fail(report, reason, err.to_string()).await;
			},
		};
		let turns = [
			ChatTurn::user(message.raw_text.trim(), OffsetDateTime::now_utc()),
			ChatTurn::assistant(answer.text.clone(), answer.generated_at),
		];

		if let Err(err) = self.registry.append_turns(&message.session_id, &turns).await {
			tracing::warn!(
				error = %err,
				session_id = %message.session_id,
				"Failed to persist conversation history."
			);
		}

		report.answer = Some(answer.clone());
		report.enter(Stage::Delivering);

		let delivery = self.deliver(&message.session_id, &OutboundPayload::answer(&answer)).await;

		report.delivery = Some(delivery.clone());

		if let DeliveryOutcome::DeliveryFailed { reason } = delivery {
			return self.fail(report, FailureReason::DeliveryFailed, reason).await;
		}

		report.stage = Stage::Completed;

		tracing::info!(
			message_id = %report.message_id,
			candidates = report.candidate_count,
			cited = answer.cited_doc_ids.len(),
			degradations = report.degradations.len(),
			delivery = ?report.delivery,
			"Message processed."
		);

		report
	}

	/// One composition attempt, then one retry with half the context if allowed.
	async fn compose_within(
		&self,
		message: &InboundMessage,
		query: &NormalizedQuery,
		history: &[ChatTurn],
		top: &[RerankedCandidate],
		deadline: Deadline,
	) -> Result<Answer> {
		let stage_timeout = Duration::from_millis(self.cfg.compose.timeout_ms);
		let Some(budget) = deadline.clamp(stage_timeout) else {
			return Err(Error::CompositionFailed { message: "deadline exceeded".to_string() });
		};
		let err = match self.compose(message, query, history, top, budget).await {
			Ok(answer) => return Ok(answer),
			Err(err) => err,
		};
		let reduced = top.len() / 2;

		if !self.cfg.compose.retry_with_reduced_context || reduced == 0 {
			return Err(err);
		}

		let Some(budget) = deadline.clamp(stage_timeout) else {
			return Err(err);
		};

		tracing::warn!(
			error = %err,
			message_id = %message.message_id,
			context = reduced,
			"Composition failed; retrying with reduced context."
		);

		self.compose(message, query, history, &top[..reduced], budget).await
	}

	async fn deadline_exceeded(&self, report: PipelineReport) -> PipelineReport {
		let detail = format!(
			"Pipeline deadline of {} ms exceeded before {:?}.",
			self.cfg.pipeline.deadline_ms, report.stage
		);

		self.fail(report, FailureReason::Timeout, detail).await
	}

	/// Sends the error notice (best-effort), raises an alert, and marks the run failed.
	async fn fail(
		&self,
		mut report: PipelineReport,
		reason: FailureReason,
		detail: String,
	) -> PipelineReport {
		let stage = report.stage;

		if reason != FailureReason::DeliveryFailed {
			let notice =
				OutboundPayload::error(&report.message_id, ERROR_NOTICE, OffsetDateTime::now_utc());

			report.delivery = Some(self.deliver(&report.session_id, &notice).await);
		}

		self.raise_alert(&Alert {
			message_id: report.message_id.clone(),
			session_id: report.session_id.clone(),
			stage,
			reason,
			detail: detail.clone(),
			raised_at: OffsetDateTime::now_utc(),
		})
		.await;

		report.failure = Some(StageFailure { stage, reason, detail });
		report.stage = Stage::Failed;

		report
	}
}
