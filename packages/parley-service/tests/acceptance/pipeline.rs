use std::{sync::Arc, time::Duration};

use parley_domain::{
	ledger::{FailureReason, ProcessingResult, ProcessingStatus},
	payload::{ERROR_NOTICE, PayloadKind},
	session::Role,
};
use parley_service::{
	VectorBackend,
	delivery::DeliveryOutcome,
	pipeline::{Degradation, HandleOutcome, Stage},
	rerank::RerankMode,
};

use super::{
	CONNECTION, Harness, RecordingTransport, SpyGenerator, SpyScorer, StubBackend,
	earbud_backends, message, test_config,
};

fn processed(outcome: HandleOutcome) -> parley_service::pipeline::PipelineReport {
	match outcome {
		HandleOutcome::Processed(report) => report,
		other => panic!("Expected a processed run, got {other:?}."),
	}
}

#[tokio::test]
async fn budget_earbuds_query_is_answered_from_merged_and_reranked_sources() {
	let (dense, hybrid) = earbud_backends();
	let backends: Vec<Arc<dyn VectorBackend>> = vec![dense.clone(), hybrid.clone()];
	let harness = Harness::build(
		test_config(),
		backends,
		SpyScorer::new(),
		SpyGenerator::replying("Start with [2]; [1] is close behind. Skip [9]."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let msg = message("m-earbuds", "S1", "best budget wireless earbuds");
	let report =
		processed(harness.service.handle_message(&msg).await.expect("handle_message failed"));

	assert_eq!(report.stage, Stage::Completed);
	assert_eq!(report.candidate_count, 7);
	assert!(report.ranked_doc_ids.len() <= 5);
	assert!(report.degradations.is_empty());

	// Budget-related snippets are scored highest, ties broken by raw score.
	assert_eq!(&report.ranked_doc_ids[..3], &["d1", "d3", "d6"]);

	let answer = report.answer.clone().expect("answer");
	let top_k = &report.ranked_doc_ids[..3];

	assert_eq!(answer.cited_doc_ids, vec!["d3", "d1"]);
	assert!(answer.cited_doc_ids.iter().all(|doc_id| top_k.contains(doc_id)));
	assert_eq!(report.delivery, Some(DeliveryOutcome::Delivered));

	let frames = harness.transport.frames();

	assert_eq!(frames.len(), 1);
	assert_eq!(frames[0].0, CONNECTION);
	assert_eq!(frames[0].1.kind, PayloadKind::Message);
	assert_eq!(frames[0].1.content, answer.text);

	let record = harness.service.ledger.record("m-earbuds").await.expect("record").expect("some");

	assert_eq!(record.status, ProcessingStatus::Completed);
	assert_eq!(record.result, Some(ProcessingResult::Answered { answer: answer.clone() }));

	let session = harness.service.registry.session("S1").await.expect("session").expect("some");
	let roles: Vec<_> = session.history.iter().map(|turn| turn.role).collect();

	assert_eq!(roles, vec![Role::User, Role::Assistant]);
	assert_eq!(session.history[0].text, "best budget wireless earbuds");
	assert_eq!(dense.calls(), 1);
	assert_eq!(hybrid.calls(), 1);
}

#[tokio::test]
async fn only_top_k_sources_reach_the_prompt() {
	let (dense, hybrid) = earbud_backends();
	let harness = Harness::build(
		test_config(),
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("No markers in this answer."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let report = processed(
		harness
			.service
			.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
			.await
			.expect("handle_message failed"),
	);
	let answer = report.answer.expect("answer");
	let prompts = harness.generator.prompts.lock().expect("prompts lock").clone();
	let sources = prompts[0]
		.iter()
		.filter_map(|message| message["content"].as_str())
		.find(|content| content.starts_with("Relevant community discussions:"))
		.expect("sources message")
		.to_string();

	// Without markers every context source is cited, in rank order.
	assert_eq!(answer.cited_doc_ids, report.ranked_doc_ids[..3].to_vec());
	assert!(sources.contains("[3]"));
	assert!(!sources.contains("[4]"));
}

#[tokio::test]
async fn rerank_timeout_falls_back_to_raw_score_order() {
	let (dense, hybrid) = earbud_backends();
	let mut cfg = test_config();

	cfg.rerank.timeout_ms = 50;

	let harness = Harness::build(
		cfg,
		vec![dense, hybrid],
		SpyScorer::slow(Duration::from_secs(5)),
		SpyGenerator::replying("See [1]."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let report = processed(
		harness
			.service
			.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
			.await
			.expect("handle_message failed"),
	);

	assert_eq!(report.stage, Stage::Completed);
	assert_eq!(report.ranked_doc_ids, vec!["d1", "d3", "d2", "d6", "d4"]);
	assert!(report.degradations.iter().any(|degradation| matches!(
		degradation,
		Degradation::RerankDegraded { mode: RerankMode::Fallback { .. } }
	)));
	assert_eq!(harness.scorer_calls(), 1);
}

#[tokio::test]
async fn unknown_session_fails_without_touching_backends() {
	let (dense, hybrid) = earbud_backends();
	let harness = Harness::build(
		test_config(),
		vec![dense.clone(), hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("unused"),
		RecordingTransport::default(),
	);
	let report = processed(
		harness
			.service
			.handle_message(&message("m1", "missing", "best earbuds"))
			.await
			.expect("handle_message failed"),
	);

	assert_eq!(report.stage, Stage::Failed);
	assert_eq!(
		report.failure.as_ref().map(|failure| failure.reason),
		Some(FailureReason::SessionNotFound)
	);
	assert_eq!(dense.calls(), 0);
	assert_eq!(harness.alerts().len(), 1);

	let record = harness.service.ledger.record("m1").await.expect("record").expect("some");

	assert_eq!(record.status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn composition_retries_once_with_reduced_context() {
	let (dense, hybrid) = earbud_backends();
	let harness = Harness::build(
		test_config(),
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::scripted(vec![Err("overloaded".to_string()), Ok("Go with [1].".to_string())]),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let report = processed(
		harness
			.service
			.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
			.await
			.expect("handle_message failed"),
	);

	assert_eq!(report.stage, Stage::Completed);
	assert_eq!(harness.generator.calls(), 2);

	let prompts = harness.generator.prompts.lock().expect("prompts lock").clone();
	let retry_sources = prompts[1]
		.iter()
		.filter_map(|message| message["content"].as_str())
		.find(|content| content.starts_with("Relevant community discussions:"))
		.expect("sources message")
		.to_string();

	assert!(retry_sources.contains("[1]"));
	assert!(!retry_sources.contains("[2]"));
}

#[tokio::test]
async fn composition_failure_sends_notice_alerts_and_commits_failed() {
	let (dense, hybrid) = earbud_backends();
	let harness = Harness::build(
		test_config(),
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("   "),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let report = processed(
		harness
			.service
			.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
			.await
			.expect("handle_message failed"),
	);

	assert_eq!(report.stage, Stage::Failed);

	let failure = report.failure.expect("failure");

	assert_eq!(failure.stage, Stage::Composing);
	assert_eq!(failure.reason, FailureReason::CompositionFailed);

	let frames = harness.transport.frames();

	assert_eq!(frames.len(), 1);
	assert_eq!(frames[0].1.kind, PayloadKind::Error);
	assert_eq!(frames[0].1.content, ERROR_NOTICE);

	let alerts = harness.alerts();

	assert_eq!(alerts.len(), 1);
	assert_eq!(alerts[0].reason, FailureReason::CompositionFailed);
	assert_eq!(alerts[0].stage, Stage::Composing);

	let record = harness.service.ledger.record("m1").await.expect("record").expect("some");

	assert_eq!(record.result, Some(ProcessingResult::Failed {
		reason: FailureReason::CompositionFailed,
		notice: ERROR_NOTICE.to_string(),
	}));

	let session = harness.service.registry.session("S1").await.expect("session").expect("some");

	assert!(session.history.is_empty());
}

#[tokio::test]
async fn failed_rewrite_degrades_to_the_canonical_query() {
	let (dense, hybrid) = earbud_backends();
	let mut cfg = test_config();

	cfg.pipeline.rewrite_enabled = true;

	let harness = Harness::build(
		cfg,
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::scripted(vec![
			Ok("Try [1].".to_string()),
			Err("rate limited".to_string()),
			Ok("Try [2].".to_string()),
		]),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let first = processed(
		harness
			.service
			.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
			.await
			.expect("handle_message failed"),
	);

	// No history yet, so no rewrite was attempted.
	assert_eq!(first.stage, Stage::Completed);
	assert!(first.degradations.is_empty());
	assert_eq!(harness.generator.calls(), 1);

	let second = processed(
		harness
			.service
			.handle_message(&message("m2", "S1", "what about cheaper ones?"))
			.await
			.expect("handle_message failed"),
	);

	assert_eq!(second.stage, Stage::Completed);
	assert!(second.degradations.contains(&Degradation::NormalizationDegraded));
	assert_eq!(harness.generator.calls(), 3);
}

#[tokio::test]
async fn exhausted_deadline_fails_with_timeout() {
	let mut cfg = test_config();

	cfg.pipeline.deadline_ms = 100;

	let slow = StubBackend::hanging("reddit-dense");
	let harness = Harness::build(
		cfg,
		vec![slow],
		SpyScorer::new(),
		SpyGenerator::replying("unused"),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let report = processed(
		harness
			.service
			.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
			.await
			.expect("handle_message failed"),
	);

	assert_eq!(report.stage, Stage::Failed);
	assert_eq!(
		report.failure.as_ref().map(|failure| failure.reason),
		Some(FailureReason::Timeout)
	);
	assert_eq!(harness.generator.calls(), 0);
}
