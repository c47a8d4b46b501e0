use std::sync::Arc;

use parley_domain::{
	ledger::{FailureReason, ProcessingResult},
	normalize,
	payload::PayloadKind,
};
use parley_service::{
	Error, VectorBackend,
	pipeline::{Degradation, HandleOutcome, Stage},
};

use super::{
	CONNECTION, Harness, RecordingTransport, SpyGenerator, SpyScorer, StubBackend, candidate,
	message, test_config,
};

fn survivor() -> Arc<StubBackend> {
	StubBackend::answering("reddit-hybrid", vec![
		candidate("h1", "reddit-hybrid", 0.8, "The budget pick survives outages."),
		candidate("h2", "reddit-hybrid", 0.6, "Comfort matters on long flights."),
	])
}

#[tokio::test]
async fn two_failed_backends_still_complete_with_the_survivor() {
	let failing = StubBackend::failing("reddit-dense");
	let hanging = StubBackend::hanging("reddit-archive");
	let backends: Vec<Arc<dyn VectorBackend>> = vec![failing, survivor(), hanging];
	let harness = Harness::build(
		test_config(),
		backends,
		SpyScorer::new(),
		SpyGenerator::replying("Go with [1]."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let outcome = harness
		.service
		.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
		.await
		.expect("handle_message failed");
	let HandleOutcome::Processed(report) = outcome else {
		panic!("Expected a processed run.");
	};

	assert_eq!(report.stage, Stage::Completed);
	assert_eq!(report.candidate_count, 2);
	assert_eq!(report.ranked_doc_ids, vec!["h1", "h2"]);
	assert!(report.degradations.contains(&Degradation::RetrievalPartial {
		failed_backends: vec!["reddit-dense".to_string(), "reddit-archive".to_string()],
	}));
	assert_eq!(report.answer.expect("answer").cited_doc_ids, vec!["h1"]);
}

#[tokio::test]
async fn all_backends_failing_is_retrieval_exhausted() {
	let backends: Vec<Arc<dyn VectorBackend>> =
		vec![StubBackend::failing("reddit-dense"), StubBackend::hanging("reddit-hybrid")];
	let harness = Harness::build(
		test_config(),
		backends,
		SpyScorer::new(),
		SpyGenerator::replying("unused"),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let outcome = harness
		.service
		.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
		.await
		.expect("handle_message failed");
	let HandleOutcome::Processed(report) = outcome else {
		panic!("Expected a processed run.");
	};
	let failure = report.failure.expect("failure");

	assert_eq!(report.stage, Stage::Failed);
	assert_eq!(failure.stage, Stage::Retrieving);
	assert_eq!(failure.reason, FailureReason::RetrievalExhausted);
	assert!(failure.detail.contains("reddit-dense"));
	assert_eq!(harness.scorer_calls(), 0);
	assert_eq!(harness.generator.calls(), 0);

	let frames = harness.transport.frames();

	assert_eq!(frames.len(), 1);
	assert_eq!(frames[0].1.kind, PayloadKind::Error);
	assert_eq!(harness.alerts()[0].reason, FailureReason::RetrievalExhausted);

	let record = harness.service.ledger.record("m1").await.expect("record").expect("some");

	assert!(matches!(
		record.result,
		Some(ProcessingResult::Failed { reason: FailureReason::RetrievalExhausted, .. })
	));
}

#[tokio::test]
async fn retrieve_reports_each_failed_backend() {
	let backends: Vec<Arc<dyn VectorBackend>> =
		vec![StubBackend::failing("reddit-dense"), StubBackend::failing("reddit-hybrid")];
	let harness = Harness::build(
		test_config(),
		backends,
		SpyScorer::new(),
		SpyGenerator::replying("unused"),
		RecordingTransport::default(),
	);
	let query = normalize::normalize("best budget wireless earbuds");
	let err = harness
		.service
		.retrieve(&query, std::time::Duration::from_secs(1))
		.await
		.expect_err("all backends failed");

	match err {
		Error::RetrievalExhausted { failures } => {
			let names: Vec<_> = failures.iter().map(|failure| failure.backend.as_str()).collect();

			assert_eq!(names, vec!["reddit-dense", "reddit-hybrid"]);
		},
		other => panic!("Unexpected error {other:?}."),
	}
}

#[tokio::test]
async fn hypothetical_answer_is_searched_next_to_the_query() {
	let mut cfg = test_config();

	cfg.pipeline.hyde_enabled = true;

	let dense = survivor();
	let harness = Harness::build(
		cfg,
		vec![dense.clone()],
		SpyScorer::new(),
		SpyGenerator::scripted(vec![
			Ok("The EarFun Free 2S is the budget pick.".to_string()),
			Ok("Go with [1].".to_string()),
		]),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let outcome = harness
		.service
		.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
		.await
		.expect("handle_message failed");
	let HandleOutcome::Processed(report) = outcome else {
		panic!("Expected a processed run.");
	};
	let mut texts = dense.query_texts();

	texts.sort();

	assert_eq!(report.stage, Stage::Completed);
	assert!(report.degradations.is_empty());
	assert_eq!(texts, vec![
		"The EarFun Free 2S is the budget pick.".to_string(),
		"best budget wireless earbuds".to_string(),
	]);
	// Both searches return the same two posts.
	assert_eq!(report.candidate_count, 2);
	assert_eq!(harness.generator.calls(), 2);

	let prompts = harness.generator.prompts.lock().expect("prompts lock").clone();
	let hyde_prompt = prompts[0][1]["content"].as_str().unwrap_or_default();

	assert!(hyde_prompt.contains("Question: best budget wireless earbuds"));
}

#[tokio::test]
async fn failed_expansion_falls_back_to_the_canonical_query() {
	let mut cfg = test_config();

	cfg.pipeline.hyde_enabled = true;

	let dense = survivor();
	let harness = Harness::build(
		cfg,
		vec![dense.clone()],
		SpyScorer::new(),
		SpyGenerator::scripted(vec![
			Err("rate limited".to_string()),
			Ok("Go with [1].".to_string()),
		]),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let outcome = harness
		.service
		.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
		.await
		.expect("handle_message failed");
	let HandleOutcome::Processed(report) = outcome else {
		panic!("Expected a processed run.");
	};

	assert_eq!(report.stage, Stage::Completed);
	assert_eq!(report.degradations, vec![Degradation::ExpansionDegraded]);
	assert_eq!(dense.query_texts(), vec!["best budget wireless earbuds".to_string()]);
}

#[tokio::test]
async fn extracted_constraints_reach_every_backend() {
	let dense = survivor();
	let hybrid = StubBackend::answering("reddit-archive", Vec::new());
	let backends: Vec<Arc<dyn VectorBackend>> = vec![dense.clone(), hybrid.clone()];
	let harness = Harness::build(
		test_config(),
		backends,
		SpyScorer::new(),
		SpyGenerator::replying("unused"),
		RecordingTransport::default(),
	);
	let query = normalize::normalize("wireless earbuds under $50");

	harness
		.service
		.retrieve(&query, std::time::Duration::from_secs(1))
		.await
		.expect("retrieve failed");

	for backend in [&dense, &hybrid] {
		let queries = backend.queries.lock().expect("queries lock").clone();

		assert_eq!(queries.len(), 1);
		assert_eq!(queries[0].constraints.price_max, Some(50.0));
		assert_eq!(queries[0].constraints.category.as_deref(), Some("audio"));
	}
}
