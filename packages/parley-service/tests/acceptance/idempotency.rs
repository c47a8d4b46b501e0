use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;

use parley_domain::ledger::{Admission, ProcessingResult, ProcessingStatus};
use parley_service::{
	VectorBackend,
	delivery::DeliveryOutcome,
	ledger::ProcessingLedger,
	pipeline::{HandleOutcome, Stage},
};
use parley_storage::{LedgerStore, memory::MemoryLedgerStore};

use super::{
	CONNECTION, Harness, RecordingTransport, SpyGenerator, SpyScorer, earbud_backends, message,
	test_config,
};

#[tokio::test]
async fn concurrent_begin_admits_exactly_one_caller() {
	let ledger = Arc::new(ProcessingLedger::new(
		Arc::new(MemoryLedgerStore::new()),
		time::Duration::seconds(60),
		time::Duration::hours(1),
	));
	let mut tasks = tokio::task::JoinSet::new();

	for _ in 0..32 {
		let ledger = ledger.clone();

		tasks.spawn(async move { ledger.begin("m-dup", "S1").await.expect("begin failed") });
	}

	let mut admitted = 0;
	let mut in_progress = 0;

	while let Some(joined) = tasks.join_next().await {
		match joined.expect("task panicked") {
			Admission::Admitted { attempt } => {
				assert_eq!(attempt, 1);

				admitted += 1;
			},
			Admission::AlreadyInProgress => in_progress += 1,
			Admission::AlreadyDone(record) => panic!("Unexpected terminal record {record:?}."),
		}
	}

	assert_eq!(admitted, 1);
	assert_eq!(in_progress, 31);
}

#[tokio::test]
async fn redelivered_message_replays_without_recomputing() {
	let (dense, hybrid) = earbud_backends();
	let backends: Vec<Arc<dyn VectorBackend>> = vec![dense.clone(), hybrid.clone()];
	let harness = Harness::build(
		test_config(),
		backends,
		SpyScorer::new(),
		SpyGenerator::replying("Grab [1]."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let msg = message("m1", "S1", "best budget wireless earbuds");
	let first = harness.service.handle_message(&msg).await.expect("first delivery failed");
	let HandleOutcome::Processed(report) = first else {
		panic!("First delivery must run the pipeline.");
	};

	assert_eq!(report.stage, Stage::Completed);

	let second = harness.service.handle_message(&msg).await.expect("second delivery failed");

	match second {
		HandleOutcome::Replayed { status, delivery } => {
			assert_eq!(status, ProcessingStatus::Completed);
			assert_eq!(delivery, Some(DeliveryOutcome::Delivered));
		},
		other => panic!("Expected a replay, got {other:?}."),
	}

	assert_eq!(dense.calls(), 1);
	assert_eq!(hybrid.calls(), 1);
	assert_eq!(harness.scorer_calls(), 1);
	assert_eq!(harness.generator.calls(), 1);

	let frames = harness.transport.frames();

	assert_eq!(frames.len(), 2);
	assert_eq!(frames[0].1, frames[1].1);

	let session = harness.service.registry.session("S1").await.expect("session").expect("some");

	assert_eq!(session.history.len(), 2);
}

#[tokio::test]
async fn concurrent_deliveries_run_the_pipeline_once() {
	let (dense, hybrid) = earbud_backends();
	let mut generator = SpyGenerator::replying("Grab [1].");

	generator.delay = Some(Duration::from_millis(100));

	let harness = Harness::build(
		test_config(),
		vec![dense, hybrid],
		SpyScorer::new(),
		generator,
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let msg = message("m1", "S1", "best budget wireless earbuds");
	let (left, right) = tokio::join!(
		harness.service.handle_message(&msg),
		harness.service.handle_message(&msg)
	);
	let outcomes = [left.expect("left failed"), right.expect("right failed")];
	let processed =
		outcomes.iter().filter(|outcome| matches!(outcome, HandleOutcome::Processed(_))).count();
	let skipped = outcomes
		.iter()
		.filter(|outcome| matches!(outcome, HandleOutcome::InProgressElsewhere))
		.count();

	assert_eq!(processed, 1);
	assert_eq!(skipped, 1);
	assert_eq!(harness.generator.calls(), 1);
}

#[tokio::test]
async fn expired_lease_is_taken_over_by_the_next_delivery() {
	let (dense, hybrid) = earbud_backends();
	let harness = Harness::build(
		test_config(),
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("Grab [1]."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	// A worker admitted the message and died before committing.
	let past = OffsetDateTime::now_utc() - time::Duration::minutes(10);

	harness.ledger.begin("m1", "S1", past, past + time::Duration::seconds(60)).await.expect("begin");

	let outcome = harness
		.service
		.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
		.await
		.expect("handle_message failed");

	assert!(matches!(outcome, HandleOutcome::Processed(_)));

	let record = harness.service.ledger.record("m1").await.expect("record").expect("some");

	assert_eq!(record.attempts, 2);
	assert!(matches!(record.result, Some(ProcessingResult::Answered { .. })));
}

#[tokio::test]
async fn superseded_run_cannot_commit_over_the_takeover() {
	let mut cfg = test_config();

	cfg.ledger.lease_seconds = 1;
	cfg.compose.timeout_ms = 3_000;

	assert!(parley_config::validate(&cfg).is_err());

	let (dense, hybrid) = earbud_backends();
	let mut generator =
		SpyGenerator::scripted(vec![Ok("Grab [1].".to_string()), Ok("Try [2].".to_string())]);

	generator.delay = Some(Duration::from_millis(1_500));

	let harness = Harness::build(
		cfg,
		vec![dense, hybrid],
		SpyScorer::new(),
		generator,
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let msg = message("m1", "S1", "best budget wireless earbuds");
	let takeover = async {
		tokio::time::sleep(Duration::from_millis(1_200)).await;

		harness.service.handle_message(&msg).await
	};
	let (first, second) = tokio::join!(harness.service.handle_message(&msg), takeover);

	assert!(matches!(first.expect("first failed"), HandleOutcome::Processed(_)));
	assert!(matches!(second.expect("second failed"), HandleOutcome::Processed(_)));

	let record = harness.service.ledger.record("m1").await.expect("record").expect("some");

	assert_eq!(record.attempts, 2);

	match record.result {
		Some(ProcessingResult::Answered { answer }) => assert_eq!(answer.text, "Try [2]."),
		other => panic!("Expected the takeover's answer, got {other:?}."),
	}
}
