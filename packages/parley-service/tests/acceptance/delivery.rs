use time::OffsetDateTime;

use parley_domain::{
	ledger::{FailureReason, ProcessingStatus},
	payload::OutboundPayload,
};
use parley_service::{
	SendOutcome,
	delivery::DeliveryOutcome,
	pipeline::{HandleOutcome, Stage},
};

use super::{
	CONNECTION, Harness, RecordingTransport, SpyGenerator, SpyScorer, earbud_backends, message,
	test_config,
};

fn harness(transport: RecordingTransport) -> Harness {
	let (dense, hybrid) = earbud_backends();

	Harness::build(
		test_config(),
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("Grab [1]."),
		transport,
	)
}

fn processing_frame() -> OutboundPayload {
	OutboundPayload::processing("m1", OffsetDateTime::now_utc())
}

#[tokio::test]
async fn disconnected_session_still_commits_completed() {
	let harness = harness(RecordingTransport::default());

	harness.seed_session("S1", Some(CONNECTION)).await;
	harness.service.registry.disconnect(CONNECTION).await.expect("disconnect");

	let outcome = harness
		.service
		.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
		.await
		.expect("handle_message failed");
	let HandleOutcome::Processed(report) = outcome else {
		panic!("Expected a processed run.");
	};

	assert_eq!(report.stage, Stage::Completed);
	assert_eq!(report.delivery, Some(DeliveryOutcome::ConnectionGone));
	assert!(harness.transport.frames().is_empty());

	let record = harness.service.ledger.record("m1").await.expect("record").expect("some");

	assert_eq!(record.status, ProcessingStatus::Completed);

	// The answer is kept for the session even though nobody received it.
	let session = harness.service.registry.session("S1").await.expect("session").expect("some");

	assert_eq!(session.history.len(), 2);
}

#[tokio::test]
async fn gone_response_clears_the_stale_connection() {
	let harness = harness(RecordingTransport::scripted(vec![SendOutcome::Gone]));

	harness.seed_session("S1", Some(CONNECTION)).await;

	let outcome = harness.service.deliver("S1", &processing_frame()).await;

	assert_eq!(outcome, DeliveryOutcome::ConnectionGone);
	assert_eq!(harness.service.registry.connection_for("S1").await.expect("lookup"), None);

	let session = harness.service.registry.session("S1").await.expect("session").expect("some");

	assert!(session.disconnected_at.is_some());
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
	let harness = harness(RecordingTransport::scripted(vec![SendOutcome::Failed {
		reason: "502".to_string(),
	}]));

	harness.seed_session("S1", Some(CONNECTION)).await;

	let outcome = harness.service.deliver("S1", &processing_frame()).await;

	assert_eq!(outcome, DeliveryOutcome::Delivered);
	assert_eq!(harness.transport.frames().len(), 2);
}

#[tokio::test]
async fn retry_resolves_the_connection_again() {
	let (dense, hybrid) = earbud_backends();
	let mut cfg = test_config();

	cfg.delivery.retry_backoff_ms = 200;

	let harness = Harness::build(
		cfg,
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("Grab [1]."),
		RecordingTransport::scripted(vec![SendOutcome::Failed { reason: "502".to_string() }]),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let registry = &harness.service.registry;
	let frame = processing_frame();
	// Lands inside the retry backoff.
	let reconnect = async {
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		registry.disconnect(CONNECTION).await.expect("disconnect");
		registry.connect("conn-2", Some("S1")).await.expect("reconnect");
	};
	let (outcome, ()) = tokio::join!(harness.service.deliver("S1", &frame), reconnect);

	assert_eq!(outcome, DeliveryOutcome::Delivered);

	let frames = harness.transport.frames();

	assert_eq!(frames[0].0, CONNECTION);
	assert_eq!(frames[1].0, "conn-2");
}

#[tokio::test]
async fn repeated_transport_failure_fails_the_pipeline() {
	let failed = || SendOutcome::Failed { reason: "connection reset".to_string() };
	let harness = harness(RecordingTransport::scripted(vec![failed(), failed()]));

	harness.seed_session("S1", Some(CONNECTION)).await;

	let outcome = harness
		.service
		.handle_message(&message("m1", "S1", "best budget wireless earbuds"))
		.await
		.expect("handle_message failed");
	let HandleOutcome::Processed(report) = outcome else {
		panic!("Expected a processed run.");
	};

	assert_eq!(report.stage, Stage::Failed);
	assert_eq!(
		report.failure.as_ref().map(|failure| failure.reason),
		Some(FailureReason::DeliveryFailed)
	);
	// Two attempts for the answer, no extra notice over a broken transport.
	assert_eq!(harness.transport.frames().len(), 2);

	let record = harness.service.ledger.record("m1").await.expect("record").expect("some");

	assert_eq!(record.status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn acknowledge_receipt_sends_a_processing_frame() {
	let harness = harness(RecordingTransport::default());

	harness.seed_session("S1", Some(CONNECTION)).await;

	let outcome =
		harness.service.acknowledge_receipt(&message("m1", "S1", "best budget earbuds")).await;
	let frames = harness.transport.frames();

	assert_eq!(outcome, DeliveryOutcome::Delivered);
	assert_eq!(frames[0].1.content, parley_domain::payload::PROCESSING_NOTICE);
}
