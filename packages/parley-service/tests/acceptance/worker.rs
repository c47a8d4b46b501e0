use std::{sync::Arc, time::Duration};

use parley_domain::ledger::ProcessingStatus;
use parley_service::{
	ingress::{Ingress, MemoryQueue},
	worker::{self, WorkerState},
};

use super::{
	CONNECTION, Harness, RecordingTransport, SpyGenerator, SpyScorer, earbud_backends, message,
	test_config,
};

async fn wait_until_drained(queue: &MemoryQueue) {
	for _ in 0..500 {
		if queue.pending() == 0 && queue.in_flight() == 0 {
			return;
		}

		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	panic!("Queue was not drained in time.");
}

#[tokio::test]
async fn crashed_admission_is_recovered_once_the_lease_expires() {
	let mut cfg = test_config();

	cfg.pipeline.deadline_ms = 500;
	cfg.delivery.timeout_ms = 100;
	cfg.ledger.lease_seconds = 1;
	cfg.worker.visibility_timeout_ms = 1_500;

	parley_config::validate(&cfg).expect("Lease and visibility settings should be accepted.");

	let visibility = Duration::from_millis(cfg.worker.visibility_timeout_ms);
	let (dense, hybrid) = earbud_backends();
	let harness = Harness::build(
		cfg,
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("Grab [1]."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let queue = Arc::new(MemoryQueue::new(visibility));
	let ingress: Arc<dyn Ingress> = queue.clone();

	queue.enqueue(message("m1", "S1", "best budget wireless earbuds"));

	// A worker took the delivery, was admitted, and died before committing.
	assert_eq!(queue.receive(1).await.expect("receive").len(), 1);

	harness.service.ledger.begin("m1", "S1").await.expect("begin failed");

	let handle =
		tokio::spawn(worker::run_worker(WorkerState { service: harness.service.clone(), ingress }));

	wait_until_drained(&queue).await;
	handle.abort();

	let record = harness.service.ledger.record("m1").await.expect("record").expect("some");

	assert_eq!(record.status, ProcessingStatus::Completed);
	assert_eq!(record.attempts, 2);
	assert_eq!(harness.generator.calls(), 1);
}

#[tokio::test]
async fn worker_processes_and_acknowledges_queued_messages() {
	let (dense, hybrid) = earbud_backends();
	let harness = Harness::build(
		test_config(),
		vec![dense, hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("Grab [1]."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
	let ingress: Arc<dyn Ingress> = queue.clone();

	queue.enqueue(message("m1", "S1", "best budget wireless earbuds"));
	queue.enqueue(message("m2", "S1", "any with good battery life?"));

	let handle =
		tokio::spawn(worker::run_worker(WorkerState { service: harness.service.clone(), ingress }));

	wait_until_drained(&queue).await;
	handle.abort();

	for message_id in ["m1", "m2"] {
		let record =
			harness.service.ledger.record(message_id).await.expect("record").expect("some");

		assert_eq!(record.status, ProcessingStatus::Completed);
	}

	assert_eq!(harness.generator.calls(), 2);
}

#[tokio::test]
async fn duplicate_enqueue_runs_the_pipeline_once() {
	let (dense, hybrid) = earbud_backends();
	let harness = Harness::build(
		test_config(),
		vec![dense.clone(), hybrid],
		SpyScorer::new(),
		SpyGenerator::replying("Grab [1]."),
		RecordingTransport::default(),
	);

	harness.seed_session("S1", Some(CONNECTION)).await;

	let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
	let ingress: Arc<dyn Ingress> = queue.clone();
	let msg = message("m1", "S1", "best budget wireless earbuds");

	queue.enqueue(msg.clone());
	queue.enqueue(msg);

	let handle =
		tokio::spawn(worker::run_worker(WorkerState { service: harness.service.clone(), ingress }));

	wait_until_drained(&queue).await;
	handle.abort();

	assert_eq!(dense.calls(), 1);
	assert_eq!(harness.generator.calls(), 1);

	let session = harness.service.registry.session("S1").await.expect("session").expect("some");

	assert_eq!(session.history.len(), 2);
}

#[tokio::test]
async fn maintenance_purges_expired_state() {
	let mut cfg = test_config();

	cfg.sessions.grace_period_seconds = 0;

	let harness = Harness::build(
		cfg,
		Vec::new(),
		SpyScorer::new(),
		SpyGenerator::replying("unused"),
		RecordingTransport::default(),
	);
	let connected = harness.service.registry.connect("conn-a", None).await.expect("connect");

	harness.service.registry.disconnect("conn-a").await.expect("disconnect");
	tokio::time::sleep(Duration::from_millis(5)).await;
	worker::run_maintenance(&harness.service).await;

	assert!(
		harness
			.service
			.registry
			.session(&connected.session.session_id)
			.await
			.expect("lookup")
			.is_none()
	);
}
