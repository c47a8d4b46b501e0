use std::time::Duration;

use time::OffsetDateTime;

use parley_domain::session::ChatTurn;
use parley_service::Error;

use super::{Harness, RecordingTransport, SpyGenerator, SpyScorer, test_config};

fn harness_with_grace(grace_period_seconds: i64) -> Harness {
	let mut cfg = test_config();

	cfg.sessions.grace_period_seconds = grace_period_seconds;

	Harness::build(
		cfg,
		Vec::new(),
		SpyScorer::new(),
		SpyGenerator::replying("unused"),
		RecordingTransport::default(),
	)
}

#[tokio::test]
async fn connect_creates_a_session_and_is_idempotent() {
	let harness = harness_with_grace(300);
	let registry = &harness.service.registry;
	let first = registry.connect("conn-a", None).await.expect("connect failed");

	assert!(!first.resumed);
	assert_eq!(first.session.connection_id.as_deref(), Some("conn-a"));

	let again = registry.connect("conn-a", None).await.expect("connect failed");

	assert!(again.resumed);
	assert_eq!(again.session.session_id, first.session.session_id);
	assert_eq!(
		registry.connection_for(&first.session.session_id).await.expect("lookup"),
		Some("conn-a".to_string())
	);
}

#[tokio::test]
async fn reconnect_within_grace_resumes_the_session() {
	let harness = harness_with_grace(300);
	let registry = &harness.service.registry;
	let created = registry.connect("conn-a", None).await.expect("connect failed");
	let session_id = created.session.session_id.clone();

	registry
		.append_turns(&session_id, &[ChatTurn::user("hello", OffsetDateTime::now_utc())])
		.await
		.expect("append failed");

	assert_eq!(registry.disconnect("conn-a").await.expect("disconnect"), Some(session_id.clone()));
	assert_eq!(registry.connection_for(&session_id).await.expect("lookup"), None);

	let resumed = registry.connect("conn-b", Some(&session_id)).await.expect("reconnect failed");

	assert!(resumed.resumed);
	assert_eq!(resumed.session.session_id, session_id);
	assert_eq!(resumed.session.connection_id.as_deref(), Some("conn-b"));
	assert!(resumed.session.disconnected_at.is_none());
	assert_eq!(resumed.session.history.len(), 1);
}

#[tokio::test]
async fn reconnect_after_grace_starts_a_new_session() {
	let harness = harness_with_grace(0);
	let registry = &harness.service.registry;
	let created = registry.connect("conn-a", None).await.expect("connect failed");

	registry.disconnect("conn-a").await.expect("disconnect");

	let next = registry
		.connect("conn-b", Some(&created.session.session_id))
		.await
		.expect("reconnect failed");

	assert!(!next.resumed);
	assert_ne!(next.session.session_id, created.session.session_id);
	assert!(next.session.history.is_empty());
}

#[tokio::test]
async fn unknown_resume_id_starts_a_new_session() {
	let harness = harness_with_grace(300);
	let connected =
		harness.service.registry.connect("conn-a", Some("no-such-session")).await.expect("connect");

	assert!(!connected.resumed);
	assert_ne!(connected.session.session_id, "no-such-session");
}

#[tokio::test]
async fn concurrent_appends_lose_no_turns() {
	let harness = harness_with_grace(300);
	let created = harness.service.registry.connect("conn-a", None).await.expect("connect failed");
	let session_id = created.session.session_id;
	let mut tasks = tokio::task::JoinSet::new();

	for idx in 0..10 {
		let service = harness.service.clone();
		let session_id = session_id.clone();

		tasks.spawn(async move {
			let turn = ChatTurn::user(format!("turn {idx}"), OffsetDateTime::now_utc());

			service.registry.append_turns(&session_id, &[turn]).await.expect("append failed");
		});
	}
	while let Some(joined) = tasks.join_next().await {
		joined.expect("task panicked");
	}

	let session =
		harness.service.registry.session(&session_id).await.expect("session").expect("some");

	assert_eq!(session.history.len(), 10);
	assert_eq!(session.version, 10);
}

#[tokio::test]
async fn history_is_capped_at_the_configured_turns() {
	let harness = harness_with_grace(300);
	let created = harness.service.registry.connect("conn-a", None).await.expect("connect failed");
	let now = OffsetDateTime::now_utc();
	let turns: Vec<_> = (0..25).map(|idx| ChatTurn::user(format!("turn {idx}"), now)).collect();
	let session = harness
		.service
		.registry
		.append_turns(&created.session.session_id, &turns)
		.await
		.expect("append failed");

	assert_eq!(session.history.len(), 20);
	assert_eq!(session.history[0].text, "turn 5");
}

#[tokio::test]
async fn appending_to_an_unknown_session_is_not_found() {
	let harness = harness_with_grace(300);
	let err = harness
		.service
		.registry
		.append_turns("missing", &[ChatTurn::user("hi", OffsetDateTime::now_utc())])
		.await
		.expect_err("missing session");

	assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn purge_removes_only_sessions_past_their_grace_period() {
	let harness = harness_with_grace(0);
	let registry = &harness.service.registry;
	let gone = registry.connect("conn-a", None).await.expect("connect failed");
	let live = registry.connect("conn-b", None).await.expect("connect failed");

	registry.disconnect("conn-a").await.expect("disconnect");
	tokio::time::sleep(Duration::from_millis(5)).await;

	assert_eq!(registry.purge_expired().await.expect("purge failed"), 1);
	assert!(registry.session(&gone.session.session_id).await.expect("lookup").is_none());
	assert!(registry.session(&live.session.session_id).await.expect("lookup").is_some());
}
