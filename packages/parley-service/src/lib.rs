pub mod alert;
pub mod backends;
pub mod compose;
pub mod delivery;
pub mod hyde;
pub mod ingress;
pub mod ledger;
pub mod normalize;
pub mod pipeline;
pub mod registry;
pub mod rerank;
pub mod retrieval;
pub mod worker;

mod error;

pub use error::{BackendFailure, Error, Result};
pub use parley_storage::BoxFuture;

use std::{sync::Arc, time::Duration};

use serde_json::Value;

use parley_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use parley_domain::{candidate::Candidate, normalize::Constraints, payload::OutboundPayload};
use parley_providers::transport::SendStatus;
use parley_storage::{LedgerStore, SessionStore};

use crate::{
	alert::{Alert, Alerter, LogAlerter, WebhookAlerter},
	ledger::ProcessingLedger,
	registry::SessionRegistry,
};

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, parley_providers::Result<Vec<Vec<f32>>>>;
}

/// Batched query/document relevance scoring.
pub trait RelevanceScorer
where
	Self: Send + Sync,
{
	/// Returns one entry per document, `None` where the model gave no usable score.
	fn score<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, parley_providers::Result<Vec<Option<f32>>>>;
}

/// Chat-completion text generation.
pub trait Generator
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, parley_providers::Result<String>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
	Sent,
	/// The connection is closed for good.
	Gone,
	Failed { reason: String },
}

/// Pushes frames to live client connections.
pub trait Transport
where
	Self: Send + Sync,
{
	fn send<'a>(
		&'a self,
		connection_id: &'a str,
		payload: &'a OutboundPayload,
	) -> BoxFuture<'a, SendOutcome>;
}

/// Query handed to every backend of one retrieval fan-out.
#[derive(Clone, Debug)]
pub struct BackendQuery {
	pub text: String,
	pub constraints: Constraints,
	pub top_k: u32,
}

/// One searchable index.
pub trait VectorBackend
where
	Self: Send + Sync,
{
	fn name(&self) -> &str;

	fn timeout(&self) -> Duration;

	fn search<'a>(&'a self, query: &'a BackendQuery) -> BoxFuture<'a, Result<Vec<Candidate>>>;
}

pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub scorer: Arc<dyn RelevanceScorer>,
	pub generator: Arc<dyn Generator>,
	pub transport: Arc<dyn Transport>,
	pub alerter: Arc<dyn Alerter>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		scorer: Arc<dyn RelevanceScorer>,
		generator: Arc<dyn Generator>,
		transport: Arc<dyn Transport>,
		alerter: Arc<dyn Alerter>,
	) -> Self {
		Self { embedding, scorer, generator, transport, alerter }
	}

	/// HTTP-backed providers for every seam.
	pub fn from_config(cfg: &Config) -> Self {
		let alerter: Arc<dyn Alerter> =
			match cfg.alerting.as_ref().and_then(|alerting| alerting.webhook_url.clone()) {
				Some(url) => Arc::new(WebhookAlerter::new(
					url,
					cfg.alerting.as_ref().map(|alerting| alerting.timeout_ms).unwrap_or(5_000),
				)),
				None => Arc::new(LogAlerter),
			};

		Self {
			embedding: Arc::new(DefaultProviders),
			scorer: Arc::new(DefaultProviders),
			generator: Arc::new(DefaultProviders),
			transport: Arc::new(HttpTransport { cfg: cfg.delivery.clone() }),
			alerter,
		}
	}
}

pub struct Stores {
	pub sessions: Arc<dyn SessionStore>,
	pub ledger: Arc<dyn LedgerStore>,
}

pub struct ParleyService {
	pub cfg: Config,
	pub registry: SessionRegistry,
	pub ledger: ProcessingLedger,
	pub backends: Vec<Arc<dyn VectorBackend>>,
	pub providers: Providers,
}
impl ParleyService {
	pub fn new(
		cfg: Config,
		stores: Stores,
		backends: Vec<Arc<dyn VectorBackend>>,
		providers: Providers,
	) -> Self {
		let registry = SessionRegistry::new(
			stores.sessions,
			time::Duration::seconds(cfg.sessions.grace_period_seconds),
			cfg.sessions.max_history_turns as usize,
		);
		let ledger = ProcessingLedger::new(
			stores.ledger,
			time::Duration::seconds(cfg.ledger.lease_seconds),
			time::Duration::hours(cfg.ledger.retention_hours),
		);

		Self { cfg, registry, ledger, backends, providers }
	}

	/// Raises an alert without letting alerting failures reach the caller.
	pub async fn raise_alert(&self, alert: &Alert) {
		self.providers.alerter.alert(alert).await;
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, parley_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(parley_providers::embedding::embed(cfg, texts))
	}
}
impl RelevanceScorer for DefaultProviders {
	fn score<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, parley_providers::Result<Vec<Option<f32>>>> {
		Box::pin(parley_providers::rerank::score(cfg, query, docs))
	}
}
impl Generator for DefaultProviders {
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, parley_providers::Result<String>> {
		Box::pin(parley_providers::llm::complete(cfg, messages))
	}
}

struct HttpTransport {
	cfg: parley_config::Delivery,
}
impl Transport for HttpTransport {
	fn send<'a>(
		&'a self,
		connection_id: &'a str,
		payload: &'a OutboundPayload,
	) -> BoxFuture<'a, SendOutcome> {
		Box::pin(async move {
			let body = match serde_json::to_value(payload) {
				Ok(body) => body,
				Err(err) => return SendOutcome::Failed { reason: err.to_string() },
			};

			match parley_providers::transport::post_to_connection(&self.cfg, connection_id, &body)
				.await
			{
				Ok(SendStatus::Sent) => SendOutcome::Sent,
				Ok(SendStatus::Gone) => SendOutcome::Gone,
				Ok(SendStatus::Rejected { status }) =>
					SendOutcome::Failed { reason: format!("Endpoint responded with {status}.") },
				Err(err) => SendOutcome::Failed { reason: err.to_string() },
			}
		})
	}
}
