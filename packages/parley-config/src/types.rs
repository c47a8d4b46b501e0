use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub backends: Vec<Backend>,
	pub pipeline: Pipeline,
	pub rerank: Rerank,
	pub compose: Compose,
	pub delivery: Delivery,
	pub ledger: Ledger,
	pub sessions: Sessions,
	pub worker: Worker,
	pub alerting: Option<Alerting>,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	/// Either "memory" or "postgres".
	#[serde(default = "default_storage_backend")]
	pub backend: String,
	pub postgres: Option<Postgres>,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: ProviderConfig,
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	#[serde(default)]
	pub max_tokens: Option<u32>,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// One vector index the retrieval fan-out queries.
#[derive(Debug, Clone, Deserialize)]
pub struct Backend {
	pub name: String,
	/// Either "qdrant" or "weaviate".
	pub kind: String,
	pub url: String,
	/// Qdrant collection or Weaviate class.
	pub collection: String,
	#[serde(default)]
	pub api_key: Option<String>,
	pub timeout_ms: u64,
	/// Named dense vector to query on Qdrant collections with multiple vectors.
	#[serde(default)]
	pub vector_name: Option<String>,
	/// Weaviate hybrid weighting between keyword (0.0) and vector (1.0) search.
	#[serde(default = "default_hybrid_alpha")]
	pub alpha: f32,
	#[serde(default = "default_text_field")]
	pub text_field: String,
	/// Payload field holding a stable external document id. Falls back to the point id.
	#[serde(default)]
	pub id_field: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Pipeline {
	pub deadline_ms: u64,
	#[serde(default = "default_history_turns")]
	pub history_turns: u32,
	#[serde(default = "default_top_k_per_backend")]
	pub top_k_per_backend: u32,
	#[serde(default)]
	pub rewrite_enabled: bool,
	pub rewrite_timeout_ms: u64,
	/// Also search with a generated hypothetical answer to the query.
	#[serde(default)]
	pub hyde_enabled: bool,
	#[serde(default = "default_hyde_timeout_ms")]
	pub hyde_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Rerank {
	pub limit: u32,
	pub timeout_ms: u64,
	#[serde(default = "default_max_doc_chars")]
	pub max_doc_chars: u32,
}

#[derive(Debug, Deserialize)]
pub struct Compose {
	pub top_k: u32,
	pub context_char_budget: u32,
	pub timeout_ms: u64,
	#[serde(default = "default_true")]
	pub retry_with_reduced_context: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delivery {
	/// Base URL of the connection management endpoint; frames go to `{endpoint}/@connections/{id}`.
	pub endpoint: String,
	pub timeout_ms: u64,
	pub retry_backoff_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Ledger {
	pub retention_hours: i64,
	pub lease_seconds: i64,
	pub purge_interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct Sessions {
	/// How long a disconnected session stays resumable.
	pub grace_period_seconds: i64,
	pub max_history_turns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Worker {
	pub concurrency: u32,
	pub batch_size: u32,
	pub poll_interval_ms: u64,
	pub visibility_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Alerting {
	pub webhook_url: Option<String>,
	#[serde(default = "default_alert_timeout_ms")]
	pub timeout_ms: u64,
}

fn default_storage_backend() -> String {
	"memory".to_string()
}

fn default_hybrid_alpha() -> f32 {
	0.5
}

fn default_text_field() -> String {
	"text".to_string()
}

fn default_history_turns() -> u32 {
	6
}

fn default_top_k_per_backend() -> u32 {
	15
}

fn default_hyde_timeout_ms() -> u64 {
	4_000
}

fn default_max_doc_chars() -> u32 {
	4_000
}

fn default_true() -> bool {
	true
}

fn default_alert_timeout_ms() -> u64 {
	5_000
}
