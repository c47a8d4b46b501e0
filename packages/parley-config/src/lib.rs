mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Alerting, Backend, Compose, Config, Delivery, EmbeddingProviderConfig, Ledger,
	LlmProviderConfig, Pipeline, Postgres, ProviderConfig, Providers, Rerank, Service, Sessions,
	Storage, Worker,
};

use std::{collections::HashSet, fs, path::Path};

/// One year.
const MAX_RETENTION_HOURS: i64 = 8_760;
/// Thirty days.
const MAX_GRACE_PERIOD_SECONDS: i64 = 2_592_000;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}

	match cfg.storage.backend.as_str() {
		"memory" => {},
		"postgres" => {
			let Some(postgres) = cfg.storage.postgres.as_ref() else {
				return Err(Error::Validation {
					message: "storage.postgres is required when storage.backend is postgres."
						.to_string(),
				});
			};

			if postgres.dsn.trim().is_empty() {
				return Err(Error::Validation {
					message: "storage.postgres.dsn must be non-empty.".to_string(),
				});
			}
			if postgres.pool_max_conns == 0 {
				return Err(Error::Validation {
					message: "storage.postgres.pool_max_conns must be greater than zero."
						.to_string(),
				});
			}
		},
		_ => {
			return Err(Error::Validation {
				message: "storage.backend must be one of memory or postgres.".to_string(),
			});
		},
	}

	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("rerank", &cfg.providers.rerank.api_key),
		("llm", &cfg.providers.llm.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}
	for (label, timeout_ms) in [
		("providers.embedding.timeout_ms", cfg.providers.embedding.timeout_ms),
		("providers.rerank.timeout_ms", cfg.providers.rerank.timeout_ms),
		("providers.llm.timeout_ms", cfg.providers.llm.timeout_ms),
		("pipeline.deadline_ms", cfg.pipeline.deadline_ms),
		("pipeline.rewrite_timeout_ms", cfg.pipeline.rewrite_timeout_ms),
		("pipeline.hyde_timeout_ms", cfg.pipeline.hyde_timeout_ms),
		("rerank.timeout_ms", cfg.rerank.timeout_ms),
		("compose.timeout_ms", cfg.compose.timeout_ms),
		("delivery.timeout_ms", cfg.delivery.timeout_ms),
		("worker.poll_interval_ms", cfg.worker.poll_interval_ms),
		("worker.visibility_timeout_ms", cfg.worker.visibility_timeout_ms),
	] {
		if timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if !(0.0..=2.0).contains(&cfg.providers.llm.temperature) {
		return Err(Error::Validation {
			message: "providers.llm.temperature must be in the range 0.0-2.0.".to_string(),
		});
	}

	validate_backends(&cfg.backends)?;

	if cfg.pipeline.top_k_per_backend == 0 {
		return Err(Error::Validation {
			message: "pipeline.top_k_per_backend must be greater than zero.".to_string(),
		});
	}
	if cfg.rerank.limit == 0 {
		return Err(Error::Validation {
			message: "rerank.limit must be greater than zero.".to_string(),
		});
	}
	if cfg.rerank.max_doc_chars == 0 {
		return Err(Error::Validation {
			message: "rerank.max_doc_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.compose.top_k == 0 {
		return Err(Error::Validation {
			message: "compose.top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.compose.top_k > cfg.rerank.limit {
		return Err(Error::Validation {
			message: "compose.top_k must be less than or equal to rerank.limit.".to_string(),
		});
	}
	if cfg.compose.context_char_budget == 0 {
		return Err(Error::Validation {
			message: "compose.context_char_budget must be greater than zero.".to_string(),
		});
	}
	if cfg.delivery.endpoint.trim().is_empty() {
		return Err(Error::Validation {
			message: "delivery.endpoint must be non-empty.".to_string(),
		});
	}
	if cfg.ledger.retention_hours <= 0 {
		return Err(Error::Validation {
			message: "ledger.retention_hours must be greater than zero.".to_string(),
		});
	}
	if cfg.ledger.lease_seconds <= 0 {
		return Err(Error::Validation {
			message: "ledger.lease_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.ledger.retention_hours > MAX_RETENTION_HOURS {
		return Err(Error::Validation {
			message: format!("ledger.retention_hours must be at most {MAX_RETENTION_HOURS}."),
		});
	}
	if cfg.ledger.lease_seconds >= cfg.ledger.retention_hours.saturating_mul(3_600) {
		return Err(Error::Validation {
			message: "ledger.lease_seconds must be shorter than ledger.retention_hours."
				.to_string(),
		});
	}

	let lease_ms = (cfg.ledger.lease_seconds as u64).saturating_mul(1_000);
	let run_ms = max_run_ms(cfg);

	if lease_ms <= run_ms {
		return Err(Error::Validation {
			message: format!("ledger.lease_seconds must outlast one pipeline run of {run_ms} ms."),
		});
	}
	if cfg.worker.visibility_timeout_ms <= lease_ms {
		return Err(Error::Validation {
			message: "worker.visibility_timeout_ms must be longer than ledger.lease_seconds."
				.to_string(),
		});
	}
	if cfg.ledger.purge_interval_seconds == 0 {
		return Err(Error::Validation {
			message: "ledger.purge_interval_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.sessions.grace_period_seconds <= 0 {
		return Err(Error::Validation {
			message: "sessions.grace_period_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.sessions.grace_period_seconds > MAX_GRACE_PERIOD_SECONDS {
		return Err(Error::Validation {
			message: format!(
				"sessions.grace_period_seconds must be at most {MAX_GRACE_PERIOD_SECONDS}."
			),
		});
	}
	if cfg.sessions.max_history_turns < cfg.pipeline.history_turns {
		return Err(Error::Validation {
			message: "sessions.max_history_turns must be at least pipeline.history_turns."
				.to_string(),
		});
	}
	if cfg.worker.concurrency == 0 {
		return Err(Error::Validation {
			message: "worker.concurrency must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.batch_size == 0 {
		return Err(Error::Validation {
			message: "worker.batch_size must be greater than zero.".to_string(),
		});
	}
	if let Some(alerting) = cfg.alerting.as_ref()
		&& alerting.timeout_ms == 0
	{
		return Err(Error::Validation {
			message: "alerting.timeout_ms must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

/// Longest wall-clock time one admitted message can hold its lease.
///
/// The pipeline deadline, then one delivery with its retry for the answer and one for the error
/// notice, then the alert webhook.
pub fn max_run_ms(cfg: &Config) -> u64 {
	let delivery_ms = cfg
		.delivery
		.timeout_ms
		.saturating_mul(2)
		.saturating_add(cfg.delivery.retry_backoff_ms);
	let alert_ms = cfg
		.alerting
		.as_ref()
		.filter(|alerting| alerting.webhook_url.is_some())
		.map(|alerting| alerting.timeout_ms)
		.unwrap_or(0);

	cfg.pipeline
		.deadline_ms
		.saturating_add(delivery_ms.saturating_mul(2))
		.saturating_add(alert_ms)
}

fn validate_backends(backends: &[Backend]) -> Result<()> {
	if backends.is_empty() {
		return Err(Error::Validation {
			message: "At least one [[backends]] entry is required.".to_string(),
		});
	}

	let mut names = HashSet::new();

	for backend in backends {
		if backend.name.trim().is_empty() {
			return Err(Error::Validation {
				message: "backends.name must be non-empty.".to_string(),
			});
		}
		if !names.insert(backend.name.as_str()) {
			return Err(Error::Validation {
				message: format!("backends.name {} is declared more than once.", backend.name),
			});
		}
		if !matches!(backend.kind.as_str(), "qdrant" | "weaviate") {
			return Err(Error::Validation {
				message: format!(
					"backends.kind for {} must be one of qdrant or weaviate.",
					backend.name
				),
			});
		}
		if backend.url.trim().is_empty() || backend.collection.trim().is_empty() {
			return Err(Error::Validation {
				message: format!(
					"backends.url and backends.collection for {} must be non-empty.",
					backend.name
				),
			});
		}
		if backend.timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!(
					"backends.timeout_ms for {} must be greater than zero.",
					backend.name
				),
			});
		}
		if !backend.alpha.is_finite() || !(0.0..=1.0).contains(&backend.alpha) {
			return Err(Error::Validation {
				message: format!(
					"backends.alpha for {} must be in the range 0.0-1.0.",
					backend.name
				),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for backend in &mut cfg.backends {
		clear_blank(&mut backend.api_key);
		clear_blank(&mut backend.vector_name);
		clear_blank(&mut backend.id_field);
	}

	if let Some(alerting) = cfg.alerting.as_mut() {
		clear_blank(&mut alerting.webhook_url);
	}
}

fn clear_blank(value: &mut Option<String>) {
	if value.as_deref().map(|inner| inner.trim().is_empty()).unwrap_or(false) {
		*value = None;
	}
}
