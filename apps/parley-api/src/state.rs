use std::{sync::Arc, time::Duration};

use color_eyre::eyre;

use parley_service::{ParleyService, Providers, Stores, backends, ingress::MemoryQueue};
use parley_storage::{
	db::Db,
	ledger::PgLedgerStore,
	memory::{MemoryLedgerStore, MemorySessionStore},
	sessions::PgSessionStore,
};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<ParleyService>,
	pub queue: Arc<MemoryQueue>,
}
impl AppState {
	pub async fn new(config: parley_config::Config) -> color_eyre::Result<Self> {
		let stores = build_stores(&config).await?;
		let providers = Providers::from_config(&config);
		let backends = backends::from_config(&config, providers.embedding.clone())?;
		let queue = MemoryQueue::new(Duration::from_millis(config.worker.visibility_timeout_ms));
		let service = ParleyService::new(config, stores, backends, providers);

		Ok(Self::from_parts(Arc::new(service), Arc::new(queue)))
	}

	pub fn from_parts(service: Arc<ParleyService>, queue: Arc<MemoryQueue>) -> Self {
		Self { service, queue }
	}
}

async fn build_stores(config: &parley_config::Config) -> color_eyre::Result<Stores> {
	match config.storage.backend.as_str() {
		"memory" => Ok(Stores {
			sessions: Arc::new(MemorySessionStore::new()),
			ledger: Arc::new(MemoryLedgerStore::new()),
		}),
		"postgres" => {
			let Some(postgres) = config.storage.postgres.as_ref() else {
				return Err(eyre::eyre!("storage.postgres is required for the postgres backend."));
			};
			let db = Db::connect(postgres).await?;

			db.ensure_schema().await?;

			Ok(Stores {
				sessions: Arc::new(PgSessionStore::new(db.clone())),
				ledger: Arc::new(PgLedgerStore::new(db)),
			})
		},
		other => Err(eyre::eyre!("Unknown storage backend {other}.")),
	}
}
