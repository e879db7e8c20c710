use std::sync::Arc;

use color_eyre::eyre;

use sift_service::{SiftService, Stores};
use sift_storage::{
	cache::{CacheBackend, MemoryCache, RedisCache},
	db::Db,
};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<SiftService>,
}
impl AppState {
	pub async fn new(config: sift_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let cache = connect_cache(&config.cache).await?;
		let service = SiftService::new(config, Stores::postgres(db), cache);

		Ok(Self { service: Arc::new(service) })
	}

	pub fn from_service(service: SiftService) -> Self {
		Self { service: Arc::new(service) }
	}
}

async fn connect_cache(cfg: &sift_config::Cache) -> color_eyre::Result<Arc<dyn CacheBackend>> {
	match (cfg.backend.as_str(), cfg.redis_url.as_deref()) {
		("redis", Some(url)) => {
			let cache = RedisCache::connect(url).await?;

			tracing::info!("Rate limit counters stored in Redis.");

			Ok(Arc::new(cache))
		},
		("memory", _) => {
			tracing::info!("Rate limit counters kept in process memory.");

			Ok(Arc::new(MemoryCache::new()))
		},
		(backend, _) => Err(eyre::eyre!("Unsupported cache backend {backend:?}.")),
	}
}
