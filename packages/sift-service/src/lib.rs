pub mod auth;
pub mod credentials;
pub mod history;
pub mod rate_limit;
pub mod search;
pub mod time_serde;

mod error;

pub use auth::{AuthResponse, CredentialsRequest, UserProfile, UserSummary};
pub use error::{Error, Result};
pub use history::{ConversationDetail, ConversationItem, DeleteAllResponse, DeleteResponse, MessageItem};
pub use search::{SearchEvent, SearchRequest, SearchStream};
pub use sift_storage::BoxFuture;

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::OnceCell;

use credentials::TokenManager;
use sift_config::{Config, GenerationProviderConfig, SearchProviderConfig};
use sift_domain::{message::ChatMessage, search::SearchResults};
use sift_providers::{generation, search as web_search};
use sift_storage::{
	cache::CacheBackend,
	db::Db,
	store::{ConversationStore, UserStore},
};

/// Generated text in arrival order. An `Err` item is always the last one.
pub type GenerationStream = BoxStream<'static, Result<String>>;

pub trait SearchProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a SearchProviderConfig,
		query: &'a str,
		max_results: u32,
	) -> BoxFuture<'a, Result<SearchResults>>;
}

pub trait GenerationProvider
where
	Self: Send + Sync,
{
	/// Must not contact the provider until the returned stream is polled.
	fn generate(&self, cfg: &GenerationProviderConfig, messages: &[ChatMessage]) -> GenerationStream;
}

#[derive(Clone)]
pub struct Providers {
	pub search: Arc<dyn SearchProvider>,
	pub generation: Arc<dyn GenerationProvider>,
}
impl Providers {
	pub fn new(search: Arc<dyn SearchProvider>, generation: Arc<dyn GenerationProvider>) -> Self {
		Self { search, generation }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { search: provider.clone(), generation: provider }
	}
}

#[derive(Clone)]
pub struct Stores {
	pub users: Arc<dyn UserStore>,
	pub conversations: Arc<dyn ConversationStore>,
}
impl Stores {
	pub fn postgres(db: Db) -> Self {
		let db = Arc::new(db);

		Self { users: db.clone(), conversations: db }
	}
}

pub struct SiftService {
	pub cfg: Config,
	pub stores: Stores,
	pub cache: Arc<dyn CacheBackend>,
	pub providers: Providers,
	pub tokens: TokenManager,
	/// Hash verified when a login names no account.
	decoy_hash: OnceCell<String>,
}
impl SiftService {
	pub fn new(cfg: Config, stores: Stores, cache: Arc<dyn CacheBackend>) -> Self {
		Self::with_providers(cfg, stores, cache, Providers::default())
	}

	pub fn with_providers(
		cfg: Config,
		stores: Stores,
		cache: Arc<dyn CacheBackend>,
		providers: Providers,
	) -> Self {
		let tokens = TokenManager::new(&cfg.security.token_secret, cfg.security.token_ttl_hours);

		Self { cfg, stores, cache, providers, tokens, decoy_hash: OnceCell::new() }
	}
}

struct DefaultProviders;

impl SearchProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a SearchProviderConfig,
		query: &'a str,
		max_results: u32,
	) -> BoxFuture<'a, Result<SearchResults>> {
		Box::pin(async move {
			web_search::search(cfg, query, max_results).await.map_err(Error::from)
		})
	}
}

impl GenerationProvider for DefaultProviders {
	fn generate(&self, cfg: &GenerationProviderConfig, messages: &[ChatMessage]) -> GenerationStream {
		generation::generate(cfg, messages).map(|item| item.map_err(Error::from)).boxed()
	}
}
