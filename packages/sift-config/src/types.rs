use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub cache: Cache,
	pub providers: Providers,
	pub security: Security,
	#[serde(default)]
	pub rate_limit: RateLimit,
	#[serde(default)]
	pub prompt: Prompt,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
	/// Origins allowed to call the API from a browser. Empty means any origin.
	#[serde(default)]
	pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Cache {
	/// One of "redis" or "memory".
	pub backend: String,
	pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub search: SearchProviderConfig,
	pub generation: GenerationProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct SearchProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default = "default_max_results")]
	pub max_results: u32,
	#[serde(default = "default_max_text_chars")]
	pub max_text_chars: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct GenerationProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	#[serde(default = "default_model")]
	pub model: String,
	#[serde(default = "default_temperature")]
	pub temperature: f32,
	#[serde(default = "default_max_tokens")]
	pub max_tokens: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Security {
	pub token_secret: String,
	pub token_ttl_hours: u64,
	#[serde(default = "default_bcrypt_cost")]
	pub bcrypt_cost: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateLimit {
	pub search_per_window: u64,
	pub window_secs: u64,
}
impl Default for RateLimit {
	fn default() -> Self {
		Self { search_per_window: 100, window_secs: 3_600 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Prompt {
	pub max_results_in_context: usize,
	pub excerpt_chars: usize,
	pub history_turns: usize,
	pub title_chars: usize,
}
impl Default for Prompt {
	fn default() -> Self {
		Self { max_results_in_context: 5, excerpt_chars: 500, history_turns: 5, title_chars: 50 }
	}
}

fn default_max_results() -> u32 {
	10
}

fn default_max_text_chars() -> u32 {
	2_000
}

fn default_model() -> String {
	"llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
	0.7
}

fn default_max_tokens() -> u32 {
	2_048
}

fn default_bcrypt_cost() -> u32 {
	12
}
