mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Config, GenerationProviderConfig, Postgres, Prompt, Providers, RateLimit,
	SearchProviderConfig, Security, Service, Storage,
};

use std::{env, fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	apply_env_overrides(&mut cfg, |name| env::var(name).ok())?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

/// Deploy-time secrets and endpoints are taken from the environment when set, so the
/// checked-in config file can stay free of credentials.
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F) -> Result<()>
where
	F: Fn(&str) -> Option<String>,
{
	if let Some(dsn) = lookup("DATABASE_URL") {
		cfg.storage.postgres.dsn = dsn;
	}
	if let Some(url) = lookup("REDIS_URL") {
		cfg.cache.redis_url = Some(url);
	}
	if let Some(key) = lookup("EXA_API_KEY") {
		cfg.providers.search.api_key = key;
	}
	if let Some(key) = lookup("GROQ_API_KEY") {
		cfg.providers.generation.api_key = key;
	}
	if let Some(secret) = lookup("JWT_SECRET") {
		cfg.security.token_secret = secret;
	}
	if let Some(hours) = lookup("JWT_EXPIRE_HOURS") {
		cfg.security.token_ttl_hours =
			hours.trim().parse().map_err(|_| Error::InvalidEnv { name: "JWT_EXPIRE_HOURS" })?;
	}
	if let Some(origins) = lookup("CORS_ORIGINS") {
		cfg.service.cors_origins = origins.split(',').map(|origin| origin.to_string()).collect();
	}

	Ok(())
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}

	match cfg.cache.backend.as_str() {
		"memory" => {},
		"redis" =>
			if cfg.cache.redis_url.is_none() {
				return Err(Error::Validation {
					message: "cache.redis_url is required when cache.backend is redis.".to_string(),
				});
			},
		_ => {
			return Err(Error::Validation {
				message: "cache.backend must be one of redis or memory.".to_string(),
			});
		},
	}

	for (label, key) in [
		("search", &cfg.providers.search.api_key),
		("generation", &cfg.providers.generation.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}
	for (label, timeout_ms) in [
		("search", cfg.providers.search.timeout_ms),
		("generation", cfg.providers.generation.timeout_ms),
	] {
		if timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("Provider {label} timeout_ms must be greater than zero."),
			});
		}
	}

	if cfg.providers.search.max_results == 0 {
		return Err(Error::Validation {
			message: "providers.search.max_results must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.generation.max_tokens == 0 {
		return Err(Error::Validation {
			message: "providers.generation.max_tokens must be greater than zero.".to_string(),
		});
	}

	let temperature = cfg.providers.generation.temperature;

	if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
		return Err(Error::Validation {
			message: "providers.generation.temperature must be in the range 0.0-2.0.".to_string(),
		});
	}
	if cfg.security.token_secret.trim().is_empty() {
		return Err(Error::Validation {
			message: "security.token_secret must be non-empty.".to_string(),
		});
	}
	if cfg.security.token_ttl_hours == 0 {
		return Err(Error::Validation {
			message: "security.token_ttl_hours must be greater than zero.".to_string(),
		});
	}
	if !(4..=31).contains(&cfg.security.bcrypt_cost) {
		return Err(Error::Validation {
			message: "security.bcrypt_cost must be in the range 4-31.".to_string(),
		});
	}
	if cfg.rate_limit.search_per_window == 0 || cfg.rate_limit.window_secs == 0 {
		return Err(Error::Validation {
			message: "rate_limit.search_per_window and rate_limit.window_secs must be greater than zero."
				.to_string(),
		});
	}
	if cfg.prompt.title_chars == 0 {
		return Err(Error::Validation {
			message: "prompt.title_chars must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.cache.backend = cfg.cache.backend.trim().to_ascii_lowercase();

	if cfg.cache.redis_url.as_deref().map(|url| url.trim().is_empty()).unwrap_or(false) {
		cfg.cache.redis_url = None;
	}

	cfg.service.cors_origins = cfg
		.service
		.cors_origins
		.iter()
		.map(|origin| origin.trim().trim_end_matches('/').to_string())
		.filter(|origin| !origin.is_empty())
		.collect();
}
