use std::time::Duration;

use uuid::Uuid;

use crate::{Error, Result, SiftService};

pub const SEARCH_ENDPOINT: &str = "search";

pub fn rate_limit_key(user_id: Uuid, endpoint: &str) -> String {
	format!("rate_limit:{user_id}:{endpoint}")
}

impl SiftService {
	/// Counts one call against the user's fixed window for `endpoint`.
	///
	/// An unreachable cache lets the call through.
	pub async fn check_rate_limit(&self, user_id: Uuid, endpoint: &str) -> Result<()> {
		let limit = self.cfg.rate_limit.search_per_window;
		let window = Duration::from_secs(self.cfg.rate_limit.window_secs);
		let key = rate_limit_key(user_id, endpoint);
		let counted = match self.cache.increment(&key, window).await {
			Ok(counted) => counted,
			Err(err) => {
				tracing::warn!(error = %err, %user_id, endpoint, "Rate limit check skipped.");

				return Ok(());
			},
		};

		if counted.count > limit {
			let retry_after_secs = counted.resets_in.as_secs().max(1);

			tracing::info!(%user_id, endpoint, limit, retry_after_secs, "Rate limit exceeded.");

			return Err(Error::RateLimited { limit, retry_after_secs });
		}

		Ok(())
	}
}
