use std::{
	collections::HashMap,
	sync::Mutex,
	time::{Duration, Instant},
};

use redis::aio::ConnectionManager;

use crate::{BoxFuture, Result};

const MEMORY_SWEEP_THRESHOLD: usize = 1_024;

/// Counter state after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
	pub count: u64,
	/// Time until the counter resets.
	pub resets_in: Duration,
}

/// Fixed-window counters keyed by string.
pub trait CacheBackend
where
	Self: Send + Sync,
{
	/// Increments `key`. A key that does not exist yet starts at zero and expires after
	/// `window`; later increments inside the window keep the original expiry.
	fn increment<'a>(&'a self, key: &'a str, window: Duration) -> BoxFuture<'a, Result<WindowCount>>;
}

pub struct RedisCache {
	conn: ConnectionManager,
}
impl RedisCache {
	pub async fn connect(url: &str) -> Result<Self> {
		let client = redis::Client::open(url)?;
		let conn = ConnectionManager::new(client).await?;

		Ok(Self { conn })
	}
}
impl CacheBackend for RedisCache {
	fn increment<'a>(&'a self, key: &'a str, window: Duration) -> BoxFuture<'a, Result<WindowCount>> {
		Box::pin(redis_increment(self.conn.clone(), key, window))
	}
}

/// Process-local counters for single-instance deployments and tests.
#[derive(Default)]
pub struct MemoryCache {
	entries: Mutex<HashMap<String, MemoryEntry>>,
}
impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}

	fn increment_at(&self, key: &str, window: Duration, now: Instant) -> WindowCount {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		if entries.len() >= MEMORY_SWEEP_THRESHOLD {
			entries.retain(|_, entry| entry.expires_at > now);
		}

		let entry = entries
			.entry(key.to_string())
			.or_insert(MemoryEntry { count: 0, expires_at: now + window });

		if entry.expires_at <= now {
			*entry = MemoryEntry { count: 0, expires_at: now + window };
		}

		entry.count += 1;

		WindowCount { count: entry.count, resets_in: entry.expires_at.saturating_duration_since(now) }
	}
}
impl CacheBackend for MemoryCache {
	fn increment<'a>(&'a self, key: &'a str, window: Duration) -> BoxFuture<'a, Result<WindowCount>> {
		let count = self.increment_at(key, window, Instant::now());

		Box::pin(async move { Ok(count) })
	}
}

struct MemoryEntry {
	count: u64,
	expires_at: Instant,
}

async fn redis_increment(
	mut conn: ConnectionManager,
	key: &str,
	window: Duration,
) -> Result<WindowCount> {
	let window_secs = window.as_secs().max(1);
	let (count, ttl): (u64, i64) = redis::pipe()
		.atomic()
		.cmd("SET")
		.arg(key)
		.arg(0)
		.arg("EX")
		.arg(window_secs)
		.arg("NX")
		.ignore()
		.cmd("INCR")
		.arg(key)
		.cmd("TTL")
		.arg(key)
		.query_async(&mut conn)
		.await?;
	// TTL is negative when the key has no expiry, which only happens if another writer
	// created it without one.
	let resets_in = if ttl > 0 { Duration::from_secs(ttl as u64) } else { window };

	Ok(WindowCount { count, resets_in })
}
