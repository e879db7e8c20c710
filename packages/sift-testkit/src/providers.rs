use std::sync::{
	Arc, Mutex,
	atomic::{AtomicBool, AtomicUsize, Ordering},
};

use futures::{StreamExt, future, stream};
use tokio::sync::Notify;

use sift_config::{GenerationProviderConfig, SearchProviderConfig};
use sift_domain::{message::ChatMessage, search::SearchResults};
use sift_service::{BoxFuture, Error, GenerationProvider, GenerationStream, Result, SearchProvider};

/// Search provider returning a fixed outcome and counting calls.
pub struct StubSearch {
	outcome: std::result::Result<SearchResults, String>,
	calls: AtomicUsize,
}
impl StubSearch {
	pub fn returning(results: SearchResults) -> Self {
		Self { outcome: Ok(results), calls: AtomicUsize::new(0) }
	}

	pub fn failing(message: &str) -> Self {
		Self { outcome: Err(message.to_string()), calls: AtomicUsize::new(0) }
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl SearchProvider for StubSearch {
	fn search<'a>(
		&'a self,
		_cfg: &'a SearchProviderConfig,
		_query: &'a str,
		_max_results: u32,
	) -> BoxFuture<'a, Result<SearchResults>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let outcome = self.outcome.clone().map_err(|message| Error::Provider { message });

		Box::pin(async move { outcome })
	}
}

/// Generation provider replaying a script of fragments and failures.
///
/// With [`StubGeneration::hanging`] the stream never ends after the script, which models
/// a provider that is still producing when the client leaves.
pub struct StubGeneration {
	script: Vec<std::result::Result<String, String>>,
	hang: bool,
	gate: Option<Arc<Notify>>,
	prompts: Mutex<Vec<Vec<ChatMessage>>>,
	dropped: Arc<AtomicBool>,
}
impl StubGeneration {
	pub fn fragments(fragments: &[&str]) -> Self {
		Self::scripted(fragments.iter().map(|f| Ok(f.to_string())).collect())
	}

	pub fn scripted(script: Vec<std::result::Result<String, String>>) -> Self {
		Self {
			script,
			hang: false,
			gate: None,
			prompts: Mutex::new(Vec::new()),
			dropped: Arc::default(),
		}
	}

	pub fn hanging(mut self) -> Self {
		self.hang = true;

		self
	}

	/// Holds the stream open after the script until `gate` is notified.
	pub fn gated(mut self, gate: Arc<Notify>) -> Self {
		self.gate = Some(gate);

		self
	}

	/// Prompts received so far, one entry per call.
	pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
		self.prompts.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	/// Whether the most recently returned stream has been dropped.
	pub fn stream_dropped(&self) -> bool {
		self.dropped.load(Ordering::SeqCst)
	}
}
impl GenerationProvider for StubGeneration {
	fn generate(&self, _cfg: &GenerationProviderConfig, messages: &[ChatMessage]) -> GenerationStream {
		self.prompts.lock().unwrap_or_else(|err| err.into_inner()).push(messages.to_vec());
		self.dropped.store(false, Ordering::SeqCst);

		let items = self
			.script
			.clone()
			.into_iter()
			.map(|item| item.map_err(|message| Error::Provider { message }));
		let head = stream::iter(items);
		let script = if self.hang {
			head.chain(stream::pending()).boxed()
		} else if let Some(gate) = self.gate.clone() {
			let release = stream::once(async move { gate.notified().await })
				.filter_map(|()| future::ready(None));

			head.chain(release).boxed()
		} else {
			head.boxed()
		};
		let guard = DropSignal(self.dropped.clone());

		script
			.map(move |item| {
				let _guard = &guard;

				item
			})
			.boxed()
	}
}

struct DropSignal(Arc<AtomicBool>);
impl Drop for DropSignal {
	fn drop(&mut self) {
		self.0.store(true, Ordering::SeqCst);
	}
}
