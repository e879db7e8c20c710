use std::time::Duration;

use futures::{
	StreamExt,
	stream::{self, BoxStream},
};
use reqwest::Client;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource, retry};
use serde_json::Value;

use sift_config::{GenerationProviderConfig, Prompt};
use sift_domain::{conversation, message::ChatMessage, search::SearchResults};

use crate::{Error, Result};

/// Generated text in arrival order. An `Err` item is always the last one.
pub type FragmentStream = BoxStream<'static, Result<String>>;

const SYSTEM_PREAMBLE: &str =
	"You are a helpful AI search assistant. Answer questions based on these search results:";
const SYSTEM_INSTRUCTIONS: &str =
	"Provide comprehensive, accurate answers with citations. Be concise but informative.";

/// Builds the prompt: one system message citing the top search results, followed by the
/// most recent history turns, oldest first. The caller appends the current user turn.
pub fn build_prompt(
	results: &SearchResults,
	history: &[ChatMessage],
	prompt: &Prompt,
) -> Vec<ChatMessage> {
	let context = results
		.results
		.iter()
		.take(prompt.max_results_in_context)
		.enumerate()
		.map(|(idx, hit)| {
			format!(
				"[{}] {}\n{}\n{}...",
				idx + 1,
				hit.title,
				hit.url,
				conversation::truncate_chars(&hit.text, prompt.excerpt_chars)
			)
		})
		.collect::<Vec<_>>()
		.join("\n\n");
	let replay = history.iter().filter(|msg| !msg.content.trim().is_empty()).collect::<Vec<_>>();
	let skip = replay.len().saturating_sub(prompt.history_turns);
	let mut messages = Vec::with_capacity(1 + replay.len() - skip);

	messages.push(ChatMessage::system(format!(
		"{SYSTEM_PREAMBLE}\n\n{context}\n\n{SYSTEM_INSTRUCTIONS}"
	)));
	messages.extend(replay.into_iter().skip(skip).cloned());

	messages
}

/// Streams a chat completion. Nothing is sent until the stream is first polled, and
/// dropping the stream aborts the upstream request.
pub fn generate(cfg: &GenerationProviderConfig, messages: &[ChatMessage]) -> FragmentStream {
	let timeout_ms = cfg.timeout_ms;
	let state = match open_event_source(cfg, messages) {
		Ok(source) => GenerationState::Streaming(source),
		Err(err) => GenerationState::Failed(err),
	};

	stream::unfold(state, move |state| next_fragment(state, timeout_ms)).boxed()
}

enum GenerationState {
	Streaming(EventSource),
	Failed(Error),
	Done,
}

enum StreamChunk {
	Text(String),
	Done,
	Failed(String),
	Skip,
}

fn open_event_source(
	cfg: &GenerationProviderConfig,
	messages: &[ChatMessage],
) -> Result<EventSource> {
	let client = Client::builder().connect_timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"messages": messages,
		"temperature": cfg.temperature,
		"max_tokens": cfg.max_tokens,
		"stream": true,
	});
	let request = client
		.post(url)
		.headers(crate::bearer_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body);
	let mut source = EventSource::new(request).map_err(|err| Error::InvalidConfig {
		message: format!("Generation request cannot be streamed: {err}."),
	})?;

	// A completion cannot be resumed, so a dropped connection is final.
	source.set_retry_policy(Box::new(retry::Never));

	Ok(source)
}

async fn next_fragment(
	state: GenerationState,
	timeout_ms: u64,
) -> Option<(Result<String>, GenerationState)> {
	let mut source = match state {
		GenerationState::Done => return None,
		GenerationState::Failed(err) => return Some((Err(err), GenerationState::Done)),
		GenerationState::Streaming(source) => source,
	};
	let timeout = Duration::from_millis(timeout_ms);

	loop {
		let event = match tokio::time::timeout(timeout, source.next()).await {
			Err(_) => {
				source.close();

				let err = Error::Timeout { operation: "Generation stream", timeout_ms };

				return Some((Err(err), GenerationState::Done));
			},
			Ok(None) => return None,
			Ok(Some(event)) => event,
		};
		let chunk = match event {
			Ok(Event::Open) => continue,
			Ok(Event::Message(message)) => parse_stream_data(&message.data),
			Err(EventSourceError::StreamEnded) => Ok(StreamChunk::Done),
			Err(err) => Err(upstream_error(err).await),
		};

		match chunk {
			Ok(StreamChunk::Skip) => {},
			Ok(StreamChunk::Text(text)) =>
				return Some((Ok(text), GenerationState::Streaming(source))),
			Ok(StreamChunk::Done) => {
				source.close();

				return None;
			},
			Ok(StreamChunk::Failed(message)) => {
				source.close();

				return Some((Err(Error::InvalidResponse { message }), GenerationState::Done));
			},
			Err(err) => {
				source.close();

				return Some((Err(err), GenerationState::Done));
			},
		}
	}
}

async fn upstream_error(err: EventSourceError) -> Error {
	match err {
		EventSourceError::InvalidStatusCode(status, res) => {
			let body = res.text().await.unwrap_or_default();

			Error::Status { status: status.as_u16(), message: crate::excerpt(&body) }
		},
		EventSourceError::Transport(err) => Error::Reqwest(err),
		other => Error::InvalidResponse { message: other.to_string() },
	}
}

fn parse_stream_data(data: &str) -> Result<StreamChunk> {
	let data = data.trim();

	if data == "[DONE]" {
		return Ok(StreamChunk::Done);
	}

	let json: Value = serde_json::from_str(data)?;

	if let Some(error) = json.get("error") {
		let message = error
			.get("message")
			.and_then(|v| v.as_str())
			.unwrap_or("Generation provider reported an error.");

		return Ok(StreamChunk::Failed(message.to_string()));
	}

	match json.pointer("/choices/0/delta/content").and_then(|v| v.as_str()) {
		Some(text) if !text.is_empty() => Ok(StreamChunk::Text(text.to_string())),
		_ => Ok(StreamChunk::Skip),
	}
}
