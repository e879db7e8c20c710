//! Query orchestration: conversation lookup, web search, prompt assembly, streamed
//! generation and persistence of both turns.

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use sift_domain::{
	conversation,
	message::{ChatMessage, MessageStatus},
	search::SearchResults,
	validation,
};
use sift_providers::generation;
use sift_storage::{models::NewMessage, store::ConversationStore};

use crate::{Error, GenerationStream, Result, SiftService};

const EVENT_BUFFER: usize = 32;
const GENERATION_FAILED: &str = "Answer generation failed. Please try again.";
const ANSWER_NOT_SAVED: &str = "The answer could not be saved.";

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
	pub query: String,
	#[serde(default)]
	pub conversation_id: Option<Uuid>,
}

impl SearchRequest {
	/// Collapses whitespace in the query and rejects one left empty.
	pub fn sanitized(self) -> Result<Self> {
		let query = validation::sanitize_query(&self.query);

		if query.is_empty() {
			return Err(Error::invalid_field("query", "Query must not be empty."));
		}

		Ok(Self { query, ..self })
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
	Fragment(String),
	/// The answer was cut short or not stored. Carries a message safe to show the
	/// client; provider detail stays in the logs and the stored turn. Always last.
	Failed(String),
}

/// A started answer. `events` ends once storing the assistant turn has been attempted.
pub struct SearchStream {
	pub conversation_id: Uuid,
	pub events: ReceiverStream<SearchEvent>,
}

struct AnswerTask {
	conversations: Arc<dyn ConversationStore>,
	conversation_id: Uuid,
	results: SearchResults,
	fragments: GenerationStream,
	tx: mpsc::Sender<SearchEvent>,
}

impl SiftService {
	/// Runs everything up to and including storing the user turn, then hands generation
	/// to a background task. Errors returned here happen before any answer text exists.
	pub async fn search(&self, user_id: Uuid, req: SearchRequest) -> Result<SearchStream> {
		let SearchRequest { query, conversation_id: requested } = req.sanitized()?;
		let conversations = &self.stores.conversations;
		let conversation = match requested {
			Some(conversation_id) =>
				conversations.get_owned_conversation(conversation_id, user_id).await?,
			None => {
				let title = conversation::derive_title(&query, self.cfg.prompt.title_chars);

				conversations.create_conversation(user_id, &title, OffsetDateTime::now_utc()).await?
			},
		};
		let conversation_id = conversation.conversation_id;
		let history = conversations
			.list_messages(conversation_id)
			.await?
			.into_iter()
			.map(|msg| ChatMessage::new(msg.role, msg.content))
			.collect::<Vec<_>>();
		let search_cfg = &self.cfg.providers.search;
		let results = match self
			.providers
			.search
			.search(search_cfg, &query, search_cfg.max_results)
			.await
		{
			Ok(results) => results,
			Err(err) => {
				tracing::warn!(
					error = %err,
					%conversation_id,
					"Web search failed. Answering without search results."
				);

				SearchResults::default()
			},
		};
		let mut messages = generation::build_prompt(&results, &history, &self.cfg.prompt);

		messages.push(ChatMessage::user(query.as_str()));

		conversations
			.append_message(conversation_id, NewMessage::user(&query), OffsetDateTime::now_utc())
			.await?;

		tracing::info!(
			%user_id,
			%conversation_id,
			history_turns = history.len(),
			search_hits = results.total,
			"Starting answer generation."
		);

		let fragments =
			self.providers.generation.generate(&self.cfg.providers.generation, &messages);
		let (tx, rx) = mpsc::channel(EVENT_BUFFER);

		tokio::spawn(stream_answer(AnswerTask {
			conversations: conversations.clone(),
			conversation_id,
			results,
			fragments,
			tx,
		}));

		Ok(SearchStream { conversation_id, events: ReceiverStream::new(rx) })
	}
}

async fn stream_answer(task: AnswerTask) {
	let AnswerTask { conversations, conversation_id, results, mut fragments, tx } = task;
	let mut answer = String::new();
	let mut status = MessageStatus::Complete;
	let mut error = None;

	loop {
		let next = tokio::select! {
			biased;
			_ = tx.closed() => {
				status = MessageStatus::Cancelled;

				break;
			},
			next = fragments.next() => next,
		};

		match next {
			Some(Ok(fragment)) => {
				answer.push_str(&fragment);

				if tx.send(SearchEvent::Fragment(fragment)).await.is_err() {
					status = MessageStatus::Cancelled;

					break;
				}
			},
			Some(Err(err)) => {
				let reason = err.to_string();

				tracing::warn!(error = %reason, %conversation_id, "Answer generation failed.");

				status = MessageStatus::Failed;
				error = Some(reason);

				break;
			},
			None => break,
		}
	}

	// Aborts the upstream request.
	drop(fragments);

	if status == MessageStatus::Cancelled {
		tracing::info!(%conversation_id, chars = answer.len(), "Client disconnected mid-answer.");
	}

	let mut notice = (status == MessageStatus::Failed).then_some(GENERATION_FAILED);
	let message = NewMessage::assistant(&answer, &results, status, error.as_deref());

	if let Err(err) =
		conversations.append_message(conversation_id, message, OffsetDateTime::now_utc()).await
	{
		tracing::error!(error = %err, %conversation_id, "Failed to store assistant turn.");

		notice = Some(ANSWER_NOT_SAVED);
	}
	if let Some(notice) = notice {
		let _ = tx.send(SearchEvent::Failed(notice.to_string())).await;
	}
}
