use std::{
	future,
	sync::{Mutex, MutexGuard},
};

use time::OffsetDateTime;
use uuid::Uuid;

use sift_storage::{
	BoxFuture, Error, Result,
	models::{Conversation, ConversationSummary, Message, NewMessage, User},
	store::{ConversationStore, UserStore},
};

/// In-process user and conversation store with the same ownership and ordering rules as
/// the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
	state: Mutex<State>,
}
impl MemoryStore {
	/// Every stored message, across all conversations, in insertion order.
	pub fn all_messages(&self) -> Vec<Message> {
		self.lock().messages.clone()
	}

	pub fn conversation_count(&self) -> usize {
		self.lock().conversations.len()
	}

	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}
}

#[derive(Default)]
struct State {
	users: Vec<User>,
	conversations: Vec<Conversation>,
	messages: Vec<Message>,
}
impl State {
	fn owned(&self, conversation_id: Uuid, user_id: Uuid) -> Result<&Conversation> {
		self.conversations
			.iter()
			.find(|c| c.conversation_id == conversation_id && c.user_id == user_id)
			.ok_or_else(|| not_found(conversation_id))
	}
}

impl UserStore for MemoryStore {
	fn create_user<'a>(
		&'a self,
		email: &'a str,
		password_hash: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<User>> {
		let mut state = self.lock();
		let result = if state.users.iter().any(|user| user.email == email) {
			Err(Error::Conflict("Email is already registered.".to_string()))
		} else {
			let user = User {
				user_id: Uuid::new_v4(),
				email: email.to_string(),
				password_hash: password_hash.to_string(),
				created_at: now,
			};

			state.users.push(user.clone());

			Ok(user)
		};

		Box::pin(future::ready(result))
	}

	fn find_user_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<User>>> {
		let user = self.lock().users.iter().find(|user| user.email == email).cloned();

		Box::pin(future::ready(Ok(user)))
	}

	fn find_user_by_id<'a>(&'a self, user_id: Uuid) -> BoxFuture<'a, Result<Option<User>>> {
		let user = self.lock().users.iter().find(|user| user.user_id == user_id).cloned();

		Box::pin(future::ready(Ok(user)))
	}
}

impl ConversationStore for MemoryStore {
	fn create_conversation<'a>(
		&'a self,
		user_id: Uuid,
		title: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Conversation>> {
		let conversation = Conversation {
			conversation_id: Uuid::new_v4(),
			user_id,
			title: title.to_string(),
			created_at: now,
			updated_at: now,
		};

		self.lock().conversations.push(conversation.clone());

		Box::pin(future::ready(Ok(conversation)))
	}

	fn get_owned_conversation<'a>(
		&'a self,
		conversation_id: Uuid,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<Conversation>> {
		let result = self.lock().owned(conversation_id, user_id).cloned();

		Box::pin(future::ready(result))
	}

	fn list_owned_conversations<'a>(
		&'a self,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<Vec<ConversationSummary>>> {
		let state = self.lock();
		let mut summaries = state
			.conversations
			.iter()
			.filter(|c| c.user_id == user_id)
			.map(|c| ConversationSummary {
				conversation_id: c.conversation_id,
				title: c.title.clone(),
				created_at: c.created_at,
				updated_at: c.updated_at,
				message_count: state
					.messages
					.iter()
					.filter(|m| m.conversation_id == c.conversation_id)
					.count() as i64,
			})
			.collect::<Vec<_>>();

		summaries.sort_by(|a, b| {
			b.updated_at.cmp(&a.updated_at).then(a.conversation_id.cmp(&b.conversation_id))
		});

		Box::pin(future::ready(Ok(summaries)))
	}

	fn append_message<'a>(
		&'a self,
		conversation_id: Uuid,
		message: NewMessage<'a>,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Message>> {
		let result = message.validate().and_then(|()| {
			let mut state = self.lock();
			let conversation = state
				.conversations
				.iter_mut()
				.find(|c| c.conversation_id == conversation_id)
				.ok_or_else(|| not_found(conversation_id))?;

			conversation.updated_at = now;

			let stored = Message {
				message_id: Uuid::new_v4(),
				conversation_id,
				role: message.role,
				content: message.content.to_string(),
				search_results: message.search_results.cloned(),
				status: message.status,
				error: message.error.map(|error| error.to_string()),
				created_at: now,
			};

			state.messages.push(stored.clone());

			Ok(stored)
		});

		Box::pin(future::ready(result))
	}

	fn list_messages<'a>(&'a self, conversation_id: Uuid) -> BoxFuture<'a, Result<Vec<Message>>> {
		let messages = self
			.lock()
			.messages
			.iter()
			.filter(|m| m.conversation_id == conversation_id)
			.cloned()
			.collect();

		Box::pin(future::ready(Ok(messages)))
	}

	fn delete_conversation<'a>(
		&'a self,
		conversation_id: Uuid,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<()>> {
		let mut state = self.lock();
		let result = state.owned(conversation_id, user_id).map(|_| ());

		if result.is_ok() {
			state.messages.retain(|m| m.conversation_id != conversation_id);
			state.conversations.retain(|c| c.conversation_id != conversation_id);
		}

		Box::pin(future::ready(result))
	}

	fn delete_all_conversations<'a>(&'a self, user_id: Uuid) -> BoxFuture<'a, Result<u64>> {
		let mut state = self.lock();
		let owned = state
			.conversations
			.iter()
			.filter(|c| c.user_id == user_id)
			.map(|c| c.conversation_id)
			.collect::<Vec<_>>();

		state.messages.retain(|m| !owned.contains(&m.conversation_id));
		state.conversations.retain(|c| c.user_id != user_id);

		Box::pin(future::ready(Ok(owned.len() as u64)))
	}
}

fn not_found(conversation_id: Uuid) -> Error {
	Error::NotFound(format!("Conversation {conversation_id} not found."))
}
