use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use sift_domain::{
	message::{MessageStatus, Role},
	search::SearchResults,
};

use crate::{Error, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
	pub user_id: Uuid,
	pub email: String,
	pub password_hash: String,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Conversation {
	pub conversation_id: Uuid,
	pub user_id: Uuid,
	pub title: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ConversationSummary {
	pub conversation_id: Uuid,
	pub title: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub message_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
	pub message_id: Uuid,
	pub conversation_id: Uuid,
	pub role: Role,
	pub content: String,
	/// Present exactly on assistant turns.
	pub search_results: Option<SearchResults>,
	pub status: MessageStatus,
	pub error: Option<String>,
	pub created_at: OffsetDateTime,
}

/// A turn to append. Use [`NewMessage::user`] or [`NewMessage::assistant`] so the
/// search-results rule holds by construction.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
	pub role: Role,
	pub content: &'a str,
	pub search_results: Option<&'a SearchResults>,
	pub status: MessageStatus,
	pub error: Option<&'a str>,
}
impl<'a> NewMessage<'a> {
	pub fn user(content: &'a str) -> Self {
		Self {
			role: Role::User,
			content,
			search_results: None,
			status: MessageStatus::Complete,
			error: None,
		}
	}

	pub fn assistant(
		content: &'a str,
		search_results: &'a SearchResults,
		status: MessageStatus,
		error: Option<&'a str>,
	) -> Self {
		Self { role: Role::Assistant, content, search_results: Some(search_results), status, error }
	}

	/// Rejects combinations the messages table forbids.
	pub fn validate(&self) -> Result<()> {
		match self.role {
			Role::System =>
				return Err(Error::InvalidArgument("System turns are not persisted.".to_string())),
			Role::User =>
				if self.search_results.is_some() || self.status != MessageStatus::Complete {
					return Err(Error::InvalidArgument(
						"User turns carry no search results and are always complete.".to_string(),
					));
				},
			Role::Assistant =>
				if self.search_results.is_none() {
					return Err(Error::InvalidArgument(
						"Assistant turns must carry search results.".to_string(),
					));
				},
		}

		Ok(())
	}
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRow {
	pub(crate) message_id: Uuid,
	pub(crate) conversation_id: Uuid,
	pub(crate) role: String,
	pub(crate) content: String,
	pub(crate) search_results: Option<Value>,
	pub(crate) status: String,
	pub(crate) error: Option<String>,
	pub(crate) created_at: OffsetDateTime,
}
impl TryFrom<MessageRow> for Message {
	type Error = Error;

	fn try_from(row: MessageRow) -> Result<Self> {
		let role: Role = row.role.parse().map_err(|err| Error::InvalidRow(format!("{err}")))?;
		let status: MessageStatus = row.status.parse().map_err(|err| Error::InvalidRow(format!("{err}")))?;
		let search_results: Option<SearchResults> = row
			.search_results
			.map(serde_json::from_value)
			.transpose()
			.map_err(|err| Error::InvalidRow(format!("search_results: {err}")))?;

		Ok(Self {
			message_id: row.message_id,
			conversation_id: row.conversation_id,
			role,
			content: row.content,
			search_results,
			status,
			error: row.error,
			created_at: row.created_at,
		})
	}
}
