use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use sift_domain::{
	message::{MessageStatus, Role},
	search::SearchResults,
};
use sift_storage::models::{ConversationSummary, Message};

use crate::{Result, SiftService};

#[derive(Debug, Serialize)]
pub struct ConversationItem {
	pub id: Uuid,
	pub title: String,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
	pub message_count: i64,
}
impl From<ConversationSummary> for ConversationItem {
	fn from(summary: ConversationSummary) -> Self {
		Self {
			id: summary.conversation_id,
			title: summary.title,
			created_at: summary.created_at,
			updated_at: summary.updated_at,
			message_count: summary.message_count,
		}
	}
}

#[derive(Debug, Serialize)]
pub struct MessageItem {
	pub id: Uuid,
	pub role: Role,
	pub content: String,
	pub status: MessageStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub search_results: Option<SearchResults>,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}
impl From<Message> for MessageItem {
	fn from(message: Message) -> Self {
		Self {
			id: message.message_id,
			role: message.role,
			content: message.content,
			status: message.status,
			error: message.error,
			search_results: message.search_results,
			created_at: message.created_at,
		}
	}
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
	pub id: Uuid,
	pub title: String,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
	pub messages: Vec<MessageItem>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
	pub success: bool,
	pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteAllResponse {
	pub success: bool,
	pub message: String,
	pub deleted: u64,
}

impl SiftService {
	pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationItem>> {
		let summaries = self.stores.conversations.list_owned_conversations(user_id).await?;

		Ok(summaries.into_iter().map(ConversationItem::from).collect())
	}

	pub async fn get_conversation(
		&self,
		user_id: Uuid,
		conversation_id: Uuid,
	) -> Result<ConversationDetail> {
		let conversations = &self.stores.conversations;
		let conversation = conversations.get_owned_conversation(conversation_id, user_id).await?;
		let messages = conversations.list_messages(conversation_id).await?;

		Ok(ConversationDetail {
			id: conversation.conversation_id,
			title: conversation.title,
			created_at: conversation.created_at,
			updated_at: conversation.updated_at,
			messages: messages.into_iter().map(MessageItem::from).collect(),
		})
	}

	pub async fn delete_conversation(
		&self,
		user_id: Uuid,
		conversation_id: Uuid,
	) -> Result<DeleteResponse> {
		self.stores.conversations.delete_conversation(conversation_id, user_id).await?;

		tracing::info!(%user_id, %conversation_id, "Conversation deleted.");

		Ok(DeleteResponse { success: true, message: "Conversation deleted successfully.".to_string() })
	}

	pub async fn delete_all_conversations(&self, user_id: Uuid) -> Result<DeleteAllResponse> {
		let deleted = self.stores.conversations.delete_all_conversations(user_id).await?;

		tracing::info!(%user_id, deleted, "All conversations deleted.");

		Ok(DeleteAllResponse {
			success: true,
			message: format!("Deleted {deleted} conversations."),
			deleted,
		})
	}
}
