use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result,
	db::Db,
	models::{Conversation, ConversationSummary, Message, MessageRow, NewMessage, User},
};

const MESSAGE_COLUMNS: &str =
	"message_id, conversation_id, role, content, search_results, status, error, created_at";

enum UserKey<'a> {
	Email(&'a str),
	Id(Uuid),
}

pub trait UserStore
where
	Self: Send + Sync,
{
	/// Fails with [`Error::Conflict`] when the email is already registered.
	fn create_user<'a>(
		&'a self,
		email: &'a str,
		password_hash: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<User>>;

	fn find_user_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<User>>>;

	fn find_user_by_id<'a>(&'a self, user_id: Uuid) -> BoxFuture<'a, Result<Option<User>>>;
}

/// Conversations and their messages. Every read and delete is scoped to the owning user;
/// a conversation owned by someone else behaves exactly like a missing one.
pub trait ConversationStore
where
	Self: Send + Sync,
{
	fn create_conversation<'a>(
		&'a self,
		user_id: Uuid,
		title: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Conversation>>;

	fn get_owned_conversation<'a>(
		&'a self,
		conversation_id: Uuid,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<Conversation>>;

	/// Most recently updated first.
	fn list_owned_conversations<'a>(
		&'a self,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<Vec<ConversationSummary>>>;

	/// Inserts the message and refreshes the conversation's `updated_at` atomically.
	fn append_message<'a>(
		&'a self,
		conversation_id: Uuid,
		message: NewMessage<'a>,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Message>>;

	/// Messages in creation order.
	fn list_messages<'a>(&'a self, conversation_id: Uuid) -> BoxFuture<'a, Result<Vec<Message>>>;

	fn delete_conversation<'a>(
		&'a self,
		conversation_id: Uuid,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<()>>;

	/// Returns the number of conversations removed.
	fn delete_all_conversations<'a>(&'a self, user_id: Uuid) -> BoxFuture<'a, Result<u64>>;
}

impl UserStore for Db {
	fn create_user<'a>(
		&'a self,
		email: &'a str,
		password_hash: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<User>> {
		Box::pin(insert_user(self, email, password_hash, now))
	}

	fn find_user_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<User>>> {
		Box::pin(select_user(self, "email", UserKey::Email(email)))
	}

	fn find_user_by_id<'a>(&'a self, user_id: Uuid) -> BoxFuture<'a, Result<Option<User>>> {
		Box::pin(select_user(self, "user_id", UserKey::Id(user_id)))
	}
}

impl ConversationStore for Db {
	fn create_conversation<'a>(
		&'a self,
		user_id: Uuid,
		title: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Conversation>> {
		Box::pin(insert_conversation(self, user_id, title, now))
	}

	fn get_owned_conversation<'a>(
		&'a self,
		conversation_id: Uuid,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<Conversation>> {
		Box::pin(select_owned_conversation(self, conversation_id, user_id))
	}

	fn list_owned_conversations<'a>(
		&'a self,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<Vec<ConversationSummary>>> {
		Box::pin(select_conversation_summaries(self, user_id))
	}

	fn append_message<'a>(
		&'a self,
		conversation_id: Uuid,
		message: NewMessage<'a>,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Message>> {
		Box::pin(insert_message(self, conversation_id, message, now))
	}

	fn list_messages<'a>(&'a self, conversation_id: Uuid) -> BoxFuture<'a, Result<Vec<Message>>> {
		Box::pin(select_messages(self, conversation_id))
	}

	fn delete_conversation<'a>(
		&'a self,
		conversation_id: Uuid,
		user_id: Uuid,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(remove_conversation(self, conversation_id, user_id))
	}

	fn delete_all_conversations<'a>(&'a self, user_id: Uuid) -> BoxFuture<'a, Result<u64>> {
		Box::pin(remove_all_conversations(self, user_id))
	}
}

async fn insert_user(
	db: &Db,
	email: &str,
	password_hash: &str,
	now: OffsetDateTime,
) -> Result<User> {
	let user = sqlx::query_as::<_, User>(
		"\
INSERT INTO users (user_id, email, password_hash, created_at)
VALUES ($1, $2, $3, $4)
RETURNING user_id, email, password_hash, created_at",
	)
	.bind(Uuid::new_v4())
	.bind(email)
	.bind(password_hash)
	.bind(now)
	.fetch_one(&db.pool)
	.await
	.map_err(|err| conflict_on_unique(err, "Email is already registered."))?;

	Ok(user)
}

async fn select_user(db: &Db, column: &str, key: UserKey<'_>) -> Result<Option<User>> {
	let sql =
		format!("SELECT user_id, email, password_hash, created_at FROM users WHERE {column} = $1");
	let query = sqlx::query_as::<_, User>(&sql);
	let query = match key {
		UserKey::Email(email) => query.bind(email),
		UserKey::Id(user_id) => query.bind(user_id),
	};

	Ok(query.fetch_optional(&db.pool).await?)
}

async fn insert_conversation(
	db: &Db,
	user_id: Uuid,
	title: &str,
	now: OffsetDateTime,
) -> Result<Conversation> {
	let conversation = sqlx::query_as::<_, Conversation>(
		"\
INSERT INTO conversations (conversation_id, user_id, title, created_at, updated_at)
VALUES ($1, $2, $3, $4, $4)
RETURNING conversation_id, user_id, title, created_at, updated_at",
	)
	.bind(Uuid::new_v4())
	.bind(user_id)
	.bind(title)
	.bind(now)
	.fetch_one(&db.pool)
	.await?;

	Ok(conversation)
}

async fn select_owned_conversation(
	db: &Db,
	conversation_id: Uuid,
	user_id: Uuid,
) -> Result<Conversation> {
	sqlx::query_as::<_, Conversation>(
		"\
SELECT conversation_id, user_id, title, created_at, updated_at
FROM conversations
WHERE conversation_id = $1 AND user_id = $2",
	)
	.bind(conversation_id)
	.bind(user_id)
	.fetch_optional(&db.pool)
	.await?
	.ok_or_else(|| conversation_not_found(conversation_id))
}

async fn select_conversation_summaries(db: &Db, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
	let rows = sqlx::query_as::<_, ConversationSummary>(
		"\
SELECT
	c.conversation_id,
	c.title,
	c.created_at,
	c.updated_at,
	count(m.message_id) AS message_count
FROM conversations c
LEFT JOIN messages m ON m.conversation_id = c.conversation_id
WHERE c.user_id = $1
GROUP BY c.conversation_id
ORDER BY c.updated_at DESC, c.conversation_id",
	)
	.bind(user_id)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

async fn select_messages(db: &Db, conversation_id: Uuid) -> Result<Vec<Message>> {
	let sql = format!(
		"SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY seq"
	);
	let rows =
		sqlx::query_as::<_, MessageRow>(&sql).bind(conversation_id).fetch_all(&db.pool).await?;

	rows.into_iter().map(Message::try_from).collect()
}

async fn insert_message(
	db: &Db,
	conversation_id: Uuid,
	message: NewMessage<'_>,
	now: OffsetDateTime,
) -> Result<Message> {
	message.validate()?;

	let search_results = message
		.search_results
		.map(serde_json::to_value)
		.transpose()
		.map_err(|err| Error::InvalidArgument(format!("search_results: {err}")))?;
	let mut tx = db.pool.begin().await?;
	let touched = sqlx::query("UPDATE conversations SET updated_at = $2 WHERE conversation_id = $1")
		.bind(conversation_id)
		.bind(now)
		.execute(&mut *tx)
		.await?;

	if touched.rows_affected() == 0 {
		return Err(conversation_not_found(conversation_id));
	}

	let sql = format!(
		"\
INSERT INTO messages (message_id, conversation_id, role, content, search_results, status, error, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
RETURNING {MESSAGE_COLUMNS}"
	);
	let row = sqlx::query_as::<_, MessageRow>(&sql)
		.bind(Uuid::new_v4())
		.bind(conversation_id)
		.bind(message.role.as_str())
		.bind(message.content)
		.bind(search_results)
		.bind(message.status.as_str())
		.bind(message.error)
		.bind(now)
		.fetch_one(&mut *tx)
		.await?;

	tx.commit().await?;

	Message::try_from(row)
}

async fn remove_conversation(db: &Db, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
	let mut tx = db.pool.begin().await?;
	let owned: Option<Uuid> = sqlx::query_scalar(
		"\
SELECT conversation_id
FROM conversations
WHERE conversation_id = $1 AND user_id = $2
FOR UPDATE",
	)
	.bind(conversation_id)
	.bind(user_id)
	.fetch_optional(&mut *tx)
	.await?;

	if owned.is_none() {
		return Err(conversation_not_found(conversation_id));
	}

	let messages = sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
		.bind(conversation_id)
		.execute(&mut *tx)
		.await?;

	sqlx::query("DELETE FROM conversations WHERE conversation_id = $1")
		.bind(conversation_id)
		.execute(&mut *tx)
		.await?;
	tx.commit().await?;

	tracing::debug!(
		%conversation_id,
		messages = messages.rows_affected(),
		"Deleted conversation."
	);

	Ok(())
}

async fn remove_all_conversations(db: &Db, user_id: Uuid) -> Result<u64> {
	let mut tx = db.pool.begin().await?;

	sqlx::query(
		"\
DELETE FROM messages
WHERE conversation_id IN (SELECT conversation_id FROM conversations WHERE user_id = $1)",
	)
	.bind(user_id)
	.execute(&mut *tx)
	.await?;

	let deleted = sqlx::query("DELETE FROM conversations WHERE user_id = $1")
		.bind(user_id)
		.execute(&mut *tx)
		.await?
		.rows_affected();

	tx.commit().await?;

	Ok(deleted)
}

fn conversation_not_found(conversation_id: Uuid) -> Error {
	Error::NotFound(format!("Conversation {conversation_id} not found."))
}

fn conflict_on_unique(err: sqlx::Error, message: &str) -> Error {
	let unique = matches!(&err, sqlx::Error::Database(db_err) if db_err.is_unique_violation());

	if unique { Error::Conflict(message.to_string()) } else { Error::Sqlx(err) }
}
