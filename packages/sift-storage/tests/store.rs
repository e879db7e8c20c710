use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use sift_config::Postgres;
use sift_domain::{
	message::{MessageStatus, Role},
	search::{SearchHit, SearchResults},
};
use sift_storage::{
	Error,
	db::Db,
	models::NewMessage,
	store::{ConversationStore, UserStore},
};
use sift_testkit::TestDatabase;

async fn bootstrap(test_db: &TestDatabase) -> Db {
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	db
}

fn results() -> SearchResults {
	SearchResults::new(vec![SearchHit {
		title: "Paris".to_string(),
		url: "https://example.com/paris".to_string(),
		text: "Paris is the capital of France.".to_string(),
		highlights: Vec::new(),
	}])
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SIFT_PG_DSN to run."]
async fn schema_bootstrap_is_idempotent() {
	let Some(base_dsn) = sift_testkit::env_dsn() else {
		eprintln!("Skipping schema_bootstrap_is_idempotent; set SIFT_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;

	db.ensure_schema().await.expect("Second bootstrap failed.");

	let count: i64 = sqlx::query_scalar(
		"\
SELECT count(*)
FROM information_schema.tables
WHERE table_name IN ('users', 'conversations', 'messages')",
	)
	.fetch_one(&db.pool)
	.await
	.expect("Failed to query schema tables.");

	assert_eq!(count, 3);

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SIFT_PG_DSN to run."]
async fn duplicate_email_is_a_conflict() {
	let Some(base_dsn) = sift_testkit::env_dsn() else {
		eprintln!("Skipping duplicate_email_is_a_conflict; set SIFT_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let now = OffsetDateTime::now_utc();
	let user = db.create_user("ada@example.com", "hash", now).await.expect("Create failed.");
	let err = db
		.create_user("ada@example.com", "hash", now)
		.await
		.expect_err("Expected unique violation.");

	assert!(matches!(err, Error::Conflict(_)));

	let by_email = db.find_user_by_email("ada@example.com").await.expect("Lookup failed.");
	let by_id = db.find_user_by_id(user.user_id).await.expect("Lookup failed.");

	assert_eq!(by_email.map(|u| u.user_id), Some(user.user_id));
	assert_eq!(by_id.map(|u| u.email), Some("ada@example.com".to_string()));
	assert!(db.find_user_by_id(Uuid::new_v4()).await.expect("Lookup failed.").is_none());

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SIFT_PG_DSN to run."]
async fn append_orders_messages_and_touches_conversation() {
	let Some(base_dsn) = sift_testkit::env_dsn() else {
		eprintln!(
			"Skipping append_orders_messages_and_touches_conversation; set SIFT_PG_DSN to run this test."
		);

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let t0 = OffsetDateTime::now_utc().replace_nanosecond(0).expect("Valid nanosecond.");
	let user = db.create_user("ada@example.com", "hash", t0).await.expect("Create failed.");
	let older = db.create_conversation(user.user_id, "older", t0).await.expect("Create failed.");
	let newer = db
		.create_conversation(user.user_id, "newer", t0 + Duration::seconds(1))
		.await
		.expect("Create failed.");
	let search_results = results();
	let t1 = t0 + Duration::seconds(10);

	db.append_message(older.conversation_id, NewMessage::user("capital of France"), t1)
		.await
		.expect("Append failed.");
	db.append_message(
		older.conversation_id,
		NewMessage::assistant("Paris.", &search_results, MessageStatus::Complete, None),
		t1,
	)
	.await
	.expect("Append failed.");

	let messages = db.list_messages(older.conversation_id).await.expect("List failed.");

	assert_eq!(messages.iter().map(|m| m.role).collect::<Vec<_>>(), vec![Role::User, Role::Assistant]);
	assert_eq!(messages[1].search_results, Some(search_results));
	assert!(messages[0].search_results.is_none());

	let summaries = db.list_owned_conversations(user.user_id).await.expect("List failed.");

	assert_eq!(
		summaries.iter().map(|s| s.conversation_id).collect::<Vec<_>>(),
		vec![older.conversation_id, newer.conversation_id]
	);
	assert_eq!(summaries[0].message_count, 2);
	assert_eq!(summaries[0].updated_at, t1);
	assert_eq!(summaries[1].message_count, 0);

	let missing = db
		.append_message(Uuid::new_v4(), NewMessage::user("orphan"), t1)
		.await
		.expect_err("Expected missing conversation.");

	assert!(matches!(missing, Error::NotFound(_)));

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SIFT_PG_DSN to run."]
async fn messages_keep_append_order_when_clock_steps_back() {
	let Some(base_dsn) = sift_testkit::env_dsn() else {
		eprintln!(
			"Skipping messages_keep_append_order_when_clock_steps_back; set SIFT_PG_DSN to run this test."
		);

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let now = OffsetDateTime::now_utc();
	let user = db.create_user("ada@example.com", "hash", now).await.expect("Create failed.");
	let conversation =
		db.create_conversation(user.user_id, "skew", now).await.expect("Create failed.");
	let search_results = results();

	db.append_message(conversation.conversation_id, NewMessage::user("capital of France"), now)
		.await
		.expect("Append failed.");
	db.append_message(
		conversation.conversation_id,
		NewMessage::assistant("Paris.", &search_results, MessageStatus::Complete, None),
		now - Duration::hours(1),
	)
	.await
	.expect("Append failed.");

	let messages = db.list_messages(conversation.conversation_id).await.expect("List failed.");

	assert_eq!(messages.iter().map(|m| m.role).collect::<Vec<_>>(), vec![Role::User, Role::Assistant]);

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SIFT_PG_DSN to run."]
async fn search_results_constraint_rejects_user_turn_payload() {
	let Some(base_dsn) = sift_testkit::env_dsn() else {
		eprintln!(
			"Skipping search_results_constraint_rejects_user_turn_payload; set SIFT_PG_DSN to run this test."
		);

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let now = OffsetDateTime::now_utc();
	let user = db.create_user("ada@example.com", "hash", now).await.expect("Create failed.");
	let conversation = db.create_conversation(user.user_id, "t", now).await.expect("Create failed.");
	let raw = sqlx::query(
		"\
INSERT INTO messages (message_id, conversation_id, role, content, search_results, created_at)
VALUES ($1, $2, 'user', 'q', '{}'::jsonb, $3)",
	)
	.bind(Uuid::new_v4())
	.bind(conversation.conversation_id)
	.bind(now)
	.execute(&db.pool)
	.await;

	assert!(raw.is_err());

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SIFT_PG_DSN to run."]
async fn deletes_are_owner_scoped_and_cascade() {
	let Some(base_dsn) = sift_testkit::env_dsn() else {
		eprintln!("Skipping deletes_are_owner_scoped_and_cascade; set SIFT_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let now = OffsetDateTime::now_utc();
	let ada = db.create_user("ada@example.com", "hash", now).await.expect("Create failed.");
	let bob = db.create_user("bob@example.com", "hash", now).await.expect("Create failed.");
	let first = db.create_conversation(ada.user_id, "first", now).await.expect("Create failed.");
	let second = db.create_conversation(ada.user_id, "second", now).await.expect("Create failed.");

	db.create_conversation(bob.user_id, "bob", now).await.expect("Create failed.");

	for conversation in [&first, &second] {
		db.append_message(conversation.conversation_id, NewMessage::user("q"), now)
			.await
			.expect("Append failed.");
	}

	let foreign = db
		.get_owned_conversation(first.conversation_id, bob.user_id)
		.await
		.expect_err("Expected not found.");

	assert!(matches!(foreign, Error::NotFound(_)));
	assert!(matches!(
		db.delete_conversation(first.conversation_id, bob.user_id).await,
		Err(Error::NotFound(_))
	));

	db.delete_conversation(first.conversation_id, ada.user_id).await.expect("Delete failed.");

	let orphans: i64 =
		sqlx::query_scalar("SELECT count(*) FROM messages WHERE conversation_id = $1")
			.bind(first.conversation_id)
			.fetch_one(&db.pool)
			.await
			.expect("Count failed.");

	assert_eq!(orphans, 0);
	assert_eq!(db.delete_all_conversations(ada.user_id).await.expect("Delete all failed."), 1);
	assert_eq!(db.delete_all_conversations(ada.user_id).await.expect("Delete all failed."), 0);
	assert_eq!(db.list_owned_conversations(bob.user_id).await.expect("List failed.").len(), 1);

	sqlx::query("DELETE FROM users WHERE user_id = $1")
		.bind(bob.user_id)
		.execute(&db.pool)
		.await
		.expect("User delete failed.");

	let remaining: i64 = sqlx::query_scalar("SELECT count(*) FROM conversations")
		.fetch_one(&db.pool)
		.await
		.expect("Count failed.");

	assert_eq!(remaining, 0);

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
