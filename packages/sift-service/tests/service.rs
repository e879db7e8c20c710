use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use futures::StreamExt;
use tokio::sync::Notify;
use uuid::Uuid;

use sift_domain::{
	message::{MessageStatus, Role},
	search::{SearchHit, SearchResults},
};
use sift_service::{
	CredentialsRequest, Error, SearchEvent, SearchRequest, SearchStream, SiftService,
	rate_limit::SEARCH_ENDPOINT,
};
use sift_storage::models::Message;
use sift_testkit::{MemoryStore, StubGeneration, StubSearch};

const PASSWORD: &str = "Passw0rd!";

fn paris_results() -> SearchResults {
	SearchResults::new(vec![SearchHit {
		title: "Paris".to_string(),
		url: "https://example.com/paris".to_string(),
		text: "Paris is the capital of France.".to_string(),
		highlights: vec!["capital of France".to_string()],
	}])
}

fn service_with(
	search: StubSearch,
	generation: StubGeneration,
) -> (SiftService, Arc<MemoryStore>, Arc<StubSearch>, Arc<StubGeneration>) {
	let search = Arc::new(search);
	let generation = Arc::new(generation);
	let (service, store) =
		sift_testkit::memory_service(sift_testkit::test_config(), search.clone(), generation.clone());

	(service, store, search, generation)
}

fn credentials(email: &str, password: &str) -> CredentialsRequest {
	CredentialsRequest { email: email.to_string(), password: password.to_string() }
}

fn query(text: &str, conversation_id: Option<Uuid>) -> SearchRequest {
	SearchRequest { query: text.to_string(), conversation_id }
}

async fn sign_up(service: &SiftService, email: &str) -> Uuid {
	service.signup(credentials(email, PASSWORD)).await.expect("Signup failed.").user.id
}

async fn run(service: &SiftService, user_id: Uuid, req: SearchRequest) -> (Uuid, Vec<SearchEvent>) {
	let SearchStream { conversation_id, events } =
		service.search(user_id, req).await.expect("Search failed to start.");

	(conversation_id, events.collect().await)
}

fn assistant_turns(store: &MemoryStore) -> Vec<Message> {
	store.all_messages().into_iter().filter(|m| m.role == Role::Assistant).collect()
}

#[tokio::test]
async fn signup_reports_every_invalid_field() {
	let (service, store, _, _) =
		service_with(StubSearch::returning(SearchResults::default()), StubGeneration::fragments(&[]));
	let err = service
		.signup(credentials("not-an-email", "short"))
		.await
		.expect_err("Expected validation failure.");
	let fields = match err {
		Error::InvalidRequest { fields, .. } => fields,
		other => panic!("Unexpected error: {other:?}"),
	};

	assert_eq!(fields.get("email").map(String::as_str), Some("Invalid email address."));
	assert_eq!(
		fields.get("password").map(String::as_str),
		Some("Password must be at least 8 characters long.")
	);
	assert_eq!(store.conversation_count(), 0);
}

#[tokio::test]
async fn signup_login_and_authenticate_round_trip() {
	let (service, _, _, _) =
		service_with(StubSearch::returning(SearchResults::default()), StubGeneration::fragments(&[]));
	let signup = service.signup(credentials("Ada@Example.com", PASSWORD)).await.expect("Signup failed.");

	assert_eq!(signup.user.email, "ada@example.com");

	let login = service.login(credentials("ada@example.com", PASSWORD)).await.expect("Login failed.");
	let user = service.authenticate(&login.token).await.expect("Token rejected.");

	assert_eq!(login.user.id, signup.user.id);
	assert_eq!(user.user_id, signup.user.id);
	assert_ne!(user.password_hash, PASSWORD);
}

#[tokio::test]
async fn duplicate_email_is_rejected_case_insensitively() {
	let (service, _, _, _) =
		service_with(StubSearch::returning(SearchResults::default()), StubGeneration::fragments(&[]));

	sign_up(&service, "ada@example.com").await;

	let err = service
		.signup(credentials("ADA@example.com", PASSWORD))
		.await
		.expect_err("Expected duplicate email.");

	assert!(matches!(err, Error::EmailTaken));
}

#[tokio::test]
async fn login_rejects_wrong_password_and_unknown_email_alike() {
	let (service, _, _, _) =
		service_with(StubSearch::returning(SearchResults::default()), StubGeneration::fragments(&[]));

	sign_up(&service, "ada@example.com").await;

	let wrong = service.login(credentials("ada@example.com", "Wr0ngpass")).await;
	let unknown = service.login(credentials("bob@example.com", PASSWORD)).await;

	assert!(matches!(wrong, Err(Error::InvalidCredentials)));
	assert!(matches!(unknown, Err(Error::InvalidCredentials)));
}

#[tokio::test]
async fn unknown_email_costs_a_password_verification() {
	let mut cfg = sift_testkit::test_config();

	cfg.security.bcrypt_cost = 8;

	let (service, _) = sift_testkit::memory_service(
		cfg,
		Arc::new(StubSearch::returning(SearchResults::default())),
		Arc::new(StubGeneration::fragments(&[])),
	);

	sign_up(&service, "ada@example.com").await;

	// The first miss also builds the decoy hash.
	let _ = service.login(credentials("nobody@example.com", PASSWORD)).await;

	let mut known = Duration::MAX;
	let mut unknown = Duration::MAX;

	for _ in 0..3 {
		let started = Instant::now();
		let err = service
			.login(credentials("ada@example.com", "Wr0ngPassword"))
			.await
			.expect_err("Expected rejection.");

		known = known.min(started.elapsed());

		assert!(matches!(err, Error::InvalidCredentials));

		let started = Instant::now();
		let err = service
			.login(credentials("nobody@example.com", PASSWORD))
			.await
			.expect_err("Expected rejection.");

		unknown = unknown.min(started.elapsed());

		assert!(matches!(err, Error::InvalidCredentials));
	}

	assert!(unknown * 4 >= known, "unknown={unknown:?} known={known:?}");
}

#[tokio::test]
async fn token_for_unknown_user_is_unauthorized() {
	let (service, _, _, _) =
		service_with(StubSearch::returning(SearchResults::default()), StubGeneration::fragments(&[]));
	let token = service.tokens.issue(Uuid::new_v4()).expect("Issue failed.");

	assert!(matches!(service.authenticate(&token).await, Err(Error::Unauthorized { .. })));
	assert!(matches!(service.authenticate("garbage").await, Err(Error::Unauthorized { .. })));
}

#[tokio::test]
async fn first_query_creates_titled_conversation_and_stores_both_turns() {
	let (service, store, _, generation) = service_with(
		StubSearch::returning(paris_results()),
		StubGeneration::fragments(&["Paris", " is the capital", " [1]."]),
	);
	let user_id = sign_up(&service, "ada@example.com").await;
	let long_query = format!("What is the capital of France {}", "and why ".repeat(10));
	let (conversation_id, events) = run(&service, user_id, query(&long_query, None)).await;

	assert_eq!(
		events,
		vec![
			SearchEvent::Fragment("Paris".to_string()),
			SearchEvent::Fragment(" is the capital".to_string()),
			SearchEvent::Fragment(" [1].".to_string()),
		]
	);

	let detail = service.get_conversation(user_id, conversation_id).await.expect("Missing conversation.");

	assert_eq!(detail.title.chars().count(), 50);
	assert!(long_query.starts_with(&detail.title));
	assert_eq!(detail.messages.len(), 2);
	assert_eq!(detail.messages[0].role, Role::User);
	assert!(detail.messages[0].search_results.is_none());
	assert_eq!(detail.messages[1].role, Role::Assistant);
	assert_eq!(detail.messages[1].content, "Paris is the capital [1].");
	assert_eq!(detail.messages[1].status, MessageStatus::Complete);
	assert_eq!(detail.messages[1].search_results, Some(paris_results()));

	let prompt = &generation.prompts()[0];

	assert_eq!(prompt[0].role, Role::System);
	assert!(prompt[0].content.contains("[1] Paris\nhttps://example.com/paris\n"));
	assert_eq!(prompt.last().map(|m| m.role), Some(Role::User));
	assert_eq!(store.all_messages().len(), 2);
}

#[tokio::test]
async fn follow_up_replays_history_and_refreshes_updated_at() {
	let (service, _, _, generation) = service_with(
		StubSearch::returning(paris_results()),
		StubGeneration::fragments(&["Answer."]),
	);
	let user_id = sign_up(&service, "ada@example.com").await;
	let (conversation_id, _) = run(&service, user_id, query("capital of France", None)).await;
	let before = service.list_conversations(user_id).await.expect("List failed.");

	tokio::time::sleep(Duration::from_millis(5)).await;

	let (continued, _) =
		run(&service, user_id, query("and its population?", Some(conversation_id))).await;
	let after = service.list_conversations(user_id).await.expect("List failed.");
	let prompt = &generation.prompts()[1];
	let replayed = prompt[1..].iter().map(|m| (m.role, m.content.as_str())).collect::<Vec<_>>();

	assert_eq!(continued, conversation_id);
	assert_eq!(
		replayed,
		vec![
			(Role::User, "capital of France"),
			(Role::Assistant, "Answer."),
			(Role::User, "and its population?"),
		]
	);
	assert_eq!(after.len(), 1);
	assert_eq!(after[0].message_count, 4);
	assert!(after[0].updated_at > before[0].updated_at);
}

#[tokio::test]
async fn foreign_conversation_is_not_found_without_side_effects() {
	let (service, store, search, generation) = service_with(
		StubSearch::returning(paris_results()),
		StubGeneration::fragments(&["Answer."]),
	);
	let owner = sign_up(&service, "ada@example.com").await;
	let intruder = sign_up(&service, "bob@example.com").await;
	let (conversation_id, _) = run(&service, owner, query("capital of France", None)).await;
	let err = service
		.search(intruder, query("leak it", Some(conversation_id)))
		.await
		.err()
		.expect("Expected not found.");

	assert!(matches!(err, Error::NotFound { .. }));
	assert!(matches!(
		service.search(owner, query("q", Some(Uuid::new_v4()))).await.err(),
		Some(Error::NotFound { .. })
	));
	assert_eq!(search.calls(), 1);
	assert_eq!(generation.prompts().len(), 1);
	assert_eq!(store.all_messages().len(), 2);
	assert_eq!(store.conversation_count(), 1);
}

#[tokio::test]
async fn blank_query_is_rejected_before_anything_is_created() {
	let (service, store, search, _) =
		service_with(StubSearch::returning(paris_results()), StubGeneration::fragments(&["x"]));
	let user_id = sign_up(&service, "ada@example.com").await;
	let err = service.search(user_id, query(" \n\t ", None)).await.err().expect("Expected error.");

	assert!(matches!(err, Error::InvalidRequest { ref fields, .. } if fields.contains_key("query")));
	assert_eq!(store.conversation_count(), 0);
	assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn search_failure_degrades_to_answer_without_results() {
	let (service, store, _, generation) = service_with(
		StubSearch::failing("upstream timeout"),
		StubGeneration::fragments(&["From memory."]),
	);
	let user_id = sign_up(&service, "ada@example.com").await;
	let (_, events) = run(&service, user_id, query("capital of France", None)).await;
	let assistant = assistant_turns(&store);

	assert_eq!(events, vec![SearchEvent::Fragment("From memory.".to_string())]);
	assert_eq!(assistant.len(), 1);
	assert_eq!(assistant[0].search_results, Some(SearchResults::default()));
	assert_eq!(assistant[0].status, MessageStatus::Complete);
	assert!(!generation.prompts()[0][0].content.contains("[1]"));
}

#[tokio::test]
async fn generation_failure_is_reported_and_stored_as_failed() {
	let (service, store, _, _) = service_with(
		StubSearch::returning(paris_results()),
		StubGeneration::scripted(vec![
			Ok("Partial".to_string()),
			Err("model overloaded".to_string()),
			Ok("never sent".to_string()),
		]),
	);
	let user_id = sign_up(&service, "ada@example.com").await;
	let (_, events) = run(&service, user_id, query("capital of France", None)).await;
	let assistant = assistant_turns(&store);

	assert_eq!(events.len(), 2);
	assert_eq!(events[0], SearchEvent::Fragment("Partial".to_string()));
	assert_eq!(
		events[1],
		SearchEvent::Failed("Answer generation failed. Please try again.".to_string())
	);
	assert_eq!(assistant[0].content, "Partial");
	assert_eq!(assistant[0].status, MessageStatus::Failed);
	assert!(assistant[0].error.as_deref().is_some_and(|e| e.contains("model overloaded")));
}

#[tokio::test]
async fn unsaved_answer_ends_with_a_failure_event() {
	let gate = Arc::new(Notify::new());
	let (service, store, _, _) = service_with(
		StubSearch::returning(paris_results()),
		StubGeneration::fragments(&["answer"]).gated(gate.clone()),
	);
	let user_id = sign_up(&service, "ada@example.com").await;
	let SearchStream { conversation_id, mut events } =
		service.search(user_id, query("capital of France", None)).await.expect("Start failed.");

	assert_eq!(events.next().await, Some(SearchEvent::Fragment("answer".to_string())));

	service.delete_conversation(user_id, conversation_id).await.expect("Delete failed.");
	gate.notify_one();

	let rest = events.collect::<Vec<_>>().await;

	assert_eq!(rest, vec![SearchEvent::Failed("The answer could not be saved.".to_string())]);
	assert!(store.all_messages().is_empty());
}

#[tokio::test]
async fn client_disconnect_cancels_generation_and_keeps_partial_answer() {
	let (service, store, _, generation) = service_with(
		StubSearch::returning(paris_results()),
		StubGeneration::fragments(&["Hello", " world"]).hanging(),
	);
	let user_id = sign_up(&service, "ada@example.com").await;
	let mut stream = service.search(user_id, query("greet me", None)).await.expect("Start failed.");

	assert_eq!(stream.events.next().await, Some(SearchEvent::Fragment("Hello".to_string())));

	drop(stream);

	let mut assistant = assistant_turns(&store);

	for _ in 0..200 {
		if !assistant.is_empty() {
			break;
		}

		tokio::time::sleep(Duration::from_millis(10)).await;

		assistant = assistant_turns(&store);
	}

	assert_eq!(assistant.len(), 1);
	assert_eq!(assistant[0].status, MessageStatus::Cancelled);
	assert!(assistant[0].content.starts_with("Hello"));
	assert!(generation.stream_dropped());
}

#[tokio::test]
async fn rate_limit_rejects_calls_past_the_window_quota() {
	let mut cfg = sift_testkit::test_config();

	cfg.rate_limit.search_per_window = 2;

	let (service, _) = sift_testkit::memory_service(
		cfg,
		Arc::new(StubSearch::returning(SearchResults::default())),
		Arc::new(StubGeneration::fragments(&[])),
	);
	let user_id = Uuid::new_v4();
	let other = Uuid::new_v4();

	assert!(service.check_rate_limit(user_id, SEARCH_ENDPOINT).await.is_ok());
	assert!(service.check_rate_limit(user_id, SEARCH_ENDPOINT).await.is_ok());

	let Err(Error::RateLimited { limit, retry_after_secs }) =
		service.check_rate_limit(user_id, SEARCH_ENDPOINT).await
	else {
		panic!("Expected rate limit.");
	};

	assert_eq!(limit, 2);
	assert!(retry_after_secs > 0 && retry_after_secs <= 3_600);
	assert!(service.check_rate_limit(other, SEARCH_ENDPOINT).await.is_ok());
}

#[tokio::test]
async fn history_is_scoped_ordered_and_deletable() {
	let (service, store, _, _) =
		service_with(StubSearch::returning(paris_results()), StubGeneration::fragments(&["A."]));
	let ada = sign_up(&service, "ada@example.com").await;
	let bob = sign_up(&service, "bob@example.com").await;
	let (first, _) = run(&service, ada, query("first", None)).await;

	tokio::time::sleep(Duration::from_millis(5)).await;

	let (second, _) = run(&service, ada, query("second", None)).await;
	let (bobs, _) = run(&service, bob, query("bob's", None)).await;
	let listed = service.list_conversations(ada).await.expect("List failed.");

	assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![second, first]);

	let relisted = service.list_conversations(ada).await.expect("List failed.");

	assert_eq!(
		relisted.iter().map(|c| (c.id, c.updated_at)).collect::<Vec<_>>(),
		listed.iter().map(|c| (c.id, c.updated_at)).collect::<Vec<_>>()
	);
	assert!(matches!(
		service.get_conversation(bob, first).await,
		Err(Error::NotFound { .. })
	));
	assert!(matches!(
		service.delete_conversation(bob, first).await,
		Err(Error::NotFound { .. })
	));

	let deleted = service.delete_conversation(ada, first).await.expect("Delete failed.");

	assert!(deleted.success);
	assert!(store.all_messages().iter().all(|m| m.conversation_id != first));
	assert!(matches!(
		service.get_conversation(ada, first).await,
		Err(Error::NotFound { .. })
	));
	assert!(matches!(
		service.delete_conversation(ada, first).await,
		Err(Error::NotFound { .. })
	));

	let cleared = service.delete_all_conversations(ada).await.expect("Delete all failed.");

	assert_eq!(cleared.deleted, 1);
	assert!(service.list_conversations(ada).await.expect("List failed.").is_empty());
	assert_eq!(service.list_conversations(bob).await.expect("List failed.")[0].id, bobs);
	assert_eq!(service.delete_all_conversations(ada).await.expect("Delete all failed.").deleted, 0);
}
