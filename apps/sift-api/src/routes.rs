use std::{borrow::Cow, collections::BTreeMap, convert::Infallible};

use axum::{
	Json, Router,
	extract::{
		Path, State,
		rejection::{JsonRejection, PathRejection},
	},
	http::{HeaderValue, StatusCode, header::RETRY_AFTER},
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing::{get, post},
};
use futures::{StreamExt, stream};
use serde::Serialize;
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};
use uuid::Uuid;

use sift_service::{
	AuthResponse, ConversationDetail, ConversationItem, CredentialsRequest, DeleteAllResponse,
	DeleteResponse, Error, SearchEvent, SearchRequest, SearchStream, UserProfile,
	rate_limit::SEARCH_ENDPOINT,
};

use crate::{auth::CurrentUser, state::AppState};

pub fn router(state: AppState) -> Router {
	let cors = cors_layer(&state.service.cfg.service.cors_origins);

	Router::new()
		.route("/", get(root))
		.route("/health", get(health))
		.route("/auth/signup", post(signup))
		.route("/auth/login", post(login))
		.route("/auth/me", get(me))
		.route("/search", post(search))
		.route("/history/conversations", get(list_conversations).delete(delete_all_conversations))
		.route(
			"/history/conversations/{conversation_id}",
			get(get_conversation).delete(delete_conversation),
		)
		.layer(TraceLayer::new_for_http())
		.layer(cors)
		.with_state(state)
}

/// Allows the configured origins, or any origin when none are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
	let allowed = origins.iter().filter_map(|origin| origin.parse().ok()).collect::<Vec<HeaderValue>>();
	let layer = CorsLayer::new().allow_headers(Any).allow_methods(Any);

	if allowed.is_empty() { layer.allow_origin(Any) } else { layer.allow_origin(allowed) }
}

async fn root() -> Json<Value> {
	Json(serde_json::json!({
		"name": env!("CARGO_PKG_NAME"),
		"version": env!("CARGO_PKG_VERSION"),
		"status": "running",
	}))
}

async fn health() -> Json<Value> {
	Json(serde_json::json!({ "status": "healthy" }))
}

async fn signup(
	State(state): State<AppState>,
	payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
	let Json(payload) = payload?;
	let response = state.service.signup(payload).await?;

	Ok(Json(response))
}

async fn login(
	State(state): State<AppState>,
	payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
	let Json(payload) = payload?;
	let response = state.service.login(payload).await?;

	Ok(Json(response))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<UserProfile> {
	Json(UserProfile::from(user))
}

/// Streams the answer as server-sent events: one `conversation` event carrying the id,
/// one unnamed event per text fragment, an `error` event if generation fails, and a
/// final `done` event.
async fn search(
	State(state): State<AppState>,
	CurrentUser(user): CurrentUser,
	payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
	let Json(payload) = payload?;
	let payload = payload.sanitized()?;

	state.service.check_rate_limit(user.user_id, SEARCH_ENDPOINT).await?;

	let SearchStream { conversation_id, events } =
		state.service.search(user.user_id, payload).await?;
	let opening = Event::default()
		.event("conversation")
		.json_data(serde_json::json!({ "conversation_id": conversation_id }))
		.map_err(|err| ApiError::internal(format!("Failed to encode event: {err}")))?;
	let fragments = events.map(|event| match event {
		SearchEvent::Fragment(text) => Event::default().data(sse_data(&text)),
		SearchEvent::Failed(reason) => Event::default().event("error").data(sse_data(&reason)),
	});
	let body = stream::once(async move { opening })
		.chain(fragments)
		.chain(stream::once(async { Event::default().event("done").data("[DONE]") }))
		.map(Ok::<_, Infallible>);

	Ok(Sse::new(body).keep_alive(KeepAlive::default()).into_response())
}

async fn list_conversations(
	State(state): State<AppState>,
	CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ConversationItem>>, ApiError> {
	let response = state.service.list_conversations(user.user_id).await?;

	Ok(Json(response))
}

async fn get_conversation(
	State(state): State<AppState>,
	CurrentUser(user): CurrentUser,
	conversation_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ConversationDetail>, ApiError> {
	let Path(conversation_id) = conversation_id?;
	let response = state.service.get_conversation(user.user_id, conversation_id).await?;

	Ok(Json(response))
}

async fn delete_conversation(
	State(state): State<AppState>,
	CurrentUser(user): CurrentUser,
	conversation_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DeleteResponse>, ApiError> {
	let Path(conversation_id) = conversation_id?;
	let response = state.service.delete_conversation(user.user_id, conversation_id).await?;

	Ok(Json(response))
}

async fn delete_all_conversations(
	State(state): State<AppState>,
	CurrentUser(user): CurrentUser,
) -> Result<Json<DeleteAllResponse>, ApiError> {
	let response = state.service.delete_all_conversations(user.user_id).await?;

	Ok(Json(response))
}

/// SSE field values may not contain carriage returns.
fn sse_data(text: &str) -> Cow<'_, str> {
	if text.contains('\r') {
		Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
	} else {
		Cow::Borrowed(text)
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error: String,
	message: String,
	code: u16,
	timestamp: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	fields: Option<BTreeMap<String, String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	retry_after_secs: Option<u64>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<BTreeMap<String, String>>,
	retry_after_secs: Option<u64>,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			status,
			error_code: error_code.into(),
			message: message.into(),
			fields: None,
			retry_after_secs: None,
		}
	}

	pub fn unauthorized(message: impl Into<String>) -> Self {
		Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
	}

	fn internal(detail: String) -> Self {
		tracing::error!(error = %detail, "Request failed.");

		Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Internal server error.")
	}
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError::new(status, code, message)
}

impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		match err {
			Error::InvalidRequest { message, fields } => {
				let mut api_err = json_error(StatusCode::BAD_REQUEST, "validation_error", message);

				api_err.fields = (!fields.is_empty()).then_some(fields);

				api_err
			},
			Error::EmailTaken =>
				json_error(StatusCode::BAD_REQUEST, "email_taken", "Email is already registered."),
			Error::InvalidCredentials => json_error(
				StatusCode::UNAUTHORIZED,
				"invalid_credentials",
				"Incorrect email or password.",
			),
			Error::Unauthorized { message } => ApiError::unauthorized(message),
			Error::NotFound { message } => json_error(StatusCode::NOT_FOUND, "not_found", message),
			Error::Conflict { message } => json_error(StatusCode::CONFLICT, "conflict", message),
			Error::RateLimited { limit, retry_after_secs } => {
				let mut api_err = json_error(
					StatusCode::TOO_MANY_REQUESTS,
					"rate_limited",
					format!(
						"Rate limit of {limit} requests exceeded. Try again in {retry_after_secs} seconds."
					),
				);

				api_err.retry_after_secs = Some(retry_after_secs);

				api_err
			},
			Error::Provider { message } => {
				tracing::error!(error = %message, "Provider request failed.");

				json_error(StatusCode::BAD_GATEWAY, "provider_error", "Upstream provider failed.")
			},
			Error::Storage { message } | Error::Internal { message } => ApiError::internal(message),
		}
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		json_error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
	}
}

impl From<PathRejection> for ApiError {
	fn from(_: PathRejection) -> Self {
		json_error(StatusCode::NOT_FOUND, "not_found", "Conversation not found.")
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
		let body = ErrorBody {
			error: self.error_code,
			message: self.message,
			code: self.status.as_u16(),
			timestamp,
			fields: self.fields,
			retry_after_secs: self.retry_after_secs,
		};
		let mut response = (self.status, Json(body)).into_response();

		if let Some(secs) = self.retry_after_secs {
			response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
		}

		response
	}
}
