use axum::{
	extract::FromRequestParts,
	http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};

use sift_storage::models::User;

use crate::{routes::ApiError, state::AppState};

/// The user behind the request's bearer token.
pub struct CurrentUser(pub User);
impl FromRequestParts<AppState> for CurrentUser {
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let Some(token) = bearer_token(&parts.headers) else {
			return Err(ApiError::unauthorized("Not authenticated."));
		};
		let user = state.service.authenticate(token).await?;

		Ok(Self(user))
	}
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
	let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
	let (scheme, token) = value.split_once(' ')?;

	if !scheme.eq_ignore_ascii_case("bearer") {
		return None;
	}

	let token = token.trim();

	(!token.is_empty()).then_some(token)
}
