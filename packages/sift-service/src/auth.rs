use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use sift_domain::validation;
use sift_storage::models::User;

use crate::{Error, Result, SiftService, credentials};

const DECOY_PASSWORD: &str = "decoy-password-never-matches";

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
	pub email: String,
	pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
	pub id: Uuid,
	pub email: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
	pub token: String,
	pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
	pub id: Uuid,
	pub email: String,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}
impl From<User> for UserProfile {
	fn from(user: User) -> Self {
		Self { id: user.user_id, email: user.email, created_at: user.created_at }
	}
}

impl SiftService {
	pub async fn signup(&self, req: CredentialsRequest) -> Result<AuthResponse> {
		let email = validation::normalize_email(&req.email);
		let mut fields = BTreeMap::new();

		if !validation::is_valid_email(&email) {
			fields.insert("email".to_string(), "Invalid email address.".to_string());
		}
		if let Err(rule) = validation::check_password(&req.password) {
			fields.insert("password".to_string(), rule.to_string());
		}
		if !fields.is_empty() {
			return Err(Error::InvalidRequest { message: "Validation failed.".to_string(), fields });
		}

		let cost = self.cfg.security.bcrypt_cost;
		let password = req.password;
		let password_hash =
			blocking(move || credentials::hash_password(&password, cost)).await?;
		let user = self
			.stores
			.users
			.create_user(&email, &password_hash, OffsetDateTime::now_utc())
			.await
			.map_err(|err| match err {
				sift_storage::Error::Conflict(_) => Error::EmailTaken,
				other => Error::from(other),
			})?;

		tracing::info!(user_id = %user.user_id, "User signed up.");

		self.auth_response(user)
	}

	/// Unknown emails and wrong passwords are rejected alike, after one bcrypt
	/// verification either way.
	pub async fn login(&self, req: CredentialsRequest) -> Result<AuthResponse> {
		let email = validation::normalize_email(&req.email);
		let user = self.stores.users.find_user_by_email(&email).await?;
		let stored_hash = match &user {
			Some(user) => user.password_hash.clone(),
			None => self.decoy_hash().await?,
		};
		let password = req.password;
		let matches =
			blocking(move || Ok(credentials::verify_password(&password, &stored_hash))).await?;

		match user {
			Some(user) if matches => self.auth_response(user),
			Some(user) => {
				tracing::info!(user_id = %user.user_id, "Rejected login with wrong password.");

				Err(Error::InvalidCredentials)
			},
			None => Err(Error::InvalidCredentials),
		}
	}

	/// Resolves a bearer token to the user it was issued for.
	pub async fn authenticate(&self, token: &str) -> Result<User> {
		let user_id = self.tokens.decode(token)?;

		self.stores
			.users
			.find_user_by_id(user_id)
			.await?
			.ok_or_else(|| Error::Unauthorized { message: "User no longer exists.".to_string() })
	}

	async fn decoy_hash(&self) -> Result<String> {
		let cost = self.cfg.security.bcrypt_cost;

		self.decoy_hash
			.get_or_try_init(|| blocking(move || credentials::hash_password(DECOY_PASSWORD, cost)))
			.await
			.cloned()
	}

	fn auth_response(&self, user: User) -> Result<AuthResponse> {
		let token = self.tokens.issue(user.user_id)?;

		Ok(AuthResponse { token, user: UserSummary { id: user.user_id, email: user.email } })
	}
}

async fn blocking<T, F>(f: F) -> Result<T>
where
	F: FnOnce() -> Result<T> + Send + 'static,
	T: Send + 'static,
{
	tokio::task::spawn_blocking(f)
		.await
		.map_err(|err| Error::Internal { message: format!("Credential task failed: {err}") })?
}
