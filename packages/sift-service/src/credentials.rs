//! Password hashing and signed session tokens.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Error, Result};

/// Salted bcrypt hash. Blocks for the duration of the key schedule.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
	bcrypt::hash(password, cost).map_err(|err| Error::Internal { message: err.to_string() })
}

/// A stored hash that fails to parse never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
	bcrypt::verify(password, hash).unwrap_or(false)
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
	sub: String,
	iat: i64,
	exp: i64,
}

/// Issues and checks HS256 tokens whose subject is a user id.
pub struct TokenManager {
	encoding: EncodingKey,
	decoding: DecodingKey,
	ttl: Duration,
}
impl TokenManager {
	pub fn new(secret: &str, ttl_hours: u64) -> Self {
		let ttl_secs = i64::try_from(ttl_hours.saturating_mul(3_600)).unwrap_or(i64::MAX);

		Self {
			encoding: EncodingKey::from_secret(secret.as_bytes()),
			decoding: DecodingKey::from_secret(secret.as_bytes()),
			ttl: Duration::seconds(ttl_secs),
		}
	}

	pub fn issue(&self, user_id: Uuid) -> Result<String> {
		self.issue_at(user_id, OffsetDateTime::now_utc())
	}

	pub fn issue_at(&self, user_id: Uuid, now: OffsetDateTime) -> Result<String> {
		let expires_at = now
			.checked_add(self.ttl)
			.ok_or_else(|| Error::Internal { message: "Token expiry overflows.".to_string() })?;
		let claims = Claims {
			sub: user_id.to_string(),
			iat: now.unix_timestamp(),
			exp: expires_at.unix_timestamp(),
		};

		jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
			.map_err(|err| Error::Internal { message: err.to_string() })
	}

	pub fn decode(&self, token: &str) -> Result<Uuid> {
		self.decode_at(token, OffsetDateTime::now_utc())
	}

	/// Expiry is checked against `now` without leeway.
	pub fn decode_at(&self, token: &str, now: OffsetDateTime) -> Result<Uuid> {
		let mut validation = Validation::new(Algorithm::HS256);

		validation.validate_exp = false;

		let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
			.map_err(|_| invalid_token())?
			.claims;

		if now.unix_timestamp() >= claims.exp {
			return Err(Error::Unauthorized { message: "Token has expired.".to_string() });
		}

		Uuid::parse_str(&claims.sub).map_err(|_| invalid_token())
	}
}

fn invalid_token() -> Error {
	Error::Unauthorized { message: "Could not validate credentials.".to_string() }
}
