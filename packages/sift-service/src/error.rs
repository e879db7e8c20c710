use std::collections::BTreeMap;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String, fields: BTreeMap<String, String> },
	#[error("Email is already registered.")]
	EmailTaken,
	#[error("Incorrect email or password.")]
	InvalidCredentials,
	#[error("Unauthorized: {message}")]
	Unauthorized { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Rate limit of {limit} requests exceeded.")]
	RateLimited { limit: u64, retry_after_secs: u64 },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Internal error: {message}")]
	Internal { message: String },
}
impl Error {
	pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
		let message = message.into();

		Self::InvalidRequest {
			message: message.clone(),
			fields: BTreeMap::from([(field.to_string(), message)]),
		}
	}
}
impl From<sift_storage::Error> for Error {
	fn from(err: sift_storage::Error) -> Self {
		match err {
			sift_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			sift_storage::Error::Redis(inner) => Self::Storage { message: inner.to_string() },
			sift_storage::Error::InvalidArgument(message) =>
				Self::InvalidRequest { message, fields: BTreeMap::new() },
			sift_storage::Error::NotFound(message) => Self::NotFound { message },
			sift_storage::Error::Conflict(message) => Self::Conflict { message },
			sift_storage::Error::InvalidRow(message) => Self::Storage { message },
		}
	}
}

impl From<sift_providers::Error> for Error {
	fn from(err: sift_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
