pub mod generation;
pub mod search;

mod error;

pub use error::{Error, Result};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

/// Headers for providers that take `Authorization: Bearer <key>`.
pub fn bearer_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	headers_with(AUTHORIZATION, &format!("Bearer {api_key}"), default_headers)
}

/// Headers for providers that take the key in `x-api-key`.
pub fn api_key_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	headers_with(HeaderName::from_static("x-api-key"), api_key, default_headers)
}

fn headers_with(
	name: HeaderName,
	value: &str,
	default_headers: &Map<String, Value>,
) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(name, HeaderValue::from_str(value)?);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: "Default header values must be strings.".to_string(),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

/// Shortens provider error bodies before they reach logs or error messages.
pub(crate) fn excerpt(body: &str) -> String {
	const MAX_CHARS: usize = 200;

	sift_domain::conversation::truncate_chars(body.trim(), MAX_CHARS).to_string()
}
