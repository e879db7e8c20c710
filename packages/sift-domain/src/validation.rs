use std::sync::LazyLock;

use regex::Regex;

use crate::conversation;

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_QUERY_CHARS: usize = 500;

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

pub fn is_valid_email(email: &str) -> bool {
	EMAIL_PATTERN.as_ref().map(|re| re.is_match(email)).unwrap_or(false)
}

/// Checks the password policy and returns the first violated rule.
pub fn check_password(password: &str) -> Result<(), &'static str> {
	if password.chars().count() < MIN_PASSWORD_CHARS {
		return Err("Password must be at least 8 characters long.");
	}
	if !password.chars().any(|c| c.is_ascii_uppercase()) {
		return Err("Password must contain at least one uppercase letter.");
	}
	if !password.chars().any(|c| c.is_ascii_lowercase()) {
		return Err("Password must contain at least one lowercase letter.");
	}
	if !password.chars().any(|c| c.is_ascii_digit()) {
		return Err("Password must contain at least one number.");
	}

	Ok(())
}

/// Collapses whitespace runs, trims, and caps the query at [`MAX_QUERY_CHARS`].
pub fn sanitize_query(query: &str) -> String {
	let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");

	conversation::truncate_chars(&collapsed, MAX_QUERY_CHARS).to_string()
}

pub fn normalize_email(email: &str) -> String {
	email.trim().to_ascii_lowercase()
}
