use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	System,
	User,
	Assistant,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::System => "system",
			Self::User => "user",
			Self::Assistant => "assistant",
		}
	}
}
impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for Role {
	type Err = UnknownValue;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"system" => Ok(Self::System),
			"user" => Ok(Self::User),
			"assistant" => Ok(Self::Assistant),
			_ => Err(UnknownValue(raw.to_string())),
		}
	}
}

/// Outcome of the turn a message records. User turns are always complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
	Complete,
	Failed,
	Cancelled,
}
impl MessageStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Complete => "complete",
			Self::Failed => "failed",
			Self::Cancelled => "cancelled",
		}
	}
}
impl FromStr for MessageStatus {
	type Err = UnknownValue;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"complete" => Ok(Self::Complete),
			"failed" => Ok(Self::Failed),
			"cancelled" => Ok(Self::Cancelled),
			_ => Err(UnknownValue(raw.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue(pub String);
impl fmt::Display for UnknownValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Unknown value {:?}.", self.0)
	}
}
impl std::error::Error for UnknownValue {}

/// One turn of a chat-completion prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: Role,
	pub content: String,
}
impl ChatMessage {
	pub fn new(role: Role, content: impl Into<String>) -> Self {
		Self { role, content: content.into() }
	}

	pub fn system(content: impl Into<String>) -> Self {
		Self::new(Role::System, content)
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self::new(Role::User, content)
	}
}
