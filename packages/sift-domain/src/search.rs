use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
	pub title: String,
	pub url: String,
	/// Page text excerpt, already capped by the provider.
	pub text: String,
	#[serde(default)]
	pub highlights: Vec<String>,
}

/// Ranked hits as returned by the web-search provider. Stored verbatim on assistant turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
	pub results: Vec<SearchHit>,
	pub total: usize,
}
impl SearchResults {
	pub fn new(results: Vec<SearchHit>) -> Self {
		let total = results.len();

		Self { results, total }
	}
}
