use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use sift_domain::{
	conversation,
	search::{SearchHit, SearchResults},
};

use crate::{Error, Result};

/// Neural web search with page text and highlights, in the Exa `/search` wire format.
pub async fn search(
	cfg: &sift_config::SearchProviderConfig,
	query: &str,
	max_results: u32,
) -> Result<SearchResults> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"query": query,
		"numResults": max_results,
		"contents": {
			"text": { "maxCharacters": cfg.max_text_chars },
			"highlights": true,
		},
	});
	let res = client
		.post(url)
		.headers(crate::api_key_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await
		.map_err(|err| classify(err, cfg.timeout_ms))?;
	let status = res.status();

	if !status.is_success() {
		let body = res.text().await.unwrap_or_default();

		return Err(Error::Status { status: status.as_u16(), message: crate::excerpt(&body) });
	}

	let json: Value = res.json().await.map_err(|err| classify(err, cfg.timeout_ms))?;

	parse_search_response(json, cfg.max_text_chars as usize)
}

/// The client timeout covers the whole exchange, body included.
fn classify(err: reqwest::Error, timeout_ms: u64) -> Error {
	if err.is_timeout() {
		Error::Timeout { operation: "Search request", timeout_ms }
	} else {
		Error::Reqwest(err)
	}
}

fn parse_search_response(json: Value, max_text_chars: usize) -> Result<SearchResults> {
	let items = json.get("results").and_then(|v| v.as_array()).ok_or_else(|| {
		Error::InvalidResponse { message: "Search response is missing results array.".to_string() }
	})?;
	let mut hits = Vec::with_capacity(items.len());

	for item in items {
		let Some(url) = item.get("url").and_then(|v| v.as_str()) else {
			continue;
		};
		let title = item.get("title").and_then(|v| v.as_str()).unwrap_or_default();
		let text = item.get("text").and_then(|v| v.as_str()).unwrap_or_default();
		let highlights = item
			.get("highlights")
			.and_then(|v| v.as_array())
			.map(|values| {
				values.iter().filter_map(|v| v.as_str()).map(|s| s.to_string()).collect()
			})
			.unwrap_or_default();

		hits.push(SearchHit {
			title: title.to_string(),
			url: url.to_string(),
			text: conversation::truncate_chars(text, max_text_chars).to_string(),
			highlights,
		});
	}

	Ok(SearchResults::new(hits))
}
