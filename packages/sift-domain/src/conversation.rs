/// Title for a new conversation: the leading `max_chars` characters of its first query.
pub fn derive_title(query: &str, max_chars: usize) -> String {
	query.chars().take(max_chars).collect()
}

/// Leading `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
	match text.char_indices().nth(max_chars) {
		Some((idx, _)) => &text[..idx],
		None => text,
	}
}
