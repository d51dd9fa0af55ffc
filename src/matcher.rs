use regex::Regex;

/// A URL extracted from one line of tunnel output.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedUrl {
	pub url: String,
	pub note: Option<String>,
}

/// Match one line against a tunnel's pattern.
///
/// The URL is capture group 1 when the pattern defines one, otherwise the
/// whole match. Group 2, when present, becomes the note. Matches that
/// don't already start with `http` get an `http://` prefix.
pub fn match_line(pattern: &Regex, line: &str) -> Option<MatchedUrl> {
	let caps = pattern.captures(line)?;

	let raw = match caps.get(1) {
		Some(m) => m.as_str(),
		None => caps.get(0)?.as_str(),
	};
	let raw = raw.trim();
	if raw.is_empty() {
		return None;
	}

	let url = if raw.starts_with("http") {
		raw.to_string()
	} else {
		format!("http://{}", raw)
	};

	let note = caps
		.get(2)
		.map(|m| m.as_str().trim())
		.filter(|s| !s.is_empty())
		.map(|s| s.to_string());

	Some(MatchedUrl { url, note })
}
