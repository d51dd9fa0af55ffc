/// Errors surfaced to callers at registration or session boundaries.
///
/// Per-tunnel runtime failures (spawn errors, unexpected exits) are not
/// raised — they are logged and recorded in that tunnel's slot so the
/// rest of the session can proceed.
#[derive(Debug)]
pub enum Error {
	/// Bad command template, name, or registration state.
	Config(String),
	/// URL pattern failed to compile.
	Pattern(regex::Error),
	/// A scoped session body could not run to completion.
	Session(String),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::Config(msg) => write!(f, "config error: {}", msg),
			Error::Pattern(e) => write!(f, "invalid pattern: {}", e),
			Error::Session(msg) => write!(f, "session error: {}", msg),
		}
	}
}

impl std::error::Error for Error {}

impl From<regex::Error> for Error {
	fn from(e: regex::Error) -> Self {
		Error::Pattern(e)
	}
}
