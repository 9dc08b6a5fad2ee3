use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a memory view document.
///
/// Generated once at creation and kept across persistence round-trips so the
/// host and UI halves can address the same document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub String);

impl DocId {
	/// Generates a fresh random identifier.
	#[must_use]
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	/// Returns the identifier text.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for DocId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl fmt::Display for DocId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Identifier of a debug session as reported by the debugger integration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
	/// Returns the identifier text.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for SessionId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
